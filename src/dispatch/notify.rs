//! Log-based notifier.
//!
//! Emits cycle notifications as structured tracing events, filtered by
//! the configured subscription class. Outbound channels (chat, email)
//! are external collaborators behind the same [`Notifier`] trait.

use async_trait::async_trait;

use crate::dispatch::{DispatchError, EventClass, Notifier};

/// Notifier that writes to the service log.
#[derive(Debug)]
pub struct LogNotifier {
    subscription: EventClass,
}

impl LogNotifier {
    pub fn new(subscription: EventClass) -> Self {
        Self { subscription }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn setup(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn send(&self, data: &[u8], class: EventClass) -> Result<(), DispatchError> {
        if !self.subscription.accepts(class) {
            tracing::debug!(
                class = %class,
                subscription = %self.subscription,
                "notification suppressed by subscription"
            );
            return Ok(());
        }

        tracing::info!(
            class = %class,
            payload = %String::from_utf8_lossy(data),
            "collection cycle notification"
        );
        Ok(())
    }
}
