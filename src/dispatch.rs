//! Snapshot dispatch to export and notification sinks.
//!
//! After each collection cycle the [`Dispatcher`] serializes the snapshot,
//! hands it to the configured [`Exporter`], and notifies the configured
//! [`Notifier`] with an [`EventClass`] derived from the cycle's outcome.
//! Sink failures are logged and surfaced to the caller but are never
//! fatal: the next cycle must still run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::collector::{DomainError, Snapshot};

mod export;
mod notify;

pub use export::FileExporter;
pub use notify::LogNotifier;

/// Errors that can occur while exporting or notifying.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The snapshot could not be serialized.
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Filesystem error in a sink.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink-specific failure.
    #[error("sink error: {0}")]
    Sink(String),
}

/// Classifier for a cycle's outcome, and the notifier's subscription.
///
/// A cycle is classified `success` when no domain failed, `errors`
/// otherwise. A notifier subscribed to `all` emits for both.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventClass {
    Errors,
    Success,
    #[default]
    All,
}

impl EventClass {
    /// Whether a subscription to `self` covers an event of class `event`.
    pub fn accepts(&self, event: EventClass) -> bool {
        matches!(self, Self::All) || *self == event
    }
}

/// Serializes snapshots and pushes them to an external sink.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Prepare the sink (create directories, open connections).
    async fn setup(&self) -> Result<(), DispatchError>;

    /// Push one serialized snapshot.
    async fn export(&self, data: &[u8]) -> Result<(), DispatchError>;

    /// Release per-cycle resources.
    async fn cleanup(&self) -> Result<(), DispatchError>;
}

/// Delivers cycle notifications, filtered by its subscription class.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Prepare the channel.
    async fn setup(&self) -> Result<(), DispatchError>;

    /// Deliver `data` for an event of class `class`. Implementations
    /// decide from their own subscription whether to actually emit.
    async fn send(&self, data: &[u8], class: EventClass) -> Result<(), DispatchError>;
}

/// Hands each cycle's snapshot to the export and notification sinks.
pub struct Dispatcher {
    exporter: Box<dyn Exporter>,
    notifier: Box<dyn Notifier>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(exporter: Box<dyn Exporter>, notifier: Box<dyn Notifier>) -> Self {
        Self { exporter, notifier }
    }

    /// Dispatch one cycle's snapshot and its domain errors.
    ///
    /// The export runs first; its failure is logged and does not prevent
    /// the notification. The first failure, if any, is returned so the
    /// caller can log it; nothing here is fatal.
    pub async fn dispatch(
        &self,
        snapshot: &Snapshot,
        errors: &[DomainError],
    ) -> Result<(), DispatchError> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        let export_result = self.run_export(&data).await;
        if let Err(e) = &export_result {
            tracing::warn!(error = %e, "snapshot export failed");
        }

        let class = if errors.is_empty() {
            EventClass::Success
        } else {
            EventClass::Errors
        };
        let payload = serde_json::to_vec(&serde_json::json!({
            "taken_at": snapshot.taken_at,
            "populated_domains": snapshot.populated_domains(),
            "domain_errors": errors,
        }))?;

        let notify_result = self.notifier.send(&payload, class).await;
        if let Err(e) = &notify_result {
            tracing::warn!(error = %e, class = %class, "notification failed");
        }

        export_result.and(notify_result)
    }

    async fn run_export(&self, data: &[u8]) -> Result<(), DispatchError> {
        self.exporter.setup().await?;
        self.exporter.export(data).await?;
        if let Err(e) = self.exporter.cleanup().await {
            tracing::warn!(error = %e, "export cleanup failed");
        }
        Ok(())
    }
}
