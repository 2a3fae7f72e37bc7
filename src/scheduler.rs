//! Service lifecycle and periodic activities.
//!
//! The scheduler owns the two independent loops of the service: the
//! refresh activity (keep the credential fresh) and the collection
//! activity (pull a snapshot and dispatch it). It is the single writer of
//! the credential store; the refresher only hands records back to it.
//!
//! Fatal errors never terminate the process from inside a background
//! task: they travel over a channel to [`Scheduler::run`], which performs
//! an orderly shutdown and returns the error to `main`.
//!
//! Shutdown policy: after a termination signal no new cycle starts; an
//! in-flight cycle may finish within the configured grace period, after
//! which its retries are cancelled and the task is aborted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectError, Pipeline};
use crate::config::ScheduleConfig;
use crate::credential::{CredentialStore, StoreError};
use crate::dispatch::Dispatcher;
use crate::refresher::{RefreshError, TokenRefresher};

/// Lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SchedulerState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// Errors that end the service with a non-zero exit.
///
/// Unattended re-authorization is impossible, so losing the credential is
/// not recoverable from inside the process.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The startup gate could not load a credential record.
    #[error("cannot load credential at startup: {0}")]
    StartupLoad(StoreError),

    /// The stored credential was already expired at startup.
    #[error("stored credential is expired; re-run the authorization flow and restart")]
    CredentialExpired,

    /// The refresh activity gave up on renewing the credential.
    #[error("token refresh failed: {0}")]
    Refresh(RefreshError),

    /// The refresh activity could not read or write the store.
    #[error("credential store failure: {0}")]
    Store(StoreError),
}

/// Owns the periodic activities and the shutdown sequence.
pub struct Scheduler {
    store: CredentialStore,
    refresher: Arc<TokenRefresher>,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    schedule: ScheduleConfig,
    state: SchedulerState,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: CredentialStore,
        refresher: TokenRefresher,
        pipeline: Pipeline,
        dispatcher: Dispatcher,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            refresher: Arc::new(refresher),
            pipeline: Arc::new(pipeline),
            dispatcher: Arc::new(dispatcher),
            schedule,
            state: SchedulerState::Initializing,
        }
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    ///
    /// Returns `Ok(())` on a clean, signal-driven shutdown; the caller
    /// maps a `FatalError` to a non-zero process exit.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), FatalError>
    where
        F: Future<Output = ()>,
    {
        // Startup gate: without a valid credential the service cannot make
        // a single authenticated call, and it cannot re-authorize unattended.
        let credential = self.store.load().await.map_err(FatalError::StartupLoad)?;
        if !credential.is_valid(Utc::now()) {
            return Err(FatalError::CredentialExpired);
        }
        tracing::info!(expires_at = %credential.expires_at, "stored credential is valid");
        self.set_state(SchedulerState::Running);

        // `ticks` stops the periodic loops; `work` cuts in-flight retries
        // loose once the shutdown grace period has expired.
        let ticks = CancellationToken::new();
        let work = CancellationToken::new();
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<FatalError>(1);

        let refresh_task = tokio::spawn(refresh_activity(
            self.store.clone(),
            Arc::clone(&self.refresher),
            self.schedule.refresh_interval,
            ticks.clone(),
            work.clone(),
            fatal_tx.clone(),
        ));
        let collect_task = tokio::spawn(collect_activity(
            self.store.clone(),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.dispatcher),
            self.schedule.collect_interval,
            ticks.clone(),
            work.clone(),
        ));
        drop(fatal_tx);

        let outcome = tokio::select! {
            () = shutdown => {
                tracing::info!("termination signal received");
                Ok(())
            }
            fatal = fatal_rx.recv() => match fatal {
                Some(e) => {
                    tracing::error!(error = %e, "fatal error reported by background activity");
                    Err(e)
                }
                None => Ok(()),
            }
        };

        self.set_state(SchedulerState::ShuttingDown);
        ticks.cancel();
        self.drain(refresh_task, collect_task, work).await;
        self.set_state(SchedulerState::Stopped);
        outcome
    }

    /// Wait out in-flight cycles, then abandon whatever is left.
    async fn drain(
        &self,
        refresh_task: JoinHandle<()>,
        collect_task: JoinHandle<()>,
        work: CancellationToken,
    ) {
        let refresh_abort = refresh_task.abort_handle();
        let collect_abort = collect_task.abort_handle();

        let joined = async move {
            let _ = refresh_task.await;
            let _ = collect_task.await;
        };

        if tokio::time::timeout(self.schedule.shutdown_grace, joined)
            .await
            .is_err()
        {
            tracing::warn!(
                grace = ?self.schedule.shutdown_grace,
                "in-flight cycle did not finish within the grace period; abandoning"
            );
            work.cancel();
            refresh_abort.abort();
            collect_abort.abort();
        }
    }

    fn set_state(&mut self, next: SchedulerState) {
        tracing::info!(from = %self.state, to = %next, "scheduler state");
        self.state = next;
    }
}

/// Periodically renew the credential and write it back to the store.
///
/// Any refresh or store failure is fatal: the service must not keep
/// running in a silently-degraded state it cannot recover from.
async fn refresh_activity(
    store: CredentialStore,
    refresher: Arc<TokenRefresher>,
    every: Duration,
    ticks: CancellationToken,
    work: CancellationToken,
    fatal: mpsc::Sender<FatalError>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The startup gate just validated the credential, so the first
    // renewal waits a full period.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = ticks.cancelled() => break,
            _ = interval.tick() => {}
        }

        match refresh_once(&store, &refresher, &work).await {
            Ok(()) => {}
            Err(FatalError::Refresh(RefreshError::Cancelled)) => break,
            Err(e) => {
                let _ = fatal.send(e).await;
                break;
            }
        }
    }

    tracing::debug!("refresh activity stopped");
}

async fn refresh_once(
    store: &CredentialStore,
    refresher: &TokenRefresher,
    work: &CancellationToken,
) -> Result<(), FatalError> {
    let current = store.load().await.map_err(FatalError::Store)?;
    let renewed = refresher
        .refresh(&current, work)
        .await
        .map_err(FatalError::Refresh)?;
    store.save(renewed).await.map_err(FatalError::Store)
}

/// Periodically collect a snapshot and dispatch it.
///
/// Nothing in here is fatal: domain failures, an invalid credential, and
/// sink failures all leave the next cycle intact.
async fn collect_activity(
    store: CredentialStore,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    every: Duration,
    ticks: CancellationToken,
    work: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately: one cycle runs right after
    // startup, then the cadence takes over.

    loop {
        tokio::select! {
            _ = ticks.cancelled() => break,
            _ = interval.tick() => {}
        }

        collect_once(&store, &pipeline, &dispatcher, &work).await;
    }

    tracing::debug!("collection activity stopped");
}

async fn collect_once(
    store: &CredentialStore,
    pipeline: &Pipeline,
    dispatcher: &Dispatcher,
    work: &CancellationToken,
) {
    let credential = match store.load().await {
        Ok(credential) => credential,
        Err(e) => {
            tracing::error!(error = %e, "cannot load credential for collection; skipping cycle");
            return;
        }
    };

    match pipeline.collect(&credential, work).await {
        Ok((snapshot, errors)) => {
            for e in &errors {
                tracing::warn!(domain = %e.domain, error = %e, "domain failed this cycle");
            }
            tracing::info!(
                populated = snapshot.populated_domains(),
                failed = errors.len(),
                "collection cycle finished"
            );
            if let Err(e) = dispatcher.dispatch(&snapshot, &errors).await {
                tracing::error!(error = %e, "dispatch failed; next cycle unaffected");
            }
        }
        Err(CollectError::InvalidCredential) => {
            tracing::warn!("credential invalid at collection time; skipping cycle");
        }
        Err(e) => {
            tracing::error!(error = %e, "collection cycle failed");
        }
    }
}
