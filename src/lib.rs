//! vitals - Unattended Health-Data Collection Library
//!
//! This crate provides the core functionality for the vitals collection
//! service. It can be used as a library by other Rust projects, or run as
//! a standalone binary with the `vitals` executable.
//!
//! # Architecture
//!
//! - **Credential**: persisted OAuth2 record behind a single-writer store
//! - **Refresher**: periodic token exchange with retry/backoff
//! - **Collector**: six-domain pipeline assembling a per-cycle snapshot
//! - **Dispatch**: export and notification sinks behind trait seams
//! - **Scheduler**: two periodic activities, fatal channel, graceful shutdown

pub mod backoff;
pub mod collector;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod refresher;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use collector::{DomainError, Pipeline, Snapshot};
pub use config::AppConfig;
pub use credential::{Credential, CredentialStore};
pub use dispatch::{Dispatcher, EventClass, Exporter, FileExporter, LogNotifier, Notifier};
pub use refresher::TokenRefresher;
pub use scheduler::{FatalError, Scheduler};
