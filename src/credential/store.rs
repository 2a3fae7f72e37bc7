//! Credential store owner task and its cloneable handle.
//!
//! Single-writer pattern: one tokio task owns the credential file and
//! processes load/save commands from an mpsc channel one at a time, so
//! concurrent activities observe either the fully-old or the fully-new
//! record and never a mix. Saves go to a temporary file in the same
//! directory and are renamed over the target, keeping the record intact
//! even if the process dies mid-write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::credential::{Credential, StoreError};

/// Command channel capacity. Only two activities ever talk to the store.
const CHANNEL_CAPACITY: usize = 16;

/// Commands processed by the store owner task.
enum Command {
    Load {
        reply: oneshot::Sender<Result<Credential, StoreError>>,
    },
    Save {
        credential: Credential,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load { .. } => f.write_str("Load"),
            Self::Save { .. } => f.write_str("Save"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable handle to the credential store owner task.
///
/// All operations are messages; replies arrive on oneshot channels. The
/// handle is cheap to clone and safe to share across activities.
#[derive(Clone)]
pub struct CredentialStore {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Spawn the owner task for the record at `path`.
    ///
    /// Returns the handle and the task's join handle; await the latter
    /// after [`CredentialStore::shutdown`] for a clean exit.
    pub fn spawn(path: impl AsRef<Path>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = StoreActor {
            path: path.as_ref().to_path_buf(),
            rx,
        };
        let handle = tokio::spawn(actor.run());
        (Self { tx }, handle)
    }

    /// Load the current credential record.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if no record exists at the path.
    pub async fn load(&self) -> Result<Credential, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Load { reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Persist a credential record, fully replacing any previous one.
    pub async fn save(&self, credential: Credential) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Save { credential, reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Ask the owner task to stop after draining queued commands.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| StoreError::Closed)
    }
}

/// Owner of the credential file. Processes one command at a time.
struct StoreActor {
    path: PathBuf,
    rx: mpsc::Receiver<Command>,
}

impl StoreActor {
    async fn run(mut self) {
        tracing::debug!(path = %self.path.display(), "credential store started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Load { reply } => {
                    let _ = reply.send(self.load_file().await);
                }
                Command::Save { credential, reply } => {
                    let result = self.save_file(&credential).await;
                    if let Err(e) = &result {
                        tracing::error!(error = %e, "credential save failed");
                    }
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }

        tracing::debug!("credential store stopped");
    }

    async fn load_file(&self) -> Result<Credential, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save_file(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-to-temp-then-rename keeps the target whole at every instant.
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(credential)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
