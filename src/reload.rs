//! Re-uploads every known script on each (re)connection, so hash-reference
//! calls keep working across server restarts.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Error;
use crate::script::ScriptRegistry;
use crate::store::{Store, StoreEvent};

/// Process-wide reload state. Cheap to clone; all clones share one loaded
/// flag.
///
/// The flag lives behind an async mutex held for the whole upload cycle:
/// concurrent connect events serialize instead of double-uploading. Normal
/// calls never take this lock; ones racing ahead of a reload simply fall
/// back to the source path in the executor.
#[derive(Clone)]
pub struct ReloadCoordinator {
    registry: Arc<ScriptRegistry>,
    store: Arc<dyn Store>,
    loaded: Arc<Mutex<bool>>,
}

impl ReloadCoordinator {
    pub fn new(registry: Arc<ScriptRegistry>, store: Arc<dyn Store>) -> ReloadCoordinator {
        ReloadCoordinator {
            registry,
            store,
            loaded: Arc::new(Mutex::new(false)),
        }
    }

    /// Handles a `Connected` lifecycle event: uploads every script, one at a
    /// time in registry order, recording each returned server reference.
    /// Idempotent while loaded. The first failed upload aborts the rest and
    /// leaves the coordinator unloaded, so the next connect retries.
    pub async fn handle_connected(&self) -> Result<(), Error> {
        let mut loaded = self.loaded.lock().await;
        if *loaded {
            return Ok(());
        }

        debug!("loading scripts into the store after (re)connect");
        for name in self.registry.names() {
            let record = match self.registry.get(&name) {
                Some(record) => record,
                None => continue,
            };

            let server_ref = self.store.load_script(&record.source).await.map_err(|e| {
                warn!(script = name, error = %e, "script upload failed, aborting reload");
                e
            })?;
            self.registry.set_server_ref(&name, server_ref);
        }

        *loaded = true;
        Ok(())
    }

    /// Handles an `Error` lifecycle event: the server's script cache can no
    /// longer be trusted, so the next connect must re-upload.
    pub async fn handle_error(&self) {
        *self.loaded.lock().await = false;
        debug!("connection error, script load state invalidated");
    }

    pub async fn is_loaded(&self) -> bool {
        *self.loaded.lock().await
    }

    /// Drives the coordinator from a store's lifecycle event stream in a
    /// background task. The task ends when the event sender is dropped.
    /// Reload failures are logged, not propagated; the executor's source
    /// fallback keeps calls working in the meantime.
    pub fn spawn(self, mut events: broadcast::Receiver<StoreEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StoreEvent::Connected) => {
                        if let Err(e) = self.handle_connected().await {
                            warn!(error = %e, "script reload failed");
                        }
                    }
                    Ok(StoreEvent::Error) => self.handle_error().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events could include an error; reload on the
                        // next connect to stay safe.
                        warn!(skipped, "lagged behind store lifecycle events");
                        self.handle_error().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
