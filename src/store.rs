use async_trait::async_trait;
use thiserror::Error as ThisError;
use tokio::sync::broadcast;

use crate::value::Value;

/// A connection lifecycle event emitted by the store adapter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoreEvent {
    /// The connection is (re)established. Includes the first connect.
    Connected,
    /// The connection failed. Server-side script caches can no longer be
    /// assumed to hold.
    Error,
}

#[derive(Debug, ThisError)]
pub enum StoreError {
    /// The server does not recognize the script hash (Redis `NOSCRIPT`).
    /// Adapters must map this case distinctly: the executor's source
    /// fallback depends on it.
    #[error("NOSCRIPT no matching script on the server")]
    UnknownScript,

    /// Any other script-execution failure, carrying the raw server error
    /// text (which may embed a `user_script:<line>:` wrapper).
    #[error("{0}")]
    Script(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// The capability surface this crate consumes from a Redis connection.
///
/// Adapters over a concrete driver implement this; the crate never inspects
/// the driver itself.
#[async_trait]
pub trait Store: Send + Sync {
    /// `EVALSHA hash numkeys keys... args...`
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[String],
        args: &[Value],
    ) -> Result<Value, StoreError>;

    /// `EVAL source numkeys keys... args...`
    async fn eval_by_source(
        &self,
        source: &str,
        keys: &[String],
        args: &[Value],
    ) -> Result<Value, StoreError>;

    /// `SCRIPT LOAD source`, returning the server-side hash reference.
    async fn load_script(&self, source: &str) -> Result<String, StoreError>;

    /// Opens the store's native atomic batch (`MULTI`). Enqueued calls incur
    /// no network I/O until the batch executes.
    fn start_batch(&self) -> Box<dyn StoreBatch>;

    /// Subscribes to connection lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// An open atomic batch. Calls queue locally; `exec` runs them as one
/// contiguous unit and yields their replies in enqueue order.
#[async_trait]
pub trait StoreBatch: Send {
    fn eval_by_hash(&mut self, hash: &str, keys: &[String], args: &[Value]);

    fn eval_by_source(&mut self, source: &str, keys: &[String], args: &[Value]);

    async fn exec(self: Box<Self>) -> Result<Vec<Value>, StoreError>;
}
