use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::store::StoreError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The script directory (or one of its files) could not be read at
    /// startup. Fatal: the client cannot operate without its scripts.
    #[error("failed to load scripts from {path:?}: {source}")]
    ScriptLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A call referenced a script name the registry never loaded.
    #[error("script {0:?} not found")]
    ScriptNotFound(String),

    /// A flattened key-value argument list ended up with an unmatched key.
    #[error("key-value pairs mismatched")]
    ArgumentCount,

    /// A structured option carried a value of the wrong type.
    #[error("{0}")]
    ArgumentType(String),

    /// The server-side script rejected the call. The message is the script's
    /// own error text, with the `user_script:<line>:` wrapper stripped.
    #[error("{0}")]
    ScriptRuntime(String),

    /// A store-level failure, surfaced as-is.
    #[error(transparent)]
    Store(#[from] StoreError),
}
