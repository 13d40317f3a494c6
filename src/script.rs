use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::Error;

/// One named server-side script known to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptRecord {
    /// Logical name, derived from the source filename with the `.lua`
    /// extension stripped.
    pub name: String,
    /// Exact source text as read from disk.
    pub source: String,
    /// SHA-1 hex digest of the source bytes. Stable across process runs.
    pub content_hash: String,
    /// The server's runtime handle for the uploaded script. Not stable
    /// across server restarts; (re)established by the reload coordinator
    /// and by a successful source-call fallback.
    pub server_ref: Option<String>,
}

impl ScriptRecord {
    fn new(name: String, source: String) -> ScriptRecord {
        let content_hash = content_hash(&source);
        ScriptRecord {
            name,
            source,
            content_hash,
            server_ref: None,
        }
    }
}

/// SHA-1 hex digest of a script's exact source text. Redis identifies cached
/// scripts by this digest.
pub fn content_hash(source: &str) -> String {
    let mut sha = sha1_smol::Sha1::new();
    sha.update(source.as_bytes());
    sha.digest().to_string()
}

/// The process-wide script catalog: one record per distinct script name,
/// populated once from a source directory and never emptied afterwards.
///
/// Cheap to share: interior state sits behind a mutex, records are read out
/// by clone. The lock is never held across an await.
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: Mutex<BTreeMap<String, ScriptRecord>>,
}

impl ScriptRegistry {
    pub fn new() -> ScriptRegistry {
        ScriptRegistry::default()
    }

    /// Reads every `*.lua` file in `dir` into the registry. Idempotent: a
    /// populated registry ignores further calls, so the directory is read
    /// exactly once per process no matter how many clients are built.
    pub fn load(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();
        let mut scripts = self.lock();

        if !scripts.is_empty() {
            return Ok(());
        }

        let entries = std::fs::read_dir(dir).map_err(|source| Error::ScriptLoad {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| Error::ScriptLoad {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }

            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let source = std::fs::read_to_string(&path).map_err(|source| Error::ScriptLoad {
                path: path.clone(),
                source,
            })?;

            let record = ScriptRecord::new(name.clone(), source);
            debug!(name, hash = %record.content_hash, "loaded script");
            scripts.insert(name, record);
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ScriptRecord> {
        self.lock().get(name).cloned()
    }

    /// Script names in registry (iteration) order.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records the server's handle for an uploaded script. A no-op for
    /// unknown names.
    pub fn set_server_ref(&self, name: &str, server_ref: String) {
        if let Some(record) = self.lock().get_mut(name) {
            record.server_ref = Some(server_ref);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ScriptRecord>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
