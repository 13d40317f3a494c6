//! Two-tier scripted-call execution: hash-reference call first, transparent
//! full-source fallback when the server no longer recognizes the hash.

use tracing::debug;

use crate::commands::CallRequest;
use crate::error::Error;
use crate::script::ScriptRegistry;
use crate::store::{Store, StoreBatch, StoreError};
use crate::value::Value;

/// Executes one scripted call against the store.
///
/// With a cached server reference the call goes out as a hash-reference
/// call. An unknown-script failure means a prior upload was lost (typically
/// a server restart); it is recovered by retransmitting the full source,
/// exactly once, without surfacing anything to the caller. A successful
/// source call leaves the script cached server-side, so the content hash is
/// recorded as the new server reference for subsequent calls.
pub async fn execute(
    store: &dyn Store,
    registry: &ScriptRegistry,
    request: CallRequest,
) -> Result<Value, Error> {
    let record = registry
        .get(request.script)
        .ok_or_else(|| Error::ScriptNotFound(request.script.to_string()))?;

    if let Some(server_ref) = &record.server_ref {
        match store
            .eval_by_hash(server_ref, &request.keys, &request.args)
            .await
        {
            Ok(reply) => return Ok(reply),
            Err(StoreError::UnknownScript) => {
                debug!(
                    script = record.name,
                    "server lost the script cache, retrying with full source"
                );
            }
            Err(err) => return Err(surface(err)),
        }
    }

    let reply = store
        .eval_by_source(&record.source, &request.keys, &request.args)
        .await
        .map_err(surface)?;

    // Redis caches any eval'd script under its content hash.
    if record.server_ref.is_none() {
        registry.set_server_ref(&record.name, record.content_hash.clone());
    }

    Ok(reply)
}

/// Enqueues one scripted call into an open atomic batch. No I/O happens
/// here; the hash-versus-source decision is made from the cached reference
/// at enqueue time.
pub fn enqueue(
    batch: &mut dyn StoreBatch,
    registry: &ScriptRegistry,
    request: CallRequest,
) -> Result<(), Error> {
    let record = registry
        .get(request.script)
        .ok_or_else(|| Error::ScriptNotFound(request.script.to_string()))?;

    match &record.server_ref {
        Some(server_ref) => batch.eval_by_hash(server_ref, &request.keys, &request.args),
        None => batch.eval_by_source(&record.source, &request.keys, &request.args),
    }

    Ok(())
}

fn surface(err: StoreError) -> Error {
    match err {
        StoreError::Script(message) => Error::ScriptRuntime(unwrap_script_error(&message)),
        other => Error::Store(other),
    }
}

/// Strips the `user_script:<line>:` boilerplate Redis wraps around an error
/// raised inside a script, leaving the script's own message. The wrapper
/// can appear nested and is removed repeatedly. Messages without the
/// wrapper are returned unchanged.
pub fn unwrap_script_error(message: &str) -> String {
    let mut rest = message;
    let mut unwrapped = None;

    while let Some(at) = rest.find("user_script:") {
        let tail = &rest[at + "user_script:".len()..];
        let tail = tail.trim_start_matches(|c: char| c.is_ascii_digit());
        match tail.strip_prefix(':') {
            Some(tail) => {
                rest = tail.trim_start();
                unwrapped = Some(rest);
            }
            None => break,
        }
    }

    unwrapped.unwrap_or(message).to_string()
}
