//! The batch-mode command façade: a builder over the store's atomic batch
//! primitive. Calls queue locally and hit the network only at `exec`.

use std::sync::Arc;

use crate::codec::{KvArg, Options};
use crate::commands;
use crate::error::Error;
use crate::executor;
use crate::script::ScriptRegistry;
use crate::store::StoreBatch;
use crate::value::{Timestamp, Value};
use crate::Result;

/// An open atomic batch of timeseries calls.
///
/// Methods mirror the immediate-mode client but are synchronous and return
/// `&mut Self` for chaining; encoding errors surface at enqueue time.
/// Replies come back raw and undecoded from [`Pipeline::exec`], in enqueue
/// order: which decode applies depends on the call each reply answers, and
/// that knowledge stays with the caller.
///
/// Pipelines are independent objects: opening a second one never discards
/// the first.
pub struct Pipeline {
    batch: Box<dyn StoreBatch>,
    registry: Arc<ScriptRegistry>,
    queued: usize,
}

impl Pipeline {
    pub(crate) fn new(batch: Box<dyn StoreBatch>, registry: Arc<ScriptRegistry>) -> Pipeline {
        Pipeline {
            batch,
            registry,
            queued: 0,
        }
    }

    /// Number of calls queued so far.
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    pub fn add(
        &mut self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<&mut Self> {
        self.enqueue(commands::add(key, ts.into(), data.into_iter().collect())?)
    }

    pub fn set(
        &mut self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<&mut Self> {
        self.enqueue(commands::set(key, ts.into(), data.into_iter().collect())?)
    }

    pub fn del(
        &mut self,
        key: &str,
        timestamps: impl IntoIterator<Item = impl Into<Timestamp>>,
    ) -> Result<&mut Self> {
        let timestamps = timestamps.into_iter().map(Into::into).collect();
        self.enqueue(commands::del(key, timestamps)?)
    }

    pub fn get(
        &mut self,
        key: &str,
        ts: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::get(key, ts.into(), options)?)
    }

    pub fn pop(
        &mut self,
        key: &str,
        ts: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::pop(key, ts.into(), options)?)
    }

    pub fn exists(&mut self, key: &str, ts: impl Into<Timestamp>) -> Result<&mut Self> {
        self.enqueue(commands::exists(key, ts.into())?)
    }

    pub fn size(&mut self, key: &str) -> Result<&mut Self> {
        self.enqueue(commands::size(key)?)
    }

    pub fn span(&mut self, key: &str) -> Result<&mut Self> {
        self.enqueue(commands::span(key)?)
    }

    pub fn incr_by(
        &mut self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<&mut Self> {
        self.enqueue(commands::incr_by(key, ts.into(), data.into_iter().collect())?)
    }

    pub fn count(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::count(key, min.into(), max.into(), options)?)
    }

    pub fn range(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::range(key, min.into(), max.into(), options)?)
    }

    pub fn rev_range(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::rev_range(key, min.into(), max.into(), options)?)
    }

    pub fn pop_range(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::pop_range(key, min.into(), max.into(), options)?)
    }

    pub fn remove_range(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::remove_range(key, min.into(), max.into(), options)?)
    }

    pub fn copy(
        &mut self,
        src: &str,
        dest: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<&mut Self> {
        self.enqueue(commands::copy(src, dest, min.into(), max.into(), options)?)
    }

    pub fn times(
        &mut self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
    ) -> Result<&mut Self> {
        self.enqueue(commands::times(key, min.into(), max.into())?)
    }

    /// Queues a `times` call over the whole series.
    pub fn times_all(&mut self, key: &str) -> Result<&mut Self> {
        self.times(key, Timestamp::Oldest, Timestamp::Newest)
    }

    /// Executes all queued calls as one contiguous unit and returns their
    /// raw replies in enqueue order. An empty pipeline resolves to an empty
    /// sequence without touching the store.
    pub async fn exec(self) -> Result<Vec<Value>> {
        if self.queued == 0 {
            return Ok(Vec::new());
        }
        self.batch.exec().await.map_err(Error::from)
    }

    fn enqueue(&mut self, request: commands::CallRequest) -> Result<&mut Self> {
        executor::enqueue(self.batch.as_mut(), &self.registry, request)?;
        self.queued += 1;
        Ok(self)
    }
}
