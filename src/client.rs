//! The immediate-mode command façade: one async method per logical
//! timeseries operation, each a single round trip against the store.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::codec::{self, KvArg, Options};
use crate::commands;
use crate::executor;
use crate::pipeline::Pipeline;
use crate::reload::ReloadCoordinator;
use crate::script::ScriptRegistry;
use crate::store::Store;
use crate::value::{Timestamp, Value};
use crate::Result;

/// A timeseries client over an abstract store connection.
///
/// Construction wires a [`ReloadCoordinator`] to the store's lifecycle
/// events, so the script cache recovers transparently after reconnects.
/// Clones share the registry and coordinator.
#[derive(Clone)]
pub struct TimeSeries {
    store: Arc<dyn Store>,
    registry: Arc<ScriptRegistry>,
    reload: ReloadCoordinator,
}

impl TimeSeries {
    /// Builds a client and spawns the reload task listening on the store's
    /// event subscription. The registry must already be loaded.
    pub fn new(store: Arc<dyn Store>, registry: Arc<ScriptRegistry>) -> TimeSeries {
        let (client, task) = TimeSeries::with_reload_task(store, registry);
        drop(task);
        client
    }

    /// Like [`TimeSeries::new`], but hands back the reload task handle so
    /// hosts can tie its lifetime to their own shutdown.
    pub fn with_reload_task(
        store: Arc<dyn Store>,
        registry: Arc<ScriptRegistry>,
    ) -> (TimeSeries, JoinHandle<()>) {
        let reload = ReloadCoordinator::new(registry.clone(), store.clone());
        let task = reload.clone().spawn(store.subscribe());

        let client = TimeSeries {
            store,
            registry,
            reload,
        };
        (client, task)
    }

    pub fn reload_coordinator(&self) -> &ReloadCoordinator {
        &self.reload
    }

    /// Opens an atomic batch. The returned builder queues calls locally and
    /// performs no network I/O until [`Pipeline::exec`]. Builders are
    /// independent of each other and of this client.
    pub fn multi(&self) -> Pipeline {
        Pipeline::new(self.store.start_batch(), self.registry.clone())
    }

    /// Records fields at a timestamp. Fails if any field of the sample
    /// already exists at that timestamp.
    pub async fn add(
        &self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<Value> {
        self.call(commands::add(key, ts.into(), data.into_iter().collect())?)
            .await
    }

    /// Records fields at a timestamp, overwriting existing ones.
    pub async fn set(
        &self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<Value> {
        self.call(commands::set(key, ts.into(), data.into_iter().collect())?)
            .await
    }

    /// Removes whole samples at the given timestamps.
    pub async fn del(
        &self,
        key: &str,
        timestamps: impl IntoIterator<Item = impl Into<Timestamp>>,
    ) -> Result<Value> {
        let timestamps = timestamps.into_iter().map(Into::into).collect();
        self.call(commands::del(key, timestamps)?).await
    }

    /// Reads the sample at a timestamp, decoded into an ordered field map
    /// (JSON-formatted replies are parsed). Nil when absent.
    pub async fn get(
        &self,
        key: &str,
        ts: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Value> {
        let reply = self.call(commands::get(key, ts.into(), options)?).await?;
        codec::decode_object(reply)
    }

    /// Reads and removes the sample at a timestamp, decoded as in
    /// [`TimeSeries::get`].
    pub async fn pop(
        &self,
        key: &str,
        ts: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Value> {
        let reply = self.call(commands::pop(key, ts.into(), options)?).await?;
        codec::decode_object(reply)
    }

    pub async fn exists(&self, key: &str, ts: impl Into<Timestamp>) -> Result<bool> {
        let reply = self.call(commands::exists(key, ts.into())?).await?;
        Ok(reply.as_int().unwrap_or(0) != 0)
    }

    /// Number of samples in the series.
    pub async fn size(&self, key: &str) -> Result<Value> {
        self.call(commands::size(key)?).await
    }

    /// Oldest and newest timestamps of the series.
    pub async fn span(&self, key: &str) -> Result<Value> {
        self.call(commands::span(key)?).await
    }

    /// Increments numeric fields at a timestamp by the given deltas.
    pub async fn incr_by(
        &self,
        key: &str,
        ts: impl Into<Timestamp>,
        data: impl IntoIterator<Item = KvArg>,
    ) -> Result<Value> {
        self.call(commands::incr_by(key, ts.into(), data.into_iter().collect())?)
            .await
    }

    /// Counts samples in `[min, max]`; only the filter option applies.
    pub async fn count(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Value> {
        self.call(commands::count(key, min.into(), max.into(), options)?)
            .await
    }

    /// Samples in `[min, max]`, oldest first, decoded into
    /// `(timestamp, fields)` records.
    pub async fn range(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Vec<(Value, Value)>> {
        let reply = self
            .call(commands::range(key, min.into(), max.into(), options)?)
            .await?;
        codec::decode_records(reply)
    }

    /// Samples in `[min, max]`, newest first.
    pub async fn rev_range(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Vec<(Value, Value)>> {
        let reply = self
            .call(commands::rev_range(key, min.into(), max.into(), options)?)
            .await?;
        codec::decode_records(reply)
    }

    /// Reads and removes samples in `[min, max]`.
    pub async fn pop_range(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Vec<(Value, Value)>> {
        let reply = self
            .call(commands::pop_range(key, min.into(), max.into(), options)?)
            .await?;
        codec::decode_records(reply)
    }

    /// Removes samples in `[min, max]`; filter and limit options apply.
    pub async fn remove_range(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Value> {
        self.call(commands::remove_range(key, min.into(), max.into(), options)?)
            .await
    }

    /// Copies samples in `[min, max]` from `src` to `dest`, honoring the
    /// storage option (`timeseries` by default).
    pub async fn copy(
        &self,
        src: &str,
        dest: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
        options: &Options,
    ) -> Result<Value> {
        self.call(commands::copy(src, dest, min.into(), max.into(), options)?)
            .await
    }

    /// Raw timestamps in `[min, max]`. Pass [`Timestamp::Oldest`] and
    /// [`Timestamp::Newest`] (or use [`TimeSeries::times_all`]) to walk the
    /// whole series.
    pub async fn times(
        &self,
        key: &str,
        min: impl Into<Timestamp>,
        max: impl Into<Timestamp>,
    ) -> Result<Value> {
        self.call(commands::times(key, min.into(), max.into())?)
            .await
    }

    /// Raw timestamps of the whole series.
    pub async fn times_all(&self, key: &str) -> Result<Value> {
        self.times(key, Timestamp::Oldest, Timestamp::Newest).await
    }

    async fn call(&self, request: commands::CallRequest) -> Result<Value> {
        executor::execute(self.store.as_ref(), &self.registry, request).await
    }
}

impl std::fmt::Debug for TimeSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeries")
            .field("scripts", &self.registry.names())
            .finish()
    }
}
