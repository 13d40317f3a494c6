//! Integration tests driving the client against a mock store that behaves
//! like a Redis server's script cache: hash calls succeed only for scripts
//! the "server" has seen, source calls and uploads populate the cache.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::sleep;

use tslex::script::content_hash;
use tslex::{
    Error, KvArg, Options, ScriptRegistry, Store, StoreBatch, StoreError, StoreEvent, TimeSeries,
    Value,
};

const SCRIPT_SOURCE: &str = "return redis.call('TIME')";

#[derive(Clone, Debug, PartialEq)]
enum Call {
    EvalSha(String),
    EvalSource(String),
    ScriptLoad(String),
    BatchExec(usize),
}

#[derive(Default)]
struct MockState {
    server_cache: HashSet<String>,
    log: Vec<Call>,
    replies: VecDeque<Value>,
    last_args: Vec<Value>,
    fail_next_eval: Option<String>,
    refuse_load: HashSet<String>,
}

impl MockState {
    fn next_reply(&mut self) -> Value {
        self.replies.pop_front().unwrap_or(Value::Int(1))
    }
}

struct MockStore {
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MockStore {
    fn new() -> Arc<MockStore> {
        let (events, _) = broadcast::channel(16);
        Arc::new(MockStore {
            state: Arc::new(Mutex::new(MockState::default())),
            events,
        })
    }

    fn log(&self) -> Vec<Call> {
        self.state.lock().unwrap().log.clone()
    }

    fn uploads(&self) -> usize {
        self.log()
            .iter()
            .filter(|c| matches!(c, Call::EvalSource(_) | Call::ScriptLoad(_)))
            .count()
    }

    fn push_reply(&self, reply: Value) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    fn last_args(&self) -> Vec<Value> {
        self.state.lock().unwrap().last_args.clone()
    }

    fn fail_next_eval(&self, message: &str) {
        self.state.lock().unwrap().fail_next_eval = Some(message.to_string());
    }

    fn refuse_load(&self, source: &str) {
        let hash = content_hash(source);
        self.state.lock().unwrap().refuse_load.insert(hash);
    }

    fn allow_load(&self, source: &str) {
        let hash = content_hash(source);
        self.state.lock().unwrap().refuse_load.remove(&hash);
    }

    /// Simulates a server restart: the script cache is gone.
    fn flush_scripts(&self) {
        self.state.lock().unwrap().server_cache.clear();
    }

    fn send(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Store for MockStore {
    async fn eval_by_hash(
        &self,
        hash: &str,
        _keys: &[String],
        args: &[Value],
    ) -> Result<Value, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Call::EvalSha(hash.to_string()));
        state.last_args = args.to_vec();

        if let Some(message) = state.fail_next_eval.take() {
            return Err(StoreError::Script(message));
        }
        if !state.server_cache.contains(hash) {
            return Err(StoreError::UnknownScript);
        }
        Ok(state.next_reply())
    }

    async fn eval_by_source(
        &self,
        source: &str,
        _keys: &[String],
        args: &[Value],
    ) -> Result<Value, StoreError> {
        let hash = content_hash(source);
        let mut state = self.state.lock().unwrap();
        state.log.push(Call::EvalSource(hash.clone()));
        state.last_args = args.to_vec();

        if let Some(message) = state.fail_next_eval.take() {
            return Err(StoreError::Script(message));
        }
        state.server_cache.insert(hash);
        Ok(state.next_reply())
    }

    async fn load_script(&self, source: &str) -> Result<String, StoreError> {
        let hash = content_hash(source);
        let mut state = self.state.lock().unwrap();
        state.log.push(Call::ScriptLoad(hash.clone()));

        if state.refuse_load.contains(&hash) {
            return Err(StoreError::Connection("script load refused".to_string()));
        }
        state.server_cache.insert(hash.clone());
        Ok(hash)
    }

    fn start_batch(&self) -> Box<dyn StoreBatch> {
        Box::new(MockBatch {
            state: self.state.clone(),
            queued: 0,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

struct MockBatch {
    state: Arc<Mutex<MockState>>,
    queued: usize,
}

#[async_trait]
impl StoreBatch for MockBatch {
    fn eval_by_hash(&mut self, _hash: &str, _keys: &[String], _args: &[Value]) {
        self.queued += 1;
    }

    fn eval_by_source(&mut self, _source: &str, _keys: &[String], _args: &[Value]) {
        self.queued += 1;
    }

    async fn exec(self: Box<Self>) -> Result<Vec<Value>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Call::BatchExec(self.queued));
        Ok((0..self.queued).map(|i| Value::Int(i as i64)).collect())
    }
}

// Makes reload/fallback logs visible under `cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn script_registry(sources: &[(&str, &str)]) -> Arc<ScriptRegistry> {
    let dir = tempfile::tempdir().unwrap();
    for (file, body) in sources {
        let mut f = std::fs::File::create(dir.path().join(file)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    let registry = Arc::new(ScriptRegistry::new());
    registry.load(dir.path()).unwrap();
    registry
}

fn setup() -> (Arc<MockStore>, TimeSeries) {
    init_tracing();
    let store = MockStore::new();
    let registry = script_registry(&[("timeseries-lex.lua", SCRIPT_SOURCE)]);
    let client = TimeSeries::new(store.clone(), registry);
    (store, client)
}

fn sample() -> Vec<KvArg> {
    vec![KvArg::from("value"), KvArg::from(5)]
}

#[tokio::test]
async fn cold_cache_uploads_source_exactly_once() {
    let (store, client) = setup();

    // No server reference yet: the first call pays the source round trip.
    client.add("ts:key", 1000, sample()).await.unwrap();
    // The reference is now cached; the second call takes the hash path.
    client.add("ts:key", 1001, sample()).await.unwrap();

    let hash = content_hash(SCRIPT_SOURCE);
    assert_eq!(
        store.log(),
        vec![Call::EvalSource(hash.clone()), Call::EvalSha(hash)]
    );
    assert_eq!(store.uploads(), 1);
}

#[tokio::test]
async fn lost_server_cache_recovers_transparently() {
    let (store, client) = setup();
    let hash = content_hash(SCRIPT_SOURCE);

    client.add("ts:key", 1000, sample()).await.unwrap();
    assert_eq!(store.log(), vec![Call::EvalSource(hash.clone())]);

    // The server restarts behind the client's back.
    store.flush_scripts();

    // The hash call fails with the unknown-script sentinel and the executor
    // retransmits the source; the caller sees a plain success.
    let reply = client.add("ts:key", 1001, sample()).await.unwrap();
    assert_eq!(reply, Value::Int(1));
    assert_eq!(
        store.log(),
        vec![
            Call::EvalSource(hash.clone()),
            Call::EvalSha(hash.clone()),
            Call::EvalSource(hash.clone()),
        ]
    );

    // And the cache is warm again.
    client.add("ts:key", 1002, sample()).await.unwrap();
    assert_eq!(store.log().last(), Some(&Call::EvalSha(hash)));
}

#[tokio::test]
async fn reconnect_triggers_exactly_one_reload_cycle() {
    init_tracing();
    let store = MockStore::new();
    let registry = script_registry(&[("timeseries-lex.lua", SCRIPT_SOURCE)]);
    let (client, _task) = TimeSeries::with_reload_task(store.clone(), registry);
    let hash = content_hash(SCRIPT_SOURCE);

    store.send(StoreEvent::Connected);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(store.log(), vec![Call::ScriptLoad(hash.clone())]);

    // A connection error invalidates, the next connect re-uploads, a second
    // connect without an error in between is a no-op.
    store.send(StoreEvent::Error);
    store.send(StoreEvent::Connected);
    store.send(StoreEvent::Connected);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(
        store.log(),
        vec![Call::ScriptLoad(hash.clone()), Call::ScriptLoad(hash.clone())]
    );

    // The next call rides the reloaded reference: hash path, no upload.
    client.get("ts:key", 1000, &Options::default()).await.unwrap();
    assert_eq!(store.log().last(), Some(&Call::EvalSha(hash)));
    assert_eq!(store.uploads(), 2);
}

#[tokio::test]
async fn reload_aborts_on_first_failed_upload() {
    init_tracing();
    let store = MockStore::new();
    let registry = script_registry(&[
        ("a-first.lua", "return 'a'"),
        ("b-second.lua", "return 'b'"),
    ]);
    let client = TimeSeries::new(store.clone(), registry);
    let reload = client.reload_coordinator();

    store.refuse_load("return 'b'");
    let err = reload.handle_connected().await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Connection(_))));
    assert!(!reload.is_loaded().await);

    // Only the first script was uploaded before the abort.
    assert_eq!(store.uploads(), 2); // one success + one refused attempt

    // Once the server accepts uploads again the next connect completes.
    store.allow_load("return 'b'");
    reload.handle_connected().await.unwrap();
    assert!(reload.is_loaded().await);
    reload.handle_connected().await.unwrap();
    assert_eq!(store.uploads(), 4); // retry re-uploads both, then idempotent
}

#[tokio::test]
async fn script_runtime_errors_surface_unwrapped() {
    let (store, client) = setup();

    store.fail_next_eval(
        "ERR Error running script (call to f_abc): \
         @user_script:31: user_script:31: timestamp required",
    );

    let err = client.add("ts:key", 1000, sample()).await.unwrap_err();
    match err {
        Error::ScriptRuntime(message) => assert_eq!(message, "timestamp required"),
        other => panic!("expected ScriptRuntime, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_script_name_is_a_programmer_error() {
    let store = MockStore::new();
    let registry = script_registry(&[("something-else.lua", "return 0")]);
    let client = TimeSeries::new(store.clone(), registry);

    let err = client.size("ts:key").await.unwrap_err();
    assert!(matches!(err, Error::ScriptNotFound(name) if name == "timeseries-lex"));
    assert!(store.log().is_empty());
}

#[tokio::test]
async fn get_decodes_alternating_reply() {
    let (store, client) = setup();
    store.push_reply(Value::Array(vec![
        Value::from("active"),
        Value::Int(1),
        Value::from("waiting"),
        Value::Int(2),
    ]));

    let value = client.get("ts:key", 1000, &Options::default()).await.unwrap();
    assert_eq!(
        value,
        Value::Map(vec![
            ("active".to_string(), Value::Int(1)),
            ("waiting".to_string(), Value::Int(2)),
        ])
    );
}

#[tokio::test]
async fn range_decodes_records_in_order() {
    let (store, client) = setup();
    store.push_reply(Value::Array(vec![
        Value::Array(vec![
            Value::from("1000"),
            Value::Array(vec![Value::from("value"), Value::Int(5)]),
        ]),
        Value::Array(vec![
            Value::from("1001"),
            Value::Array(vec![Value::from("value"), Value::Int(10)]),
        ]),
    ]));

    let records = client
        .range("ts:key", "-", "+", &Options::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, Value::from("1000"));
    assert_eq!(
        records[1].1,
        Value::Map(vec![("value".to_string(), Value::Int(10))])
    );
}

#[tokio::test]
async fn batch_queues_locally_and_resolves_in_order() {
    let (store, client) = setup();

    let mut pipe = client.multi();
    for i in 0..5 {
        pipe.add("ts:key", 1000 + i, vec![KvArg::from("value"), KvArg::from(i)])
            .unwrap();
    }
    pipe.pop("ts:key", 1000, &Options::default()).unwrap();
    pipe.range("ts:key", "-", "+", &Options::default()).unwrap();
    assert_eq!(pipe.len(), 7);

    // Nothing has gone out yet.
    assert!(store.log().is_empty());

    let replies = pipe.exec().await.unwrap();
    assert_eq!(replies.len(), 7);
    assert_eq!(replies, (0..7i64).map(Value::Int).collect::<Vec<_>>());
    assert_eq!(store.log(), vec![Call::BatchExec(7)]);
}

#[tokio::test]
async fn empty_batch_resolves_without_io() {
    let (store, client) = setup();

    let replies = client.multi().exec().await.unwrap();
    assert!(replies.is_empty());
    assert!(store.log().is_empty());
}

#[tokio::test]
async fn batch_encoding_errors_surface_at_enqueue() {
    let (store, client) = setup();

    let mut pipe = client.multi();
    let err = pipe
        .add("ts:key", 1000, vec![KvArg::from("lonely")])
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentCount));
    assert!(store.log().is_empty());
}

#[tokio::test]
async fn independent_batches_do_not_clobber_each_other() {
    let (store, client) = setup();

    let mut first = client.multi();
    first.size("ts:a").unwrap();

    let mut second = client.multi();
    second.size("ts:b").unwrap().size("ts:c").unwrap();

    assert_eq!(second.exec().await.unwrap().len(), 2);
    assert_eq!(first.exec().await.unwrap().len(), 1);
    assert_eq!(store.log(), vec![Call::BatchExec(2), Call::BatchExec(1)]);
}

#[tokio::test]
async fn times_all_spans_the_whole_series() {
    let (store, client) = setup();

    client.times_all("ts:key").await.unwrap();
    assert_eq!(
        store.last_args(),
        vec![Value::from("times"), Value::from("-"), Value::from("+")]
    );

    let mut pipe = client.multi();
    pipe.times_all("ts:key").unwrap();
    assert_eq!(pipe.exec().await.unwrap().len(), 1);
}

#[tokio::test]
async fn exists_maps_integer_reply_to_bool() {
    let (store, client) = setup();

    store.push_reply(Value::Int(1));
    assert!(client.exists("ts:key", 1000).await.unwrap());

    store.push_reply(Value::Int(0));
    assert!(!client.exists("ts:key", 1000).await.unwrap());
}
