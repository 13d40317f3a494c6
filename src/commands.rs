//! Builders translating each logical timeseries operation into the flat
//! scripted-call layout: routing keys plus `[subcommand, args...]`.
//!
//! Every operation routes through the single `timeseries-lex` script; the
//! subcommand travels as the first flat argument. These builders are shared
//! by the immediate-mode client and the pipeline so both modes encode
//! identically.

use crate::codec::{self, KvArg, Options, Storage};
use crate::error::Error;
use crate::value::{Timestamp, Value};

/// The one script every timeseries operation routes through.
pub const SCRIPT_NAME: &str = "timeseries-lex";

/// One scripted call, ready for execution or enqueueing.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRequest {
    pub script: &'static str,
    pub keys: Vec<String>,
    pub args: Vec<Value>,
}

impl CallRequest {
    fn new(subcommand: &str, key: &str) -> CallRequest {
        CallRequest {
            script: SCRIPT_NAME,
            keys: vec![key.to_string()],
            args: vec![Value::from(subcommand)],
        }
    }

    fn arg(mut self, value: impl Into<Value>) -> CallRequest {
        self.args.push(value.into());
        self
    }

    fn extend(mut self, values: Vec<Value>) -> CallRequest {
        self.args.extend(values);
        self
    }
}

fn upsert(
    subcommand: &str,
    key: &str,
    ts: Timestamp,
    data: Vec<KvArg>,
) -> Result<CallRequest, Error> {
    let values = codec::flatten_kv(data)?;
    Ok(CallRequest::new(subcommand, key)
        .arg(Value::from(ts))
        .extend(values))
}

pub fn add(key: &str, ts: Timestamp, data: Vec<KvArg>) -> Result<CallRequest, Error> {
    upsert("add", key, ts, data)
}

pub fn set(key: &str, ts: Timestamp, data: Vec<KvArg>) -> Result<CallRequest, Error> {
    upsert("set", key, ts, data)
}

pub fn incr_by(key: &str, ts: Timestamp, data: Vec<KvArg>) -> Result<CallRequest, Error> {
    upsert("incrBy", key, ts, data)
}

pub fn del(key: &str, timestamps: Vec<Timestamp>) -> Result<CallRequest, Error> {
    let mut request = CallRequest::new("del", key);
    for ts in timestamps {
        request = request.arg(Value::from(ts));
    }
    Ok(request)
}

fn value_at(
    subcommand: &str,
    key: &str,
    ts: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    let params = codec::encode_options(&options.value_sections())?;
    Ok(CallRequest::new(subcommand, key)
        .arg(Value::from(ts))
        .extend(params))
}

pub fn get(key: &str, ts: Timestamp, options: &Options) -> Result<CallRequest, Error> {
    value_at("get", key, ts, options)
}

pub fn pop(key: &str, ts: Timestamp, options: &Options) -> Result<CallRequest, Error> {
    value_at("pop", key, ts, options)
}

pub fn exists(key: &str, ts: Timestamp) -> Result<CallRequest, Error> {
    Ok(CallRequest::new("exists", key).arg(Value::from(ts)))
}

pub fn size(key: &str) -> Result<CallRequest, Error> {
    Ok(CallRequest::new("size", key))
}

pub fn span(key: &str) -> Result<CallRequest, Error> {
    Ok(CallRequest::new("span", key))
}

pub fn count(
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    let params = codec::encode_options(&options.filter_section())?;
    Ok(CallRequest::new("count", key)
        .arg(Value::from(min))
        .arg(Value::from(max))
        .extend(params))
}

fn ranged(
    subcommand: &str,
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    let params = codec::encode_options(options)?;
    Ok(CallRequest::new(subcommand, key)
        .arg(Value::from(min))
        .arg(Value::from(max))
        .extend(params))
}

pub fn range(
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    ranged("range", key, min, max, options)
}

pub fn rev_range(
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    ranged("revrange", key, min, max, options)
}

pub fn pop_range(
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    ranged("poprange", key, min, max, options)
}

pub fn remove_range(
    key: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    let params = codec::encode_options(&options.removal_sections())?;
    Ok(CallRequest::new("remrange", key)
        .arg(Value::from(min))
        .arg(Value::from(max))
        .extend(params))
}

pub fn times(key: &str, min: Timestamp, max: Timestamp) -> Result<CallRequest, Error> {
    Ok(CallRequest::new("times", key)
        .arg(Value::from(min))
        .arg(Value::from(max)))
}

/// `copy` is the one call routed over two keys: source and destination.
pub fn copy(
    src: &str,
    dest: &str,
    min: Timestamp,
    max: Timestamp,
    options: &Options,
) -> Result<CallRequest, Error> {
    let params = codec::encode_options(options)?;
    let storage = options.storage.unwrap_or(Storage::Timeseries);

    let mut request = CallRequest::new("copy", src)
        .arg(Value::from(min))
        .arg(Value::from(max))
        .extend(params)
        .arg("STORAGE")
        .arg(storage.to_string());
    request.keys.push(dest.to_string());

    Ok(request)
}
