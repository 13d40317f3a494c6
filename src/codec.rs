//! Translation between structured call arguments and the flat positional
//! argument lists the scripted wire protocol expects, and back from opaque
//! flat replies into structured results.

use itertools::Itertools;
use strum_macros::{Display, EnumString};

use crate::error::Error;
use crate::value::Value;

/// A single data argument to `add`/`set`/`incr_by`: either one scalar of a
/// flat alternating key/value sequence, or a structured map contributing all
/// of its pairs at once.
#[derive(Clone, Debug)]
pub enum KvArg {
    Scalar(Value),
    Pairs(Vec<(String, Value)>),
}

impl From<Value> for KvArg {
    fn from(value: Value) -> KvArg {
        KvArg::Scalar(value)
    }
}

impl From<&str> for KvArg {
    fn from(s: &str) -> KvArg {
        KvArg::Scalar(Value::from(s))
    }
}

impl From<String> for KvArg {
    fn from(s: String) -> KvArg {
        KvArg::Scalar(Value::from(s))
    }
}

impl From<i64> for KvArg {
    fn from(i: i64) -> KvArg {
        KvArg::Scalar(Value::from(i))
    }
}

impl From<i32> for KvArg {
    fn from(i: i32) -> KvArg {
        KvArg::Scalar(Value::from(i))
    }
}

impl From<f64> for KvArg {
    fn from(d: f64) -> KvArg {
        KvArg::Scalar(Value::from(d))
    }
}

impl From<bool> for KvArg {
    fn from(b: bool) -> KvArg {
        KvArg::Scalar(Value::from(b))
    }
}

impl From<Vec<(String, Value)>> for KvArg {
    fn from(pairs: Vec<(String, Value)>) -> KvArg {
        KvArg::Pairs(pairs)
    }
}

/// Flattens a mixed scalar/map argument sequence into the alternating
/// key/value list the scripts expect. Maps contribute pairs in their
/// iteration order; nil values encode as the literal string `"null"`.
pub fn flatten_kv(args: impl IntoIterator<Item = KvArg>) -> Result<Vec<Value>, Error> {
    let mut flat = Vec::new();

    for arg in args {
        match arg {
            KvArg::Scalar(Value::Nil) => flat.push(Value::from("null")),
            KvArg::Scalar(value) => flat.push(value),
            KvArg::Pairs(pairs) => {
                for (key, value) in pairs {
                    flat.push(Value::from(key));
                    flat.push(match value {
                        Value::Nil => Value::from("null"),
                        value => value,
                    });
                }
            }
        }
    }

    if flat.len() % 2 != 0 {
        return Err(Error::ArgumentCount);
    }

    Ok(flat)
}

/// A server-side filter expression: either a single pre-joined token or a
/// term list where comparison terms and the `AND`/`OR` joiners are separate
/// tokens, combined strictly left to right.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Expr(String),
    Terms(Vec<String>),
}

impl From<&str> for Filter {
    fn from(expr: &str) -> Filter {
        Filter::Expr(expr.to_string())
    }
}

impl From<String> for Filter {
    fn from(expr: String) -> Filter {
        Filter::Expr(expr)
    }
}

impl From<Vec<String>> for Filter {
    fn from(terms: Vec<String>) -> Filter {
        Filter::Terms(terms)
    }
}

impl From<&[&str]> for Filter {
    fn from(terms: &[&str]) -> Filter {
        Filter::Terms(terms.iter().map(|t| t.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Filter {
    fn from(terms: [&str; N]) -> Filter {
        Filter::Terms(terms.iter().map(|t| t.to_string()).collect())
    }
}

/// `LIMIT offset count`. Members are kept as wire values so that malformed
/// caller input surfaces as `ArgumentType` at encode time rather than as a
/// server-side script error. Integers, integer-looking strings, and finite
/// floats (truncated toward zero) are all accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct Limit {
    pub offset: Value,
    pub count: Value,
}

impl Limit {
    pub fn new(offset: i64, count: i64) -> Limit {
        Limit {
            offset: Value::Int(offset),
            count: Value::Int(count),
        }
    }
}

impl From<(Value, Value)> for Limit {
    fn from((offset, count): (Value, Value)) -> Limit {
        Limit { offset, count }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AggregationKind {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    First,
    Last,
    Range,
    Stats,
    Distinct,
}

/// Aggregation bucket size: explicit milliseconds or a human duration span
/// such as `"1m"` or `"2 hours"`.
#[derive(Clone, Debug, PartialEq)]
pub enum Bucket {
    Millis(i64),
    Span(String),
}

impl From<i64> for Bucket {
    fn from(ms: i64) -> Bucket {
        Bucket::Millis(ms)
    }
}

impl From<&str> for Bucket {
    fn from(span: &str) -> Bucket {
        Bucket::Span(span.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub kind: AggregationKind,
    pub bucket: Bucket,
}

impl Aggregation {
    pub fn new(kind: AggregationKind, bucket: impl Into<Bucket>) -> Aggregation {
        Aggregation {
            kind,
            bucket: bucket.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    Json,
}

/// Destination encoding for `copy`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Storage {
    #[default]
    Timeseries,
    Hash,
}

/// The caller-supplied option bag. Never persisted: translated to flat wire
/// arguments and discarded. Each command consumes only the sections it
/// understands (see the façade).
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub format: Option<Format>,
    pub filter: Option<Filter>,
    pub limit: Option<Limit>,
    pub aggregation: Option<Aggregation>,
    pub labels: Vec<String>,
    pub redact: Vec<String>,
    /// Consumed only by `copy`; never emitted by [`encode_options`].
    pub storage: Option<Storage>,
}

impl Options {
    /// A copy with only the sections `get`/`pop` understand.
    pub(crate) fn value_sections(&self) -> Options {
        Options {
            format: self.format,
            labels: self.labels.clone(),
            redact: self.redact.clone(),
            ..Options::default()
        }
    }

    /// A copy with only the filter section (`count`).
    pub(crate) fn filter_section(&self) -> Options {
        Options {
            filter: self.filter.clone(),
            ..Options::default()
        }
    }

    /// A copy with only the filter and limit sections (`remove_range`).
    pub(crate) fn removal_sections(&self) -> Options {
        Options {
            filter: self.filter.clone(),
            limit: self.limit.clone(),
            ..Options::default()
        }
    }
}

/// Encodes an option bag into flat wire arguments, in the fixed section
/// order FORMAT, FILTER, LIMIT, AGGREGATION, LABELS, REDACT.
pub fn encode_options(options: &Options) -> Result<Vec<Value>, Error> {
    let mut params = Vec::new();

    if let Some(format) = options.format {
        params.push(Value::from("FORMAT"));
        params.push(Value::from(format.to_string()));
    }

    if let Some(filter) = &options.filter {
        params.push(Value::from("FILTER"));
        match filter {
            Filter::Expr(expr) => params.push(Value::from(expr.clone())),
            Filter::Terms(terms) => {
                params.extend(terms.iter().map(|t| Value::from(t.clone())));
            }
        }
    }

    if let Some(limit) = &options.limit {
        params.push(Value::from("LIMIT"));
        params.push(numeric(&limit.offset, "limit.offset")?);
        params.push(numeric(&limit.count, "limit.count")?);
    }

    if let Some(aggregation) = &options.aggregation {
        params.push(Value::from("AGGREGATION"));
        params.push(Value::from(aggregation.kind.to_string()));
        params.push(match &aggregation.bucket {
            Bucket::Millis(ms) => Value::Int(*ms),
            Bucket::Span(span) => Value::Int(parse_duration_ms(span)?),
        });

        // stats/distinct replies only make sense serialized; request JSON
        // unless the caller already chose a format.
        let wants_json = matches!(
            aggregation.kind,
            AggregationKind::Stats | AggregationKind::Distinct
        );
        if wants_json && options.format.is_none() {
            params.push(Value::from("FORMAT"));
            params.push(Value::from(Format::Json.to_string()));
        }
    }

    if !options.labels.is_empty() {
        params.push(Value::from("LABELS"));
        params.extend(options.labels.iter().map(|l| Value::from(l.clone())));
    }

    if !options.redact.is_empty() {
        params.push(Value::from("REDACT"));
        params.extend(options.redact.iter().map(|r| Value::from(r.clone())));
    }

    Ok(params)
}

// LIMIT members must be numeric. Integer-looking strings are accepted, and
// floats are truncated toward zero like an integer parse would.
fn numeric(value: &Value, what: &str) -> Result<Value, Error> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Double(d) if d.is_finite() => Ok(Value::Int(d.trunc() as i64)),
        Value::Bulk(_) => value
            .as_str()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(Value::Int)
            .ok_or_else(|| Error::ArgumentType(format!("{} must be a number", what))),
        _ => Err(Error::ArgumentType(format!("{} must be a number", what))),
    }
}

/// Converts a human duration span to whole milliseconds. Accepts an optional
/// decimal number followed by a unit (`ms`, `s`, `m`, `h`, `d`, `w`, `y` and
/// their long forms); a bare number is already milliseconds.
pub fn parse_duration_ms(span: &str) -> Result<i64, Error> {
    const MS_SECOND: f64 = 1000.0;
    const MS_MINUTE: f64 = 60.0 * MS_SECOND;
    const MS_HOUR: f64 = 60.0 * MS_MINUTE;
    const MS_DAY: f64 = 24.0 * MS_HOUR;
    const MS_WEEK: f64 = 7.0 * MS_DAY;
    const MS_YEAR: f64 = 365.25 * MS_DAY;

    let err = || Error::ArgumentType(format!("invalid duration {:?}", span));

    let trimmed = span.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: f64 = number.parse().map_err(|_| err())?;
    let factor = match unit.trim().to_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => MS_SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MS_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => MS_HOUR,
        "d" | "day" | "days" => MS_DAY,
        "w" | "week" | "weeks" => MS_WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => MS_YEAR,
        _ => return Err(err()),
    };

    Ok((number * factor).round() as i64)
}

/// Decodes a flat alternating `[field, value, ...]` reply into an ordered
/// map. Nested array values are kept as-is; non-array replies pass through
/// unchanged. An unmatched trailing field maps to nil.
pub fn decode_map(reply: Value) -> Value {
    let items = match reply {
        Value::Array(items) => items,
        other => return other,
    };

    let mut pairs = Vec::with_capacity(items.len() / 2);
    for mut chunk in &items.into_iter().chunks(2) {
        let field = match chunk.next() {
            Some(field) => field.to_string(),
            None => break,
        };
        let value = chunk.next().unwrap_or(Value::Nil);
        pairs.push((field, value));
    }

    Value::Map(pairs)
}

/// Decodes a get/pop reply: a plain string is a serialized JSON document
/// (the `FORMAT json` path), anything else goes through [`decode_map`].
pub fn decode_object(reply: Value) -> Result<Value, Error> {
    match reply {
        Value::Bulk(_) => decode_json(&reply),
        other => Ok(decode_map(other)),
    }
}

/// Decodes a range-family reply into ordered `(timestamp, fields)` records.
/// A plain string reply is a serialized JSON document; a non-array,
/// non-string reply decodes to no records.
pub fn decode_records(reply: Value) -> Result<Vec<(Value, Value)>, Error> {
    let items = match reply {
        Value::Bulk(_) => match decode_json(&reply)? {
            Value::Array(items) => items,
            _ => return Ok(Vec::new()),
        },
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(mut pair) if pair.len() == 2 => {
                // JSON replies carry already-decoded maps; decode_map passes
                // those through untouched.
                let fields = decode_map(pair.pop().unwrap_or(Value::Nil));
                let ts = pair.pop().unwrap_or(Value::Nil);
                records.push((ts, fields));
            }
            other => {
                return Err(Error::ScriptRuntime(format!(
                    "expected [timestamp, fields] pair in reply, got {}",
                    other
                )))
            }
        }
    }

    Ok(records)
}

fn decode_json(reply: &Value) -> Result<Value, Error> {
    let text = reply
        .as_str()
        .ok_or_else(|| Error::ScriptRuntime("reply is not valid utf-8".to_string()))?;
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::ScriptRuntime(format!("invalid json reply: {}", e)))?;
    Ok(json_to_value(parsed))
}

// serde_json is built with preserve_order, so object fields keep the reply's
// insertion order.
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}
