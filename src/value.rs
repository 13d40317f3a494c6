use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// A scripted-call reply or flat argument value.
///
/// Mirrors the shapes a Redis Lua script can return over the eval interface:
/// integers, bulk strings, nested arrays and nil. `Double` and `Map` only
/// appear on the decode side (JSON-formatted replies and decoded alternating
/// field lists); `Map` preserves the insertion order of the reply.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Double(f64),
    Bulk(Bytes),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The UTF-8 view of a bulk string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Bulk(Bytes::from(s.into_bytes()))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Value {
        Value::Int(i as i64)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Value {
        Value::Double(d)
    }
}

// Booleans do not survive the scripted interface: Lua truth maps to the
// integer 1, falsehood to 0.
impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Int(i64::from(b))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Value {
        match opt {
            Some(v) => v.into(),
            None => Value::Nil,
        }
    }
}

// Renders the wire token for argument transmission. Composite values never
// travel as arguments, only as replies; they render in a debug-ish form good
// enough for log output.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, ""),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Bulk(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A point on (or a sentinel over) the series' time axis.
///
/// Date values encode as integer epoch milliseconds; the `-`, `+` and `*`
/// protocol sentinels and any raw token pass through unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum Timestamp {
    At(SystemTime),
    Millis(i64),
    /// The oldest entry in the series (`-`).
    Oldest,
    /// The newest entry in the series (`+`).
    Newest,
    /// Let the server assign the current time (`*`).
    Auto,
    Raw(String),
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Timestamp {
        Timestamp::At(t)
    }
}

impl From<i64> for Timestamp {
    fn from(ms: i64) -> Timestamp {
        Timestamp::Millis(ms)
    }
}

impl From<&str> for Timestamp {
    fn from(s: &str) -> Timestamp {
        match s {
            "-" => Timestamp::Oldest,
            "+" => Timestamp::Newest,
            "*" => Timestamp::Auto,
            other => Timestamp::Raw(other.to_string()),
        }
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Value {
        match ts {
            Timestamp::At(t) => {
                let millis = t
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                Value::Int(millis)
            }
            Timestamp::Millis(ms) => Value::Int(ms),
            Timestamp::Oldest => Value::from("-"),
            Timestamp::Newest => Value::from("+"),
            Timestamp::Auto => Value::from("*"),
            Timestamp::Raw(s) => Value::from(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timestamp_from_system_time_is_epoch_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_488_823_384_000);
        let value = Value::from(Timestamp::from(t));

        assert_eq!(value, Value::Int(1_488_823_384_000));
    }

    #[test]
    fn timestamp_sentinels_pass_through() {
        assert_eq!(Value::from(Timestamp::from("-")), Value::from("-"));
        assert_eq!(Value::from(Timestamp::from("+")), Value::from("+"));
        assert_eq!(Value::from(Timestamp::from("*")), Value::from("*"));
    }

    #[test]
    fn timestamp_raw_token_passes_through() {
        let value = Value::from(Timestamp::from("1488823384-2"));
        assert_eq!(value, Value::from("1488823384-2"));
    }

    #[test]
    fn bool_encodes_as_integer() {
        assert_eq!(Value::from(true), Value::Int(1));
        assert_eq!(Value::from(false), Value::Int(0));
    }

    #[test]
    fn display_renders_wire_tokens() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::from("hello").to_string(), "hello");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::from("a")]).to_string(),
            "[1, a]"
        );
    }
}
