//! The JSON-RPC 1.0 message model and its wire codec.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A JSON-RPC 1.0 message: a request, notification, reply, or error.
///
/// Unlike JSON-RPC 2.0, there is no `"jsonrpc"` version tag on the
/// wire; the four shapes are distinguished by which of `method`,
/// `params`, `result`, `error`, and `id` are present. See
/// [`Message::decode`] for the exact inference rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a reply, correlated by `id`.
    Request {
        method: String,
        params: Vec<Value>,
        id: Value,
    },
    /// A call with no reply expected.
    Notify { method: String, params: Vec<Value> },
    /// A successful reply, correlated by `id`.
    Reply { result: Value, id: Value },
    /// A failed reply, correlated by `id`.
    Error { error: Value, id: Value },
}

impl Message {
    /// The message's `id`, if it has one. Requests, Replies, and Errors
    /// all carry one; Notifies never do.
    pub fn id(&self) -> Option<&Value> {
        match self {
            Message::Request { id, .. } => Some(id),
            Message::Notify { .. } => None,
            Message::Reply { id, .. } => Some(id),
            Message::Error { id, .. } => Some(id),
        }
    }

    /// The method name, for Requests and Notifies.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } => Some(method),
            Message::Notify { method, .. } => Some(method),
            Message::Reply { .. } | Message::Error { .. } => None,
        }
    }

    /// Builds the `echo` liveness-probe request, with `id` forced to
    /// the JSON string `"echo"`.
    ///
    /// Any caller-supplied request sharing that id will have its reply
    /// silently absorbed by a [`Session`](crate::session::Session);
    /// avoid using the string `"echo"` as a request id of your own.
    pub fn echo_probe() -> Message {
        Message::Request {
            method: "echo".to_owned(),
            params: Vec::new(),
            id: Value::String("echo".to_owned()),
        }
    }

    /// Encodes this message to a JSON object, padding unused slots with
    /// explicit `null` the way JSON-RPC 1.0 peers expect.
    pub fn encode(&self) -> Value {
        let mut obj = Map::new();
        match self {
            Message::Request { method, params, id } => {
                obj.insert("method".into(), Value::String(method.clone()));
                obj.insert("params".into(), Value::Array(params.clone()));
                obj.insert("id".into(), id.clone());
            }
            Message::Notify { method, params } => {
                obj.insert("method".into(), Value::String(method.clone()));
                obj.insert("params".into(), Value::Array(params.clone()));
                obj.insert("id".into(), Value::Null);
            }
            Message::Reply { result, id } => {
                obj.insert("result".into(), result.clone());
                obj.insert("error".into(), Value::Null);
                obj.insert("id".into(), id.clone());
            }
            Message::Error { error, id } => {
                obj.insert("result".into(), Value::Null);
                obj.insert("error".into(), error.clone());
                obj.insert("id".into(), id.clone());
            }
        }
        Value::Object(obj)
    }

    /// Decodes a message from a JSON value, applying the shape table
    /// and the null-as-absent rule.
    ///
    /// Inference order (first match wins): `result` present → Reply;
    /// else `error` present → Error; else `id` present → Request; else
    /// Notify. Any member left over after extracting the fields that
    /// shape uses is a decode error naming the first offender.
    pub fn decode(value: Value) -> Result<Message, DecodeError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => return Err(DecodeError::NotAnObject(type_name(&other))),
        };

        let method = take_non_null(&mut obj, "method");
        let params = take_non_null(&mut obj, "params");
        let result = take_non_null(&mut obj, "result");
        let error = take_non_null(&mut obj, "error");
        let id = take_non_null(&mut obj, "id");

        if let Some((key, _)) = obj.into_iter().next() {
            return Err(DecodeError::UnknownField(key));
        }

        if let Some(result) = result {
            let id = id.ok_or_else(|| DecodeError::BadShape("reply missing id".into()))?;
            if method.is_some() || params.is_some() || error.is_some() {
                return Err(DecodeError::BadShape(
                    "reply must not have method, params, or error".into(),
                ));
            }
            return Ok(Message::Reply { result, id });
        }

        if let Some(error) = error {
            let id = id.ok_or_else(|| DecodeError::BadShape("error missing id".into()))?;
            if method.is_some() || params.is_some() {
                return Err(DecodeError::BadShape(
                    "error must not have method or params".into(),
                ));
            }
            return Ok(Message::Error { error, id });
        }

        let method = method
            .ok_or_else(|| DecodeError::BadShape("request/notify missing method".into()))?;
        let method = match method {
            Value::String(s) => s,
            other => {
                return Err(DecodeError::BadShape(format!(
                    "method must be a string, got {}",
                    type_name(&other)
                )))
            }
        };
        let params = match params {
            Some(Value::Array(a)) => a,
            Some(other) => {
                return Err(DecodeError::BadShape(format!(
                    "params must be an array, got {}",
                    type_name(&other)
                )))
            }
            None => {
                return Err(DecodeError::BadShape(
                    "request/notify missing params".into(),
                ))
            }
        };

        Ok(match id {
            Some(id) => Message::Request { method, params, id },
            None => Message::Notify { method, params },
        })
    }

    /// Serializes this message's [`encode`](Message::encode)d form to
    /// UTF-8 JSON bytes, with no trailing delimiter: the wire has none.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::EncodeError> {
        Ok(serde_json::to_vec(&self.encode())?)
    }
}

/// Removes `key` from `obj`, treating an explicit JSON `null` as if the
/// key were absent.
fn take_non_null(obj: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match obj.remove(key) {
        Some(Value::Null) | None => None,
        Some(other) => Some(other),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A per-connection allocator of request ids, uniquely identifying
/// in-flight requests on that connection.
///
/// Scoped per-connection rather than process-wide: the only real
/// requirement is uniqueness among a connection's own in-flight
/// requests, and a per-connection `AtomicU64` avoids the ceremony of a
/// mutable process global for no added guarantee.
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    /// Creates a generator starting at 0.
    pub fn new() -> Self {
        IdGenerator(AtomicU64::new(0))
    }

    /// Allocates the next id as a JSON number.
    pub fn next(&self) -> Value {
        Value::from(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    // @@ end test lint list maintained by maint/add_warning @@
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_request() {
        let m = Message::Request {
            method: "sum".into(),
            params: vec![json!(1), json!(2)],
            id: json!(7),
        };
        assert_eq!(m.encode(), json!({"method":"sum","params":[1,2],"id":7}));
    }

    #[test]
    fn encode_reply_has_null_error() {
        let m = Message::Reply {
            result: json!(true),
            id: json!(7),
        };
        assert_eq!(m.encode(), json!({"result":true,"error":null,"id":7}));
    }

    #[test]
    fn encode_error_has_null_result() {
        let m = Message::Error {
            error: json!("bad"),
            id: json!(7),
        };
        assert_eq!(m.encode(), json!({"result":null,"error":"bad","id":7}));
    }

    #[test]
    fn encode_notify_has_null_id() {
        let m = Message::Notify {
            method: "tick".into(),
            params: vec![],
        };
        assert_eq!(m.encode(), json!({"method":"tick","params":[],"id":null}));
    }

    #[test]
    fn round_trip_all_shapes() {
        let msgs = vec![
            Message::Request {
                method: "m".into(),
                params: vec![json!(1)],
                id: json!(1),
            },
            Message::Notify {
                method: "m".into(),
                params: vec![],
            },
            Message::Reply {
                result: json!({"a":1}),
                id: json!("x"),
            },
            Message::Error {
                error: json!("oops"),
                id: json!(null),
            },
        ];
        for m in msgs {
            let decoded = Message::decode(m.encode()).unwrap();
            assert_eq!(decoded, m);
        }
    }

    #[test]
    fn decode_infers_error_over_request_when_both_error_and_id_present() {
        let decoded =
            Message::decode(json!({"result":null,"error":"x","id":1})).unwrap();
        assert_eq!(
            decoded,
            Message::Error {
                error: json!("x"),
                id: json!(1)
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_field() {
        let err =
            Message::decode(json!({"method":"m","params":[],"id":1,"extra":0})).unwrap_err();
        assert_matches::assert_matches!(err, DecodeError::UnknownField(f) if f == "extra");
    }

    #[test]
    fn decode_rejects_non_object() {
        let err = Message::decode(json!([1, 2])).unwrap_err();
        assert_matches::assert_matches!(err, DecodeError::NotAnObject(_));
    }

    #[test]
    fn id_generator_is_monotonic_and_unique() {
        let gen = IdGenerator::new();
        let ids: Vec<_> = (0..5).map(|_| gen.next()).collect();
        assert_eq!(ids, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn echo_probe_has_reserved_id() {
        let m = Message::echo_probe();
        assert_eq!(m.id(), Some(&json!("echo")));
        assert_eq!(m.method(), Some("echo"));
    }
}
