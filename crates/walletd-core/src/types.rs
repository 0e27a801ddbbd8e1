//! Wire types shared by the transport and the event delivery layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id used for every request; the daemon echoes it back.
pub const REQUEST_ID: u64 = 0;

// ---- JSON-RPC envelopes ----

/// Request envelope posted to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
    /// Wallet identity, when the client is bound to a wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpub: Option<String>,
}

impl RpcRequest {
    /// Build a request with the fixed request id.
    pub fn new(method: impl Into<String>, params: Value, xpub: Option<String>) -> Self {
        Self {
            id: REQUEST_ID,
            method: method.into(),
            params,
            xpub,
        }
    }
}

/// Response envelope returned by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// Error object inside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ---- Call parameters ----

/// Positional and keyword arguments for a remote call.
///
/// Values are converted with `serde_json`, so decimal amounts
/// ([`rust_decimal::Decimal`]) travel as strings.
#[derive(Debug, Default)]
pub struct Params {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    error: Option<serde_json::Error>,
}

impl Params {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => self.args.push(v),
            Err(e) => self.record(e),
        }
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.kwargs.insert(name.into(), v);
            }
            Err(e) => self.record(e),
        }
        self
    }

    /// Positional arguments from an iterator.
    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        values.into_iter().fold(Self::new(), Self::arg)
    }

    /// True if no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// The `params` value sent on the wire.
    ///
    /// Positional only → array; keyword only → object; both → the positional
    /// array with the keyword object appended as its last element; neither →
    /// empty array.
    pub fn into_value(self) -> Result<Value, serde_json::Error> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let value = match (self.args.is_empty(), self.kwargs.is_empty()) {
            (true, true) => Value::Array(Vec::new()),
            (false, true) => Value::Array(self.args),
            (true, false) => Value::Object(self.kwargs),
            (false, false) => {
                let mut args = self.args;
                args.push(Value::Object(self.kwargs));
                Value::Array(args)
            }
        };
        Ok(value)
    }

    fn record(&mut self, error: serde_json::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(kwargs: Map<String, Value>) -> Self {
        Self {
            kwargs,
            ..Self::default()
        }
    }
}

// ---- Live updates ----

/// A batch of update records pushed by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    #[serde(default)]
    pub updates: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
}

impl UpdateBatch {
    /// Parse a batch from raw message text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wrap a bare list of records, as returned by `get_updates`.
    pub fn from_records(updates: Vec<Value>) -> Self {
        Self {
            updates,
            ..Self::default()
        }
    }
}

/// One event as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, e.g. `new_transaction`.
    pub name: String,
    /// Event-specific fields (the record without its `event` key).
    pub fields: Map<String, Value>,
    pub currency: Option<String>,
    pub wallet: Option<String>,
}

impl Event {
    /// Split a raw update record into event name and fields.
    ///
    /// Returns `None` if the record is not an object or has no string
    /// `event` key.
    pub fn from_record(record: Value, batch: &UpdateBatch) -> Option<Self> {
        let Value::Object(mut fields) = record else {
            return None;
        };
        let name = match fields.remove("event") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return None,
        };
        Some(Self {
            name,
            fields,
            currency: batch.currency.clone(),
            wallet: batch.wallet.clone(),
        })
    }

    /// A field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn request_serializes_with_optional_xpub() {
        let req = RpcRequest::new("help", json!([]), None);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"id": 0, "method": "help", "params": []})
        );

        let req = RpcRequest::new("getbalance", json!([]), Some("xpub123".into()));
        assert_eq!(serde_json::to_value(&req).unwrap()["xpub"], "xpub123");
    }

    #[test]
    fn response_with_null_error() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"id":0,"result":{"confirmed":"1.5"},"error":null}"#).unwrap();
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["confirmed"], "1.5");
    }

    #[test]
    fn response_with_error_object() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"id":0,"error":{"code":-32600,"message":"nope"}}"#).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "nope");
        assert!(resp.result.is_none());
    }

    #[test]
    fn merge_positional_only() {
        let params = Params::new().arg("tx_hash").arg(3).into_value().unwrap();
        assert_eq!(params, json!(["tx_hash", 3]));
    }

    #[test]
    fn merge_keyword_only() {
        let params = Params::new()
            .kwarg("memo", "coffee")
            .kwarg("expiration", 900)
            .into_value()
            .unwrap();
        assert_eq!(params, json!({"memo": "coffee", "expiration": 900}));
    }

    #[test]
    fn merge_both_appends_trailing_object() {
        let params = Params::new()
            .arg("addr")
            .kwarg("force", true)
            .into_value()
            .unwrap();
        assert_eq!(params, json!(["addr", {"force": true}]));
    }

    #[test]
    fn merge_nothing_is_empty_array() {
        assert!(Params::new().is_empty());
        assert_eq!(Params::new().into_value().unwrap(), json!([]));
    }

    #[test]
    fn decimals_travel_as_strings() {
        let amount = Decimal::from_str("0.00000001").unwrap();
        let params = Params::new().arg(amount).into_value().unwrap();
        assert_eq!(params, json!(["0.00000001"]));
        let back = Decimal::from_str(params[0].as_str().unwrap()).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn positional_from_iterator() {
        let params = Params::positional(["a", "b"]).into_value().unwrap();
        assert_eq!(params, json!(["a", "b"]));
    }

    #[test]
    fn event_from_record() {
        let batch = UpdateBatch {
            updates: vec![],
            currency: Some("BTC".into()),
            wallet: Some("w1".into()),
        };
        let event =
            Event::from_record(json!({"event": "new_block", "height": 100}), &batch).unwrap();
        assert_eq!(event.name, "new_block");
        assert_eq!(event.get("height"), Some(&json!(100)));
        assert!(event.get("event").is_none());
        assert_eq!(event.currency.as_deref(), Some("BTC"));

        assert!(Event::from_record(json!({"height": 1}), &batch).is_none());
        assert!(Event::from_record(json!({"event": 5}), &batch).is_none());
        assert!(Event::from_record(json!("new_block"), &batch).is_none());
    }

    #[test]
    fn batch_defaults() {
        let batch = UpdateBatch::from_json(r#"{"updates":[{"event":"new_block","height":1}]}"#)
            .unwrap();
        assert_eq!(batch.updates.len(), 1);
        assert!(batch.currency.is_none());
        assert!(UpdateBatch::from_json("not json").is_err());
    }
}
