//! Relaxed extended-JSON rendering, used for `Display` and log output.

use crate::document::Document;
use crate::value::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::SecondsFormat;
use serde_json::{json, Map, Number};

impl Document {
    /// Renders the document as a JSON object, keeping key order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = Map::with_capacity(self.len());
        for (key, value) in self.iter() {
            map.insert(key.to_string(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl Value {
    /// Renders the value as relaxed extended JSON.
    ///
    /// Types without a plain JSON counterpart become single-key wrapper
    /// objects such as `{"$oid": "..."}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Double(v) => match Number::from_f64(*v) {
                Some(n) => serde_json::Value::Number(n),
                None => json!({ "$numberDouble": non_finite(*v) }),
            },
            Value::String(s) => json!(s),
            Value::Document(d) => d.to_json(),
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Binary(b) => json!({
                "$binary": {
                    "base64": STANDARD.encode(&b.bytes),
                    "subType": format!("{:02x}", u8::from(b.subtype)),
                }
            }),
            Value::Undefined => json!({ "$undefined": true }),
            Value::ObjectId(id) => json!({ "$oid": id.to_hex() }),
            Value::Boolean(b) => json!(b),
            Value::DateTime(t) => {
                json!({ "$date": t.to_rfc3339_opts(SecondsFormat::Millis, true) })
            }
            Value::Null => serde_json::Value::Null,
            Value::Regex(r) => json!({
                "$regularExpression": {
                    "pattern": r.pattern,
                    "options": r.options.letters(),
                }
            }),
            Value::DbPointer(p) => json!({
                "$dbPointer": { "$ref": p.namespace, "$id": { "$oid": p.id.to_hex() } }
            }),
            Value::Code(code) => json!({ "$code": code }),
            Value::Symbol(s) => json!({ "$symbol": s }),
            Value::CodeWithScope(c) => json!({ "$code": c.code, "$scope": c.scope.to_json() }),
            Value::Int32(v) => json!(v),
            Value::Timestamp(ts) => json!({ "$timestamp": { "t": ts.time(), "i": ts.increment() } }),
            Value::Int64(v) => json!(v),
            Value::MinKey => json!({ "$minKey": 1 }),
            Value::MaxKey => json!({ "$maxKey": 1 }),
        }
    }
}

fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}
