pub mod covid_tracking;
pub mod json_file;

use serde_json::Value;

use crate::error::{EtlError, Result};
use crate::types::RawRecord;

pub use covid_tracking::CovidTrackingClient;
pub use json_file::JsonFileSource;

/// Some endpoints wrap their body as `{"data": ...}`; return the inner value.
pub fn unwrap_payload(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

/// Payload as a list of raw records. A null payload is an empty list.
pub fn into_records(payload: Value, what: &str) -> Result<Vec<RawRecord>> {
    match unwrap_payload(payload) {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(EtlError::Api {
            message: format!("expected a list of records for {what}, got {}", kind(&other)),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_data_envelope() {
        assert_eq!(unwrap_payload(json!({"data": [1, 2]})), json!([1, 2]));
        assert_eq!(unwrap_payload(json!({"date": 1})), json!({"date": 1}));
        assert_eq!(unwrap_payload(json!([3])), json!([3]));
    }

    #[test]
    fn records_from_list_or_null() {
        assert_eq!(into_records(json!([{"a": 1}]), "x").unwrap().len(), 1);
        assert_eq!(into_records(json!({"data": null}), "x").unwrap().len(), 0);
        assert!(matches!(
            into_records(json!({"a": 1}), "x"),
            Err(EtlError::Api { .. })
        ));
    }
}
