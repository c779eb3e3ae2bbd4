use crate::error::DecodeError;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

/// One decoded station reading. Measurements stay as raw JSON so that a
/// non-numeric value reaches the validator instead of failing the decode.
#[derive(Debug, Clone, Deserialize)]
pub struct Reading {
    #[serde(default, deserialize_with = "text_field")]
    pub station_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub ts: Option<String>,
    #[serde(default)]
    pub temperature: Option<Value>,
    #[serde(default)]
    pub humidity: Option<Value>,
    #[serde(default)]
    pub wind_speed: Option<Value>,
}

/// Strings pass through; other non-null JSON is kept as its JSON text.
fn text_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Decodes a message body into the received JSON object (kept verbatim for
/// the `raw` column, extra fields included) and the typed reading.
pub fn parse_reading_payload(payload: &[u8]) -> Result<(Value, Reading), DecodeError> {
    let mut bytes = payload.to_vec();
    let raw: Value = simd_json::serde::from_slice(&mut bytes)?;
    if !raw.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let reading = Reading::deserialize(&raw)?;
    Ok((raw, reading))
}

/// Dead-letter body for payloads that never made it through processing.
pub fn exception_envelope(payload: &[u8]) -> Value {
    json!({
        "error": "exception",
        "payload": String::from_utf8_lossy(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_extra_fields_in_raw() {
        let body = br#"{"station_id":"station-A","ts":"2024-05-01T10:00:00Z","temperature":21.5,"humidity":40,"wind_speed":3.2,"firmware":"1.4"}"#;
        let (raw, reading) = parse_reading_payload(body).unwrap();
        assert_eq!(reading.station_id.as_deref(), Some("station-A"));
        assert_eq!(reading.ts.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(reading.humidity, Some(json!(40)));
        assert_eq!(raw["firmware"], "1.4");
    }

    #[test]
    fn missing_and_null_measurements_decode_as_absent() {
        let (_, reading) =
            parse_reading_payload(br#"{"station_id":"station-B","temperature":null}"#).unwrap();
        assert!(reading.temperature.is_none());
        assert!(reading.humidity.is_none());
        assert!(reading.ts.is_none());
    }

    #[test]
    fn rejects_non_json_and_non_objects() {
        assert!(matches!(
            parse_reading_payload(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            parse_reading_payload(b"[1, 2, 3]"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn non_string_identifiers_are_kept_as_text() {
        let (_, reading) =
            parse_reading_payload(br#"{"station_id":42,"ts":1714557600,"temperature":1}"#)
                .unwrap();
        assert_eq!(reading.station_id.as_deref(), Some("42"));
        assert_eq!(reading.ts.as_deref(), Some("1714557600"));
    }

    #[test]
    fn exception_envelope_carries_lossy_payload() {
        let envelope = exception_envelope(b"\xffbroken");
        assert_eq!(envelope["error"], "exception");
        assert!(envelope["payload"].as_str().unwrap().ends_with("broken"));
    }
}
