use super::store::AcceptedRecord;
use super::validate::{validate, ValidationOutcome};
use crate::error::DecodeError;
use crate::telemetry::parse_reading_payload;
use serde_json::Value;

/// Where a decodable message is headed. Undecodable payloads surface as the
/// `Err` side of [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Accepted(AcceptedRecord),
    Rejected {
        station_id: Option<String>,
        raw: Value,
        reason: String,
    },
}

pub fn classify(payload: &[u8]) -> Result<Classified, DecodeError> {
    let (raw, reading) = parse_reading_payload(payload)?;
    let outcome = validate(&reading);
    let classified = match outcome {
        ValidationOutcome::Valid(measurements) => {
            Classified::Accepted(AcceptedRecord::new(reading, measurements, raw))
        }
        invalid => Classified::Rejected {
            station_id: reading.station_id,
            raw,
            reason: invalid.joined_reasons().unwrap_or_default(),
        },
    };
    Ok(classified)
}
