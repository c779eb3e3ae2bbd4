use crate::telemetry::Reading;
use serde_json::Value;
use std::ops::RangeInclusive;

pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -80.0..=60.0;
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const WIND_SPEED_RANGE: RangeInclusive<f64> = 0.0..=200.0;

const REASON_SEPARATOR: &str = "; ";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(Measurements),
    Invalid(Vec<String>),
}

impl ValidationOutcome {
    /// Reasons joined the way they are stored in the dead-letter table.
    pub fn joined_reasons(&self) -> Option<String> {
        match self {
            ValidationOutcome::Valid(_) => None,
            ValidationOutcome::Invalid(reasons) => Some(reasons.join(REASON_SEPARATOR)),
        }
    }
}

/// Checks temperature, humidity and wind speed, always in that order.
pub fn validate(reading: &Reading) -> ValidationOutcome {
    let temperature = check("temperature", reading.temperature.as_ref(), &TEMPERATURE_RANGE);
    let humidity = check("humidity", reading.humidity.as_ref(), &HUMIDITY_RANGE);
    let wind_speed = check("wind_speed", reading.wind_speed.as_ref(), &WIND_SPEED_RANGE);

    match (temperature, humidity, wind_speed) {
        (Ok(temperature), Ok(humidity), Ok(wind_speed)) => ValidationOutcome::Valid(Measurements {
            temperature,
            humidity,
            wind_speed,
        }),
        (temperature, humidity, wind_speed) => ValidationOutcome::Invalid(
            [temperature.err(), humidity.err(), wind_speed.err()]
                .into_iter()
                .flatten()
                .collect(),
        ),
    }
}

fn check(field: &str, value: Option<&Value>, range: &RangeInclusive<f64>) -> Result<f64, String> {
    match value.and_then(Value::as_f64) {
        Some(number) if range.contains(&number) => Ok(number),
        _ => Err(format!("{field} out of range: {}", render(value))),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    impl ValidationOutcome {
        fn is_valid(&self) -> bool {
            matches!(self, ValidationOutcome::Valid(_))
        }
    }

    fn reading(temperature: Value, humidity: Value, wind_speed: Value) -> Reading {
        Reading {
            station_id: Some("station-A".to_string()),
            ts: Some("2024-05-01T10:00:00Z".to_string()),
            temperature: Some(temperature),
            humidity: Some(humidity),
            wind_speed: Some(wind_speed),
        }
    }

    fn reasons(outcome: ValidationOutcome) -> Vec<String> {
        match outcome {
            ValidationOutcome::Invalid(reasons) => reasons,
            ValidationOutcome::Valid(m) => panic!("expected invalid, got {m:?}"),
        }
    }

    #[test]
    fn in_range_reading_is_valid() {
        let outcome = validate(&reading(json!(21.5), json!(40), json!(3.2)));
        assert_eq!(
            outcome,
            ValidationOutcome::Valid(Measurements {
                temperature: 21.5,
                humidity: 40.0,
                wind_speed: 3.2,
            })
        );
        assert_eq!(outcome.joined_reasons(), None);
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        assert!(validate(&reading(json!(-80.0), json!(50), json!(1))).is_valid());
        assert!(validate(&reading(json!(60.0), json!(50), json!(1))).is_valid());
        assert_eq!(
            reasons(validate(&reading(json!(-80.01), json!(50), json!(1)))),
            vec!["temperature out of range: -80.01"]
        );
        assert_eq!(
            reasons(validate(&reading(json!(60.01), json!(50), json!(1)))),
            vec!["temperature out of range: 60.01"]
        );
    }

    #[test]
    fn humidity_and_wind_bounds_are_inclusive() {
        assert!(validate(&reading(json!(0), json!(0.0), json!(0.0))).is_valid());
        assert!(validate(&reading(json!(0), json!(100.0), json!(200.0))).is_valid());
        assert!(!validate(&reading(json!(0), json!(100.5), json!(1))).is_valid());
        assert!(!validate(&reading(json!(0), json!(1), json!(-0.1))).is_valid());
    }

    #[test]
    fn single_violation_reports_only_that_field() {
        let outcome = validate(&reading(json!(61), json!(50), json!(5)));
        assert_eq!(
            outcome.joined_reasons().as_deref(),
            Some("temperature out of range: 61")
        );
    }

    #[test]
    fn reasons_follow_fixed_field_order() {
        let outcome = validate(&reading(json!(20), json!(-5), json!(250)));
        assert_eq!(
            outcome.joined_reasons().as_deref(),
            Some("humidity out of range: -5; wind_speed out of range: 250")
        );

        let all = reasons(validate(&reading(json!(99), json!(101), json!(201))));
        assert_eq!(
            all,
            vec![
                "temperature out of range: 99",
                "humidity out of range: 101",
                "wind_speed out of range: 201",
            ]
        );
    }

    #[test]
    fn absent_and_non_numeric_fields_fail_their_own_check() {
        let mut r = reading(json!("warm"), json!(50), json!(5));
        r.wind_speed = None;
        assert_eq!(
            reasons(validate(&r)),
            vec![
                "temperature out of range: \"warm\"",
                "wind_speed out of range: None",
            ]
        );
    }
}
