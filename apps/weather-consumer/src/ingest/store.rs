use super::validate::Measurements;
use crate::telemetry::Reading;
use async_trait::async_trait;
use serde_json::Value;

pub const STATUS_OK: &str = "ok";

/// Row destined for `weather_logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRecord {
    pub station_id: Option<String>,
    pub ts: Option<String>,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub raw: Value,
    pub status: &'static str,
}

impl AcceptedRecord {
    pub fn new(reading: Reading, measurements: Measurements, raw: Value) -> Self {
        Self {
            station_id: reading.station_id,
            ts: reading.ts,
            temperature: measurements.temperature,
            humidity: measurements.humidity,
            wind_speed: measurements.wind_speed,
            raw,
            status: STATUS_OK,
        }
    }
}

/// The two insert-only destinations. Each call is exactly one insert and
/// storage errors are returned as-is; retrying is not the store's job.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn store_accepted(&self, record: &AcceptedRecord) -> Result<(), sqlx::Error>;

    async fn store_dead_letter(&self, raw: &Value, reason: &str) -> Result<(), sqlx::Error>;
}
