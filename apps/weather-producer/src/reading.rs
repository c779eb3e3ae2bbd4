use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

pub const STATIONS: [&str; 3] = ["station-A", "station-B", "station-C"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub station_id: String,
    pub ts: String,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

impl Reading {
    pub fn random<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Self {
        let station_id = STATIONS.choose(rng).copied().unwrap_or(STATIONS[0]);
        Self {
            station_id: station_id.to_string(),
            ts: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            temperature: round2(rng.gen_range(-10.0..=40.0)),
            humidity: round2(rng.gen_range(0.0..=100.0)),
            wind_speed: round2(rng.gen_range(0.0..=30.0)),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
