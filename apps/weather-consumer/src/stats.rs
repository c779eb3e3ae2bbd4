use crate::amqp::ConnectionState;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

pub const MESSAGES_PROCESSED: &str = "weather_messages_processed_total";
pub const MESSAGES_FAILED: &str = "weather_messages_failed_total";
pub const DEADLETTER_WRITE_FAILURES: &str = "weather_deadletter_write_failures_total";
pub const PROCESSING_SECONDS: &str = "weather_message_processing_seconds";

/// Process-wide counters shared between the consumer task and the HTTP
/// responder. Only atomics live here; every increment is mirrored into the
/// `metrics` recorder.
#[derive(Debug)]
pub struct IngestStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub deadletter_write_failures: AtomicU64,
    pub processing_observations: AtomicU64,
    pub average_process_micros: AtomicU64,
    pub last_message_unix_ms: AtomicU64,
    pub reconnects: AtomicU64,
    connection_state: AtomicU8,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub deadletter_write_failures: u64,
    pub average_process_micros: u64,
    pub last_message_unix_ms: u64,
    pub reconnects: u64,
    pub connection_state: &'static str,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            deadletter_write_failures: AtomicU64::new(0),
            processing_observations: AtomicU64::new(0),
            average_process_micros: AtomicU64::new(0),
            last_message_unix_ms: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connection_state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(MESSAGES_PROCESSED).increment(1);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(MESSAGES_FAILED).increment(1);
    }

    pub fn record_deadletter_write_failure(&self) {
        self.deadletter_write_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(DEADLETTER_WRITE_FAILURES).increment(1);
    }

    pub fn observe_processing(&self, elapsed: Duration) {
        self.processing_observations.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!(PROCESSING_SECONDS).record(elapsed.as_secs_f64());

        let micros = elapsed.as_micros() as u64;
        let prev = self.average_process_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 {
            micros
        } else {
            (prev + micros) / 2
        };
        self.average_process_micros.store(avg, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis() as u64;
        self.last_message_unix_ms.store(now, Ordering::Relaxed);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection_state.store(state as u8, Ordering::Relaxed);
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection_state.load(Ordering::Relaxed))
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deadletter_write_failures: self.deadletter_write_failures.load(Ordering::Relaxed),
            average_process_micros: self.average_process_micros.load(Ordering::Relaxed),
            last_message_unix_ms: self.last_message_unix_ms.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connection_state: self.connection_state().as_str(),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
