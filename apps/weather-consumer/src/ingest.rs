mod classify;
mod db;
pub(crate) mod store;
mod validate;


pub use db::{build_pool, ensure_schema, PgReadingStore};
pub use store::ReadingStore;

use self::classify::{classify, Classified};
use crate::ack::DeliveryDecision;
use crate::error::ProcessError;
use crate::stats::IngestStats;
use crate::telemetry::exception_envelope;
use std::sync::Arc;
use std::time::Instant;

enum Persisted {
    Accepted,
    DeadLettered,
}

/// Drives one message from raw bytes to a delivery decision. Never fails:
/// every error is folded into a `Reject` plus a failed-counter increment.
pub struct MessageProcessor<S> {
    store: S,
    stats: Arc<IngestStats>,
}

impl<S: ReadingStore> MessageProcessor<S> {
    pub fn new(store: S, stats: Arc<IngestStats>) -> Self {
        Self { store, stats }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub async fn process(&self, payload: &[u8]) -> DeliveryDecision {
        let started = Instant::now();

        let decision = match self.persist(payload).await {
            Ok(Persisted::Accepted) => {
                self.stats.record_processed();
                DeliveryDecision::Ack
            }
            Ok(Persisted::DeadLettered) => {
                self.stats.record_failed();
                DeliveryDecision::Reject
            }
            Err(err) => {
                self.stats.record_failed();
                tracing::error!(error = ?err, "processing error");
                self.dead_letter_exception(payload, &err).await;
                DeliveryDecision::Reject
            }
        };

        self.stats.observe_processing(started.elapsed());
        decision
    }

    async fn persist(&self, payload: &[u8]) -> Result<Persisted, ProcessError> {
        match classify(payload)? {
            Classified::Accepted(record) => {
                self.store.store_accepted(&record).await?;
                tracing::info!(
                    station = record.station_id.as_deref().unwrap_or("-"),
                    ts = record.ts.as_deref().unwrap_or("-"),
                    "inserted reading"
                );
                Ok(Persisted::Accepted)
            }
            Classified::Rejected {
                station_id,
                raw,
                reason,
            } => {
                tracing::warn!(
                    station = station_id.as_deref().unwrap_or("-"),
                    %reason,
                    "validation failed"
                );
                self.store.store_dead_letter(&raw, &reason).await?;
                Ok(Persisted::DeadLettered)
            }
        }
    }

    /// Best effort: a failure here is counted and logged, never propagated.
    async fn dead_letter_exception(&self, payload: &[u8], err: &ProcessError) {
        let envelope = exception_envelope(payload);
        if let Err(write_err) = self
            .store
            .store_dead_letter(&envelope, &err.to_string())
            .await
        {
            self.stats.record_deadletter_write_failure();
            tracing::error!(
                error = %write_err,
                cause = %err,
                "failed to write exception dead letter; message dropped"
            );
        }
    }
}
