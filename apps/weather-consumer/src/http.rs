use crate::stats::{
    IngestStats, StatsSnapshot, DEADLETTER_WRITE_FAILURES, MESSAGES_FAILED, MESSAGES_PROCESSED,
    PROCESSING_SECONDS,
};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

const PROCESSING_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder once and registers the ingest
/// metrics so they render at zero before the first message.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(PROCESSING_SECONDS.to_string()),
            PROCESSING_BUCKETS,
        )
        .context("configure processing histogram buckets")?
        .install_recorder()
        .context("install prometheus recorder")?;

    describe_counter!(
        MESSAGES_PROCESSED,
        Unit::Count,
        "Readings validated and written to weather_logs"
    );
    describe_counter!(
        MESSAGES_FAILED,
        Unit::Count,
        "Messages rejected after validation or processing failure"
    );
    describe_counter!(
        DEADLETTER_WRITE_FAILURES,
        Unit::Count,
        "Dead-letter inserts that failed and were dropped"
    );
    describe_histogram!(
        PROCESSING_SECONDS,
        Unit::Seconds,
        "Per-message processing time from decode to ack/reject"
    );
    metrics::counter!(MESSAGES_PROCESSED).increment(0);
    metrics::counter!(MESSAGES_FAILED).increment(0);
    metrics::counter!(DEADLETTER_WRITE_FAILURES).increment(0);

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub stats: Arc<IngestStats>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.handle.render(),
    )
}

async fn get_status(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub fn router(state: MetricsState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .route("/v1/status", get(get_status))
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, state: MetricsState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind metrics listener on {bind}"))?;
    tracing::info!(%bind, "metrics available at /metrics");
    axum::serve(listener, router(state))
        .await
        .context("metrics server")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::ConnectionState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> (MetricsState, metrics_exporter_prometheus::PrometheusRecorder) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let state = MetricsState {
            handle: recorder.handle(),
            stats: Arc::new(IngestStats::new()),
        };
        (state, recorder)
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let (state, recorder) = test_state();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(MESSAGES_PROCESSED).increment(3);
        });

        let resp = router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        let text = body_text(resp).await;
        assert!(text.contains("weather_messages_processed_total 3"));
    }

    #[tokio::test]
    async fn status_endpoint_reports_counters() {
        let (state, _recorder) = test_state();
        state.stats.record_processed();
        state.stats.record_failed();
        state.stats.record_failed();
        state.stats.record_reconnect();
        state.stats.set_connection_state(ConnectionState::Consuming);

        let resp = router(state)
            .oneshot(Request::builder().uri("/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["processed"], 1);
        assert_eq!(json["failed"], 2);
        assert_eq!(json["reconnects"], 1);
        assert_eq!(json["connection_state"], "consuming");
        assert_eq!(
            json.as_object().map(|fields| fields.len()),
            Some(7),
            "status carries only atomic counters and state: {json}"
        );
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (state, _recorder) = test_state();
        let resp = router(state)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(resp).await, "ok");
    }
}
