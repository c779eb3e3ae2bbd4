mod ack;
mod amqp;
mod config;
mod consumer;
mod error;
mod http;
mod ingest;
mod stats;
mod telemetry;

use crate::config::Config;
use crate::ingest::{build_pool, ensure_schema, MessageProcessor, PgReadingStore};
use crate::stats::IngestStats;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,weather_consumer=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(normalize_otlp_http_endpoint(endpoint));
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "weather-consumer"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let prometheus = http::init_metrics()?;
    let pool = build_pool(config.database.clone(), config.db_pool_size).await?;
    if config.bootstrap_schema {
        ensure_schema(&pool).await?;
    }

    let stats = Arc::new(IngestStats::new());
    let processor = MessageProcessor::new(PgReadingStore::new(pool.clone()), stats.clone());

    let metrics_state = http::MetricsState {
        handle: prometheus,
        stats: stats.clone(),
    };
    let metrics_bind = config.metrics_bind();
    let mut metrics_handle = tokio::spawn(http::serve(metrics_bind, metrics_state));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor_config = config.clone();
    let mut consumer_handle = tokio::spawn(async move {
        amqp::run_supervisor(supervisor_config, processor, shutdown_rx).await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received; finishing in-flight message");
            let _ = shutdown_tx.send(true);
            if let Err(err) = (&mut consumer_handle).await {
                tracing::error!(error = %err, "consumer task failed");
            }
        }
        res = &mut consumer_handle => {
            if let Err(err) = res {
                tracing::error!(error = %err, "consumer task failed");
            }
        }
        res = &mut metrics_handle => {
            match res {
                Ok(Ok(())) => tracing::warn!("metrics server exited"),
                Ok(Err(err)) => tracing::error!(error = %err, "metrics server failed"),
                Err(err) => tracing::error!(error = %err, "metrics task failed"),
            }
            let _ = shutdown_tx.send(true);
            let _ = (&mut consumer_handle).await;
        }
    }

    metrics_handle.abort();
    pool.close().await;
    tracing::info!(stats = ?stats.snapshot(), "weather-consumer stopped");
    Ok(())
}
