use super::store::{AcceptedRecord, ReadingStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;

pub async fn build_pool(options: PgConnectOptions, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect_with(options)
        .await
        .context("connect to postgres")?;
    Ok(pool)
}

/// Creates the two destination tables when they are missing. Never alters
/// existing tables.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weather_logs (
            id bigserial primary key,
            station_id text,
            ts timestamptz,
            temperature double precision,
            humidity double precision,
            wind_speed double precision,
            raw jsonb,
            status text,
            inserted_at timestamptz not null default now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create weather_logs")?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weather_deadletters (
            id bigserial primary key,
            raw jsonb,
            reason text,
            created_at timestamptz not null default now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create weather_deadletters")?;
    Ok(())
}

#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn store_accepted(&self, record: &AcceptedRecord) -> Result<(), sqlx::Error> {
        // ts goes over the wire as text; postgres owns the timestamp parsing.
        sqlx::query(
            r#"
            INSERT INTO weather_logs (station_id, ts, temperature, humidity, wind_speed, raw, status)
            VALUES ($1, $2::timestamptz, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.station_id.as_deref())
        .bind(record.ts.as_deref())
        .bind(record.temperature)
        .bind(record.humidity)
        .bind(record.wind_speed)
        .bind(Json(&record.raw))
        .bind(record.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_dead_letter(&self, raw: &Value, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO weather_deadletters (raw, reason) VALUES ($1, $2)")
            .bind(Json(raw))
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
