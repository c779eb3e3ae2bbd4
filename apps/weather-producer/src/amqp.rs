use crate::config::Config;
use crate::reading::Reading;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{interval, sleep, MissedTickBehavior};

const PERSISTENT: u8 = 2;

/// Publishes synthetic readings forever, reconnecting after any failure.
pub async fn run_publisher(config: Config) {
    let mut rng = StdRng::from_entropy();
    loop {
        let err = match publish_epoch(&config, &mut rng).await {
            Ok(()) => continue,
            Err(err) => err,
        };
        tracing::error!(
            error = ?err,
            retry_secs = config.retry_delay.as_secs(),
            "producer connection failed; retrying"
        );
        sleep(config.retry_delay).await;
    }
}

async fn publish_epoch(config: &Config, rng: &mut StdRng) -> Result<()> {
    let properties = ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio);
    let connection = Connection::connect(&config.amqp_url, properties)
        .await
        .context("failed to connect to broker")?;
    let result = publish_on(&connection, config, rng).await;
    if connection.status().connected() {
        let _ = connection.close(200, "producer epoch finished").await;
    }
    result
}

async fn publish_on(connection: &Connection, config: &Config, rng: &mut StdRng) -> Result<()> {
    let channel = connection.create_channel().await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .context("failed to enable publisher confirms")?;
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .context("failed to declare exchange")?;
    tracing::info!(
        exchange = %config.exchange,
        interval_secs = config.publish_interval.as_secs(),
        "producer connected; publishing readings"
    );

    let mut ticker = interval(config.publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let reading = Reading::random(rng, Utc::now());
        publish_reading(&channel, config, &reading).await?;
    }
}

async fn publish_reading(channel: &Channel, config: &Config, reading: &Reading) -> Result<()> {
    let body = serde_json::to_vec(reading)?;
    let properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type("application/json".into());
    let confirmation = channel
        .basic_publish(
            &config.exchange,
            &config.routing_key,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await?
        .await?;
    check_confirmation(confirmation)?;
    tracing::info!(
        station = %reading.station_id,
        ts = %reading.ts,
        body = %String::from_utf8_lossy(&body),
        "published reading"
    );
    Ok(())
}

/// The channel runs in confirm mode, so anything but a broker ack is a
/// failed publish.
fn check_confirmation(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(anyhow!("broker nacked published reading")),
        Confirmation::NotRequested => Err(anyhow!("publisher confirms are not enabled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_broker_ack_counts_as_published() {
        assert!(check_confirmation(Confirmation::Ack(None)).is_ok());
        assert!(check_confirmation(Confirmation::Nack(None)).is_err());
        assert!(check_confirmation(Confirmation::NotRequested).is_err());
    }
}
