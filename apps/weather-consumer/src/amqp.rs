use crate::config::Config;
use crate::consumer::{consume, Inbound};
use crate::error::BusError;
use crate::ingest::{MessageProcessor, ReadingStore};
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const PREFETCH_COUNT: u16 = 1;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    TopologyReady = 2,
    Consuming = 3,
}

impl ConnectionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::TopologyReady,
            3 => ConnectionState::Consuming,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::TopologyReady => "topology_ready",
            ConnectionState::Consuming => "consuming",
        }
    }
}

/// Runs lapin's background work on the ambient tokio runtime.
pub fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// Connection and channel for one connection epoch. Always finish an epoch
/// with [`BusSession::close`], on success and failure alike.
pub struct BusSession {
    connection: Connection,
    channel: Channel,
}

impl BusSession {
    pub async fn open(config: &Config) -> Result<Self, BusError> {
        let connection = Connection::connect(&config.amqp_url, connection_properties()).await?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close(200, "channel setup failed").await;
                return Err(err.into());
            }
        };
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Durable topic exchange, durable queue, binding and prefetch of one.
    pub async fn declare_topology(&self, config: &Config) -> Result<(), BusError> {
        self.channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    /// Declares topology and registers the consumer on the queue.
    pub async fn subscribe(&self, config: &Config) -> Result<Consumer, BusError> {
        self.declare_topology(config).await?;
        let consumer = self
            .channel
            .basic_consume(
                &config.queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    pub async fn consume<S: ReadingStore>(
        &self,
        consumer: Consumer,
        config: &Config,
        processor: &MessageProcessor<S>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        processor
            .stats()
            .set_connection_state(ConnectionState::Consuming);
        tracing::info!(
            queue = %config.queue,
            exchange = %config.exchange,
            routing_key = %config.routing_key,
            "consumer connected and waiting for messages"
        );

        let deliveries = consumer.map(|delivery| {
            delivery.map_err(BusError::from).map(|delivery| Inbound {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                payload: delivery.data,
                acker: delivery.acker,
            })
        });
        consume(Box::pin(deliveries), processor, shutdown).await
    }

    /// Bounded by [`CLOSE_TIMEOUT`] so a stalled broker cannot hold up
    /// shutdown.
    pub async fn close(self) {
        let closing = async {
            if self.channel.status().connected() {
                if let Err(err) = self.channel.close(200, "consumer epoch finished").await {
                    tracing::debug!(error = %err, "failed to close AMQP channel");
                }
            }
            if self.connection.status().connected() {
                if let Err(err) = self.connection.close(200, "consumer epoch finished").await {
                    tracing::debug!(error = %err, "failed to close AMQP connection");
                }
            }
        };
        if timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            tracing::warn!("AMQP close timed out; dropping connection");
        }
    }
}

/// Resolves to `None` as soon as shutdown is requested, dropping `fut`.
async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => None,
        out = fut => Some(out),
    }
}

/// Keeps the consumer alive across broker failures until shutdown is
/// requested. Each pass is one connection epoch.
pub async fn run_supervisor<S: ReadingStore>(
    config: Config,
    processor: MessageProcessor<S>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stats = processor.stats();
    loop {
        if *shutdown.borrow() {
            break;
        }

        stats.set_connection_state(ConnectionState::Connecting);
        let result = run_epoch(&config, &processor, &mut shutdown).await;
        stats.set_connection_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => break,
            Err(err) => {
                stats.record_reconnect();
                tracing::warn!(error = %err, "AMQP connection lost; reconnecting");
            }
        }

        let delay = config.reconnect_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    tracing::info!("consumer stopped");
}

/// Connection setup is abandoned on shutdown; once consuming, shutdown is
/// handled between messages by [`consume`].
async fn run_epoch<S: ReadingStore>(
    config: &Config,
    processor: &MessageProcessor<S>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BusError> {
    let session = match until_shutdown(shutdown, BusSession::open(config)).await {
        Some(opened) => opened?,
        None => {
            tracing::info!("shutdown requested while connecting");
            return Ok(());
        }
    };

    let result = match until_shutdown(shutdown, session.subscribe(config)).await {
        Some(Ok(consumer)) => {
            processor
                .stats()
                .set_connection_state(ConnectionState::TopologyReady);
            session.consume(consumer, config, processor, shutdown).await
        }
        Some(Err(err)) => Err(err),
        None => {
            tracing::info!("shutdown requested while declaring topology");
            Ok(())
        }
    };
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::AcceptedRecord;
    use crate::stats::IngestStats;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    struct NullStore;

    #[async_trait]
    impl ReadingStore for NullStore {
        async fn store_accepted(&self, _record: &AcceptedRecord) -> Result<(), sqlx::Error> {
            Ok(())
        }

        async fn store_dead_letter(&self, _raw: &Value, _reason: &str) -> Result<(), sqlx::Error> {
            Ok(())
        }
    }

    fn config_for(amqp_url: &str) -> Config {
        let vars: HashMap<&str, String> = HashMap::from([
            ("RABBITMQ_URL", amqp_url.to_string()),
            ("DATABASE_URL", "postgres://u:p@localhost/weather".to_string()),
            ("WEATHER_RECONNECT_DELAY_MS", "50".to_string()),
        ]);
        Config::from_lookup(&|key: &str| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn until_shutdown_drops_pending_work() {
        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        let out = until_shutdown(&mut shutdown, futures::future::pending::<()>()).await;
        assert!(out.is_none());

        let (_tx, mut shutdown) = watch::channel(false);
        assert_eq!(until_shutdown(&mut shutdown, async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn supervisor_stops_while_broker_handshake_stalls() {
        // Accepts TCP but never answers the AMQP protocol header.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = config_for(&format!("amqp://guest:guest@{addr}/%2f"));
        let stats = Arc::new(IngestStats::new());
        let processor = MessageProcessor::new(NullStore, stats.clone());
        let (tx, shutdown) = watch::channel(false);
        let supervisor = tokio::spawn(run_supervisor(config, processor, shutdown));

        sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        let finished = timeout(Duration::from_secs(5), supervisor).await;
        assert!(matches!(finished, Ok(Ok(()))));
        assert_eq!(stats.connection_state(), ConnectionState::Disconnected);
        silent.abort();
    }
}
