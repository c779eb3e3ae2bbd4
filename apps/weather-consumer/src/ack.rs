use crate::error::BusError;
use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicRejectOptions};

/// The single settlement issued for every delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Ack,
    /// Reject without requeue; the message leaves the queue.
    Reject,
}

impl DeliveryDecision {
    pub async fn settle<A>(self, acker: &A) -> Result<(), BusError>
    where
        A: Acknowledger + ?Sized,
    {
        match self {
            DeliveryDecision::Ack => acker.ack().await,
            DeliveryDecision::Reject => acker.reject().await,
        }
    }
}

/// Delivery handle that can settle one message on the bus.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BusError>;

    async fn reject(&self) -> Result<(), BusError>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), BusError> {
        Acker::ack(self, BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), BusError> {
        Acker::reject(self, BasicRejectOptions { requeue: false }).await?;
        Ok(())
    }
}
