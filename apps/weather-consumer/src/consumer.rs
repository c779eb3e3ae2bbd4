use crate::ack::Acknowledger;
use crate::error::BusError;
use crate::ingest::{MessageProcessor, ReadingStore};
use futures::{Stream, StreamExt};
use tokio::sync::watch;

/// A delivered message together with the handle used to settle it.
pub struct Inbound<A> {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub payload: Vec<u8>,
    pub acker: A,
}

enum Wake<T> {
    Shutdown { sender_alive: bool },
    Delivery(Option<T>),
}

/// Pulls one delivery at a time and settles it before asking for the next.
///
/// Shutdown is only observed while waiting for a delivery; a message that
/// has been received always runs to its ack/reject. Returns `Ok(())` on
/// shutdown and an error when the transport fails or the broker ends the
/// stream.
pub async fn consume<St, A, S>(
    mut deliveries: St,
    processor: &MessageProcessor<S>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BusError>
where
    St: Stream<Item = Result<Inbound<A>, BusError>> + Unpin,
    A: Acknowledger,
    S: ReadingStore,
{
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let wake = tokio::select! {
            biased;
            changed = shutdown.changed() => Wake::Shutdown { sender_alive: changed.is_ok() },
            next = deliveries.next() => Wake::Delivery(next),
        };

        let inbound = match wake {
            Wake::Shutdown { sender_alive } => {
                if !sender_alive || *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
            Wake::Delivery(None) => return Err(BusError::ConsumerCancelled),
            Wake::Delivery(Some(next)) => next?,
        };

        tracing::debug!(
            delivery_tag = inbound.delivery_tag,
            redelivered = inbound.redelivered,
            bytes = inbound.payload.len(),
            "received message"
        );
        let decision = processor.process(&inbound.payload).await;
        decision.settle(&inbound.acker).await?;
        tracing::debug!(delivery_tag = inbound.delivery_tag, ?decision, "settled message");
    }
}
