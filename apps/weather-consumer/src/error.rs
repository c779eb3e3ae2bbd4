use thiserror::Error;

/// Why a payload could not be turned into a reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] simd_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload does not match the reading shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Failures that end a single message on the unexpected-error path.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("storage write failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Transport failures; any of these ends the current connection epoch.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("broker cancelled the consumer")]
    ConsumerCancelled,
}
