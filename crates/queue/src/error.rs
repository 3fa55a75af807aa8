use thiserror::Error;

/// Errors from publishing or handling queue messages.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("message handler failed: {0}")]
    Handler(String),

    #[error("broker is closed")]
    Closed,
}
