use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::Delivery;

/// Sends messages to a routing key.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<(), QueueError>;
}

/// Processes delivered messages.
///
/// Returning `Ok` acknowledges the message. An error hands it back to the
/// broker, which redelivers it until the retry budget is spent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), QueueError>;
}
