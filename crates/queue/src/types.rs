use std::time::SystemTime;

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            attempt: 1,
        }
    }

    /// The same message for its next delivery attempt.
    #[must_use]
    pub fn redelivered(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// A message that exhausted its delivery attempts.
#[derive(Debug)]
pub struct DeadLetter {
    pub delivery: Delivery,
    /// Human-readable description of the final error.
    pub error: String,
    /// Wall-clock time at which the message was abandoned.
    pub timestamp: SystemTime,
}
