//! In-process broker used by tests and the single-process server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::traits::{MessageHandler, Publisher};
use crate::types::{DeadLetter, Delivery};

/// Default number of delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Default)]
struct Queue {
    items: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

impl Queue {
    fn push(&self, delivery: Delivery) {
        self.items
            .lock()
            .expect("queue mutex poisoned")
            .push_back(delivery);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Delivery> {
        self.items.lock().expect("queue mutex poisoned").pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }
}

struct Inner {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    max_attempts: u32,
    closed: AtomicBool,
}

/// In-process broker with one FIFO queue per routing key.
///
/// A failed delivery is requeued until it has been attempted `max_attempts`
/// times, then moved to the dead-letter list. Delivery is at-least-once:
/// handlers must tolerate seeing the same message twice.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                max_attempts: max_attempts.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn queue(&self, routing_key: &str) -> Arc<Queue> {
        let mut queues = self.inner.queues.lock().expect("queue mutex poisoned");
        Arc::clone(queues.entry(routing_key.to_owned()).or_default())
    }

    /// Number of messages waiting on `routing_key`.
    pub fn len(&self, routing_key: &str) -> usize {
        self.queue(routing_key).len()
    }

    pub fn is_empty(&self, routing_key: &str) -> bool {
        self.len(routing_key) == 0
    }

    /// Reject further publishes. Queued messages can still be consumed.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Drain the dead-letter list.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        let mut guard = self.inner.dead_letters.lock().expect("dlq mutex poisoned");
        std::mem::take(&mut *guard)
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner
            .dead_letters
            .lock()
            .expect("dlq mutex poisoned")
            .len()
    }

    /// Hand one message to `handler` and settle it.
    ///
    /// Returns `None` when the queue is empty.
    pub async fn process_next(
        &self,
        routing_key: &str,
        handler: &dyn MessageHandler,
    ) -> Option<Result<(), QueueError>> {
        let queue = self.queue(routing_key);
        let delivery = queue.pop()?;
        Some(self.deliver(&queue, delivery, handler).await)
    }

    /// Process messages until `routing_key` has none left, including
    /// redeliveries and continuations published by the handler.
    ///
    /// Returns the number of deliveries made.
    pub async fn drain(&self, routing_key: &str, handler: &dyn MessageHandler) -> usize {
        let mut deliveries = 0;
        while self.process_next(routing_key, handler).await.is_some() {
            deliveries += 1;
        }
        deliveries
    }

    /// Consume `routing_key` until `cancel` fires.
    pub async fn consume(
        &self,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) {
        let queue = self.queue(routing_key);
        debug!(routing_key, "consumer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(delivery) = queue.pop() {
                // Failures are already logged and settled.
                let _ = self.deliver(&queue, delivery, handler.as_ref()).await;
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = queue.notify.notified() => {}
            }
        }
        debug!(routing_key, "consumer stopped");
    }

    /// Spawn `concurrency` consumers on `tracker`.
    pub fn spawn_consumers(
        &self,
        routing_key: &str,
        handler: &Arc<dyn MessageHandler>,
        concurrency: usize,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        for _ in 0..concurrency.max(1) {
            let broker = self.clone();
            let routing_key = routing_key.to_owned();
            let handler = Arc::clone(handler);
            let cancel = cancel.clone();
            tracker.spawn(async move {
                broker.consume(&routing_key, handler, cancel).await;
            });
        }
    }

    async fn deliver(
        &self,
        queue: &Queue,
        delivery: Delivery,
        handler: &dyn MessageHandler,
    ) -> Result<(), QueueError> {
        let result = handler.handle(&delivery).await;
        if let Err(ref e) = result {
            if delivery.attempt >= self.inner.max_attempts {
                warn!(
                    routing_key = %delivery.routing_key,
                    attempts = delivery.attempt,
                    error = %e,
                    "message dead-lettered"
                );
                self.inner
                    .dead_letters
                    .lock()
                    .expect("dlq mutex poisoned")
                    .push(DeadLetter {
                        delivery,
                        error: e.to_string(),
                        timestamp: SystemTime::now(),
                    });
            } else {
                warn!(
                    routing_key = %delivery.routing_key,
                    attempt = delivery.attempt,
                    error = %e,
                    "message handling failed, requeueing"
                );
                queue.push(delivery.redelivered());
            }
        }
        result
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<(), QueueError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        self.queue(routing_key)
            .push(Delivery::new(routing_key, body));
        Ok(())
    }
}
