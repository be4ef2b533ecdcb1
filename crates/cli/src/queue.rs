// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory buffer of undelivered producer messages.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::Message;

/// Ordered buffer shared between the channel readers (producers) and
/// the injection controller (single consumer).
///
/// Arrival order is preserved. Messages leave only through [`drain`],
/// which empties the queue in one critical section: a batch is taken
/// whole or left whole, so a suppressed evaluation keeps everything
/// queued for the next attempt.
///
/// [`drain`]: MessageQueue::drain
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    nonempty: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake the consumer.
    pub fn push(&self, message: Message) {
        self.inner.lock().push_back(message);
        self.nonempty.notify_one();
    }

    /// Take every queued message, preserving arrival order.
    pub fn drain(&self) -> Vec<Message> {
        self.inner.lock().drain(..).collect()
    }

    /// Put a drained batch back at the head, preserving order. Used when
    /// injection fails before any text reached the pane.
    pub fn requeue_front(&self, batch: Vec<Message>) {
        {
            let mut inner = self.inner.lock();
            for message in batch.into_iter().rev() {
                inner.push_front(message);
            }
        }
        self.nonempty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Wait until at least one message has been pushed since the last
    /// wait completed.
    pub async fn notified(&self) {
        self.nonempty.notified().await;
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
