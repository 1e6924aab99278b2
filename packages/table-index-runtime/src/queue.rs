//! At-least-once message delivery with visibility timeouts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::Result;

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle identifying this delivery; invalid once the message is redelivered
    pub receipt_handle: String,
    pub body: String,
    /// Number of times the message has been delivered, this delivery included
    pub receive_count: u32,
}

/// Message transport contract.
pub trait MessageQueue: Send + Sync {
    /// Enqueues a message body. Returns the message id.
    fn send(&self, body: String) -> Result<String>;

    /// Receives up to `max_messages` visible messages and hides them for `visibility`.
    fn receive(&self, max_messages: usize, visibility: Duration) -> Result<Vec<QueueMessage>>;

    /// Hides a received message for another `visibility` from now.
    ///
    /// Returns false if the receipt no longer refers to an in-flight delivery.
    fn extend_visibility(&self, receipt_handle: &str, visibility: Duration) -> Result<bool>;

    /// Removes delivered messages. Returns the number removed.
    fn delete(&self, receipt_handles: &[String]) -> Result<usize>;

    /// Messages in the queue, in flight or not.
    fn len(&self) -> Result<usize>;

    /// Returns true if no message is queued or in flight.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    receipt_handle: Option<String>,
}

/// In-process queue.
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    entries: Mutex<VecDeque<Entry>>,
}

impl InMemoryMessageQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently hidden by an outstanding delivery.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.receipt_handle.is_some() && entry.visible_at > now)
            .count()
    }
}

impl MessageQueue for InMemoryMessageQueue {
    fn send(&self, body: String) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.entries.lock().push_back(Entry {
            message_id: message_id.clone(),
            body,
            visible_at: Instant::now(),
            receive_count: 0,
            receipt_handle: None,
        });
        Ok(message_id)
    }

    fn receive(&self, max_messages: usize, visibility: Duration) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut received = Vec::new();
        for entry in entries.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            let receipt_handle = uuid::Uuid::new_v4().to_string();
            entry.receipt_handle = Some(receipt_handle.clone());
            entry.visible_at = now + visibility;
            entry.receive_count += 1;
            received.push(QueueMessage {
                message_id: entry.message_id.clone(),
                receipt_handle,
                body: entry.body.clone(),
                receive_count: entry.receive_count,
            });
        }
        Ok(received)
    }

    fn extend_visibility(&self, receipt_handle: &str, visibility: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        match entries
            .iter_mut()
            .find(|entry| entry.receipt_handle.as_deref() == Some(receipt_handle))
        {
            Some(entry) => {
                entry.visible_at = Instant::now() + visibility;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, receipt_handles: &[String]) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| match &entry.receipt_handle {
            Some(handle) => !receipt_handles.contains(handle),
            None => true,
        });
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().len())
    }
}
