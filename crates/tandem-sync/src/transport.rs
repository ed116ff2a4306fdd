//! Per-document publish/subscribe channels.
//!
//! Each document gets a [`tokio::sync::broadcast`] channel on first
//! subscription. Publishing to a document nobody listens on is a no-op.
//! Channels whose receivers are all gone are dropped on the next subscribe.

use std::{
  collections::HashMap,
  sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A message on a document channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
  /// An accepted edit. `update` is the legacy op list JSON or the base64
  /// merge delta, matching the document format.
  Edit {
    version:   i64,
    update:    String,
    client_id: String,
    user_id:   i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor:    Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    awareness: Option<String>,
  },
  /// Discard local state and re-fetch.
  Resync { version: Option<i64> },
}

pub struct Hub {
  capacity: usize,
  channels: Mutex<HashMap<i64, broadcast::Sender<ChannelMessage>>>,
}

impl Hub {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      channels: Mutex::new(HashMap::new()),
    }
  }

  pub fn subscribe(&self, post_id: i64) -> broadcast::Receiver<ChannelMessage> {
    let mut channels =
      self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    channels.retain(|_, sender| sender.receiver_count() > 0);
    channels
      .entry(post_id)
      .or_insert_with(|| broadcast::channel(self.capacity).0)
      .subscribe()
  }

  /// Returns the number of subscribers that will see the message.
  pub fn publish(&self, post_id: i64, message: ChannelMessage) -> usize {
    let mut channels =
      self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sender) = channels.get(&post_id) else {
      return 0;
    };
    match sender.send(message) {
      Ok(n) => {
        tracing::debug!(post_id, subscribers = n, "published channel message");
        n
      }
      Err(_) => {
        channels.remove(&post_id);
        0
      }
    }
  }

  pub fn subscriber_count(&self, post_id: i64) -> usize {
    self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&post_id)
      .map_or(0, broadcast::Sender::receiver_count)
  }
}
