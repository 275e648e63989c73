//! Live calendar updates for library embedders.
//!
//! A host's calendar view or a guest's booking page subscribes to a property
//! and redraws when an event arrives. The engine publishes every applied
//! change here. The CLI binary is one-shot and never subscribes.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, Id};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for reservation changes, one channel per property.
pub struct NotifyHub {
    channels: DashMap<Id, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a property. Creates the channel if needed.
    pub fn subscribe(&self, property_id: &Id) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(property_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, property_id: &Id, event: &Event) {
        if let Some(sender) = self.channels.get(property_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel of a deleted property; receivers see `Closed`.
    pub fn remove(&self, property_id: &Id) {
        self.channels.remove(property_id);
    }

    pub fn has_channel(&self, property_id: &Id) -> bool {
        self.channels.contains_key(property_id)
    }
}
