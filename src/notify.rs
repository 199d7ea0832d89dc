use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, TableId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-table broadcast of committed assignment events.
pub struct NotifyHub {
    channels: DashMap<TableId, broadcast::Sender<Event>>,
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

    /// Subscribe to a table's changes. Creates the channel if needed.
    pub fn subscribe(&self, table_id: TableId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(table_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, table_id: TableId, event: &Event) {
        if let Some(sender) = self.channels.get(&table_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose receivers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
