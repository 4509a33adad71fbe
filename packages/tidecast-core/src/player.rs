//! Player collaborator.
//!
//! The streaming engine only needs three things from the player: the current
//! playback status, metadata for a queue item, and a change notification.
//! [`LocalPlayer`] is an in-process implementation whose state is set by the
//! host application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Playback state reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

/// Snapshot of the player's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// Queue item currently loaded, if any.
    pub item_id: Option<u32>,
}

/// Display metadata of one queue item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueItem {
    pub title: String,
    pub artist: String,
}

/// Callback invoked on every playback change.
///
/// Runs on the notifying thread and must not block.
pub type PlaybackListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`Player::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Interface to the central player.
pub trait Player: Send + Sync {
    /// Current playback status.
    fn status(&self) -> PlayerStatus;

    /// Metadata for a queue item, or `None` if the item is unknown.
    fn queue_item(&self, item_id: u32) -> Option<QueueItem>;

    /// Registers a change listener.
    fn subscribe(&self, listener: PlaybackListener) -> ListenerId;

    /// Removes a change listener. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// Player whose state is driven by the embedding application.
#[derive(Default)]
pub struct LocalPlayer {
    status: RwLock<PlayerStatus>,
    queue: DashMap<u32, QueueItem>,
    listeners: DashMap<u64, PlaybackListener>,
    next_listener: AtomicU64,
}

impl LocalPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a queue item.
    pub fn set_queue_item(&self, item_id: u32, item: QueueItem) {
        self.queue.insert(item_id, item);
    }

    /// Sets the playback state and notifies listeners if it changed.
    pub fn set_state(&self, state: PlaybackState) {
        let changed = {
            let mut status = self.status.write();
            let changed = status.state != state;
            status.state = state;
            changed
        };
        if changed {
            log::debug!("[Player] State -> {:?}", state);
            self.notify();
        }
    }

    /// Loads a queue item (or none) and notifies listeners.
    pub fn set_current_item(&self, item_id: Option<u32>) {
        self.status.write().item_id = item_id;
        log::debug!("[Player] Current item -> {:?}", item_id);
        self.notify();
    }

    /// Invokes every registered listener.
    pub fn notify(&self) {
        let listeners: Vec<PlaybackListener> =
            self.listeners.iter().map(|e| Arc::clone(e.value())).collect();
        for listener in listeners {
            listener();
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Player for LocalPlayer {
    fn status(&self) -> PlayerStatus {
        *self.status.read()
    }

    fn queue_item(&self, item_id: u32) -> Option<QueueItem> {
        self.queue.get(&item_id).map(|item| item.value().clone())
    }

    fn subscribe(&self, listener: PlaybackListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        ListenerId(id)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(player: &LocalPlayer) -> (ListenerId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = player.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (id, count)
    }

    #[test]
    fn state_change_notifies_once() {
        let player = LocalPlayer::new();
        let (_, count) = counting_listener(&player);

        player.set_state(PlaybackState::Playing);
        player.set_state(PlaybackState::Playing);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(player.status().state, PlaybackState::Playing);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let player = LocalPlayer::new();
        let (id, count) = counting_listener(&player);

        assert!(player.unsubscribe(id));
        assert!(!player.unsubscribe(id));
        player.set_current_item(Some(3));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn queue_items_are_looked_up_by_id() {
        let player = LocalPlayer::new();
        player.set_queue_item(
            7,
            QueueItem {
                title: "Song".into(),
                artist: "Band".into(),
            },
        );
        assert_eq!(player.queue_item(7).unwrap().artist, "Band");
        assert!(player.queue_item(8).is_none());
    }
}
