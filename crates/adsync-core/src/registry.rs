//! Process-wide player registry
//!
//! Tracks live players so app lifecycle notifications (background,
//! foreground) can be fanned out to each player's mailbox.

use crate::mailbox::{AppLifecycle, Mailbox, PlayerMessage};
use crate::types::PlayerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared registry of live players
#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: Arc<RwLock<HashMap<PlayerId, Mailbox>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: PlayerId, mailbox: Mailbox) {
        debug!(player_id = %id, "Player registered");
        self.players.write().insert(id, mailbox);
    }

    /// Returns false if the player was not registered
    pub fn unregister(&self, id: PlayerId) -> bool {
        let removed = self.players.write().remove(&id).is_some();
        if removed {
            debug!(player_id = %id, "Player unregistered");
        }
        removed
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.read().keys().copied().collect()
    }

    /// Notify every player that the app moved to the background
    pub fn on_app_background(&self) -> usize {
        self.broadcast(AppLifecycle::Background)
    }

    pub fn on_app_foreground(&self) -> usize {
        self.broadcast(AppLifecycle::Foreground)
    }

    /// Deliver a lifecycle change; players whose task is gone are dropped.
    /// Returns the number of players notified.
    fn broadcast(&self, lifecycle: AppLifecycle) -> usize {
        let mut players = self.players.write();
        players.retain(|_, mailbox| mailbox.post(PlayerMessage::Lifecycle(lifecycle)));
        info!(?lifecycle, players = players.len(), "App lifecycle change");
        players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = PlayerRegistry::new();
        let id = PlayerId::new();
        let (mailbox, _rx) = Mailbox::channel(id);

        registry.register(id, mailbox);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_live_players_only() {
        let registry = PlayerRegistry::new();
        let live = PlayerId::new();
        let gone = PlayerId::new();
        let (live_mailbox, mut live_rx) = Mailbox::channel(live);
        let (gone_mailbox, gone_rx) = Mailbox::channel(gone);
        registry.register(live, live_mailbox);
        registry.register(gone, gone_mailbox);
        drop(gone_rx);

        assert_eq!(registry.on_app_background(), 1);
        assert!(matches!(
            live_rx.try_recv(),
            Ok(PlayerMessage::Lifecycle(AppLifecycle::Background))
        ));
        assert_eq!(registry.ids(), vec![live]);
    }
}
