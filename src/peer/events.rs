//! Per-connection event hub
//!
//! A connection owns one `PeerEvents`. Behaviors subscribe handlers to it and
//! the connection dispatches every inbound message and state transition to
//! the handlers registered at that moment.

use super::{Message, PeerConnection, PeerState};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reacts to inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, peer: &Arc<dyn PeerConnection>, message: &Message);
}

/// Reacts to connection state transitions
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Called after the state moved away from `previous`
    async fn on_state_changed(&self, peer: &Arc<dyn PeerConnection>, previous: PeerState);
}

/// Handle returned by a registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Message(u64),
    State(u64),
}

/// Handler registry of one connection
#[derive(Default)]
pub struct PeerEvents {
    next_id: AtomicU64,
    message_handlers: RwLock<Vec<(u64, Arc<dyn MessageHandler>)>>,
    state_handlers: RwLock<Vec<(u64, Arc<dyn StateHandler>)>>,
}

impl PeerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message handler
    pub fn subscribe_messages(&self, handler: Arc<dyn MessageHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.message_handlers.write().push((id, handler));
        Subscription::Message(id)
    }

    /// Register a state-change handler
    pub fn subscribe_state(&self, handler: Arc<dyn StateHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state_handlers.write().push((id, handler));
        Subscription::State(id)
    }

    /// Remove a handler; returns `false` if it was not registered
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        match subscription {
            Subscription::Message(id) => {
                let mut handlers = self.message_handlers.write();
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                handlers.len() != before
            }
            Subscription::State(id) => {
                let mut handlers = self.state_handlers.write();
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                handlers.len() != before
            }
        }
    }

    /// Number of registered handlers of both kinds
    pub fn handler_count(&self) -> usize {
        self.message_handlers.read().len() + self.state_handlers.read().len()
    }

    /// Deliver an inbound message to every message handler
    pub async fn dispatch_message(&self, peer: &Arc<dyn PeerConnection>, message: &Message) {
        // Snapshot so handlers may (un)subscribe while being called
        let handlers: Vec<_> = self
            .message_handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler.on_message(peer, message).await;
        }
    }

    /// Deliver a state transition to every state handler
    pub async fn dispatch_state_change(&self, peer: &Arc<dyn PeerConnection>, previous: PeerState) {
        let handlers: Vec<_> = self
            .state_handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler.on_state_changed(peer, previous).await;
        }
    }
}

impl std::fmt::Debug for PeerEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEvents")
            .field("message_handlers", &self.message_handlers.read().len())
            .field("state_handlers", &self.state_handlers.read().len())
            .finish()
    }
}
