//! Peer connection behaviors
//!
//! A behavior observes one connection's message stream and state transitions.
//! Templates are built once by a [`BehaviorFactory`] and cloned unattached for
//! every new connection.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod behavior;
pub mod enforce_version;
pub mod events;
pub mod message;
pub mod ping_pong;

pub use behavior::{AttachedBehaviors, Attachment, BehaviorFactory, PeerBehavior};
pub use enforce_version::EnforcePeerVersionBehavior;
pub use events::{MessageHandler, PeerEvents, StateHandler, Subscription};
pub use message::{Message, ProtocolVersion};
pub use ping_pong::{PingPongBehavior, PingPongConfig, PingPongMode};

/// Connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Created,
    Connected,
    /// Version and capabilities negotiated
    HandShaked,
    Disconnecting,
    Offline,
    Failed,
}

impl PeerState {
    /// Whether the connection can still carry messages
    pub fn is_open(&self) -> bool {
        matches!(self, PeerState::Connected | PeerState::HandShaked)
    }
}

/// One live network connection, as seen by behaviors
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> PeerId;

    /// Version agreed during the handshake, `None` until it completes
    fn negotiated_version(&self) -> Option<ProtocolVersion>;

    fn state(&self) -> PeerState;

    /// Queue a message for the peer
    async fn send(&self, message: Message) -> Result<()>;

    /// Close the connection; the reason ends up in the logs
    fn disconnect(&self, reason: &str);

    /// Handler registry of this connection
    fn events(&self) -> &PeerEvents;
}
