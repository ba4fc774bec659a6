//! Protocol versions and the messages the behaviors react to
//!
//! Payload encoding belongs to the protocol layer; behaviors only need to
//! tell pings and pongs apart from everything else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiated peer protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u32);

impl ProtocolVersion {
    /// Oldest version the node talks to at all
    pub const MIN_PEER: ProtocolVersion = ProtocolVersion(209);
    /// First version whose pings carry a nonce and expect a pong
    pub const PONG: ProtocolVersion = ProtocolVersion(60_001);
    /// Version this node advertises
    pub const CURRENT: ProtocolVersion = ProtocolVersion(70_012);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Whether a peer at this version answers pings with pongs
    pub fn supports_pong(&self) -> bool {
        *self >= Self::PONG
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message exchanged with a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Liveness probe
    Ping { nonce: u64 },
    /// Answer to a probe, echoing its nonce
    Pong { nonce: u64 },
    /// Any other protocol message, identified by its command name
    Other { command: String },
}

impl Message {
    /// Command name as it appears on the wire
    pub fn command(&self) -> &str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Other { command } => command,
        }
    }

    /// Convenience constructor for non-liveness messages
    pub fn other(command: impl Into<String>) -> Self {
        Message::Other {
            command: command.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_support() {
        assert!(!ProtocolVersion::MIN_PEER.supports_pong());
        assert!(!ProtocolVersion::new(60_000).supports_pong());
        assert!(ProtocolVersion::PONG.supports_pong());
        assert!(ProtocolVersion::CURRENT.supports_pong());
    }

    #[test]
    fn test_message_command() {
        assert_eq!(Message::Ping { nonce: 1 }.command(), "ping");
        assert_eq!(Message::Pong { nonce: 1 }.command(), "pong");
        assert_eq!(Message::other("inv").command(), "inv");
    }
}
