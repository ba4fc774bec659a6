//! Node-wide settings shared by every connection

use crate::peer::ProtocolVersion;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

/// Settings read by all peer behaviors
///
/// The minimum accepted protocol version only ever grows for the lifetime of
/// the process.
#[derive(Debug)]
pub struct NodeSettings {
    min_protocol_version: AtomicU32,
}

impl NodeSettings {
    /// Create settings with the given starting minimum
    pub fn new(min_protocol_version: ProtocolVersion) -> Self {
        Self {
            min_protocol_version: AtomicU32::new(min_protocol_version.value()),
        }
    }

    /// Current minimum accepted protocol version
    pub fn min_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.min_protocol_version.load(Ordering::Acquire))
    }

    /// Raise the minimum to `version` unless it is already at least that high
    ///
    /// Returns `true` only for the caller that actually raised it.
    pub fn ratchet_min_protocol_version(&self, version: ProtocolVersion) -> bool {
        let previous = self
            .min_protocol_version
            .fetch_max(version.value(), Ordering::AcqRel);
        let raised = previous < version.value();
        if raised {
            info!(
                "Minimum accepted protocol version raised from {} to {}",
                previous, version
            );
        }
        raised
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::new(ProtocolVersion::MIN_PEER)
    }
}
