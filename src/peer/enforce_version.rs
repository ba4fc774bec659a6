//! Minimum protocol version enforcement
//!
//! Once the chain reaches the configured height the node-wide minimum
//! accepted version is ratcheted up. Connected peers below the new minimum
//! are dropped lazily, on the next message they send, never in a sweep.

use super::{Attachment, Message, MessageHandler, PeerBehavior, PeerConnection};
use crate::chain::{ChainIndex, ConsensusParams};
use crate::settings::NodeSettings;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Drops peers whose negotiated version is below the node minimum
pub struct EnforcePeerVersionBehavior {
    check: Arc<VersionCheck>,
    attachment: Option<Attachment>,
}

impl EnforcePeerVersionBehavior {
    pub fn new(settings: Arc<NodeSettings>, params: Arc<ConsensusParams>, chain: Arc<dyn ChainIndex>) -> Self {
        Self {
            check: Arc::new(VersionCheck {
                settings,
                params,
                chain,
            }),
            attachment: None,
        }
    }
}

impl PeerBehavior for EnforcePeerVersionBehavior {
    fn name(&self) -> &'static str {
        "enforce-peer-version"
    }

    fn attach(&mut self, peer: Arc<dyn PeerConnection>) -> Result<()> {
        if !Attachment::check(self.attachment.as_ref(), &peer, self.name())? {
            return Ok(());
        }
        let mut attachment = Attachment::new(peer);
        attachment.subscribe_messages(Arc::clone(&self.check) as Arc<dyn MessageHandler>);
        self.attachment = Some(attachment);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.release();
        }
    }

    fn clone_unattached(&self) -> Box<dyn PeerBehavior> {
        Box::new(Self {
            check: Arc::clone(&self.check),
            attachment: None,
        })
    }

    fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.attachment.as_ref().map(|a| Arc::clone(a.peer()))
    }
}

/// Stateless check shared by every clone
struct VersionCheck {
    settings: Arc<NodeSettings>,
    params: Arc<ConsensusParams>,
    chain: Arc<dyn ChainIndex>,
}

impl VersionCheck {
    fn ratchet_if_due(&self) {
        let threshold = self.params.enforce_min_version_at_height();
        let enforced = self.params.enforced_min_version();

        let enabled = threshold > 0;
        let applied = self.settings.min_protocol_version() >= enforced;
        if !enabled || applied {
            return;
        }

        let height = self.chain.height();
        if height >= threshold && self.settings.ratchet_min_protocol_version(enforced) {
            info!(
                "Height {} reached enforcement height {}, peers below version {} will be dropped",
                height, threshold, enforced
            );
        }
    }
}

#[async_trait]
impl MessageHandler for VersionCheck {
    async fn on_message(&self, peer: &Arc<dyn PeerConnection>, message: &Message) {
        self.ratchet_if_due();

        let Some(version) = peer.negotiated_version() else {
            return;
        };
        let minimum = self.settings.min_protocol_version();
        if version < minimum {
            debug!(
                "Peer {} sent {} with version {} below minimum {}",
                peer.id(),
                message.command(),
                version,
                minimum
            );
            peer.disconnect(&format!(
                "Peer protocol version {} is below the minimum accepted version {}",
                version, minimum
            ));
        }
    }
}
