//! Attach/detach lifecycle shared by all behaviors

use super::{MessageHandler, PeerConnection, StateHandler, Subscription};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capability attached to at most one connection at a time
pub trait PeerBehavior: Send + Sync {
    /// Behavior name for logging
    fn name(&self) -> &'static str;

    /// Bind to `peer` and register callbacks
    ///
    /// Attaching again to the same connection is a no-op; attaching while
    /// bound to another connection is an error. Never blocks on I/O.
    fn attach(&mut self, peer: Arc<dyn PeerConnection>) -> Result<()>;

    /// Unregister every callback and cancel every timer; no-op when detached
    fn detach(&mut self);

    /// Fresh unattached instance with the same configuration
    fn clone_unattached(&self) -> Box<dyn PeerBehavior>;

    /// Connection currently bound, if any
    fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>>;
}

/// Registrations and timers a behavior owns while bound to a connection
pub struct Attachment {
    peer: Arc<dyn PeerConnection>,
    subscriptions: Vec<Subscription>,
    timers: CancellationToken,
}

impl Attachment {
    pub fn new(peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer,
            subscriptions: Vec::new(),
            timers: CancellationToken::new(),
        }
    }

    /// Decide whether `behavior` may attach to `peer`
    ///
    /// Returns `Ok(false)` when it is already attached there.
    pub fn check(current: Option<&Attachment>, peer: &Arc<dyn PeerConnection>, behavior: &str) -> Result<bool> {
        match current {
            None => Ok(true),
            Some(attachment) if attachment.is_for(peer) => Ok(false),
            Some(attachment) => Err(Error::invalid_state(format!(
                "{} is attached to peer {}, cannot attach to {}",
                behavior,
                attachment.peer.id(),
                peer.id()
            ))),
        }
    }

    pub fn peer(&self) -> &Arc<dyn PeerConnection> {
        &self.peer
    }

    pub fn is_for(&self, peer: &Arc<dyn PeerConnection>) -> bool {
        self.peer.id() == peer.id()
    }

    pub fn subscribe_messages(&mut self, handler: Arc<dyn MessageHandler>) {
        let subscription = self.peer.events().subscribe_messages(handler);
        self.subscriptions.push(subscription);
    }

    pub fn subscribe_state(&mut self, handler: Arc<dyn StateHandler>) {
        let subscription = self.peer.events().subscribe_state(handler);
        self.subscriptions.push(subscription);
    }

    /// Token cancelled on release; timers owned by the behavior watch it
    pub fn timers(&self) -> CancellationToken {
        self.timers.clone()
    }

    /// Unregister everything and stop the timers
    pub fn release(self) {
        self.timers.cancel();
        for subscription in self.subscriptions {
            if !self.peer.events().unsubscribe(subscription) {
                debug!("Subscription {:?} on peer {} was already gone", subscription, self.peer.id());
            }
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("peer", &self.peer.id())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// Templates cloned for every new connection
#[derive(Default)]
pub struct BehaviorFactory {
    templates: Vec<Box<dyn PeerBehavior>>,
}

impl BehaviorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template; it must not be attached
    pub fn with(mut self, behavior: impl PeerBehavior + 'static) -> Self {
        self.templates.push(behavior.clone_unattached());
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Unattached behaviors for a new connection
    pub fn instantiate(&self) -> AttachedBehaviors {
        AttachedBehaviors {
            behaviors: self.templates.iter().map(|t| t.clone_unattached()).collect(),
        }
    }
}

/// Behaviors owned by one connection
pub struct AttachedBehaviors {
    behaviors: Vec<Box<dyn PeerBehavior>>,
}

impl AttachedBehaviors {
    /// Attach every behavior; on failure the ones already attached are detached
    pub fn attach_all(&mut self, peer: Arc<dyn PeerConnection>) -> Result<()> {
        let _span = crate::logging::peer_span(&peer.id()).entered();
        for index in 0..self.behaviors.len() {
            if let Err(e) = self.behaviors[index].attach(Arc::clone(&peer)) {
                warn!(
                    "Attaching {} to peer {} failed: {}",
                    self.behaviors[index].name(),
                    peer.id(),
                    e
                );
                self.detach_all();
                return Err(e);
            }
        }
        debug!("Attached {} behaviors to peer {}", self.behaviors.len(), peer.id());
        Ok(())
    }

    /// Detach in reverse attach order
    pub fn detach_all(&mut self) {
        for behavior in self.behaviors.iter_mut().rev() {
            behavior.detach();
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PeerBehavior> {
        self.behaviors.iter().map(|b| b.as_ref())
    }
}
