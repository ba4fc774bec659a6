//! Ping/pong liveness probing
//!
//! At most one probe is outstanding per connection. A probe is attempted on
//! attach, on the transition to `HandShaked` and on every interval tick; an
//! attempt that finds another one in progress is skipped, not queued. A
//! probe left unanswered for the timeout interval disconnects the peer.

use super::{
    Attachment, Message, MessageHandler, PeerBehavior, PeerConnection, PeerState, StateHandler,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Which half of the exchange a connection takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PingPongMode {
    /// Send probes, ignore inbound pings
    Ping,
    /// Answer inbound pings, never probe
    Pong,
    #[default]
    Both,
}

impl PingPongMode {
    pub fn sends_pings(&self) -> bool {
        matches!(self, PingPongMode::Ping | PingPongMode::Both)
    }

    pub fn responds_pongs(&self) -> bool {
        matches!(self, PingPongMode::Pong | PingPongMode::Both)
    }
}

/// Liveness settings, fixed before the behavior is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPongConfig {
    pub mode: PingPongMode,
    pub ping_interval: Duration,
    /// Long enough to tolerate large transfers queued ahead of the pong
    pub timeout_interval: Duration,
}

impl Default for PingPongConfig {
    fn default() -> Self {
        Self {
            mode: PingPongMode::Both,
            ping_interval: Duration::from_secs(2 * 60),
            timeout_interval: Duration::from_secs(20 * 60),
        }
    }
}

/// Liveness behavior for one connection
pub struct PingPongBehavior {
    config: PingPongConfig,
    latency: Arc<RwLock<Duration>>,
    session: Option<Arc<PingSession>>,
    attachment: Option<Attachment>,
}

impl PingPongBehavior {
    pub fn new(config: PingPongConfig) -> Self {
        Self {
            config,
            latency: Arc::new(RwLock::new(Duration::ZERO)),
            session: None,
            attachment: None,
        }
    }

    pub fn config(&self) -> &PingPongConfig {
        &self.config
    }

    /// Last measured round trip, zero until a pong arrived on the current attachment
    pub fn latency(&self) -> Duration {
        *self.latency.read()
    }

    /// Try to send a probe now
    ///
    /// Returns `Ok(false)` when the probe was skipped.
    pub async fn probe(&self) -> Result<bool> {
        match &self.session {
            Some(session) => session.try_probe().await,
            None => Ok(false),
        }
    }

    /// Nonce of the probe awaiting its pong
    pub async fn outstanding_nonce(&self) -> Option<u64> {
        let session = self.session.as_ref()?;
        let state = session.state.lock().await;
        state.outstanding.as_ref().map(|probe| probe.nonce)
    }
}

impl PeerBehavior for PingPongBehavior {
    fn name(&self) -> &'static str {
        "ping-pong"
    }

    fn attach(&mut self, peer: Arc<dyn PeerConnection>) -> Result<()> {
        if !Attachment::check(self.attachment.as_ref(), &peer, self.name())? {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::invalid_state("ping-pong timers need a tokio runtime"))?;

        let mut attachment = Attachment::new(Arc::clone(&peer));
        let session = Arc::new_cyclic(|this| PingSession {
            this: this.clone(),
            config: self.config.clone(),
            peer: Arc::downgrade(&peer),
            state: Mutex::new(PingState::default()),
            latency: Arc::clone(&self.latency),
            timers: attachment.timers(),
        });
        attachment.subscribe_messages(Arc::clone(&session) as Arc<dyn MessageHandler>);

        if self.config.mode.sends_pings() {
            attachment.subscribe_state(Arc::clone(&session) as Arc<dyn StateHandler>);
            runtime.spawn(Arc::clone(&session).run_ticker());

            if peer.state() == PeerState::HandShaked {
                let session = Arc::clone(&session);
                runtime.spawn(async move {
                    if let Err(e) = session.try_probe().await {
                        debug!("Initial probe failed: {}", e);
                    }
                });
            }
        }

        self.session = Some(session);
        self.attachment = Some(attachment);
        Ok(())
    }

    fn detach(&mut self) {
        self.session = None;
        *self.latency.write() = Duration::ZERO;
        if let Some(attachment) = self.attachment.take() {
            attachment.release();
        }
    }

    fn clone_unattached(&self) -> Box<dyn PeerBehavior> {
        Box::new(Self::new(self.config.clone()))
    }

    fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.attachment.as_ref().map(|a| Arc::clone(a.peer()))
    }
}

/// Probe awaiting its pong
#[derive(Debug)]
struct Probe {
    nonce: u64,
    sent_at: Instant,
    timeout: CancellationToken,
}

#[derive(Debug, Default)]
struct PingState {
    outstanding: Option<Probe>,
}

/// State shared by the callbacks and timers of one attachment
struct PingSession {
    this: Weak<PingSession>,
    config: PingPongConfig,
    // Weak: the connection's event hub owns this session
    peer: Weak<dyn PeerConnection>,
    state: Mutex<PingState>,
    latency: Arc<RwLock<Duration>>,
    timers: CancellationToken,
}

impl PingSession {
    async fn try_probe(&self) -> Result<bool> {
        let Ok(mut state) = self.state.try_lock() else {
            trace!("Probe attempt already in progress, skipping");
            return Ok(false);
        };
        if self.timers.is_cancelled() || !self.config.mode.sends_pings() {
            return Ok(false);
        }
        let Some(peer) = self.peer.upgrade() else {
            return Ok(false);
        };
        match peer.negotiated_version() {
            Some(version) if version.supports_pong() => {}
            _ => return Ok(false),
        }
        if peer.state() != PeerState::HandShaked || state.outstanding.is_some() {
            return Ok(false);
        }

        let nonce: u64 = rand::random();
        let probe = Probe {
            nonce,
            sent_at: Instant::now(),
            timeout: self.timers.child_token(),
        };
        let deadline = probe.sent_at + self.config.timeout_interval;
        let timeout = probe.timeout.clone();
        state.outstanding = Some(probe);

        if let Err(e) = peer.send(Message::Ping { nonce }).await {
            state.outstanding = None;
            return Err(e);
        }
        drop(state);
        trace!("Sent ping {} to peer {}", nonce, peer.id());

        let session = self.this.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timeout.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(session) = session.upgrade() {
                        session.on_timeout(nonce).await;
                    }
                }
            }
        });
        Ok(true)
    }

    async fn on_timeout(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if !matches!(&state.outstanding, Some(probe) if probe.nonce == nonce) {
            return;
        }
        state.outstanding = None;
        drop(state);

        if let Some(peer) = self.peer.upgrade() {
            warn!("Peer {} did not answer ping {} in time", peer.id(), nonce);
            peer.disconnect(&format!("Pong timeout for nonce {}", nonce));
        }
    }

    async fn on_pong(&self, nonce: u64) {
        if !self.config.mode.sends_pings() {
            return;
        }
        let mut state = self.state.lock().await;
        let probe = match state.outstanding.take() {
            Some(probe) if probe.nonce == nonce => probe,
            other => {
                state.outstanding = other;
                trace!("Ignoring unexpected pong {}", nonce);
                return;
            }
        };
        probe.timeout.cancel();

        let latency = probe.sent_at.elapsed();
        *self.latency.write() = latency;
        debug!("Pong {} after {:?}", nonce, latency);
    }

    async fn run_ticker(self: Arc<Self>) {
        let interval = self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.timers.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.try_probe().await {
                        debug!("Periodic probe failed: {}", e);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for PingSession {
    async fn on_message(&self, peer: &Arc<dyn PeerConnection>, message: &Message) {
        match message {
            Message::Ping { nonce } if self.config.mode.responds_pongs() => {
                // The connection may be closing; nobody waits for this pong
                if let Err(e) = peer.send(Message::Pong { nonce: *nonce }).await {
                    debug!("Could not answer ping {} from peer {}: {}", nonce, peer.id(), e);
                }
            }
            Message::Pong { nonce } => self.on_pong(*nonce).await,
            _ => {}
        }
    }
}

#[async_trait]
impl StateHandler for PingSession {
    async fn on_state_changed(&self, peer: &Arc<dyn PeerConnection>, previous: PeerState) {
        if previous == PeerState::HandShaked || peer.state() != PeerState::HandShaked {
            return;
        }
        if let Err(e) = self.try_probe().await {
            debug!("Probe after handshake failed: {}", e);
        }
    }
}
