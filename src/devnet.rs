//! In-memory development network
//!
//! [`DevChain`] stands in for the chain index, consensus manager, template
//! provider and sync oracle of a full node, checking only linkage, merkle
//! root and proof of work. [`MemoryPeer`] is a connection whose outbound
//! messages land on a channel.

use crate::chain::{
    BlockTemplate, BlockTemplateProvider, ChainIndex, ConsensusManager, ConsensusParams, SyncState,
};
use crate::peer::{Message, PeerConnection, PeerEvents, PeerId, PeerState, ProtocolVersion};
use crate::types::{Block, BlockHeader, ChainedHeader, Hash256, Script, Transaction, TxIn, TxOut};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Single-branch chain kept in memory
#[derive(Debug)]
pub struct DevChain {
    params: Arc<ConsensusParams>,
    headers: RwLock<Vec<ChainedHeader>>,
    blocks: RwLock<Vec<Block>>,
    initial_download: AtomicBool,
    modifications: AtomicU64,
}

impl DevChain {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        let genesis = ChainedHeader::genesis(params.genesis_header());
        info!(
            "Starting {} chain at genesis {}, {} leading zero bits required",
            params.name,
            genesis.hash,
            params.pow_limit.difficulty_level()
        );
        Self {
            params,
            headers: RwLock::new(vec![genesis]),
            blocks: RwLock::new(Vec::new()),
            initial_download: AtomicBool::new(false),
            modifications: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &Arc<ConsensusParams> {
        &self.params
    }

    /// Pretend the node is (or is no longer) catching up with the network
    pub fn set_initial_block_download(&self, syncing: bool) {
        self.initial_download.store(syncing, Ordering::SeqCst);
    }

    /// Header at `height` on the best chain
    pub fn header_at(&self, height: u64) -> Option<ChainedHeader> {
        let index = usize::try_from(height).ok()?;
        self.headers.read().get(index).cloned()
    }

    /// Accepted blocks in chain order, genesis excluded
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    /// How many times the miner rewrote a candidate coinbase
    pub fn modifications(&self) -> u64 {
        self.modifications.load(Ordering::Relaxed)
    }

    fn coinbase_transaction(&self, height: u64, payout_script: &Script) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn::coinbase(Script::coinbase(height, 0, &[]))],
            outputs: vec![TxOut {
                value: self.params.block_reward,
                script_pubkey: payout_script.clone(),
            }],
            lock_time: 0,
        }
    }
}

impl ChainIndex for DevChain {
    fn height(&self) -> u64 {
        self.headers.read().last().map(|h| h.height).unwrap_or_default()
    }
}

impl SyncState for DevChain {
    fn is_initial_block_download(&self) -> bool {
        self.initial_download.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockTemplateProvider for DevChain {
    async fn build_candidate(&self, tip: &ChainedHeader, payout_script: &Script) -> Result<BlockTemplate> {
        let now = u32::try_from(Utc::now().timestamp())
            .map_err(|_| Error::mining("system clock beyond 32-bit timestamps"))?;

        let mut block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: tip.hash,
                merkle_root: Hash256::ZERO,
                time: now.max(tip.header.time),
                target: self.params.pow_limit,
                nonce: 0,
            },
            transactions: vec![self.coinbase_transaction(tip.height + 1, payout_script)],
        };
        block.update_merkle_root();

        trace!("Built candidate on {} at height {}", tip.hash, tip.height + 1);
        Ok(BlockTemplate {
            block,
            total_fees: 0,
        })
    }

    fn notify_modified(&self, previous: &ChainedHeader, block: &Block) {
        self.modifications.fetch_add(1, Ordering::Relaxed);
        trace!("Candidate on {} modified, merkle root {}", previous.hash, block.header.merkle_root);
    }
}

#[async_trait]
impl ConsensusManager for DevChain {
    fn tip(&self) -> ChainedHeader {
        let headers = self.headers.read();
        match headers.last() {
            Some(tip) => tip.clone(),
            None => ChainedHeader::genesis(self.params.genesis_header()),
        }
    }

    async fn submit_mined_block(&self, block: Block) -> Result<Option<ChainedHeader>> {
        if !block.header.check_proof_of_work() {
            return Err(Error::consensus(format!("high-hash: {}", block.hash())));
        }
        if block.coinbase().is_none() {
            return Err(Error::consensus("bad-cb-missing"));
        }
        let mut check = block.clone();
        check.update_merkle_root();
        if check.header.merkle_root != block.header.merkle_root {
            return Err(Error::consensus("bad-txnmrklroot"));
        }

        let mut headers = self.headers.write();
        let Some(tip) = headers.last() else {
            return Err(Error::invalid_state("chain has no genesis"));
        };
        if block.header.prev_hash != tip.hash {
            debug!("Block {} does not extend tip {}", block.hash(), tip.hash);
            return Ok(None);
        }

        let chained = ChainedHeader::extend(tip, block.header.clone());
        headers.push(chained.clone());
        self.blocks.write().push(block);
        debug!("Connected block {} at height {}", chained.hash, chained.height);
        Ok(Some(chained))
    }
}

/// Connection backed by an unbounded channel
pub struct MemoryPeer {
    id: PeerId,
    version: RwLock<Option<ProtocolVersion>>,
    state: RwLock<PeerState>,
    outbound: mpsc::UnboundedSender<Message>,
    events: PeerEvents,
    disconnects: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
}

impl MemoryPeer {
    /// New peer plus the receiving end of everything sent to it
    pub fn new(
        version: Option<ProtocolVersion>,
        state: PeerState,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Self {
            id: PeerId::random(),
            version: RwLock::new(version),
            state: RwLock::new(state),
            outbound,
            events: PeerEvents::new(),
            disconnects: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        });
        (peer, rx)
    }

    /// Simulate an inbound message
    pub async fn deliver(self: &Arc<Self>, message: Message) {
        let peer: Arc<dyn PeerConnection> = Arc::clone(self) as Arc<dyn PeerConnection>;
        self.events.dispatch_message(&peer, &message).await;
    }

    /// Move to `state`, notifying state handlers if it changed
    pub async fn set_state(self: &Arc<Self>, state: PeerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            let peer: Arc<dyn PeerConnection> = Arc::clone(self) as Arc<dyn PeerConnection>;
            self.events.dispatch_state_change(&peer, previous).await;
        }
    }

    pub fn set_negotiated_version(&self, version: Option<ProtocolVersion>) {
        *self.version.write() = version;
    }

    /// Make every following send fail as if the socket broke
    pub fn set_send_failure(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Reasons passed to every `disconnect` call so far
    pub fn disconnect_reasons(&self) -> Vec<String> {
        self.disconnects.lock().clone()
    }
}

#[async_trait]
impl PeerConnection for MemoryPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn negotiated_version(&self) -> Option<ProtocolVersion> {
        *self.version.read()
    }

    fn state(&self) -> PeerState {
        *self.state.read()
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) || !self.state().is_open() {
            return Err(Error::peer(self.id, "connection closed"));
        }
        self.outbound
            .send(message)
            .map_err(|_| Error::peer(self.id, "receiver dropped"))
    }

    fn disconnect(&self, reason: &str) {
        info!("Disconnecting peer {}: {}", self.id, reason);
        self.disconnects.lock().push(reason.to_string());
        *self.state.write() = PeerState::Offline;
    }

    fn events(&self) -> &PeerEvents {
        &self.events
    }
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("version", &self.negotiated_version())
            .finish()
    }
}
