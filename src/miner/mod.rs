//! Proof-of-work block production
//!
//! Each candidate goes through five phases: wait until the node is synced,
//! build a template on the current tip, search nonces, check the solution
//! still adds work, and hand it to the consensus manager. Rejections restart
//! from the first phase; the session ends when enough blocks were produced
//! or the shared nonce budget runs out.

use crate::chain::{BlockTemplateProvider, ConsensusManager, ConsensusParams, SyncState};
use crate::types::{Block, ChainedHeader, Hash256, Script};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

pub mod session;
pub mod task;

pub use session::{BlockAttempt, ExtraNonceState, MiningSession, MiningStats};
pub use task::{RecurringTask, RetryDelay};

use session::MinerCounters;

/// Longest coinbase scriptSig consensus accepts
pub const MAX_COINBASE_SCRIPT_SIG_LEN: usize = 100;

/// Nonce increments between cancellation checks
const SEARCH_BATCH: u64 = 4096;

/// Miner tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// Nonces tried per candidate before a fresh template is fetched
    pub inner_loop_count: u64,
    /// Pause between sync checks while the node is catching up
    pub sync_wait: Duration,
    /// Backoff of the background task between failed iterations
    pub retry: RetryDelay,
    /// Appended to every coinbase scriptSig after height and extra nonce
    pub coinbase_flags: Vec<u8>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            inner_loop_count: 65_536,
            sync_wait: Duration::from_secs(60),
            retry: RetryDelay::default(),
            coinbase_flags: Vec::new(),
        }
    }
}

enum SearchOutcome {
    Solved,
    /// Inner ceiling hit without a solution
    Exhausted,
    /// Shared budget spent
    OutOfTries,
}

/// Block producer for proof-of-work networks
pub struct PowMiner {
    consensus: Arc<dyn ConsensusManager>,
    templates: Arc<dyn BlockTemplateProvider>,
    sync: Arc<dyn SyncState>,
    params: Arc<ConsensusParams>,
    config: MinerConfig,
    shutdown: CancellationToken,
    extra_nonce: Mutex<ExtraNonceState>,
    task: Mutex<Option<RecurringTask>>,
    counters: MinerCounters,
}

impl PowMiner {
    pub fn new(
        consensus: Arc<dyn ConsensusManager>,
        templates: Arc<dyn BlockTemplateProvider>,
        sync: Arc<dyn SyncState>,
        params: Arc<ConsensusParams>,
        config: MinerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            consensus,
            templates,
            sync,
            params,
            config,
            shutdown,
            extra_nonce: Mutex::new(ExtraNonceState::default()),
            task: Mutex::new(None),
            counters: MinerCounters::new(),
        }
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Mine in the background until stopped or shut down
    ///
    /// Returns `false` when mining was already running.
    pub fn start_mining(self: &Arc<Self>, payout_script: Script) -> bool {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Mining already running");
            return false;
        }

        let miner = Arc::clone(self);
        let task = RecurringTask::spawn(
            "pow-miner",
            self.shutdown.child_token(),
            self.config.retry,
            move |token| {
                let miner = Arc::clone(&miner);
                let payout_script = payout_script.clone();
                async move {
                    miner
                        .mine(&payout_script, u64::MAX, u64::MAX, &token)
                        .await
                        .map(|_| ())
                }
            },
        );
        *slot = Some(task);

        info!("Mining started on {}", self.params.name);
        true
    }

    /// Stop background mining and wait for the task to exit
    pub async fn stop_mining(&self) {
        let Some(task) = self.task.lock().take() else {
            debug!("Mining not running");
            return;
        };
        match task.stop().await {
            Ok(()) => info!("Mining stopped"),
            Err(e) => warn!("Mining task had already failed: {}", e),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stats(&self) -> MiningStats {
        self.counters.snapshot()
    }

    /// Mine up to `blocks` blocks, spending at most `max_tries` nonce increments
    ///
    /// Returns the hashes of the produced blocks in order; fewer than asked
    /// when the budget ran out first.
    #[instrument(skip(self, payout_script), fields(network = %self.params.name))]
    pub async fn generate_blocks(&self, payout_script: &Script, blocks: u64, max_tries: u64) -> Result<Vec<Hash256>> {
        self.mine(payout_script, blocks, max_tries, &self.shutdown).await
    }

    /// Write height and a fresh extra nonce into the candidate's coinbase
    ///
    /// Returns the extra nonce used.
    pub fn increment_extra_nonce(&self, block: &mut Block, previous: &ChainedHeader) -> Result<u64> {
        let extra_nonce = self.extra_nonce.lock().next_for(&block.header.prev_hash);
        let script_sig = Script::coinbase(previous.height + 1, extra_nonce, &self.config.coinbase_flags);
        if script_sig.len() > MAX_COINBASE_SCRIPT_SIG_LEN {
            return Err(Error::invariant(format!(
                "coinbase scriptSig is {} bytes, limit is {}",
                script_sig.len(),
                MAX_COINBASE_SCRIPT_SIG_LEN
            )));
        }

        let coinbase = block
            .coinbase_mut()
            .ok_or_else(|| Error::mining("candidate block has no coinbase"))?;
        coinbase.inputs[0].script_sig = script_sig;
        block.update_merkle_root();

        self.templates.notify_modified(previous, block);
        Ok(extra_nonce)
    }

    async fn mine(
        &self,
        payout_script: &Script,
        target_blocks: u64,
        max_tries: u64,
        token: &CancellationToken,
    ) -> Result<Vec<Hash256>> {
        let mut session = MiningSession::new(self.consensus.tip().height, target_blocks, max_tries);

        while session.can_continue() {
            tokio::task::yield_now().await;
            if token.is_cancelled() {
                return Err(Error::cancelled("block production"));
            }

            // Sync gate; genesis can always be built on
            let tip = self.consensus.tip();
            if !tip.is_genesis() && self.sync.is_initial_block_download() {
                debug!("Node is catching up, waiting {:?}", self.config.sync_wait);
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::cancelled("sync wait")),
                    _ = tokio::time::sleep(self.config.sync_wait) => {}
                }
                continue;
            }

            let template = match self.templates.build_candidate(&tip, payout_script).await {
                Ok(template) => template,
                Err(e) if e.is_recoverable() => {
                    debug!("Could not build a candidate on {}: {}", tip.hash, e);
                    MinerCounters::bump(&self.counters.templates_failed, 1);
                    continue;
                }
                Err(e) => return Err(e),
            };
            MinerCounters::bump(&self.counters.candidates_built, 1);
            let mut attempt = BlockAttempt::new(tip, template.block, self.config.inner_loop_count);
            if self.params.is_proof_of_stake() && attempt.block.header.time <= attempt.tip.header.time {
                trace!(
                    "Template time {} not after tip time {}",
                    attempt.block.header.time,
                    attempt.tip.header.time
                );
                continue;
            }

            attempt.extra_nonce = self.increment_extra_nonce(&mut attempt.block, &attempt.tip)?;
            match self.search(&mut attempt, &mut session, token).await? {
                SearchOutcome::Solved => {}
                SearchOutcome::Exhausted => continue,
                SearchOutcome::OutOfTries => {
                    debug!("Nonce budget spent after {} blocks", session.blocks_produced());
                    break;
                }
            }

            let candidate = attempt.candidate();
            if !attempt.adds_work() {
                debug!("Solution {} adds no work over tip {}", candidate.hash, attempt.tip.hash);
                MinerCounters::bump(&self.counters.blocks_rejected, 1);
                continue;
            }

            trace!("Submitting {} with extra nonce {}", candidate.hash, attempt.extra_nonce);
            match self.consensus.submit_mined_block(attempt.block.clone()).await {
                Ok(Some(connected)) => {
                    info!("Mined block {} at height {}", connected.hash, connected.height);
                    attempt.connected = Some(connected);
                    session.record_attempt(attempt);
                    MinerCounters::bump(&self.counters.blocks_produced, 1);
                }
                Ok(None) => {
                    debug!("Block {} was not accepted", candidate.hash);
                    MinerCounters::bump(&self.counters.blocks_rejected, 1);
                }
                Err(e) if e.is_recoverable() => {
                    debug!("Block {} rejected: {}", candidate.hash, e);
                    MinerCounters::bump(&self.counters.blocks_rejected, 1);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Session from height {} reached {} with {} blocks",
            session.start_height(),
            session.height_reached(),
            session.blocks_produced()
        );
        Ok(session.into_hashes())
    }

    async fn search(
        &self,
        attempt: &mut BlockAttempt,
        session: &mut MiningSession,
        token: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let mut checks = 0u64;

        let outcome = loop {
            checks += 1;
            if attempt.block.header.check_proof_of_work() {
                break SearchOutcome::Solved;
            }
            if !attempt.consume_try() {
                break SearchOutcome::Exhausted;
            }
            if !session.consume_try() {
                break SearchOutcome::OutOfTries;
            }
            attempt.block.header.nonce += 1;

            if checks % SEARCH_BATCH == 0 {
                if token.is_cancelled() {
                    MinerCounters::bump(&self.counters.hashes_tried, checks);
                    return Err(Error::cancelled("nonce search"));
                }
                tokio::task::yield_now().await;
            }
        };

        MinerCounters::bump(&self.counters.hashes_tried, checks);
        Ok(outcome)
    }
}

impl std::fmt::Debug for PowMiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowMiner")
            .field("network", &self.params.name)
            .field("config", &self.config)
            .field("mining", &self.is_mining())
            .finish()
    }
}
