//! Bookkeeping for one mining session

use crate::types::{Block, ChainedHeader, Hash256};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Extra-nonce counter, restarted whenever the candidate's parent changes
#[derive(Debug, Default)]
pub struct ExtraNonceState {
    last_prev_hash: Option<Hash256>,
    counter: u64,
}

impl ExtraNonceState {
    /// Next extra nonce for a candidate built on `prev_hash`, starting at 1
    pub fn next_for(&mut self, prev_hash: &Hash256) -> u64 {
        if self.last_prev_hash.as_ref() != Some(prev_hash) {
            self.last_prev_hash = Some(*prev_hash);
            self.counter = 0;
        }
        self.counter = self.counter.wrapping_add(1);
        self.counter
    }
}

/// One candidate block and the tip it was built on
#[derive(Debug, Clone)]
pub struct BlockAttempt {
    pub tip: ChainedHeader,
    pub block: Block,
    pub extra_nonce: u64,
    /// Nonce increments left before the template must be rebuilt
    pub remaining_tries: u64,
    /// Set once the consensus manager connected the block
    pub connected: Option<ChainedHeader>,
}

impl BlockAttempt {
    /// Attempt allowed to search nonces below `inner_loop_count`
    pub fn new(tip: ChainedHeader, block: Block, inner_loop_count: u64) -> Self {
        let remaining_tries = inner_loop_count.saturating_sub(u64::from(block.header.nonce) + 1);
        Self {
            tip,
            block,
            extra_nonce: 0,
            remaining_tries,
            connected: None,
        }
    }

    /// Spend one increment of this candidate's nonce range
    pub fn consume_try(&mut self) -> bool {
        if self.remaining_tries == 0 || self.block.header.nonce == u32::MAX {
            return false;
        }
        self.remaining_tries -= 1;
        true
    }

    /// Header the solved block would have once connected
    pub fn candidate(&self) -> ChainedHeader {
        ChainedHeader::extend(&self.tip, self.block.header.clone())
    }

    /// Whether committing the candidate would increase cumulative work
    pub fn adds_work(&self) -> bool {
        self.candidate().chain_work > self.tip.chain_work
    }
}

/// Progress of a bounded session
#[derive(Debug)]
pub struct MiningSession {
    start_height: u64,
    target_blocks: u64,
    remaining_tries: u64,
    produced: Vec<Hash256>,
    last_connected: Option<ChainedHeader>,
}

impl MiningSession {
    pub fn new(start_height: u64, target_blocks: u64, max_tries: u64) -> Self {
        Self {
            start_height,
            target_blocks,
            remaining_tries: max_tries,
            produced: Vec::new(),
            last_connected: None,
        }
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Height of the last block this session connected, or the start height
    pub fn height_reached(&self) -> u64 {
        self.last_connected
            .as_ref()
            .map_or(self.start_height, |header| header.height)
    }

    /// Whether more blocks are wanted
    pub fn can_continue(&self) -> bool {
        self.blocks_produced() < self.target_blocks
    }

    /// Spend one nonce increment from the shared budget
    pub fn consume_try(&mut self) -> bool {
        match self.remaining_tries.checked_sub(1) {
            Some(remaining) => {
                self.remaining_tries = remaining;
                true
            }
            None => false,
        }
    }

    pub fn remaining_tries(&self) -> u64 {
        self.remaining_tries
    }

    /// Take over a connected attempt; returns `false` if it was never connected
    pub fn record_attempt(&mut self, attempt: BlockAttempt) -> bool {
        let Some(connected) = attempt.connected else {
            return false;
        };
        self.produced.push(connected.hash);
        self.last_connected = Some(connected);
        true
    }

    pub fn blocks_produced(&self) -> u64 {
        self.produced.len() as u64
    }

    pub fn into_hashes(self) -> Vec<Hash256> {
        self.produced
    }
}

/// Miner statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    /// Proof-of-work checks performed
    pub hashes_tried: u64,
    pub candidates_built: u64,
    pub blocks_produced: u64,
    /// Solved blocks the consensus manager refused
    pub blocks_rejected: u64,
    /// Template builds that failed and were retried
    pub templates_failed: u64,
    pub mining_time_secs: u64,
    pub average_hash_rate: f64,
}

/// Live counters behind [`MiningStats`]
#[derive(Debug)]
pub(crate) struct MinerCounters {
    pub hashes_tried: AtomicU64,
    pub candidates_built: AtomicU64,
    pub blocks_produced: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub templates_failed: AtomicU64,
    start_time: Instant,
}

impl MinerCounters {
    pub fn new() -> Self {
        Self {
            hashes_tried: AtomicU64::new(0),
            candidates_built: AtomicU64::new(0),
            blocks_produced: AtomicU64::new(0),
            blocks_rejected: AtomicU64::new(0),
            templates_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MiningStats {
        let hashes_tried = self.hashes_tried.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        MiningStats {
            hashes_tried,
            candidates_built: self.candidates_built.load(Ordering::Relaxed),
            blocks_produced: self.blocks_produced.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            templates_failed: self.templates_failed.load(Ordering::Relaxed),
            mining_time_secs: elapsed.as_secs(),
            average_hash_rate: if elapsed_secs > 0.0 {
                hashes_tried as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }
}
