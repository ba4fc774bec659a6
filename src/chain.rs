//! Contracts of the chain-side collaborators
//!
//! The miner and the peer behaviors never validate blocks themselves. They talk
//! to the chain index, the consensus manager, the block-template provider and
//! the sync-state oracle through these traits, and read the network's
//! consensus parameters.

use crate::peer::ProtocolVersion;
use crate::types::{Block, BlockHeader, ChainedHeader, Hash256, Script, Target};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Network-wide consensus parameters the core reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Network name used in logs
    pub name: String,
    /// Whether blocks are produced under the stake-based variant
    pub proof_of_stake: bool,
    /// Height at which the minimum protocol version is raised, 0 disables it
    pub enforce_min_version_at_height: u64,
    /// Minimum protocol version enforced once the height is reached
    pub enforced_min_version: ProtocolVersion,
    /// Easiest target a block may carry
    pub pow_limit: Target,
    /// Timestamp of the genesis header
    pub genesis_time: u32,
    /// Coinbase reward paid by template providers
    pub block_reward: u64,
}

impl ConsensusParams {
    /// Local proof-of-work development network
    pub fn devnet() -> Self {
        Self {
            name: "devnet".to_string(),
            proof_of_stake: false,
            enforce_min_version_at_height: 0,
            enforced_min_version: ProtocolVersion::CURRENT,
            // One hash in 256 satisfies it
            pow_limit: Target::new([u64::MAX, u64::MAX, u64::MAX, 0x00ff_ffff_ffff_ffff]),
            genesis_time: 1_700_000_000,
            block_reward: 50_0000_0000,
        }
    }

    /// Local development network using the stake-based timestamp rules
    pub fn devnet_pos() -> Self {
        Self {
            name: "devnet-pos".to_string(),
            proof_of_stake: true,
            ..Self::devnet()
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.proof_of_stake
    }

    pub fn enforce_min_version_at_height(&self) -> u64 {
        self.enforce_min_version_at_height
    }

    pub fn enforced_min_version(&self) -> ProtocolVersion {
        self.enforced_min_version
    }

    /// Genesis header of this network
    pub fn genesis_header(&self) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: self.genesis_time,
            target: self.pow_limit,
            nonce: 0,
        }
    }
}

/// Read access to the validated header tree
pub trait ChainIndex: Send + Sync {
    /// Height of the current best header
    fn height(&self) -> u64;
}

/// Candidate block assembled from the mempool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub block: Block,
    pub total_fees: u64,
}

/// Builds candidate blocks for the miner
#[async_trait]
pub trait BlockTemplateProvider: Send + Sync {
    /// Assemble an unsolved block on top of `tip` paying to `payout_script`
    async fn build_candidate(&self, tip: &ChainedHeader, payout_script: &Script)
        -> Result<BlockTemplate>;

    /// Told whenever the miner rewrites a candidate's coinbase
    fn notify_modified(&self, previous: &ChainedHeader, block: &Block);
}

/// Consensus rule engine that owns the best chain
#[async_trait]
pub trait ConsensusManager: Send + Sync {
    /// Current best validated header
    fn tip(&self) -> ChainedHeader;

    /// Offer a locally mined block
    ///
    /// `Ok(None)` or a consensus error means the block was rejected.
    async fn submit_mined_block(&self, block: Block) -> Result<Option<ChainedHeader>>;
}

/// Whether the node still trails the network
pub trait SyncState: Send + Sync {
    fn is_initial_block_download(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devnet_presets() {
        let pow = ConsensusParams::devnet();
        let pos = ConsensusParams::devnet_pos();

        assert!(!pow.is_proof_of_stake());
        assert!(pos.is_proof_of_stake());
        assert_eq!(pow.enforce_min_version_at_height(), 0);
        assert_eq!(pos.pow_limit, pow.pow_limit);
    }

    #[test]
    fn test_genesis_header_uses_limit() {
        let params = ConsensusParams::devnet();
        let genesis = params.genesis_header();
        assert_eq!(genesis.target, params.pow_limit);
        assert_eq!(genesis.prev_hash, Hash256::ZERO);
        assert_eq!(genesis.time, params.genesis_time);
    }
}
