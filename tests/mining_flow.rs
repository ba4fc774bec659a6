//! End-to-end block production against the in-memory development chain

use assert_matches::assert_matches;
use async_trait::async_trait;
use blockforge::chain::{
    BlockTemplate, BlockTemplateProvider, ChainIndex, ConsensusManager, ConsensusParams,
};
use blockforge::devnet::DevChain;
use blockforge::miner::{MinerConfig, PowMiner};
use blockforge::{Block, ChainedHeader, Error, Result, Script, Target};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn node(params: ConsensusParams, config: MinerConfig) -> (Arc<DevChain>, Arc<PowMiner>, CancellationToken) {
    let params = Arc::new(params);
    let chain = Arc::new(DevChain::new(Arc::clone(&params)));
    let shutdown = CancellationToken::new();
    let miner = Arc::new(PowMiner::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        params,
        config,
        shutdown.clone(),
    ));
    (chain, miner, shutdown)
}

fn payout() -> Script {
    Script::from_hex("76a914000102030405060708090a0b0c0d0e0f1011121388ac").unwrap()
}

#[tokio::test]
async fn test_generate_blocks_extends_chain() {
    let (chain, miner, _shutdown) = node(ConsensusParams::devnet(), MinerConfig::default());

    let hashes = miner.generate_blocks(&payout(), 5, u64::MAX).await.unwrap();

    assert_eq!(hashes.len(), 5);
    assert_eq!(chain.height(), 5);
    for (index, hash) in hashes.iter().enumerate() {
        let header = chain.header_at(index as u64 + 1).unwrap();
        assert_eq!(&header.hash, hash);
        assert!(header.header.check_proof_of_work());
    }

    let blocks = chain.blocks();
    for (index, block) in blocks.iter().enumerate() {
        let coinbase = block.coinbase().unwrap();
        assert_eq!(coinbase.outputs[0].script_pubkey, payout());
        // Heights 1..=16 encode as OP_1..OP_16
        assert_eq!(coinbase.inputs[0].script_sig.as_bytes()[0], 0x51 + index as u8);
    }
    assert!(chain.modifications() >= 5);
    assert_eq!(miner.stats().blocks_produced, 5);
}

#[tokio::test]
async fn test_coinbase_message_is_appended() {
    let config = MinerConfig {
        coinbase_flags: b"/blockforge/".to_vec(),
        ..MinerConfig::default()
    };
    let (chain, miner, _shutdown) = node(ConsensusParams::devnet(), config);

    miner.generate_blocks(&payout(), 1, u64::MAX).await.unwrap();

    let block = &chain.blocks()[0];
    let script_sig = block.coinbase().unwrap().inputs[0].script_sig.as_bytes();
    assert!(script_sig.ends_with(b"/blockforge/"));
    assert!(script_sig.len() <= 100);
}

#[tokio::test]
async fn test_budget_exhaustion_against_impossible_target() {
    let params = ConsensusParams {
        pow_limit: Target::min(),
        ..ConsensusParams::devnet()
    };
    let (chain, miner, _shutdown) = node(params, MinerConfig::default());

    let hashes = miner.generate_blocks(&payout(), 3, 1_000).await.unwrap();

    assert!(hashes.is_empty());
    assert_eq!(chain.height(), 0);
    assert_eq!(miner.stats().hashes_tried, 1_001);
}

#[tokio::test]
async fn test_stake_network_block_times_increase() {
    let (chain, miner, _shutdown) = node(ConsensusParams::devnet_pos(), MinerConfig::default());

    let hashes = timeout(Duration::from_secs(30), miner.generate_blocks(&payout(), 2, u64::MAX))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(hashes.len(), 2);
    let first = chain.header_at(1).unwrap();
    let second = chain.header_at(2).unwrap();
    assert!(second.header.time > first.header.time);
}

#[tokio::test]
async fn test_background_mining_start_stop() {
    let (chain, miner, _shutdown) = node(ConsensusParams::devnet(), MinerConfig::default());

    assert!(miner.start_mining(payout()));
    assert!(!miner.start_mining(payout()));

    timeout(Duration::from_secs(30), async {
        while chain.height() < 3 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    miner.stop_mining().await;
    assert!(!miner.is_mining());

    let height = chain.height();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(chain.height(), height);
    assert_eq!(chain.tip().height, height);
}

#[tokio::test]
async fn test_node_shutdown_ends_background_mining() {
    let (_chain, miner, shutdown) = node(ConsensusParams::devnet(), MinerConfig::default());
    miner.start_mining(payout());

    shutdown.cancel();
    timeout(Duration::from_secs(10), async {
        while miner.is_mining() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_matches!(
        miner.generate_blocks(&payout(), 1, u64::MAX).await,
        Err(Error::Cancelled { .. })
    );
    miner.stop_mining().await;
}

#[tokio::test]
async fn test_mining_waits_for_sync() {
    let config = MinerConfig {
        sync_wait: Duration::from_millis(20),
        ..MinerConfig::default()
    };
    let (chain, miner, _shutdown) = node(ConsensusParams::devnet(), config);
    miner.generate_blocks(&payout(), 1, u64::MAX).await.unwrap();
    chain.set_initial_block_download(true);

    let pending = {
        let miner = Arc::clone(&miner);
        tokio::spawn(async move { miner.generate_blocks(&payout(), 1, u64::MAX).await })
    };
    sleep(Duration::from_millis(100)).await;
    assert_eq!(chain.height(), 1);

    chain.set_initial_block_download(false);
    let hashes = timeout(Duration::from_secs(10), pending).await.unwrap().unwrap().unwrap();
    assert_eq!(hashes.len(), 1);
    assert_eq!(chain.height(), 2);
}

/// Template provider whose second build fails
struct BusyMempool {
    chain: Arc<DevChain>,
    builds: AtomicU64,
}

#[async_trait]
impl BlockTemplateProvider for BusyMempool {
    async fn build_candidate(&self, tip: &ChainedHeader, payout_script: &Script) -> Result<BlockTemplate> {
        if self.builds.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(Error::mining("mempool busy"));
        }
        self.chain.build_candidate(tip, payout_script).await
    }

    fn notify_modified(&self, previous: &ChainedHeader, block: &Block) {
        self.chain.notify_modified(previous, block);
    }
}

#[tokio::test]
async fn test_template_failure_keeps_produced_blocks() {
    let params = Arc::new(ConsensusParams::devnet());
    let chain = Arc::new(DevChain::new(Arc::clone(&params)));
    let templates = Arc::new(BusyMempool {
        chain: Arc::clone(&chain),
        builds: AtomicU64::new(0),
    });
    let miner = PowMiner::new(
        chain.clone(),
        templates.clone(),
        chain.clone(),
        params,
        MinerConfig::default(),
        CancellationToken::new(),
    );

    let hashes = miner.generate_blocks(&payout(), 3, u64::MAX).await.unwrap();

    assert_eq!(hashes.len(), 3);
    assert_eq!(chain.height(), 3);
    for (index, hash) in hashes.iter().enumerate() {
        assert_eq!(&chain.header_at(index as u64 + 1).unwrap().hash, hash);
    }
    assert_eq!(templates.builds.load(Ordering::SeqCst), 4);
    assert_eq!(miner.stats().templates_failed, 1);
}
