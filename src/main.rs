//! blockforge - block production on an in-memory development network

use anyhow::Context;
use blockforge::{
    chain::{ChainIndex, ConsensusManager, ConsensusParams},
    config::Config,
    devnet::DevChain,
    logging,
    miner::{MiningStats, PowMiner},
    peer::{BehaviorFactory, EnforcePeerVersionBehavior, PingPongBehavior},
    settings::NodeSettings,
    utils::format_hash_rate,
    APP_NAME, APP_VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often background mining reports progress
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().await?;

    if config.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    logging::init(config.log_level, config.log_format)?;
    info!("Starting {} v{} on {}", APP_NAME, APP_VERSION, config.network);

    let params = Arc::new(config.consensus_params());
    let settings = Arc::new(config.node_settings());
    let chain = Arc::new(DevChain::new(Arc::clone(&params)));
    let shutdown = CancellationToken::new();

    let behaviors = behavior_factory(&config, &settings, &params, &chain)?;
    info!("{} peer behaviors per connection", behaviors.len());

    let miner = Arc::new(PowMiner::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        Arc::clone(&params),
        config.miner_config()?,
        shutdown.clone(),
    ));
    let payout_script = config.payout_script()?;

    if let Some(blocks) = config.generate {
        let hashes = miner
            .generate_blocks(&payout_script, blocks, config.max_tries)
            .await
            .context("block generation failed")?;
        for hash in &hashes {
            println!("{}", hash);
        }
        if (hashes.len() as u64) < blocks {
            warn!("Nonce budget ran out after {} of {} blocks", hashes.len(), blocks);
        }
        log_stats(&miner.stats());
        return Ok(());
    }

    if config.mine {
        miner.start_mining(payout_script);
        run_until_interrupted(&miner, &chain).await?;
        shutdown.cancel();
        miner.stop_mining().await;
        log_stats(&miner.stats());
        info!("Stopped at height {}", chain.height());
        return Ok(());
    }

    info!("Nothing to do; pass --mine or --generate N");
    Ok(())
}

/// Behavior templates cloned for every connection
fn behavior_factory(
    config: &Config,
    settings: &Arc<NodeSettings>,
    params: &Arc<ConsensusParams>,
    chain: &Arc<DevChain>,
) -> anyhow::Result<BehaviorFactory> {
    let enforce = EnforcePeerVersionBehavior::new(
        Arc::clone(settings),
        Arc::clone(params),
        Arc::clone(chain) as Arc<dyn ChainIndex>,
    );
    let ping_pong = PingPongBehavior::new(config.ping_pong_config()?);
    Ok(BehaviorFactory::new().with(enforce).with(ping_pong))
}

async fn run_until_interrupted(miner: &PowMiner, chain: &DevChain) -> anyhow::Result<()> {
    let mut ticker = interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("Interrupted, stopping miner");
                return Ok(());
            }
            _ = ticker.tick() => {
                if !miner.is_mining() {
                    warn!("Mining task exited");
                    return Ok(());
                }
                let stats = miner.stats();
                info!(
                    "Height {}, tip {}, {} blocks mined at {}",
                    chain.height(),
                    chain.tip().hash,
                    stats.blocks_produced,
                    format_hash_rate(stats.average_hash_rate)
                );
            }
        }
    }
}

fn log_stats(stats: &MiningStats) {
    info!(
        "Mined {} blocks ({} rejected) from {} candidates ({} failed builds), {} hashes at {}",
        stats.blocks_produced,
        stats.blocks_rejected,
        stats.candidates_built,
        stats.templates_failed,
        stats.hashes_tried,
        format_hash_rate(stats.average_hash_rate)
    );
}
