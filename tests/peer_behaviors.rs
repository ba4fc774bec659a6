//! Peer behaviors attached to in-memory connections

use blockforge::chain::{ChainIndex, ConsensusParams};
use blockforge::devnet::{DevChain, MemoryPeer};
use blockforge::miner::{MinerConfig, PowMiner};
use blockforge::peer::{
    BehaviorFactory, EnforcePeerVersionBehavior, Message, PeerBehavior, PeerConnection, PeerState,
    PingPongBehavior, PingPongConfig, PingPongMode, ProtocolVersion,
};
use blockforge::settings::NodeSettings;
use blockforge::Script;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const OLD_VERSION: ProtocolVersion = ProtocolVersion::new(60_001);

/// Forward everything one peer sends into the other
fn pump(mut outbound: UnboundedReceiver<Message>, to: Arc<MemoryPeer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            to.deliver(message).await;
        }
    })
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_version_enforcement_is_lazy() {
    let params = Arc::new(ConsensusParams {
        enforce_min_version_at_height: 2,
        enforced_min_version: ProtocolVersion::CURRENT,
        ..ConsensusParams::devnet()
    });
    let settings = Arc::new(NodeSettings::default());
    let chain = Arc::new(DevChain::new(Arc::clone(&params)));
    let factory = BehaviorFactory::new().with(EnforcePeerVersionBehavior::new(
        Arc::clone(&settings),
        Arc::clone(&params),
        chain.clone() as Arc<dyn ChainIndex>,
    ));

    let (old_peer, _old_rx) = MemoryPeer::new(Some(OLD_VERSION), PeerState::HandShaked);
    let (new_peer, _new_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::HandShaked);
    let mut old_behaviors = factory.instantiate();
    let mut new_behaviors = factory.instantiate();
    assert_ok!(old_behaviors.attach_all(old_peer.clone()));
    assert_ok!(new_behaviors.attach_all(new_peer.clone()));

    old_peer.deliver(Message::other("inv")).await;
    assert!(old_peer.disconnect_reasons().is_empty());

    let miner = PowMiner::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        Arc::clone(&params),
        MinerConfig::default(),
        CancellationToken::new(),
    );
    miner.generate_blocks(&Script::default(), 2, u64::MAX).await.unwrap();
    assert_eq!(chain.height(), 2);

    // Nothing happens until a message arrives
    assert_eq!(settings.min_protocol_version(), ProtocolVersion::MIN_PEER);

    new_peer.deliver(Message::other("headers")).await;
    assert_eq!(settings.min_protocol_version(), ProtocolVersion::CURRENT);
    assert!(new_peer.disconnect_reasons().is_empty());
    // The old peer stays connected until it speaks again
    assert!(old_peer.disconnect_reasons().is_empty());
    assert_eq!(old_peer.state(), PeerState::HandShaked);

    old_peer.deliver(Message::other("inv")).await;
    assert_eq!(old_peer.disconnect_reasons().len(), 1);
    assert_eq!(old_peer.state(), PeerState::Offline);

    old_behaviors.detach_all();
    old_peer.deliver(Message::other("inv")).await;
    assert_eq!(old_peer.disconnect_reasons().len(), 1);
    new_behaviors.detach_all();
}

#[tokio::test]
async fn test_peer_without_version_survives_enforcement() {
    let params = Arc::new(ConsensusParams {
        enforce_min_version_at_height: 1,
        ..ConsensusParams::devnet()
    });
    let settings = Arc::new(NodeSettings::new(ProtocolVersion::CURRENT));
    let chain = Arc::new(DevChain::new(Arc::clone(&params)));
    let mut behavior = EnforcePeerVersionBehavior::new(settings, params, chain as Arc<dyn ChainIndex>);

    let (peer, _rx) = MemoryPeer::new(None, PeerState::Connected);
    assert_ok!(behavior.attach(peer.clone()));
    peer.deliver(Message::other("version")).await;
    assert!(peer.disconnect_reasons().is_empty());

    peer.set_negotiated_version(Some(OLD_VERSION));
    peer.deliver(Message::other("verack")).await;
    assert_eq!(peer.disconnect_reasons().len(), 1);
    behavior.detach();
}

#[tokio::test(start_paused = true)]
async fn test_ping_pong_between_peers() {
    let (pinger, pinger_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::HandShaked);
    let (ponger, ponger_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::HandShaked);
    let _to_ponger = pump(pinger_rx, ponger.clone());
    let _to_pinger = pump(ponger_rx, pinger.clone());

    let mut probing = PingPongBehavior::new(PingPongConfig {
        mode: PingPongMode::Ping,
        ..PingPongConfig::default()
    });
    let mut answering = PingPongBehavior::new(PingPongConfig {
        mode: PingPongMode::Pong,
        ..PingPongConfig::default()
    });
    assert_ok!(probing.attach(pinger.clone()));
    assert_ok!(answering.attach(ponger.clone()));

    tokio::time::sleep(Duration::from_secs(61 * 60)).await;
    settle().await;

    assert!(pinger.disconnect_reasons().is_empty());
    assert_eq!(probing.outstanding_nonce().await, None);
    assert_eq!(answering.latency(), Duration::ZERO);

    // The answering side goes quiet
    ponger.set_send_failure(true);
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    settle().await;

    let reasons = pinger.disconnect_reasons();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("Pong timeout for nonce "));
    assert!(ponger.disconnect_reasons().is_empty());

    probing.detach();
    answering.detach();
}

#[tokio::test(start_paused = true)]
async fn test_factory_gives_each_connection_its_own_timers() {
    let factory = BehaviorFactory::new().with(PingPongBehavior::new(PingPongConfig {
        mode: PingPongMode::Both,
        ping_interval: Duration::from_secs(10),
        timeout_interval: Duration::from_secs(60),
    }));

    let (quiet, mut quiet_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::HandShaked);
    let (chatty, mut chatty_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::HandShaked);
    let mut quiet_behaviors = factory.instantiate();
    let mut chatty_behaviors = factory.instantiate();
    assert_ok!(quiet_behaviors.attach_all(quiet.clone()));
    assert_ok!(chatty_behaviors.attach_all(chatty.clone()));

    // Echo every ping from the chatty peer
    let chatty_echo = chatty.clone();
    let _echo = tokio::spawn(async move {
        while let Some(message) = chatty_rx.recv().await {
            if let Message::Ping { nonce } = message {
                chatty_echo.deliver(Message::Pong { nonce }).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(90)).await;
    settle().await;

    assert_eq!(quiet.disconnect_reasons().len(), 1);
    assert!(chatty.disconnect_reasons().is_empty());
    assert!(matches!(quiet_rx.try_recv(), Ok(Message::Ping { .. })));

    quiet_behaviors.detach_all();
    chatty_behaviors.detach_all();
    assert_eq!(chatty.events().handler_count(), 0);
}

#[tokio::test]
async fn test_attaching_to_second_connection_fails() {
    let mut behavior = PingPongBehavior::new(PingPongConfig::default());
    let (first, _first_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::Connected);
    let (second, _second_rx) = MemoryPeer::new(Some(ProtocolVersion::CURRENT), PeerState::Connected);

    assert_ok!(behavior.attach(first.clone()));
    assert_ok!(behavior.attach(first.clone()));
    assert_err!(behavior.attach(second.clone()));
    assert_eq!(second.events().handler_count(), 0);

    behavior.detach();
    assert_ok!(behavior.attach(second.clone()));
    assert_eq!(first.events().handler_count(), 0);
    behavior.detach();
}
