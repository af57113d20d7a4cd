use std::sync::Arc;

use crate::{
    events::EventBus,
    htlc::{
        priority_for_urgency, HtlcAction, HtlcDirection, HtlcId, HtlcInfo, HtlcMonitor,
        HtlcMonitorConfig, HtlcMonitorState, HtlcSweeper, HtlcUrgency,
        BROADCAST_CIRCUIT_BREAKER,
    },
    recovery::{RecoveryError, RecoveryPriority, RecoveryScheduler},
    tests::test_utils::{
        broadcast_txid_for, gen_channel_id, gen_recovery_config, init_tracing, MockChain,
        MockTransport, MockTxBuilder,
    },
    types::Hash256,
};

fn preimage_for(n: u64) -> Hash256 {
    Hash256::from([n as u8 + 1; 32])
}

struct SweeperFixture {
    chain: Arc<MockChain>,
    monitor: HtlcMonitor,
    scheduler: RecoveryScheduler,
    transport: Arc<MockTransport>,
    builder: Arc<MockTxBuilder>,
    sweeper: HtlcSweeper,
}

impl SweeperFixture {
    async fn new(height: u64) -> Self {
        init_tracing();
        let chain = Arc::new(MockChain::new(height));
        let monitor = HtlcMonitor::start(HtlcMonitorConfig::default(), chain.clone())
            .await
            .expect("start monitor");
        let scheduler = RecoveryScheduler::start(gen_recovery_config(), EventBus::default())
            .await
            .expect("start scheduler");
        let transport = Arc::new(MockTransport::new());
        let builder = Arc::new(MockTxBuilder::default());
        let sweeper = HtlcSweeper::new(
            monitor.clone(),
            scheduler.clone(),
            transport.clone(),
            builder.clone(),
        );
        Self {
            chain,
            monitor,
            scheduler,
            transport,
            builder,
            sweeper,
        }
    }

    async fn add_onchain_htlc(&self, n: u64, direction: HtlcDirection, cltv_expiry: u64) -> HtlcId {
        let id = HtlcId::new(gen_channel_id(2), n);
        self.monitor
            .add_htlc(HtlcInfo {
                id,
                payment_hash: Hash256::sha256(preimage_for(n).as_ref()),
                amount_sat: 21_000,
                cltv_expiry,
                direction,
            })
            .await
            .unwrap();
        self.monitor.mark_onchain(id).await.unwrap();
        id
    }

    fn stop(&self) {
        self.monitor.stop();
        self.scheduler.stop();
    }
}

#[tokio::test]
async fn test_published_claim_is_not_rebroadcast_after_expiry() {
    let fixture = SweeperFixture::new(997).await;
    let id = fixture
        .add_onchain_htlc(0, HtlcDirection::Sent, 1000)
        .await;
    assert_eq!(fixture.sweeper.sweep().await.unwrap().len(), 1);

    fixture.chain.set_height(1000);
    let snapshot = fixture.monitor.check_now().await.unwrap();
    let htlc = snapshot.get(&id).unwrap();
    assert_eq!(htlc.state, HtlcMonitorState::HtlcTxPublished);
    assert!(!htlc.is_actionable());

    for height in [1001, 1002] {
        fixture.chain.set_height(height);
        fixture.monitor.check_now().await.unwrap();
        assert!(fixture.sweeper.sweep().await.unwrap().is_empty());
    }
    assert_eq!(fixture.transport.broadcasts().len(), 1);
    assert_eq!(fixture.builder.built(), 1);
    fixture.stop();
}

#[test]
fn test_priority_follows_urgency() {
    assert_eq!(priority_for_urgency(HtlcUrgency::Low), RecoveryPriority::Low);
    assert_eq!(priority_for_urgency(HtlcUrgency::Medium), RecoveryPriority::Medium);
    assert_eq!(priority_for_urgency(HtlcUrgency::High), RecoveryPriority::High);
    assert_eq!(
        priority_for_urgency(HtlcUrgency::Critical),
        RecoveryPriority::Critical
    );
}

#[tokio::test]
async fn test_sweep_broadcasts_actionable_htlcs() {
    let fixture = SweeperFixture::new(997).await;
    let actionable = fixture
        .add_onchain_htlc(0, HtlcDirection::Sent, 1000)
        .await;
    // Far from expiry, nothing to do yet.
    let idle = fixture
        .add_onchain_htlc(1, HtlcDirection::Sent, 2000)
        .await;

    let snapshot = fixture.monitor.snapshot().await.unwrap();
    let expected_tx = MockTxBuilder::tx_hex_for(
        snapshot.get(&actionable).unwrap(),
        HtlcAction::PublishTimeout,
    );

    let results = fixture.sweeper.sweep().await.unwrap();
    assert_eq!(results.len(), 1);
    let (id, result) = &results[0];
    assert_eq!(*id, actionable);
    assert_eq!(result, &Ok(broadcast_txid_for(&expected_tx)));
    assert_eq!(fixture.transport.broadcasts(), vec![expected_tx.clone()]);

    let snapshot = fixture.monitor.snapshot().await.unwrap();
    let htlc = snapshot.get(&actionable).unwrap();
    assert_eq!(htlc.state, HtlcMonitorState::HtlcTxPublished);
    assert_eq!(htlc.published_txid, Some(broadcast_txid_for(&expected_tx)));
    assert_eq!(snapshot.get(&idle).unwrap().state, HtlcMonitorState::Onchain);

    // Published HTLCs are not swept again.
    assert!(fixture.sweeper.sweep().await.unwrap().is_empty());
    assert_eq!(fixture.builder.built(), 1);
    fixture.stop();
}

#[tokio::test]
async fn test_incoming_htlc_needs_preimage() {
    let fixture = SweeperFixture::new(997).await;
    let id = fixture
        .add_onchain_htlc(5, HtlcDirection::Received, 1000)
        .await;
    assert!(fixture.sweeper.sweep().await.unwrap().is_empty());

    let preimage = preimage_for(5);
    fixture
        .monitor
        .register_preimage(Hash256::sha256(preimage.as_ref()), preimage)
        .await
        .unwrap();

    let results = fixture.sweeper.sweep().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, id);
    assert!(results[0].1.is_ok());
    let broadcasts = fixture.transport.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let decoded = String::from_utf8(hex::decode(&broadcasts[0]).unwrap()).unwrap();
    assert!(decoded.starts_with("PublishSuccess:"), "{}", decoded);
    fixture.stop();
}

#[tokio::test]
async fn test_rejected_broadcast_leaves_htlc_actionable() {
    let fixture = SweeperFixture::new(997).await;
    let id = fixture
        .add_onchain_htlc(0, HtlcDirection::Sent, 1000)
        .await;
    fixture.transport.set_reject_broadcast(true);

    let results = fixture.sweeper.sweep().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        &results[0].1,
        Err(RecoveryError::RetryExhausted { attempts: 3, .. })
    ));
    let snapshot = fixture.monitor.snapshot().await.unwrap();
    assert_eq!(snapshot.get(&id).unwrap().state, HtlcMonitorState::Onchain);
    assert!(fixture
        .scheduler
        .breakers()
        .get(BROADCAST_CIRCUIT_BREAKER)
        .is_some());

    fixture.transport.set_reject_broadcast(false);
    let results = fixture.sweeper.sweep().await.unwrap();
    assert!(results[0].1.is_ok());
    fixture.stop();
}

#[tokio::test]
async fn test_failed_build_is_reported() {
    let fixture = SweeperFixture::new(997).await;
    fixture
        .add_onchain_htlc(0, HtlcDirection::Sent, 1000)
        .await;
    fixture.builder.set_failing(true);

    let results = fixture.sweeper.sweep().await.unwrap();
    match &results[0].1 {
        Err(RecoveryError::RetryExhausted { last_error, .. }) => {
            assert!(last_error.contains("missing signing key"), "{}", last_error)
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(fixture.transport.broadcasts().is_empty());
    fixture.stop();
}
