use std::sync::Arc;

use crate::{
    backup::BackupError,
    chain::SweepStatus,
    events::{EventBus, RecoveryEvent},
    recovery::RecoveryScheduler,
    restore::{
        RestoreConfig, RestoreError, RestoreOrchestrator, RestoreOrchestratorArgs, RestoreState,
        RestoreSummary, RESTORE_PROGRESS_KEY,
    },
    storage::{MemoryStorage, SecureStorage},
    tests::test_utils::{
        closing_txid_for, fast_codec, gen_backup_record, gen_channel_id, gen_recovery_config,
        init_tracing, wait_for_event, wait_until, MockChain, MockTransport,
    },
};

struct RestoreFixture {
    orchestrator: RestoreOrchestrator,
    scheduler: RecoveryScheduler,
    transport: Arc<MockTransport>,
    chain: Arc<MockChain>,
    storage: Arc<MemoryStorage>,
    events: EventBus,
}

impl RestoreFixture {
    async fn new(sweep_poll_interval_ms: u64) -> Self {
        Self::with_parts(
            sweep_poll_interval_ms,
            Arc::new(MockTransport::new()),
            Arc::new(MockChain::new(800_000)),
            Arc::new(MemoryStorage::new()),
        )
        .await
    }

    async fn with_parts(
        sweep_poll_interval_ms: u64,
        transport: Arc<MockTransport>,
        chain: Arc<MockChain>,
        storage: Arc<MemoryStorage>,
    ) -> Self {
        init_tracing();
        let events = EventBus::default();
        let scheduler = RecoveryScheduler::start(gen_recovery_config(), events.clone())
            .await
            .expect("start scheduler");
        let orchestrator = RestoreOrchestrator::start(RestoreOrchestratorArgs {
            config: RestoreConfig {
                sweep_poll_interval_ms,
                ..Default::default()
            },
            scheduler: scheduler.clone(),
            transport: transport.clone(),
            sweep_watcher: chain.clone(),
            storage: storage.clone(),
            events: events.clone(),
        })
        .await
        .expect("start orchestrator");
        Self {
            orchestrator,
            scheduler,
            transport,
            chain,
            storage,
            events,
        }
    }

    fn stop(&self) {
        self.orchestrator.stop();
        self.scheduler.stop();
    }
}

async fn wait_for_finish(receiver: &mut tokio::sync::broadcast::Receiver<RecoveryEvent>) -> RestoreSummary {
    match wait_for_event(receiver, |event| {
        matches!(event, RecoveryEvent::RestoreFinished { .. })
    })
    .await
    {
        RecoveryEvent::RestoreFinished { summary, .. } => summary,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_restore_completes_every_channel() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let records: Vec<_> = (1..=3).map(gen_backup_record).collect();

    let started = fixture
        .orchestrator
        .start_restore(records.clone())
        .await
        .unwrap();
    assert_eq!(started.total_channels, 3);
    assert_eq!(started.pending_channels, 3);

    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!(summary.completed_channels, 3);
    assert_eq!(summary.failed_channels, 0);
    assert!(!summary.is_partial_success());

    let snapshot = fixture.orchestrator.snapshot().await.unwrap();
    for record in &records {
        let context = snapshot.get(&record.channel_id).unwrap();
        assert_eq!(context.state, RestoreState::Completed);
        assert_eq!(context.closing_txid, Some(closing_txid_for(&record.channel_id)));
        assert_eq!(context.attempt, 1);
    }
    assert_eq!(snapshot.history.len(), 3);
    fixture.stop();
}

#[tokio::test]
async fn test_state_changes_are_published_in_order() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let record = gen_backup_record(1);
    fixture
        .orchestrator
        .start_restore(vec![record.clone()])
        .await
        .unwrap();

    let mut states = Vec::new();
    while states.last() != Some(&RestoreState::Completed) {
        if let RecoveryEvent::RestoreStateChanged {
            channel_id, state, ..
        } = wait_for_event(&mut receiver, |event| {
            matches!(event, RecoveryEvent::RestoreStateChanged { .. })
        })
        .await
        {
            assert_eq!(channel_id, record.channel_id);
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            RestoreState::Connecting,
            RestoreState::RequestingClose,
            RestoreState::Monitoring,
            RestoreState::Completed,
        ]
    );
    fixture.stop();
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let records: Vec<_> = (1..=3).map(gen_backup_record).collect();
    let broken = gen_channel_id(2);
    fixture.transport.set_reject_close(broken, true);

    fixture
        .orchestrator
        .start_restore(records.clone())
        .await
        .unwrap();
    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!(summary.completed_channels, 2);
    assert_eq!(summary.failed_channels, 1);
    assert!(summary.is_partial_success());

    let snapshot = fixture.orchestrator.snapshot().await.unwrap();
    let failed = snapshot.get(&broken).unwrap();
    assert_eq!(failed.state, RestoreState::Failed);
    assert!(failed.error.as_deref().unwrap().contains("rejected"));
    assert_eq!(fixture.transport.close_calls(&broken), 3);

    // Only the failed channel is restarted.
    fixture.transport.set_reject_close(broken, false);
    let retried = fixture.orchestrator.retry_failed().await.unwrap();
    assert_eq!(retried, vec![broken]);
    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!(summary.completed_channels, 3);
    assert_eq!(summary.failed_channels, 0);

    let snapshot = fixture.orchestrator.snapshot().await.unwrap();
    for record in &records {
        let context = snapshot.get(&record.channel_id).unwrap();
        let expected_attempt = if record.channel_id == broken { 2 } else { 1 };
        assert_eq!(context.attempt, expected_attempt);
        assert_eq!(
            fixture.transport.connect_calls(&record.node_id),
            expected_attempt
        );
    }
    assert!(fixture.orchestrator.retry_failed().await.unwrap().is_empty());
    fixture.stop();
}

#[tokio::test]
async fn test_unreachable_peer_fails_its_channel() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let offline = gen_backup_record(1);
    fixture.transport.set_unreachable(offline.node_id, true);

    fixture
        .orchestrator
        .start_restore(vec![offline.clone(), gen_backup_record(2)])
        .await
        .unwrap();
    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!((summary.completed_channels, summary.failed_channels), (1, 1));

    let snapshot = fixture.orchestrator.snapshot().await.unwrap();
    let context = snapshot.get(&offline.channel_id).unwrap();
    assert_eq!(context.state, RestoreState::Failed);
    assert!(context.error.as_deref().unwrap().contains("unreachable"));
    assert_eq!(fixture.transport.close_calls(&offline.channel_id), 0);
    fixture.stop();
}

#[tokio::test]
async fn test_transient_connect_failure_is_retried() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let record = gen_backup_record(1);
    fixture.transport.fail_next_connects(record.node_id, 2);

    fixture
        .orchestrator
        .start_restore(vec![record.clone()])
        .await
        .unwrap();
    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!(summary.completed_channels, 1);
    assert_eq!(fixture.transport.connect_calls(&record.node_id), 3);
    fixture.stop();
}

#[tokio::test]
async fn test_start_restore_validation() {
    let fixture = RestoreFixture::new(60_000).await;
    assert!(matches!(
        fixture.orchestrator.start_restore(vec![]).await,
        Err(RestoreError::NoChannels)
    ));
    let record = gen_backup_record(1);
    assert!(matches!(
        fixture
            .orchestrator
            .start_restore(vec![record.clone(), record.clone()])
            .await,
        Err(RestoreError::DuplicateChannel(id)) if id == record.channel_id
    ));
    assert_eq!(fixture.orchestrator.summary().await.unwrap().total_channels, 0);

    fixture
        .chain
        .set_sweep_status(record.channel_id, SweepStatus::AwaitingSweep);
    fixture
        .orchestrator
        .start_restore(vec![record])
        .await
        .unwrap();
    assert!(matches!(
        fixture
            .orchestrator
            .start_restore(vec![gen_backup_record(2)])
            .await,
        Err(RestoreError::RestoreInProgress)
    ));
    fixture.stop();
}

#[tokio::test]
async fn test_sweep_is_polled_until_swept() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let record = gen_backup_record(1);
    fixture
        .chain
        .set_sweep_status(record.channel_id, SweepStatus::Unconfirmed);

    fixture
        .orchestrator
        .start_restore(vec![record.clone()])
        .await
        .unwrap();
    let chain = fixture.chain.clone();
    wait_until(|| {
        let chain = chain.clone();
        async move { chain.sweep_calls() >= 3 }
    })
    .await;
    let snapshot = fixture.orchestrator.snapshot().await.unwrap();
    assert_eq!(
        snapshot.get(&record.channel_id).unwrap().state,
        RestoreState::Monitoring
    );

    fixture
        .chain
        .set_sweep_status(record.channel_id, SweepStatus::Swept);
    let summary = wait_for_finish(&mut receiver).await;
    assert_eq!(summary.completed_channels, 1);
    fixture.stop();
}

#[tokio::test]
async fn test_progress_is_persisted_and_resumed() {
    let fixture = RestoreFixture::new(60_000).await;
    let mut receiver = fixture.events.subscribe();
    let waiting = gen_backup_record(1);
    let done = gen_backup_record(2);
    fixture
        .chain
        .set_sweep_status(waiting.channel_id, SweepStatus::AwaitingSweep);

    fixture
        .orchestrator
        .start_restore(vec![waiting.clone(), done.clone()])
        .await
        .unwrap();
    wait_for_event(&mut receiver, |event| {
        matches!(
            event,
            RecoveryEvent::RestoreStateChanged { channel_id, state: RestoreState::Monitoring, .. }
                if *channel_id == waiting.channel_id
        )
    })
    .await;
    let orchestrator = fixture.orchestrator.clone();
    wait_until(|| {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.summary().await.unwrap().completed_channels == 1 }
    })
    .await;
    assert!(fixture.storage.get(RESTORE_PROGRESS_KEY).unwrap().is_some());
    fixture.stop();

    // A new process picks up where the old one stopped.
    fixture
        .chain
        .set_sweep_status(waiting.channel_id, SweepStatus::Swept);
    let resumed = RestoreFixture::with_parts(
        60_000,
        fixture.transport.clone(),
        fixture.chain.clone(),
        fixture.storage.clone(),
    )
    .await;
    let orchestrator = resumed.orchestrator.clone();
    wait_until(|| {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.summary().await.unwrap().completed_channels == 2 }
    })
    .await;

    let snapshot = resumed.orchestrator.snapshot().await.unwrap();
    let context = snapshot.get(&waiting.channel_id).unwrap();
    assert_eq!(context.attempt, 1);
    assert_eq!(context.closing_txid, Some(closing_txid_for(&waiting.channel_id)));
    // Completed channels were not contacted again.
    assert_eq!(fixture.transport.connect_calls(&done.node_id), 1);
    assert_eq!(fixture.transport.close_calls(&waiting.channel_id), 1);
    assert_eq!(snapshot.history.len(), 2);
    resumed.stop();
}

#[tokio::test]
async fn test_restore_from_backup() {
    let fixture = RestoreFixture::new(20).await;
    let mut receiver = fixture.events.subscribe();
    let codec = fast_codec();
    let records = vec![gen_backup_record(1), gen_backup_record(2)];
    let blob = codec.export(&records, "hunter2").unwrap();

    let result = fixture
        .orchestrator
        .restore_from_backup(&codec, &blob, "hunter3")
        .await;
    assert!(matches!(
        result,
        Err(RestoreError::Backup(BackupError::DecryptionFailed))
    ));
    assert_eq!(fixture.orchestrator.summary().await.unwrap().total_channels, 0);

    let started = fixture
        .orchestrator
        .restore_from_backup(&codec, &blob, "hunter2")
        .await
        .unwrap();
    assert_eq!(started.total_channels, 2);
    assert_eq!(wait_for_finish(&mut receiver).await.completed_channels, 2);
    fixture.stop();
}
