mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::*;
use ussdpilot_lib::commands::PilotHandle;
use ussdpilot_lib::config::AppConfig;
use ussdpilot_lib::flow_engine::{EventBus, FlowEvent};
use ussdpilot_lib::orchestrator::completion::MSG_BOTH_FILLED;
use ussdpilot_lib::orchestrator::expectation::{self, ExpectationPublisher};
use ussdpilot_lib::orchestrator::queue::MSG_STOPPED;
use ussdpilot_lib::orchestrator::{FlowInitiator, ProcessingLock, WorkQueueOrchestrator};
use ussdpilot_lib::store::model::ItemStatus;
use ussdpilot_lib::store::{MemoryStore, WorkItemStore};

fn orchestrator(
    cfg: &AppConfig,
    store: Arc<dyn WorkItemStore>,
    initiator: Arc<dyn FlowInitiator>,
    lock: ProcessingLock,
) -> (WorkQueueOrchestrator, Arc<ExpectationPublisher>, EventBus) {
    let (publisher, _reader) = expectation::channel();
    let publisher = Arc::new(publisher);
    let events = EventBus::default();
    let orch = WorkQueueOrchestrator::new(
        cfg,
        store,
        initiator,
        publisher.clone(),
        lock,
        events.clone(),
    );
    (orch, publisher, events)
}

#[tokio::test]
async fn both_inputs_filled_without_final_dialog_is_forced_complete() {
    let cfg = fast_config();
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let driver = FakeDriver::new();
    let initiator = FakeInitiator::new(InitBehavior::Play(
        driver.clone(),
        vec![name_prompt(), id_prompt()],
    ));

    let pilot = PilotHandle::launch(&cfg, driver.clone(), store.clone(), initiator.clone());
    driver.attach(pilot.notifier());
    let id = pilot.enqueue(person(7)).await.unwrap();

    assert!(pilot.start_batch().await);
    let summary = pilot.wait_batch().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(!summary.stopped);

    let item = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.message.as_deref(), Some(MSG_BOTH_FILLED));
    assert!(item.name_filled && item.code_filled && item.flow_initiated && item.completed);
    assert_eq!(initiator.codes(), vec!["#555*1*0600000007*1*1234#".to_string()]);
    assert_eq!(
        driver.filled_texts(),
        vec!["Person 7".to_string(), "AB00007".to_string()]
    );

    pilot.shutdown().await;
}

#[tokio::test]
async fn never_more_than_one_item_in_flight() {
    let cfg = fast_config();
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    for n in 1..=4 {
        store.insert(person(n)).await.unwrap();
    }
    let initiator = FakeInitiator::new(InitBehavior::Complete(store.clone()));
    let lock = ProcessingLock::new();
    let (a, _pa, _) = orchestrator(&cfg, store.clone(), initiator.clone(), lock.clone());
    let (b, _pb, _) = orchestrator(&cfg, store.clone(), initiator.clone(), lock);

    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let (store, done, peak) = (store.clone(), done.clone(), peak.clone());
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let in_flight = store
                    .get_all()
                    .await
                    .unwrap()
                    .iter()
                    .filter(|i| i.status != ItemStatus::Pending && !i.status.is_terminal())
                    .count();
                peak.fetch_max(in_flight, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let (ra, rb) = tokio::join!(
        a.run(CancellationToken::new()),
        b.run(CancellationToken::new())
    );
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(ra.processed + rb.processed, 4);
    assert!(peak.load(Ordering::SeqCst) <= 1);
    assert_eq!(store.count_by_status(ItemStatus::Completed).await.unwrap(), 4);
}

#[tokio::test]
async fn initiation_failure_fails_the_item_and_moves_on() {
    let cfg = fast_config();
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let first = store.insert(person(1)).await.unwrap();
    let second = store.insert(person(2)).await.unwrap();
    let initiator = FakeInitiator::new(InitBehavior::Fail);
    let (orch, publisher, events) =
        orchestrator(&cfg, store.clone(), initiator.clone(), ProcessingLock::new());
    let mut rx = events.subscribe();

    let summary = orch.run(CancellationToken::new()).await;

    assert_eq!(summary.processed, 2);
    for id in [first, second] {
        let item = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item
            .message
            .as_deref()
            .unwrap()
            .starts_with("Failed to start the dialog flow"));
        assert!(!item.flow_initiated);
    }
    assert!(publisher.current().is_none());

    let mut finished = 0;
    let mut drained = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            FlowEvent::ItemFinished { status, .. } => {
                assert_eq!(status, ItemStatus::Failed);
                finished += 1;
            }
            FlowEvent::QueueDrained => drained = true,
            _ => {}
        }
    }
    assert_eq!(finished, 2);
    assert!(drained);
}

#[tokio::test]
async fn stop_cancels_the_item_in_flight() {
    let mut cfg = fast_config();
    cfg.orchestrator.max_wait_ms = 10_000;
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let first = store.insert(person(1)).await.unwrap();
    let second = store.insert(person(2)).await.unwrap();
    let initiator = FakeInitiator::new(InitBehavior::Accept);
    let (orch, publisher, _) =
        orchestrator(&cfg, store.clone(), initiator, ProcessingLock::new());

    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { orch.run(cancel).await }
    });

    let st = store.clone();
    assert!(
        eventually(|| {
            let st = st.clone();
            async move {
                st.get_by_id(first).await.unwrap().unwrap().status == ItemStatus::UssdSent
            }
        })
        .await
    );
    assert!(publisher.current().is_some());
    cancel.cancel();
    let summary = run.await.unwrap();

    assert!(summary.stopped);
    let item = store.get_by_id(first).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Cancelled);
    assert_eq!(item.message.as_deref(), Some(MSG_STOPPED));
    let untouched = store.get_by_id(second).await.unwrap().unwrap();
    assert_eq!(untouched.status, ItemStatus::Pending);
    assert!(publisher.current().is_none());
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let mut cfg = fast_config();
    cfg.orchestrator.max_wait_ms = 10_000;
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let driver = FakeDriver::new();
    let pilot = PilotHandle::launch(
        &cfg,
        driver,
        store.clone(),
        FakeInitiator::new(InitBehavior::Accept),
    );
    let id = pilot.enqueue(person(3)).await.unwrap();

    assert!(pilot.start_batch().await);
    assert!(!pilot.start_batch().await);
    let st = store.clone();
    assert!(
        eventually(|| {
            let st = st.clone();
            async move { st.get_by_id(id).await.unwrap().unwrap().status == ItemStatus::UssdSent }
        })
        .await
    );
    assert!(pilot.is_running().await);
    assert!(pilot.clear().await.is_err());

    pilot.stop_batch().await;
    let summary = pilot.wait_batch().await.unwrap();
    assert!(summary.stopped);
    assert!(!pilot.is_running().await);

    let stats = pilot.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 0);
    pilot.shutdown().await;
}

#[tokio::test]
async fn invalid_rows_are_rejected_before_insert() {
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let pilot = PilotHandle::launch(
        &fast_config(),
        FakeDriver::new(),
        store.clone(),
        FakeInitiator::new(InitBehavior::Accept),
    );
    let mut bad = person(2);
    bad.secret = "12".into();

    assert!(pilot.enqueue_all(vec![person(1), bad]).await.is_err());
    assert_eq!(store.count_all().await.unwrap(), 0);

    pilot.enqueue_all(vec![person(1), person(2)]).await.unwrap();
    let found = pilot.lookup("0600000002").await.unwrap().unwrap();
    assert_eq!(found.full_name, "Person 2");
    pilot.shutdown().await;
}

#[tokio::test]
async fn stop_after_verdict_keeps_the_verdict() {
    let cfg = fast_config();
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let first = store.insert(person(1)).await.unwrap();
    let second = store.insert(person(2)).await.unwrap();
    let cancel = CancellationToken::new();
    let initiator = FakeInitiator::new(InitBehavior::CompleteThenStop(
        store.clone(),
        cancel.clone(),
    ));
    let (orch, _publisher, _) =
        orchestrator(&cfg, store.clone(), initiator, ProcessingLock::new());

    let summary = orch.run(cancel).await;

    assert!(summary.stopped);
    let item = store.get_by_id(first).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.message.as_deref(), Some("Success: ok"));
    assert!(item.completed);
    let untouched = store.get_by_id(second).await.unwrap().unwrap();
    assert_eq!(untouched.status, ItemStatus::Pending);
}

#[tokio::test]
async fn stop_reaches_a_batch_someone_is_waiting_on() {
    let mut cfg = fast_config();
    cfg.orchestrator.max_wait_ms = 10_000;
    let store: Arc<dyn WorkItemStore> = Arc::new(MemoryStore::new());
    let pilot = PilotHandle::launch(
        &cfg,
        FakeDriver::new(),
        store.clone(),
        FakeInitiator::new(InitBehavior::Accept),
    );
    let id = pilot.enqueue(person(4)).await.unwrap();
    assert!(pilot.start_batch().await);

    let (waited, ()) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(pilot.wait_batch(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(pilot.is_running().await);
            assert!(!pilot.start_batch().await);
            pilot.stop_batch().await;
        })
    })
    .await
    .expect("wait_batch returns once the batch is stopped");

    let summary = waited.unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.processed, 1);
    assert!(!pilot.is_running().await);
    let item = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Cancelled);
    // The finished run can still be awaited.
    assert!(pilot.wait_batch().await.unwrap().stopped);
    pilot.shutdown().await;
}
