use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use qsoforward::{
    config::ForwardingConfig,
    forward::{
        engine::{EngineError, Forwarding, HandleError, LifecycleState, PendingUploads, UploadHandler},
        registry::WorkerRegistry,
        writer::UploadWrites,
    },
    persist::{StorageError, StorageResult},
    qso::QsoRecord,
    types::{Band, Mode, UploadAction, UploadStatus},
    upload::QsoUpload,
};

fn upload(id: i64, call: &str) -> QsoUpload {
    QsoUpload {
        id,
        qso_id: id,
        service: "test".to_string(),
        action: UploadAction::Insert,
        status: UploadStatus::Pending,
        attempts: 0,
        last_error: String::new(),
        qso: QsoRecord {
            id,
            logbook_id: 1,
            station_callsign: "M0ABC".to_string(),
            call: call.to_string(),
            band: Band::B20m,
            mode: Mode::SSB,
            freq_hz: 14_200_000,
            ts_ms: id as u64,
            rst_sent: "59".to_string(),
            rst_rcvd: "59".to_string(),
            tx_power_w: Some(100.0),
            comment: String::new(),
        },
    }
}

fn config(workers: usize, poll_ms: u64) -> ForwardingConfig {
    ForwardingConfig {
        poll_interval_ms: poll_ms,
        worker_count: workers,
        forwarding_queue_capacity: 10,
        db_write_queue_capacity: 10,
        shutdown_timeout_ms: 2_000,
    }
}

#[derive(Default)]
struct ScriptedSource {
    batches: Mutex<VecDeque<Vec<QsoUpload>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn with_batches(batches: Vec<Vec<QsoUpload>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PendingUploads for ScriptedSource {
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.lock().expect("lock").pop_front().unwrap_or_default())
    }
}

/// Fetch that never returns until `release` is cancelled.
struct BlockedSource {
    entered: Notify,
    release: CancellationToken,
}

#[async_trait]
impl PendingUploads for BlockedSource {
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>> {
        self.entered.notify_one();
        self.release.cancelled().await;
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CountingHandler {
    handled: Mutex<Vec<i64>>,
    panic_on: Option<i64>,
}

#[async_trait]
impl UploadHandler for CountingHandler {
    async fn handle(&self, upload: QsoUpload, _writes: UploadWrites) -> Result<(), HandleError> {
        if self.panic_on == Some(upload.id) {
            panic!("handler blew up on upload {}", upload.id);
        }
        self.handled.lock().expect("lock").push(upload.id);
        Ok(())
    }
}

fn engine(workers: usize, source: Arc<dyn PendingUploads>) -> Forwarding {
    Forwarding::new(config(workers, 1_000), source, Arc::new(CountingHandler::default()))
        .expect("engine")
}

async fn wait_until(mut cond: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn start_launches_workers_writer_and_poller() {
    let fwd = engine(3, Arc::new(ScriptedSource::default()));
    assert_eq!(fwd.active_worker_count(), 0);
    assert_eq!(fwd.state(), LifecycleState::NotStarted);

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    assert_eq!(fwd.active_worker_count(), 3 + 2);
    assert_eq!(fwd.state(), LifecycleState::Running);

    let names = fwd.active_workers();
    assert!(names.contains(&"db-writer".to_string()));
    assert!(names.contains(&"poller".to_string()));
    assert!(names.contains(&"worker-2".to_string()));

    fwd.stop(Duration::from_secs(2)).await.expect("stop");
}

#[tokio::test]
async fn second_start_fails_without_duplicating_workers() {
    let fwd = engine(2, Arc::new(ScriptedSource::default()));
    let shutdown = CancellationToken::new();

    fwd.start(CancellationToken::new(), shutdown.clone())
        .expect("first start");
    let err = fwd
        .start(CancellationToken::new(), shutdown.clone())
        .expect_err("second start must fail");
    assert!(matches!(err, EngineError::AlreadyStarted));
    assert_eq!(fwd.active_worker_count(), 2 + 2);

    shutdown.cancel();
    fwd.stop(Duration::from_secs(2)).await.expect("stop");
}

#[tokio::test]
async fn start_with_cancelled_context_is_rejected() {
    let fwd = engine(2, Arc::new(ScriptedSource::default()));
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = fwd
        .start(ctx, CancellationToken::new())
        .expect_err("cancelled context");
    assert!(matches!(err, EngineError::ContextCancelled));
    assert_eq!(fwd.active_worker_count(), 0);
    assert_eq!(fwd.state(), LifecycleState::NotStarted);
}

#[test]
fn invalid_config_is_rejected() {
    let source = Arc::new(ScriptedSource::default());
    let handler = Arc::new(CountingHandler::default());

    let zero_workers = ForwardingConfig {
        worker_count: 0,
        ..ForwardingConfig::default()
    };
    assert!(matches!(
        Forwarding::new(zero_workers, source.clone(), handler.clone()),
        Err(EngineError::InvalidConfig(_))
    ));

    let zero_queue = ForwardingConfig {
        db_write_queue_capacity: 0,
        ..ForwardingConfig::default()
    };
    assert!(matches!(
        Forwarding::new(zero_queue, source, handler),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn clean_stop_closes_queues_and_allows_restart() {
    let fwd = engine(2, Arc::new(ScriptedSource::default()));

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    fwd.stop(Duration::from_secs(2)).await.expect("stop");

    assert_eq!(fwd.active_worker_count(), 0);
    assert!(fwd.queues_closed());
    assert_eq!(fwd.state(), LifecycleState::Stopped);

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("restart");
    assert_eq!(fwd.active_worker_count(), 4);
    assert!(!fwd.queues_closed());
    fwd.stop(Duration::from_secs(2)).await.expect("second stop");
    assert_eq!(fwd.active_worker_count(), 0);
}

#[tokio::test]
async fn shutdown_signal_ends_every_loop() {
    let fwd = engine(3, Arc::new(ScriptedSource::default()));
    let shutdown = CancellationToken::new();
    fwd.start(CancellationToken::new(), shutdown.clone())
        .expect("start");

    shutdown.cancel();
    assert!(wait_until(|| fwd.active_worker_count() == 0, Duration::from_secs(2)).await);

    // Tasks are gone, but the engine still needs an explicit stop.
    assert_eq!(fwd.state(), LifecycleState::Running);
    fwd.stop(Duration::from_millis(500)).await.expect("stop");
    assert!(fwd.queues_closed());
}

#[tokio::test]
async fn stop_timeout_names_the_stuck_poller() {
    let source = Arc::new(BlockedSource {
        entered: Notify::new(),
        release: CancellationToken::new(),
    });
    let fwd = Forwarding::new(
        config(2, 10),
        source.clone(),
        Arc::new(CountingHandler::default()),
    )
    .expect("engine");

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    tokio::time::timeout(Duration::from_secs(2), source.entered.notified())
        .await
        .expect("fetch entered");

    let err = fwd
        .stop(Duration::from_millis(300))
        .await
        .expect_err("stop must time out");
    match &err {
        EngineError::StopTimeout { workers, .. } => {
            assert_eq!(workers, &vec!["poller".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("1 workers still running"));
    assert_eq!(fwd.active_worker_count(), 1);
    assert_eq!(fwd.state(), LifecycleState::Stopping);
    assert!(!fwd.queues_closed());

    let err = fwd
        .start(CancellationToken::new(), CancellationToken::new())
        .expect_err("start while stopping");
    assert!(matches!(err, EngineError::Stopping));

    source.release.cancel();
    fwd.stop(Duration::from_secs(2)).await.expect("second stop");
    assert_eq!(fwd.active_worker_count(), 0);
    assert!(fwd.queues_closed());
    assert_eq!(fwd.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn concurrent_stop_calls_return_ok() {
    let fwd = Arc::new(engine(2, Arc::new(ScriptedSource::default())));
    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");

    let a = tokio::spawn({
        let fwd = Arc::clone(&fwd);
        async move { fwd.stop(Duration::from_secs(2)).await }
    });
    let b = tokio::spawn({
        let fwd = Arc::clone(&fwd);
        async move { fwd.stop(Duration::from_secs(2)).await }
    });

    a.await.expect("join a").expect("stop a");
    b.await.expect("join b").expect("stop b");

    assert!(wait_until(|| fwd.state() == LifecycleState::Stopped, Duration::from_secs(2)).await);
    assert_eq!(fwd.active_worker_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_start_and_stop_never_duplicates_workers() {
    let fwd = Arc::new(engine(2, Arc::new(ScriptedSource::default())));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let fwd = Arc::clone(&fwd);
        let max_seen = Arc::clone(&max_seen);
        tasks.push(tokio::spawn(async move {
            for _ in 0..15 {
                let _ = fwd.start(CancellationToken::new(), CancellationToken::new());
                max_seen.fetch_max(fwd.active_worker_count(), Ordering::SeqCst);
                let _ = fwd.stop(Duration::from_secs(2)).await;
                max_seen.fetch_max(fwd.active_worker_count(), Ordering::SeqCst);
            }
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    fwd.stop(Duration::from_secs(2)).await.expect("final stop");
    assert!(max_seen.load(Ordering::SeqCst) <= 2 + 2);
    assert_eq!(fwd.active_worker_count(), 0);
}

#[tokio::test]
async fn workers_process_polled_uploads() {
    let source = Arc::new(ScriptedSource::with_batches(vec![vec![
        upload(1, "K1AAA"),
        upload(2, "K2BBB"),
        upload(3, "K3CCC"),
    ]]));
    let handler = Arc::new(CountingHandler::default());
    let fwd = Forwarding::new(config(2, 20), source.clone(), handler.clone()).expect("engine");

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    assert!(
        wait_until(
            || handler.handled.lock().expect("lock").len() == 3,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(wait_until(|| source.calls.load(Ordering::SeqCst) >= 3, Duration::from_secs(2)).await);
    fwd.stop(Duration::from_secs(2)).await.expect("stop");

    let mut handled = handler.handled.lock().expect("lock").clone();
    handled.sort();
    assert_eq!(handled, vec![1, 2, 3]);
    assert_eq!(fwd.stats().enqueued, 3);
    assert_eq!(fwd.stats().processed, 3);
    assert_eq!(fwd.in_flight_count(), 0);
}

#[tokio::test]
async fn panicking_worker_does_not_take_down_siblings() {
    let source = Arc::new(ScriptedSource::with_batches(vec![
        vec![upload(13, "K1BAD")],
        vec![upload(1, "K1AAA"), upload(2, "K2BBB")],
    ]));
    let handler = Arc::new(CountingHandler {
        handled: Mutex::new(Vec::new()),
        panic_on: Some(13),
    });
    let fwd = Forwarding::new(config(2, 20), source, handler.clone()).expect("engine");

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    assert!(
        wait_until(
            || handler.handled.lock().expect("lock").len() == 2,
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(fwd.active_worker_count(), 2 + 2 - 1);

    fwd.stop(Duration::from_secs(2)).await.expect("stop");
    assert_eq!(fwd.active_worker_count(), 0);
}

#[tokio::test]
async fn registry_contains_panics_and_deregisters() {
    let registry = WorkerRegistry::new();
    let tracker = TaskTracker::new();
    let release = CancellationToken::new();

    registry.spawn(&tracker, "panic-worker", async {
        panic!("test panic");
    });
    registry.spawn(&tracker, "sibling", {
        let release = release.clone();
        async move { release.cancelled().await }
    });
    tracker.close();

    assert!(wait_until(|| registry.names() == vec!["sibling".to_string()], Duration::from_secs(2)).await);

    release.cancel();
    tracker.wait().await;
    assert!(registry.is_empty());
}

/// Fails the first fetch, then serves one batch.
struct FlakySource {
    calls: AtomicUsize,
}

#[async_trait]
impl PendingUploads for FlakySource {
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(StorageError::Message("database is locked".to_string())),
            1 => Ok((1..=4).map(|id| upload(id, "K1AAA")).collect()),
            _ => Ok(Vec::new()),
        }
    }
}

#[tokio::test]
async fn fetch_error_is_retried_next_tick() {
    let source = Arc::new(FlakySource {
        calls: AtomicUsize::new(0),
    });
    let handler = Arc::new(CountingHandler::default());
    let fwd = Forwarding::new(config(2, 20), source.clone(), handler.clone()).expect("engine");

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    assert!(
        wait_until(
            || handler.handled.lock().expect("lock").len() == 4,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(source.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(fwd.state(), LifecycleState::Running);
    assert_eq!(fwd.active_worker_count(), 2 + 2);

    fwd.stop(Duration::from_secs(2)).await.expect("stop");
    let mut handled = handler.handled.lock().expect("lock").clone();
    handled.sort();
    assert_eq!(handled, vec![1, 2, 3, 4]);
    assert_eq!(fwd.stats().fetched, 4);
}

/// Fires the shutdown signal while producing its batch.
struct ShutdownDuringFetch {
    shutdown: CancellationToken,
}

#[async_trait]
impl PendingUploads for ShutdownDuringFetch {
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>> {
        self.shutdown.cancel();
        Ok((1..=4).map(|id| upload(id, "K2BBB")).collect())
    }
}

#[tokio::test]
async fn shutdown_mid_batch_enqueues_nothing_more() {
    let shutdown = CancellationToken::new();
    let handler = Arc::new(CountingHandler::default());
    let fwd = Forwarding::new(
        config(2, 20),
        Arc::new(ShutdownDuringFetch {
            shutdown: shutdown.clone(),
        }),
        handler.clone(),
    )
    .expect("engine");

    fwd.start(CancellationToken::new(), shutdown.clone())
        .expect("start");
    assert!(wait_until(|| fwd.active_worker_count() == 0, Duration::from_secs(2)).await);
    fwd.stop(Duration::from_secs(1)).await.expect("stop");

    let stats = fwd.stats();
    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(stats.dropped, 0);
    assert!(handler.handled.lock().expect("lock").is_empty());
    assert_eq!(fwd.in_flight_count(), 0);
}

/// Network phase that never returns until released.
struct HungHandler {
    entered: Notify,
    release: CancellationToken,
}

#[async_trait]
impl UploadHandler for HungHandler {
    async fn handle(&self, _upload: QsoUpload, _writes: UploadWrites) -> Result<(), HandleError> {
        self.entered.notify_one();
        self.release.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn hung_network_call_holds_worker_and_db_writer() {
    let handler = Arc::new(HungHandler {
        entered: Notify::new(),
        release: CancellationToken::new(),
    });
    let source = Arc::new(ScriptedSource::with_batches(vec![vec![upload(1, "K3CCC")]]));
    let fwd = Forwarding::new(config(1, 20), source, handler.clone()).expect("engine");

    fwd.start(CancellationToken::new(), CancellationToken::new())
        .expect("start");
    tokio::time::timeout(Duration::from_secs(2), handler.entered.notified())
        .await
        .expect("handler entered");

    let err = fwd
        .stop(Duration::from_millis(300))
        .await
        .expect_err("stop must time out");
    match &err {
        EngineError::StopTimeout { workers, .. } => {
            assert_eq!(workers, &vec!["db-writer".to_string(), "worker-0".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    handler.release.cancel();
    fwd.stop(Duration::from_secs(2)).await.expect("second stop");
    assert_eq!(fwd.active_worker_count(), 0);
    assert!(fwd.queues_closed());
}
