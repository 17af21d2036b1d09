//! Client tests against workers running in-process over duplex pipes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::io::duplex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_test::assert_err;

use file_service::transport::LaunchedWorker;
use file_service::worker::{announce_failure, serve};
use file_service::{
    Dispatcher, Error, EventKind, FailureSignal, FileContainer, FileServiceClient, Launcher,
    Payload, RequestEnvelope, Result, ResultEnvelope, SessionState, SettingsSnapshot,
};

// ============================================================================
// Launcher
// ============================================================================

/// What a launch does before (or instead of) serving.
#[derive(Clone, Copy)]
enum Startup {
    Serve,
    FailRetry,
    FailFinal,
}

/// Runs a dispatcher in-process. Each launch consumes the next startup
/// behaviour; once they run out, launches serve.
struct InProcessLauncher {
    dispatcher: Arc<dyn Dispatcher>,
    startups: Mutex<Vec<Startup>>,
    launches: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InProcessLauncher {
    fn new(dispatcher: Arc<dyn Dispatcher>, startups: Vec<Startup>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            startups: Mutex::new(startups),
            launches: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Kills every running worker, closing their pipes.
    fn kill_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Launcher for InProcessLauncher {
    fn launch(&self) -> Result<LaunchedWorker> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let startup = {
            let mut startups = self.startups.lock();
            if startups.is_empty() {
                Startup::Serve
            } else {
                startups.remove(0)
            }
        };

        let (controller, worker) = duplex(64 * 1024);
        let (controller_read, controller_write) = tokio::io::split(controller);
        let (worker_read, worker_write) = tokio::io::split(worker);
        let dispatcher = Arc::clone(&self.dispatcher);

        let task = tokio::spawn(async move {
            let outcome = match startup {
                Startup::Serve => serve(dispatcher, worker_read, worker_write).await,
                Startup::FailRetry => {
                    announce_failure(worker_write, "index locked", FailureSignal { retry: true })
                        .await
                }
                Startup::FailFinal => {
                    announce_failure(worker_write, "bad config", FailureSignal::default()).await
                }
            };
            if let Err(e) = outcome {
                eprintln!("in-process worker failed: {e}");
            }
        });
        self.tasks.lock().push(task);

        Ok(LaunchedWorker {
            reader: Box::new(controller_read),
            writer: Box::new(controller_write),
            process: None,
        })
    }
}

// ============================================================================
// Dispatchers
// ============================================================================

/// Never answers `update`; answers everything else immediately.
struct HangingUpdates {
    entered: Notify,
}

#[async_trait]
impl Dispatcher for HangingUpdates {
    async fn dispatch(&self, envelope: RequestEnvelope) -> ResultEnvelope {
        match envelope.event_type {
            EventKind::Update => {
                self.entered.notify_one();
                std::future::pending().await
            }
            EventKind::Settings => ResultEnvelope::success(EventKind::Settings, None),
            kind => ResultEnvelope::success(kind, Some(Payload::Descriptors(Vec::new()))),
        }
    }
}

/// Delays each request by the number of milliseconds in its first exclude
/// pattern, then echoes the pattern back as the failure message.
struct EchoAfterDelay;

#[async_trait]
impl Dispatcher for EchoAfterDelay {
    async fn dispatch(&self, envelope: RequestEnvelope) -> ResultEnvelope {
        let tag = match envelope.payload {
            Some(Payload::Settings(settings)) => settings.exclude.first().cloned(),
            _ => None,
        }
        .unwrap_or_default();

        let delay = tag.parse::<u64>().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        ResultEnvelope::failure(envelope.event_type, tag)
    }
}

/// Panics while handling `update`.
struct PanicsOnUpdate(FileContainer);

#[async_trait]
impl Dispatcher for PanicsOnUpdate {
    async fn dispatch(&self, envelope: RequestEnvelope) -> ResultEnvelope {
        if envelope.event_type == EventKind::Update {
            panic!("index corrupted");
        }
        self.0.dispatch(envelope).await
    }
}

fn client(launcher: Arc<InProcessLauncher>, attempts: u32) -> FileServiceClient {
    FileServiceClient::builder()
        .launcher(launcher)
        .handshake_timeout(Duration::from_secs(2))
        .max_start_attempts(attempts)
        .build()
        .expect("build client")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn worker_exit_fails_only_the_in_flight_caller() -> anyhow::Result<()> {
    let dispatcher = Arc::new(HangingUpdates {
        entered: Notify::new(),
    });
    let launcher = InProcessLauncher::new(dispatcher.clone(), Vec::new());
    let client = client(Arc::clone(&launcher), 1);
    client.start_server().await?;

    let completed = client.get_all_descriptors().await?;
    assert!(completed.is_empty());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.request_update().await })
    };
    dispatcher.entered.notified().await;

    launcher.kill_all();
    let err = pending.await?.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert_eq!(client.state(), SessionState::Crashed);

    client.start_server().await?;
    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.get_all_descriptors().await?.is_empty());
    assert_eq!(launcher.launches(), 2);
    Ok(())
}

#[tokio::test]
async fn replies_are_matched_to_their_callers() -> anyhow::Result<()> {
    let launcher = InProcessLauncher::new(Arc::new(EchoAfterDelay), Vec::new());
    let client = client(launcher, 1);
    client.start_server().await?;

    // Later requests finish first.
    let calls = (0..8u64).map(|i| {
        let client = client.clone();
        let tag = ((8 - i) * 10).to_string();
        async move {
            let result = client
                .push_settings(SettingsSnapshot::new().with_exclude(tag.clone()))
                .await;
            (tag, result)
        }
    });

    for (tag, result) in join_all(calls).await {
        let result = result?;
        assert!(!result.successful);
        assert_eq!(result.failure_message(), tag);
    }
    Ok(())
}

#[tokio::test]
async fn retryable_initialization_failure_relaunches() -> anyhow::Result<()> {
    let launcher = InProcessLauncher::new(
        Arc::new(FileContainer::new(None)),
        vec![Startup::FailRetry],
    );
    let client = client(Arc::clone(&launcher), 2);

    client.start_server().await?;
    assert_eq!(launcher.launches(), 2);
    assert_eq!(client.state(), SessionState::Ready);
    Ok(())
}

#[tokio::test]
async fn retry_stops_after_configured_attempts() {
    let launcher = InProcessLauncher::new(
        Arc::new(FileContainer::new(None)),
        vec![Startup::FailRetry, Startup::FailRetry],
    );
    let client = client(Arc::clone(&launcher), 2);

    let err = assert_err!(client.start_server().await);
    assert!(matches!(err, Error::InitializationFailed { retry: true, .. }));
    assert_eq!(launcher.launches(), 2);
    assert_eq!(client.state(), SessionState::Crashed);
}

#[tokio::test]
async fn final_initialization_failure_is_not_retried() {
    let launcher = InProcessLauncher::new(
        Arc::new(FileContainer::new(None)),
        vec![Startup::FailFinal],
    );
    let client = client(Arc::clone(&launcher), 3);

    let err = assert_err!(client.start_server().await);
    assert!(matches!(err, Error::InitializationFailed { retry: false, .. }));
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn update_without_root_is_an_unsuccessful_result() -> anyhow::Result<()> {
    let launcher = InProcessLauncher::new(Arc::new(FileContainer::new(None)), Vec::new());
    let client = client(launcher, 1);
    client.start_server().await?;

    let result = client.request_update().await?;
    assert!(!result.successful);
    assert!(result.payload.is_none());
    assert_eq!(result.event_type, EventKind::Update);

    let err = client.update().await.unwrap_err();
    assert!(matches!(
        err,
        Error::OperationFailed {
            kind: EventKind::Update,
            ..
        }
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn settings_pushes_apply_in_send_order() -> anyhow::Result<()> {
    let container = Arc::new(FileContainer::new(None));
    let launcher = InProcessLauncher::new(container.clone(), Vec::new());
    let client = client(launcher, 1);
    client.start_server().await?;

    for round in 0..100 {
        let (off, on) = tokio::join!(
            client.push_settings(SettingsSnapshot::new().with_format_on_save(false)),
            client.push_settings(SettingsSnapshot::new().with_format_on_save(true)),
        );
        assert!(off?.successful);
        assert!(on?.successful);
        assert!(
            container.settings().format_on_save,
            "round {round} left the earlier snapshot active"
        );
    }
    Ok(())
}

#[tokio::test]
async fn panicking_dispatch_still_replies() -> anyhow::Result<()> {
    let dispatcher = Arc::new(PanicsOnUpdate(FileContainer::new(None)));
    let launcher = InProcessLauncher::new(dispatcher, Vec::new());
    let client = client(launcher, 1);
    client.start_server().await?;

    let outcome = tokio::time::timeout(Duration::from_secs(3), client.request_update()).await?;
    assert!(matches!(outcome, Err(Error::Protocol { .. })));

    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.get_all_descriptors().await?.is_empty());
    Ok(())
}
