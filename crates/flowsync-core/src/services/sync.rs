//! Sync service.
//!
//! Owns the normalized store and every process-wide resource around it:
//! the channel registry, change highlights, pending control requests,
//! screenshot polling and user notifications. Cloning is cheap; all clones
//! share the same state.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::notifications::{Notification, Notifications};
use crate::channel::{ChannelHandle, ChannelManager, FeedSink, FeedSource, Topic};
use crate::config::FlowConfig;
use crate::control::{ControlMessage, ControlTransport, Expectation, Frame, PendingControls, RunWriter, ScreenshotCache};
use crate::engine::{ControlAction, RunState};
use crate::error::{FlowError, FlowResult};
use crate::highlight::HighlightTracker;
use crate::model::{ChangeMessage, EntityKind, ExecutionRun};
use crate::result_ext::ResultExt;
use crate::store::{fetch_snapshot, ApplyOutcome, NormalizedStore, ReadModel, SnapshotFilter};
use crate::tree::{nest, Forest};

/// External collaborators of the sync service.
#[derive(Clone)]
pub struct SyncDeps {
    pub feed: Arc<dyn FeedSource>,
    pub read_model: Arc<dyn ReadModel>,
    pub writer: Arc<dyn RunWriter>,
    pub transport: Arc<dyn ControlTransport>,
}

struct Inner {
    config: FlowConfig,
    store: RwLock<NormalizedStore>,
    channels: ChannelManager,
    highlights: Mutex<HighlightTracker>,
    pending: PendingControls,
    screenshots: Mutex<ScreenshotCache>,
    pollers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    notifications: Mutex<Notifications>,
    read_model: Arc<dyn ReadModel>,
    writer: Arc<dyn RunWriter>,
    transport: Arc<dyn ControlTransport>,
}

impl Inner {
    /// Apply one change under the store write lock, then update the state
    /// derived from runs.
    async fn apply_change(&self, message: ChangeMessage) -> ApplyOutcome {
        let target = message.target();
        let (outcome, run) = {
            let mut store = self.store.write().await;
            let outcome = store.apply(message);
            let run = match target.table {
                EntityKind::Run => store.run(&target.id).cloned(),
                _ => None,
            };
            (outcome, run)
        };

        match (outcome, run) {
            (ApplyOutcome::Inserted | ApplyOutcome::Updated | ApplyOutcome::Duplicate, Some(run)) => {
                self.observe_run(&run).await;
            }
            (ApplyOutcome::Deleted, _) if target.table == EntityKind::Run => {
                self.highlights.lock().await.reset(target.id);
                self.stop_polling(&target.id).await;
            }
            _ => {}
        }
        outcome
    }

    async fn observe_run(&self, run: &ExecutionRun) {
        self.highlights.lock().await.observe(run.id, &run.steps, Instant::now());
        self.pending.confirm(run).await;
        if run.is_finished() {
            self.stop_polling(&run.id).await;
        }
    }

    async fn stop_polling(&self, run_id: &Uuid) {
        if let Some(poller) = self.pollers.lock().await.remove(run_id) {
            poller.abort();
        }
    }

    async fn notify(&self, err: &FlowError) {
        self.notifications.lock().await.push_error(err);
    }
}

/// Feed sink that applies messages to the shared store.
struct StoreApplier {
    inner: Weak<Inner>,
}

#[async_trait]
impl FeedSink for StoreApplier {
    async fn deliver(&self, topic: &Topic, message: &ChangeMessage) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let outcome = inner.apply_change(message.clone()).await;
        tracing::debug!(
            topic = %topic,
            kind = %message.kind(),
            target = ?message.target(),
            outcome = ?outcome,
            "Applied change"
        );
    }
}

/// A live view of a snapshot scope. Release it with [`SyncService::unwatch`].
pub struct Watch {
    filter: SnapshotFilter,
    handles: Vec<ChannelHandle>,
}

impl Watch {
    pub fn filter(&self) -> SnapshotFilter {
        self.filter
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.handles.iter().map(|h| h.topic()).collect()
    }

    /// Wait for the next change on any watched topic.
    ///
    /// The store already reflects the change when this returns.
    pub async fn changed(&mut self) -> Option<ChangeMessage> {
        if self.handles.is_empty() {
            return None;
        }
        let receivers = self.handles.iter_mut().map(|h| Box::pin(h.recv()));
        let (message, _, _) = futures::future::select_all(receivers).await;
        message
    }
}

/// Process-wide owner of the entity store and its live feeds.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl SyncService {
    pub fn new(config: FlowConfig, deps: SyncDeps) -> Self {
        let channels = ChannelManager::new(deps.feed, config.feed_buffer);
        let highlights = HighlightTracker::new(config.highlight_ttl());
        let notifications = Notifications::new(config.notification_capacity);

        Self {
            inner: Arc::new(Inner {
                config,
                store: RwLock::new(NormalizedStore::new()),
                channels,
                highlights: Mutex::new(highlights),
                pending: PendingControls::new(),
                screenshots: Mutex::new(ScreenshotCache::new()),
                pollers: Mutex::new(HashMap::new()),
                notifications: Mutex::new(notifications),
                read_model: deps.read_model,
                writer: deps.writer,
                transport: deps.transport,
            }),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.inner.channels
    }

    // ------------------------------------------------------------------
    // Feeds and snapshots
    // ------------------------------------------------------------------

    /// Start watching `filter`: attach its topics, then load its snapshot.
    ///
    /// Attaching first means no change between the snapshot read and the
    /// subscription is lost.
    pub async fn watch(&self, filter: SnapshotFilter) -> FlowResult<Watch> {
        let mut handles = Vec::new();
        for topic in Topic::for_filter(filter) {
            match self.attach(topic).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        self.inner.channels.detach(handle).await;
                    }
                    return self.fail(err).await;
                }
            }
        }

        if let SnapshotFilter::Run(run_id) = filter {
            self.inner.highlights.lock().await.track(run_id);
        }

        let watch = Watch { filter, handles };
        if let Err(err) = self.load_snapshot(filter).await {
            self.unwatch(watch).await;
            return Err(err);
        }

        if let SnapshotFilter::Run(run_id) = filter {
            let live = self
                .read(|store| store.run(&run_id).map(|run| !run.is_finished()))
                .await
                .unwrap_or(false);
            if live {
                self.start_polling(run_id).await;
            }
        }

        tracing::info!(filter = %filter, "Watching");
        Ok(watch)
    }

    /// Release a watch. Feeds close once no other watch holds them.
    pub async fn unwatch(&self, watch: Watch) {
        let filter = watch.filter;
        for handle in watch.handles {
            self.inner.channels.detach(handle).await;
        }

        if let SnapshotFilter::Run(run_id) = filter {
            if !self.inner.channels.is_open(&Topic::Run(run_id)).await {
                self.inner.screenshots.lock().await.unwatch(&run_id);
                self.inner.stop_polling(&run_id).await;
                self.inner.highlights.lock().await.forget(run_id);
            }
        }
        tracing::info!(filter = %filter, "Unwatched");
    }

    /// Fetch and upsert the rows of `filter`.
    ///
    /// Rows the feed changed while the fetch was in flight keep their feed
    /// version. On failure the store keeps its current rows and the error is
    /// queued as a notification.
    pub async fn load_snapshot(&self, filter: SnapshotFilter) -> FlowResult<usize> {
        let mark = self.inner.store.write().await.begin_snapshot();
        let snapshot = match fetch_snapshot(self.inner.read_model.as_ref(), filter).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.inner.store.write().await.abandon_snapshot(mark);
                tracing::warn!(filter = %filter, error = %err, "Snapshot fetch failed, keeping cached rows");
                return self.fail(err).await;
            }
        };

        let run_ids: Vec<Uuid> = snapshot.runs.iter().map(|run| run.id).collect();
        let (rows, runs) = {
            let mut store = self.inner.store.write().await;
            let rows = store.apply_snapshot(snapshot, mark);
            let runs: Vec<ExecutionRun> = run_ids.iter().filter_map(|id| store.run(id).cloned()).collect();
            (rows, runs)
        };
        for run in &runs {
            self.inner.observe_run(run).await;
        }

        tracing::debug!(filter = %filter, rows, "Snapshot applied");
        Ok(rows)
    }

    /// Apply a change that did not come through a managed channel.
    pub async fn apply(&self, message: ChangeMessage) -> ApplyOutcome {
        self.inner.apply_change(message).await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run `f` against the store under a read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&NormalizedStore) -> R) -> R {
        let store = self.inner.store.read().await;
        f(&store)
    }

    pub async fn run(&self, run_id: Uuid) -> Option<ExecutionRun> {
        self.read(|store| store.run(&run_id).cloned()).await
    }

    /// Nested view of a run's live steps.
    pub async fn run_tree(&self, run_id: Uuid) -> Option<Forest> {
        self.read(|store| store.run(&run_id).map(|run| nest(&run.steps))).await
    }

    /// Nested view of a session's program.
    pub async fn session_tree(&self, session_id: Uuid) -> Option<Forest> {
        self.read(|store| store.session(&session_id).map(|session| nest(&session.steps)))
            .await
    }

    /// Controls to offer for a run; empty while a request is in flight.
    pub async fn offered_controls(&self, run_id: Uuid) -> Vec<ControlAction> {
        if self.inner.pending.is_pending(&run_id).await {
            return Vec::new();
        }
        self.read(|store| store.run(&run_id).map(|run| ControlAction::offered(run.code_run_state)))
            .await
            .unwrap_or_default()
    }

    pub async fn is_pending(&self, run_id: Uuid) -> bool {
        self.inner.pending.is_pending(&run_id).await
    }

    /// Step numbers of `run_id` currently highlighted.
    pub async fn highlighted(&self, run_id: Uuid) -> BTreeSet<u32> {
        self.inner.highlights.lock().await.highlighted(run_id, Instant::now())
    }

    pub async fn latest_frame(&self, run_id: Uuid) -> Option<Frame> {
        self.inner.screenshots.lock().await.latest(&run_id).cloned()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.notifications.lock().await.list()
    }

    pub async fn dismiss_notification(&self, id: Uuid) -> bool {
        self.inner.notifications.lock().await.dismiss(&id)
    }

    // ------------------------------------------------------------------
    // Run control
    // ------------------------------------------------------------------

    /// Ask the backend to pause, resume or abort a run.
    ///
    /// Requests outside the transition table are rejected without side
    /// effects. Otherwise the call completes when the feed reports the new
    /// state, or fails with [`FlowError::Timeout`] after the control window.
    pub async fn request_control(&self, run_id: Uuid, action: ControlAction) -> FlowResult<RunState> {
        let target = action.target();
        let current = self
            .read(|store| store.run(&run_id).map(|run| run.code_run_state))
            .await
            .ok_or_else(|| FlowError::NotFound(format!("run {}", run_id)))?;

        if !current.can_request(target) {
            tracing::debug!(run_id = %run_id, from = %current, to = %target, "Control request rejected");
            return Err(FlowError::TransitionRejected { from: current, to: target });
        }

        let handle = match self.attach(Topic::Run(run_id)).await {
            Ok(handle) => handle,
            Err(err) => return self.fail(err).await,
        };
        let result = self.await_control(run_id, action).await;
        self.inner.channels.detach(handle).await;
        result
    }

    async fn await_control(&self, run_id: Uuid, action: ControlAction) -> FlowResult<RunState> {
        let target = action.target();
        let receiver = self.inner.pending.register(run_id, Expectation::State(target)).await?;

        tracing::info!(run_id = %run_id, action = %action, "Requesting run control");
        if let Err(err) = self.inner.writer.update_run_state(run_id, target).await {
            self.inner.pending.cancel(&run_id).await;
            return self.fail(err).await;
        }

        match tokio::time::timeout(self.inner.config.control_timeout(), receiver).await {
            Ok(Ok(state)) => {
                tracing::info!(run_id = %run_id, state = %state, "Run control confirmed");
                Ok(state)
            }
            Ok(Err(_)) => {
                self.inner.pending.cancel(&run_id).await;
                self.fail(FlowError::Internal("control confirmation dropped".to_string()))
                    .await
            }
            Err(_) => {
                self.inner.pending.cancel(&run_id).await;
                tracing::warn!(run_id = %run_id, action = %action, "Run control timed out");
                self.fail(FlowError::Timeout {
                    operation: action.to_string(),
                    run_id,
                })
                .await
            }
        }
    }

    /// Start a new run of a session.
    ///
    /// The session's program is copied into the run, the run is written,
    /// and the executor is asked to open its window. Completes when the run
    /// shows up on the feed.
    pub async fn start_run(&self, session_id: Uuid) -> FlowResult<ExecutionRun> {
        let session = self
            .read(|store| store.session(&session_id).cloned())
            .await
            .ok_or_else(|| FlowError::NotFound(format!("session {}", session_id)))?;
        let run = ExecutionRun::start(&session);

        let handle = match self.attach(Topic::SessionRuns(session_id)).await {
            Ok(handle) => handle,
            Err(err) => return self.fail(err).await,
        };
        let result = self.await_start(&run).await;
        self.inner.channels.detach(handle).await;
        result
    }

    async fn await_start(&self, run: &ExecutionRun) -> FlowResult<ExecutionRun> {
        let receiver = self.inner.pending.register(run.id, Expectation::Present).await?;

        if let Err(err) = self.inner.writer.create_run(run).await {
            self.inner.pending.cancel(&run.id).await;
            return self.fail(err).await;
        }
        let message = ControlMessage::CreateRunWindow {
            session_id: run.session_id,
            run_id: run.id,
        };
        if let Err(err) = self.inner.transport.send(&message).await {
            self.inner.pending.cancel(&run.id).await;
            return self.fail(err).await;
        }
        tracing::info!(run_id = %run.id, session_id = %run.session_id, "Run start requested");

        match tokio::time::timeout(self.inner.config.connect_timeout(), receiver).await {
            Ok(Ok(_)) => Ok(self.run(run.id).await.unwrap_or_else(|| run.clone())),
            Ok(Err(_)) => {
                self.inner.pending.cancel(&run.id).await;
                self.fail(FlowError::Internal("start confirmation dropped".to_string()))
                    .await
            }
            Err(_) => {
                self.inner.pending.cancel(&run.id).await;
                tracing::warn!(run_id = %run.id, "Run start timed out");
                self.fail(FlowError::Timeout {
                    operation: "start".to_string(),
                    run_id: run.id,
                })
                .await
            }
        }
    }

    /// Bring a run's window to the front. Fire-and-forget.
    pub async fn jump_to_run(&self, run_id: Uuid) -> FlowResult<()> {
        let message = ControlMessage::JumpToRunWindow { run_id };
        match self.inner.transport.send(&message).await {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err).await,
        }
    }

    /// Handle a message sent by the run executor.
    pub async fn handle_inbound(&self, message: ControlMessage) {
        match message {
            ControlMessage::ScreenshotResponse { run_id, image } => {
                if !self.inner.screenshots.lock().await.accept(run_id, image) {
                    tracing::debug!(run_id = %run_id, "Ignoring screenshot for unwatched run");
                }
            }
            ControlMessage::RunWindowClosed { run_id } => self.close_run_window(run_id).await,
            other => {
                tracing::warn!(message = %other, "Ignoring outbound message kind on inbound path");
            }
        }
    }

    async fn close_run_window(&self, run_id: Uuid) {
        let closed = {
            let mut store = self.inner.store.write().await;
            store
                .close_run_window(&run_id)
                .and_then(|from| store.run(&run_id).cloned().map(|run| (from, run)))
        };
        let Some((from, run)) = closed else {
            tracing::debug!(run_id = %run_id, "Window closed for unknown or finished run");
            return;
        };

        tracing::warn!(run_id = %run_id, from = %from, "Run window closed");
        self.inner.observe_run(&run).await;

        if let Err(err) = self
            .inner
            .writer
            .update_run_state(run_id, RunState::WindowClosed)
            .await
            .log("persisting window_closed")
        {
            self.inner.notify(&err).await;
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn attach(&self, topic: Topic) -> FlowResult<ChannelHandle> {
        let sink: Arc<dyn FeedSink> = Arc::new(StoreApplier {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.channels.attach(topic, sink).await
    }

    async fn fail<T>(&self, err: FlowError) -> FlowResult<T> {
        self.inner.notify(&err).await;
        Err(err)
    }

    async fn start_polling(&self, run_id: Uuid) {
        self.inner.screenshots.lock().await.watch(run_id);

        let mut pollers = self.inner.pollers.lock().await;
        if pollers.get(&run_id).map(|p| !p.is_finished()).unwrap_or(false) {
            return;
        }
        let period = self.inner.config.screenshot_interval();
        let poller = tokio::spawn(poll_screenshots(Arc::downgrade(&self.inner), run_id, period));
        pollers.insert(run_id, poller);
        tracing::debug!(run_id = %run_id, "Screenshot polling started");
    }
}

/// Request a frame every `period` while the run is live and watched.
async fn poll_screenshots(weak: Weak<Inner>, run_id: Uuid, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let live = inner
            .store
            .read()
            .await
            .run(&run_id)
            .map(|run| !run.is_finished())
            .unwrap_or(false);
        if !live || !inner.screenshots.lock().await.is_watched(&run_id) {
            break;
        }

        let _ = inner
            .transport
            .send(&ControlMessage::RequestScreenshot { run_id })
            .await
            .log("requesting screenshot");
    }
    tracing::debug!(run_id = %run_id, "Screenshot polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRecord, ExecutionSession, StepRecord, StepType};
    use crate::store::RunEvents;
    use futures::stream::BoxStream;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Notify};

    /// In-memory backend playing read model, run store, feed and executor.
    #[derive(Default)]
    struct FakeBackend {
        sessions: StdMutex<HashMap<Uuid, ExecutionSession>>,
        runs: StdMutex<HashMap<Uuid, ExecutionRun>>,
        feeds: StdMutex<Vec<(Topic, mpsc::UnboundedSender<ChangeMessage>)>>,
        sent: StdMutex<Vec<ControlMessage>>,
        writes: AtomicUsize,
        fail_reads: AtomicBool,
        silent_writes: AtomicBool,
        /// When set, `fetch_run` reads its row, signals `fetch_started`,
        /// and waits for `release_fetch` before returning it.
        hold_fetch: AtomicBool,
        fetch_started: Notify,
        release_fetch: Notify,
    }

    impl FakeBackend {
        fn with_session(session: ExecutionSession) -> Arc<Self> {
            let backend = Self::default();
            backend.sessions.lock().unwrap().insert(session.id, session);
            Arc::new(backend)
        }

        fn add_run(&self, run: ExecutionRun) {
            self.runs.lock().unwrap().insert(run.id, run);
        }

        fn publish(&self, topics: &[Topic], message: ChangeMessage) {
            let feeds = self.feeds.lock().unwrap();
            for (topic, tx) in feeds.iter() {
                if topics.contains(topic) {
                    let _ = tx.send(message.clone());
                }
            }
        }

        fn publish_run(&self, run: &ExecutionRun, insert: bool) {
            let entity = EntityRecord::Run(run.clone());
            let message = if insert {
                ChangeMessage::Insert { entity }
            } else {
                ChangeMessage::Update { entity }
            };
            self.publish(&[Topic::Run(run.id), Topic::SessionRuns(run.session_id)], message);
        }

        fn sent(&self) -> Vec<ControlMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedSource for FakeBackend {
        async fn open(&self, topic: &Topic) -> FlowResult<BoxStream<'static, ChangeMessage>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push((*topic, tx));
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            });
            Ok(stream.boxed())
        }
    }

    #[async_trait]
    impl ReadModel for FakeBackend {
        async fn fetch_sessions(&self) -> FlowResult<Vec<ExecutionSession>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(FlowError::Transport("read model offline".to_string()));
            }
            Ok(self.sessions.lock().unwrap().values().cloned().collect())
        }

        async fn fetch_session(&self, session_id: Uuid) -> FlowResult<Option<ExecutionSession>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(FlowError::Transport("read model offline".to_string()));
            }
            Ok(self.sessions.lock().unwrap().get(&session_id).cloned())
        }

        async fn fetch_session_runs(&self, session_id: Uuid) -> FlowResult<Vec<ExecutionRun>> {
            Ok(self
                .runs
                .lock()
                .unwrap()
                .values()
                .filter(|run| run.session_id == session_id)
                .cloned()
                .collect())
        }

        async fn fetch_run(&self, run_id: Uuid) -> FlowResult<Option<ExecutionRun>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(FlowError::Transport("read model offline".to_string()));
            }
            let row = self.runs.lock().unwrap().get(&run_id).cloned();
            if self.hold_fetch.load(Ordering::SeqCst) {
                self.fetch_started.notify_one();
                self.release_fetch.notified().await;
            }
            Ok(row)
        }

        async fn fetch_run_events(&self, _run_id: Uuid) -> FlowResult<RunEvents> {
            Ok(RunEvents::default())
        }
    }

    #[async_trait]
    impl RunWriter for FakeBackend {
        async fn create_run(&self, run: &ExecutionRun) -> FlowResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.add_run(run.clone());
            if !self.silent_writes.load(Ordering::SeqCst) {
                self.publish_run(run, true);
            }
            Ok(())
        }

        async fn update_run_state(&self, run_id: Uuid, state: RunState) -> FlowResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let run = {
                let mut runs = self.runs.lock().unwrap();
                let run = runs
                    .get_mut(&run_id)
                    .ok_or_else(|| FlowError::NotFound(run_id.to_string()))?;
                run.code_run_state = state;
                run.clone()
            };
            if !self.silent_writes.load(Ordering::SeqCst) {
                self.publish_run(&run, false);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ControlTransport for FakeBackend {
        async fn send(&self, message: &ControlMessage) -> FlowResult<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn service(backend: &Arc<FakeBackend>) -> SyncService {
        let deps = SyncDeps {
            feed: backend.clone(),
            read_model: backend.clone(),
            writer: backend.clone(),
            transport: backend.clone(),
        };
        SyncService::new(FlowConfig::default(), deps)
    }

    fn session() -> ExecutionSession {
        let mut session = ExecutionSession::new(Uuid::new_v4(), "Invoice sync");
        session.steps = vec![
            StepRecord::function(1, 0, "open_portal"),
            StepRecord::control(2, 0, StepType::If, 2),
            StepRecord::function(3, 1, "download"),
            StepRecord::function(4, 1, "upload"),
            StepRecord::new(5, 0, StepType::Done),
        ];
        session
    }

    fn run_in(session: &ExecutionSession, state: RunState) -> ExecutionRun {
        let mut run = ExecutionRun::start(session);
        run.code_run_state = state;
        run
    }

    #[tokio::test]
    async fn test_paused_abort_then_resume_rejected() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let run = run_in(&session, RunState::Paused);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let watch = sync.watch(SnapshotFilter::Run(run.id)).await.unwrap();

        let state = sync.request_control(run.id, ControlAction::Abort).await.unwrap();
        assert_eq!(state, RunState::Aborted);
        assert_eq!(sync.run(run.id).await.unwrap().code_run_state, RunState::Aborted);
        assert!(!sync.is_pending(run.id).await);

        let writes = backend.writes.load(Ordering::SeqCst);
        let err = sync.request_control(run.id, ControlAction::Resume).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::TransitionRejected {
                from: RunState::Aborted,
                to: RunState::Running
            }
        ));
        assert_eq!(backend.writes.load(Ordering::SeqCst), writes);
        assert!(sync.offered_controls(run.id).await.is_empty());

        sync.unwatch(watch).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_timeout_clears_pending() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());
        backend.silent_writes.store(true, Ordering::SeqCst);

        let sync = service(&backend);
        sync.load_snapshot(SnapshotFilter::Run(run.id)).await.unwrap();

        let err = sync.request_control(run.id, ControlAction::Pause).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout { run_id, .. } if run_id == run.id));
        assert!(!sync.is_pending(run.id).await);
        assert_eq!(
            sync.offered_controls(run.id).await,
            vec![ControlAction::Pause, ControlAction::Abort]
        );

        let notifications = sync.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].retryable);
        assert!(sync.dismiss_notification(notifications[0].id).await);
    }

    #[tokio::test]
    async fn test_snapshot_failure_keeps_store() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let sync = service(&backend);

        assert_eq!(sync.load_snapshot(SnapshotFilter::Sessions).await.unwrap(), 1);

        backend.fail_reads.store(true, Ordering::SeqCst);
        let err = sync.load_snapshot(SnapshotFilter::Sessions).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(sync.read(|store| store.session(&session.id).is_some()).await);
        assert_eq!(sync.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_watch_releases_channels() {
        let backend = FakeBackend::with_session(session());
        backend.fail_reads.store(true, Ordering::SeqCst);
        let sync = service(&backend);

        assert!(sync.watch(SnapshotFilter::Sessions).await.is_err());
        assert!(sync.channels().open_topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_run_copies_program() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let sync = service(&backend);
        let watch = sync.watch(SnapshotFilter::Session(session.id)).await.unwrap();

        let run = sync.start_run(session.id).await.unwrap();
        assert_eq!(run.session_id, session.id);
        assert_eq!(run.code_run_state, RunState::Running);
        assert_eq!(run.steps, session.steps);
        assert_eq!(
            sync.read(|store| store.runs_for_session(&session.id).len()).await,
            1
        );
        assert_eq!(
            backend.sent(),
            vec![ControlMessage::CreateRunWindow {
                session_id: session.id,
                run_id: run.id
            }]
        );

        let tree = sync.run_tree(run.id).await.unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1].children.len(), 2);

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_run_window_closed() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let live = run_in(&session, RunState::Running);
        let finished = run_in(&session, RunState::Finished);
        backend.add_run(live.clone());
        backend.add_run(finished.clone());

        let sync = service(&backend);
        sync.load_snapshot(SnapshotFilter::Session(session.id)).await.unwrap();

        sync.handle_inbound(ControlMessage::RunWindowClosed { run_id: live.id }).await;
        assert_eq!(sync.run(live.id).await.unwrap().code_run_state, RunState::WindowClosed);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);

        sync.handle_inbound(ControlMessage::RunWindowClosed { run_id: finished.id }).await;
        sync.handle_inbound(ControlMessage::RunWindowClosed { run_id: Uuid::new_v4() }).await;
        assert_eq!(sync.run(finished.id).await.unwrap().code_run_state, RunState::Finished);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    async fn wait_for_state(sync: &SyncService, run_id: Uuid, state: RunState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sync.run(run_id).await.map(|run| run.code_run_state) != Some(state) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("state reached");
    }

    #[tokio::test]
    async fn test_snapshot_does_not_roll_back_feed_update() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());
        backend.hold_fetch.store(true, Ordering::SeqCst);

        let sync = service(&backend);
        let watching = tokio::spawn({
            let sync = sync.clone();
            async move { sync.watch(SnapshotFilter::Run(run.id)).await }
        });

        // The run finishes while the read model is still answering.
        backend.fetch_started.notified().await;
        let mut finished = run.clone();
        finished.code_run_state = RunState::Finished;
        backend.publish_run(&finished, false);
        wait_for_state(&sync, run.id, RunState::Finished).await;

        backend.release_fetch.notify_one();
        let watch = watching.await.unwrap().unwrap();

        assert_eq!(sync.run(run.id).await.unwrap().code_run_state, RunState::Finished);
        assert!(sync.offered_controls(run.id).await.is_empty());
        assert!(sync.inner.pollers.lock().await.is_empty());

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_window_closed_after_feed_finish_keeps_finish() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let mut run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let mut watch = sync.watch(SnapshotFilter::Run(run.id)).await.unwrap();

        run.code_run_state = RunState::Finished;
        run.steps[0].active = true;
        backend.publish_run(&run, false);
        assert!(watch.changed().await.is_some());

        sync.handle_inbound(ControlMessage::RunWindowClosed { run_id: run.id }).await;
        let stored = sync.run(run.id).await.unwrap();
        assert_eq!(stored.code_run_state, RunState::Finished);
        assert!(stored.steps[0].active);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 0);

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_window_closed_keeps_feed_progress() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let mut run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let mut watch = sync.watch(SnapshotFilter::Run(run.id)).await.unwrap();

        run.steps[2].active = true;
        backend.publish_run(&run, false);
        assert!(watch.changed().await.is_some());

        sync.handle_inbound(ControlMessage::RunWindowClosed { run_id: run.id }).await;
        let stored = sync.run(run.id).await.unwrap();
        assert_eq!(stored.code_run_state, RunState::WindowClosed);
        assert_eq!(stored.active_step().unwrap().step_number, 3);
        assert!(sync.inner.pollers.lock().await.is_empty());

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_listed_runs_are_not_highlight_tracked() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let mut run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let mut watch = sync.watch(SnapshotFilter::Session(session.id)).await.unwrap();

        run.steps[0].active = true;
        backend.publish_run(&run, false);
        assert!(watch.changed().await.is_some());

        assert!(sync.highlighted(run.id).await.is_empty());
        assert_eq!(sync.inner.highlights.lock().await.remembered(), 0);

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_screenshots_only_for_watched_runs() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let stranger = Uuid::new_v4();
        sync.handle_inbound(ControlMessage::ScreenshotResponse {
            run_id: stranger,
            image: "img".to_string(),
        })
        .await;
        assert!(sync.latest_frame(stranger).await.is_none());

        let watch = sync.watch(SnapshotFilter::Run(run.id)).await.unwrap();
        sync.handle_inbound(ControlMessage::ScreenshotResponse {
            run_id: run.id,
            image: "frame-1".to_string(),
        })
        .await;
        assert_eq!(sync.latest_frame(run.id).await.unwrap().image, "frame-1");

        sync.unwatch(watch).await;
        assert!(sync.latest_frame(run.id).await.is_none());
    }

    #[tokio::test]
    async fn test_feed_update_highlights_changed_steps() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let mut run = run_in(&session, RunState::Running);
        backend.add_run(run.clone());

        let sync = service(&backend);
        let mut watch = sync.watch(SnapshotFilter::Run(run.id)).await.unwrap();
        assert!(sync.highlighted(run.id).await.is_empty());

        run.steps[0].active = true;
        backend.publish_run(&run, false);
        assert!(watch.changed().await.is_some());

        let highlighted: Vec<u32> = sync.highlighted(run.id).await.into_iter().collect();
        assert_eq!(highlighted, vec![1]);
        assert_eq!(sync.run(run.id).await.unwrap().active_step().unwrap().step_number, 1);

        sync.unwatch(watch).await;
    }

    #[tokio::test]
    async fn test_watches_share_channels() {
        let session = session();
        let backend = FakeBackend::with_session(session.clone());
        let sync = service(&backend);

        let a = sync.watch(SnapshotFilter::Sessions).await.unwrap();
        let b = sync.watch(SnapshotFilter::Session(session.id)).await.unwrap();
        assert_eq!(sync.channels().subscriber_count(&Topic::Sessions).await, 2);
        assert_eq!(backend.feeds.lock().unwrap().len(), 2);

        sync.unwatch(a).await;
        assert!(sync.channels().is_open(&Topic::Sessions).await);
        sync.unwatch(b).await;
        assert!(sync.channels().open_topics().await.is_empty());
    }
}
