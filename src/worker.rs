//! # Worker Context Runtime
//!
//! Isolated worker execution units for page processing. Each worker is a
//! spawned task that owns a [`PageProcessor`] and communicates with the
//! dispatch side exclusively through channels; no memory is shared.
//!
//! ## State machine
//!
//! A worker starts in `Spawning` and transitions to `Ready` when its `init`
//! envelope has been applied. Page events arriving before the transition are
//! buffered (bounded) and drained in order once the worker is ready, so an
//! event dispatched from an extremely early page load is not lost to the
//! startup race. A failed `init` moves the worker to `Failed`, where events
//! are dropped with a log line. Closing the inbound channel moves the worker
//! to `Terminated` and ends the task.
//!
//! In `Ready`, each recognized page event produces exactly one result
//! envelope. Processing failures and per-event timeouts are logged and the
//! event dropped; the worker stays responsive to subsequent events.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::constants::TEXT_PARSED_EVENT;
use crate::envelope::{EventEnvelope, InitEnvelope, ResultEnvelope, TextParsedDetails, WorkerBound};
use crate::error::{DispatchError, DispatchResult};

/// Opaque page-processing function run inside a worker context.
///
/// `init` receives the registration's initialization payload once, before
/// any page content; `process` turns the details of one parsed page into the
/// result payload for that page.
#[async_trait]
pub trait PageProcessor: Send + Sync {
    /// Apply initialization data (e.g. load a classification model).
    async fn init(&self, _args: &Value) -> DispatchResult<()> {
        Ok(())
    }

    /// Process one parsed page into a result payload.
    async fn process(&self, details: &TextParsedDetails) -> DispatchResult<Value>;
}

/// Processor that reports the extracted page content back unchanged.
#[derive(Debug, Default)]
pub struct PageContentProcessor;

#[async_trait]
impl PageProcessor for PageContentProcessor {
    async fn process(&self, details: &TextParsedDetails) -> DispatchResult<Value> {
        serde_json::to_value(&details.content)
            .map_err(|e| DispatchError::internal(format!("content serialization failed: {e}")))
    }
}

/// Resolves a worker module path to its processor implementation.
///
/// This is the "loadable worker module" seam: the registry only knows paths,
/// the loader knows what code lives behind them.
pub trait WorkerLoader: Send + Sync {
    fn load(&self, path: &str) -> DispatchResult<Arc<dyn PageProcessor>>;
}

/// In-process loader backed by an explicit path → processor table.
#[derive(Default)]
pub struct ModuleLoader {
    modules: RwLock<HashMap<String, Arc<dyn PageProcessor>>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a processor loadable under the given module path.
    pub fn register_module(&self, path: impl Into<String>, processor: Arc<dyn PageProcessor>) {
        let path = path.into();
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        if modules.insert(path.clone(), processor).is_some() {
            warn!(path = path, "Worker module replaced");
        }
    }
}

impl WorkerLoader for ModuleLoader {
    fn load(&self, path: &str) -> DispatchResult<Arc<dyn PageProcessor>> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules
            .get(path)
            .cloned()
            .ok_or_else(|| DispatchError::worker_spawn_failure(path, "unknown worker module"))
    }
}

/// Lifecycle state of a worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Spawning,
    Ready,
    Failed,
    Terminated,
}

/// Main-side handle to a spawned worker context.
///
/// Owns the inbound envelope channel exclusively; dropping or terminating
/// the handle ends the worker task.
pub struct WorkerHandle {
    name: String,
    envelope_tx: mpsc::UnboundedSender<Value>,
    state_rx: watch::Receiver<WorkerState>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a wire envelope into the worker. FIFO per worker.
    pub fn send_envelope(&self, wire: Value) -> DispatchResult<()> {
        self.envelope_tx
            .send(wire)
            .map_err(|_| DispatchError::channel_closed(format!("worker:{}", self.name)))
    }

    /// A sender the event bridge can use to forward envelopes to this worker.
    pub fn forward_sender(&self) -> mpsc::UnboundedSender<Value> {
        self.envelope_tx.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for lifecycle state changes.
    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// Wait until the worker acknowledges readiness.
    ///
    /// Returns an error if the worker fails during initialization or is
    /// terminated before reaching `Ready`.
    pub async fn wait_ready(&self) -> DispatchResult<()> {
        let mut state_rx = self.state_rx.clone();
        loop {
            match *state_rx.borrow_and_update() {
                WorkerState::Ready => return Ok(()),
                WorkerState::Failed => {
                    return Err(DispatchError::worker_runtime(
                        &self.name,
                        "worker failed during initialization",
                    ))
                }
                WorkerState::Terminated => {
                    return Err(DispatchError::channel_closed(format!(
                        "worker:{}",
                        self.name
                    )))
                }
                WorkerState::Spawning => {}
            }

            if state_rx.changed().await.is_err() {
                return Err(DispatchError::channel_closed(format!(
                    "worker:{}",
                    self.name
                )));
            }
        }
    }

    /// Tear the worker down: close its inbound channel and wait for the task
    /// to finish.
    pub async fn terminate(self) {
        drop(self.envelope_tx);
        if let Err(e) = self.join.await {
            warn!(worker = %self.name, error = %e, "Worker task ended abnormally");
        }
    }
}

/// Spawn a worker context for the given processor.
///
/// Returns the main-side handle and the channel on which the worker emits
/// result envelopes. Both channels are FIFO.
pub fn spawn_worker(
    name: impl Into<String>,
    processor: Arc<dyn PageProcessor>,
    pre_init_buffer: usize,
    processing_timeout: Duration,
) -> (WorkerHandle, mpsc::UnboundedReceiver<ResultEnvelope>) {
    let name = name.into();
    let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Spawning);

    let runtime = WorkerRuntime {
        name: name.clone(),
        processor,
        pre_init_buffer,
        processing_timeout,
        result_tx,
        state_tx,
    };

    let join = tokio::spawn(runtime.run(envelope_rx));

    info!(worker = %name, "Worker context spawned");

    (
        WorkerHandle {
            name,
            envelope_tx,
            state_rx,
            join,
        },
        result_rx,
    )
}

/// The task body running inside a worker context.
struct WorkerRuntime {
    name: String,
    processor: Arc<dyn PageProcessor>,
    pre_init_buffer: usize,
    processing_timeout: Duration,
    result_tx: mpsc::UnboundedSender<ResultEnvelope>,
    state_tx: watch::Sender<WorkerState>,
}

impl WorkerRuntime {
    fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: WorkerState) {
        let _ = self.state_tx.send(state);
    }

    async fn run(self, mut inbound: mpsc::UnboundedReceiver<Value>) {
        let mut pending: VecDeque<EventEnvelope> = VecDeque::new();

        while let Some(wire) = inbound.recv().await {
            let envelope = match WorkerBound::from_wire(&wire) {
                Ok(envelope) => envelope,
                Err(e) => {
                    // Malformed envelopes are ignored with no reply.
                    warn!(worker = %self.name, error = %e, "Ignoring malformed envelope");
                    continue;
                }
            };

            match envelope {
                WorkerBound::Init(init) => self.handle_init(init, &mut pending).await,
                WorkerBound::PageEvent(event) => self.handle_event(event, &mut pending).await,
            }
        }

        self.set_state(WorkerState::Terminated);
        debug!(worker = %self.name, "Worker context terminated");
    }

    async fn handle_init(&self, init: InitEnvelope, pending: &mut VecDeque<EventEnvelope>) {
        match self.state() {
            WorkerState::Spawning => {
                if init.name != self.name {
                    warn!(
                        worker = %self.name,
                        init_name = %init.name,
                        "Init envelope name does not match worker name"
                    );
                }

                match self.processor.init(&init.args).await {
                    Ok(()) => {
                        self.set_state(WorkerState::Ready);
                        info!(
                            worker = %self.name,
                            buffered_events = pending.len(),
                            "Worker initialized"
                        );

                        // Drain events that raced the init envelope, in order.
                        while let Some(event) = pending.pop_front() {
                            self.process_event(event).await;
                        }
                    }
                    Err(e) => {
                        let err = DispatchError::worker_runtime(&self.name, e.to_string());
                        error!(worker = %self.name, error = %err, "Worker initialization failed");
                        self.set_state(WorkerState::Failed);
                        if !pending.is_empty() {
                            warn!(
                                worker = %self.name,
                                dropped = pending.len(),
                                "Dropping buffered events after failed initialization"
                            );
                            pending.clear();
                        }
                    }
                }
            }
            // At most one init; later ones are ignored.
            state => {
                warn!(worker = %self.name, state = ?state, "Ignoring duplicate init envelope");
            }
        }
    }

    async fn handle_event(&self, event: EventEnvelope, pending: &mut VecDeque<EventEnvelope>) {
        match self.state() {
            WorkerState::Ready => self.process_event(event).await,
            WorkerState::Spawning => {
                if pending.len() >= self.pre_init_buffer {
                    warn!(
                        worker = %self.name,
                        capacity = self.pre_init_buffer,
                        "Pre-init buffer full, dropping page event"
                    );
                } else {
                    debug!(worker = %self.name, "Buffering page event until worker is ready");
                    pending.push_back(event);
                }
            }
            state => {
                debug!(worker = %self.name, state = ?state, "Dropping page event");
            }
        }
    }

    async fn process_event(&self, event: EventEnvelope) {
        if event.event_name != TEXT_PARSED_EVENT {
            debug!(
                worker = %self.name,
                event_name = %event.event_name,
                "Ignoring unrecognized event name"
            );
            return;
        }

        let details = match event.text_parsed_details() {
            Ok(details) => details,
            Err(e) => {
                warn!(worker = %self.name, error = %e, "Ignoring event with invalid arguments");
                return;
            }
        };

        match timeout(self.processing_timeout, self.processor.process(&details)).await {
            Ok(Ok(data)) => {
                let result =
                    ResultEnvelope::new(&self.name, &details.url, &details.page_id, data);
                if self.result_tx.send(result).is_err() {
                    debug!(worker = %self.name, "Result channel closed, dropping result");
                }
            }
            Ok(Err(e)) => {
                let err = DispatchError::worker_runtime(&self.name, e.to_string());
                error!(
                    worker = %self.name,
                    url = %details.url,
                    page_id = %details.page_id,
                    error = %err,
                    "Processing failed, page event dropped"
                );
            }
            Err(_) => {
                let err = DispatchError::timeout(
                    "process_page",
                    self.processing_timeout.as_millis() as u64,
                );
                error!(
                    worker = %self.name,
                    url = %details.url,
                    page_id = %details.page_id,
                    error = %err,
                    "Processing timed out, page event dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL_VERSION;
    use serde_json::json;

    fn init_wire(name: &str) -> Value {
        WorkerBound::Init(InitEnvelope {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
            args: json!({}),
        })
        .to_wire()
        .unwrap()
    }

    fn event_wire(url: &str, page_id: &str) -> Value {
        let details = TextParsedDetails::new(url, page_id, "Title", "body text");
        WorkerBound::PageEvent(EventEnvelope::text_parsed(&details).unwrap())
            .to_wire()
            .unwrap()
    }

    async fn recv_result(
        rx: &mut mpsc::UnboundedReceiver<ResultEnvelope>,
    ) -> Option<ResultEnvelope> {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    struct FailingProcessor;

    #[async_trait]
    impl PageProcessor for FailingProcessor {
        async fn process(&self, details: &TextParsedDetails) -> DispatchResult<Value> {
            if details.url.contains("boom") {
                return Err(DispatchError::internal("model exploded"));
            }
            Ok(json!({"ok": true}))
        }
    }

    struct FailingInitProcessor;

    #[async_trait]
    impl PageProcessor for FailingInitProcessor {
        async fn init(&self, _args: &Value) -> DispatchResult<()> {
            Err(DispatchError::internal("bad model file"))
        }

        async fn process(&self, _details: &TextParsedDetails) -> DispatchResult<Value> {
            Ok(json!({}))
        }
    }

    struct SlowProcessor;

    #[async_trait]
    impl PageProcessor for SlowProcessor {
        async fn process(&self, _details: &TextParsedDetails) -> DispatchResult<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    fn spawn_test_worker(
        processor: Arc<dyn PageProcessor>,
    ) -> (WorkerHandle, mpsc::UnboundedReceiver<ResultEnvelope>) {
        spawn_worker("page-content", processor, 8, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_init_then_event_produces_one_result() {
        let (handle, mut results) = spawn_test_worker(Arc::new(PageContentProcessor));

        handle.send_envelope(init_wire("page-content")).unwrap();
        handle.wait_ready().await.unwrap();
        assert_eq!(handle.state(), WorkerState::Ready);

        handle
            .send_envelope(event_wire("https://example.com", "p1"))
            .unwrap();

        let result = recv_result(&mut results).await.unwrap();
        assert_eq!(result.worker_name, "page-content");
        assert_eq!(result.url, "https://example.com");
        assert_eq!(result.page_id, "p1");
        assert_eq!(result.data["title"], "Title");
        assert_eq!(result.data["textContent"], "body text");

        assert!(recv_result(&mut results).await.is_none());
    }

    #[tokio::test]
    async fn test_pre_init_events_are_buffered_in_order() {
        let (handle, mut results) = spawn_test_worker(Arc::new(PageContentProcessor));

        handle
            .send_envelope(event_wire("https://example.com/a", "p1"))
            .unwrap();
        handle
            .send_envelope(event_wire("https://example.com/b", "p2"))
            .unwrap();
        handle.send_envelope(init_wire("page-content")).unwrap();

        let first = recv_result(&mut results).await.unwrap();
        let second = recv_result(&mut results).await.unwrap();
        assert_eq!(first.page_id, "p1");
        assert_eq!(second.page_id, "p2");
    }

    #[tokio::test]
    async fn test_pre_init_buffer_is_bounded() {
        let (handle, mut results) = spawn_worker(
            "page-content",
            Arc::new(PageContentProcessor),
            1,
            Duration::from_millis(200),
        );

        handle
            .send_envelope(event_wire("https://example.com/a", "p1"))
            .unwrap();
        handle
            .send_envelope(event_wire("https://example.com/b", "p2"))
            .unwrap();
        handle.send_envelope(init_wire("page-content")).unwrap();

        let kept = recv_result(&mut results).await.unwrap();
        assert_eq!(kept.page_id, "p1");
        assert!(recv_result(&mut results).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_ignored_idempotently() {
        let (handle, mut results) = spawn_test_worker(Arc::new(PageContentProcessor));

        handle.send_envelope(init_wire("page-content")).unwrap();
        handle.wait_ready().await.unwrap();

        // Same malformed envelope twice: no observable effect either time.
        handle.send_envelope(json!({"type": "bogus"})).unwrap();
        handle.send_envelope(json!({"type": "bogus"})).unwrap();
        assert!(recv_result(&mut results).await.is_none());

        // Still responsive afterwards.
        handle
            .send_envelope(event_wire("https://example.com", "p1"))
            .unwrap();
        assert!(recv_result(&mut results).await.is_some());
    }

    #[tokio::test]
    async fn test_processing_error_drops_event_and_stays_responsive() {
        let (handle, mut results) = spawn_test_worker(Arc::new(FailingProcessor));

        handle.send_envelope(init_wire("page-content")).unwrap();
        handle.wait_ready().await.unwrap();

        handle
            .send_envelope(event_wire("https://boom.example.com", "p1"))
            .unwrap();
        assert!(recv_result(&mut results).await.is_none());

        handle
            .send_envelope(event_wire("https://fine.example.com", "p2"))
            .unwrap();
        let result = recv_result(&mut results).await.unwrap();
        assert_eq!(result.page_id, "p2");
    }

    #[tokio::test]
    async fn test_processing_timeout_drops_event() {
        let (handle, mut results) = spawn_worker(
            "page-content",
            Arc::new(SlowProcessor),
            8,
            Duration::from_millis(50),
        );

        handle.send_envelope(init_wire("page-content")).unwrap();
        handle.wait_ready().await.unwrap();

        handle
            .send_envelope(event_wire("https://slow.example.com", "p1"))
            .unwrap();
        assert!(recv_result(&mut results).await.is_none());
        assert_eq!(handle.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_duplicate_init_is_ignored() {
        let (handle, mut results) = spawn_test_worker(Arc::new(PageContentProcessor));

        handle.send_envelope(init_wire("page-content")).unwrap();
        handle.wait_ready().await.unwrap();
        handle.send_envelope(init_wire("page-content")).unwrap();

        handle
            .send_envelope(event_wire("https://example.com", "p1"))
            .unwrap();
        assert!(recv_result(&mut results).await.is_some());
        assert_eq!(handle.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_failed_init_moves_worker_to_failed() {
        let (handle, mut results) = spawn_test_worker(Arc::new(FailingInitProcessor));

        handle.send_envelope(init_wire("page-content")).unwrap();
        assert!(handle.wait_ready().await.is_err());
        assert_eq!(handle.state(), WorkerState::Failed);

        handle
            .send_envelope(event_wire("https://example.com", "p1"))
            .unwrap();
        assert!(recv_result(&mut results).await.is_none());
    }

    #[tokio::test]
    async fn test_terminate_closes_worker() {
        let (handle, _results) = spawn_test_worker(Arc::new(PageContentProcessor));
        let mut state_rx = handle.state_receiver();

        handle.terminate().await;

        state_rx
            .wait_for(|state| *state == WorkerState::Terminated)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_module_loader_resolves_registered_paths() {
        let loader = ModuleLoader::new();
        loader.register_module(
            "/dist/pageContents.worker.js",
            Arc::new(PageContentProcessor),
        );

        assert!(loader.load("/dist/pageContents.worker.js").is_ok());

        assert!(matches!(
            loader.load("/dist/missing.worker.js"),
            Err(DispatchError::WorkerSpawnFailure { .. })
        ));
    }
}
