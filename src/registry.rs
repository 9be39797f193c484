//! # Worker Registry
//!
//! Owns the name → worker mapping for the dispatch pipeline. Registration
//! spawns the worker context, sends it the `init` envelope first, installs
//! the result pump that invokes the registration's listener, and subscribes
//! the worker to the event bridge. Teardown reverses all of it.
//!
//! ## Guarantees
//!
//! - Names are unique among live registrations; a duplicate fails with
//!   `DuplicateRegistration` and leaves the registry unchanged.
//! - A loader failure fails with `WorkerSpawnFailure` and leaves no partial
//!   registration behind.
//! - The `init` envelope is enqueued before the worker's bridge subscription
//!   exists, so it is always first on the worker's channel. An event
//!   dispatched asynchronously from a very early page load can still arrive
//!   before the worker has applied `init`; the worker buffers those (see
//!   [`crate::worker`]).
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use page_dispatch::bridge::EventBridge;
//! use page_dispatch::config::DispatchConfig;
//! use page_dispatch::patterns::MatchPatternSet;
//! use page_dispatch::registry::{sink_listener, WorkerRegistry};
//! use page_dispatch::sink::MemorySink;
//! use page_dispatch::worker::{ModuleLoader, PageContentProcessor};
//!
//! # tokio_test::block_on(async {
//! let loader = Arc::new(ModuleLoader::new());
//! loader.register_module("/dist/pageContents.worker.js", Arc::new(PageContentProcessor));
//!
//! let registry = WorkerRegistry::new(EventBridge::new(), loader, DispatchConfig::default());
//! let sink = Arc::new(MemorySink::new());
//!
//! let handle = registry
//!     .register(
//!         "/dist/pageContents.worker.js",
//!         MatchPatternSet::all_urls(),
//!         "page-content",
//!         serde_json::json!({}),
//!         sink_listener(sink),
//!     )
//!     .unwrap();
//! handle.wait_ready().await.unwrap();
//! assert!(registry.contains("page-content"));
//! # });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::{EventBridge, SubscriptionId};
use crate::config::DispatchConfig;
use crate::constants::PROTOCOL_VERSION;
use crate::envelope::{InitEnvelope, ResultEnvelope, WorkerBound};
use crate::error::{DispatchError, DispatchResult};
use crate::patterns::MatchPatternSet;
use crate::sink::ResultSink;
use crate::worker::{spawn_worker, WorkerHandle, WorkerLoader, WorkerState};

/// Listener invoked on the dispatch side with each result envelope from a
/// worker.
pub type ResultListener =
    Arc<dyn Fn(ResultEnvelope) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Adapt a [`ResultSink`] into a [`ResultListener`].
pub fn sink_listener(sink: Arc<dyn ResultSink>) -> ResultListener {
    Arc::new(move |result| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.on_result(&result).await;
        })
    })
}

/// One live registration: the owned worker handle plus everything needed to
/// tear it down.
struct WorkerRegistration {
    id: Uuid,
    name: String,
    path: String,
    patterns: MatchPatternSet,
    registered_at: DateTime<Utc>,
    subscription: SubscriptionId,
    handle: WorkerHandle,
    pump: JoinHandle<()>,
}

/// Caller-facing handle returned by [`WorkerRegistry::register`].
#[derive(Debug, Clone)]
pub struct RegistrationHandle {
    id: Uuid,
    name: String,
    state_rx: watch::Receiver<WorkerState>,
}

impl RegistrationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state of the registered worker.
    pub fn worker_state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Wait until the worker acknowledges readiness.
    pub async fn wait_ready(&self) -> DispatchResult<()> {
        let mut state_rx = self.state_rx.clone();
        let state = state_rx
            .wait_for(|state| *state != WorkerState::Spawning)
            .await
            .map_err(|_| DispatchError::channel_closed(format!("worker:{}", self.name)))?;

        match *state {
            WorkerState::Ready => Ok(()),
            WorkerState::Failed => Err(DispatchError::worker_runtime(
                &self.name,
                "worker failed during initialization",
            )),
            _ => Err(DispatchError::channel_closed(format!(
                "worker:{}",
                self.name
            ))),
        }
    }
}

/// Diagnostic snapshot of one registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationInfo {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub patterns: MatchPatternSet,
    pub registered_at: DateTime<Utc>,
    pub state: WorkerState,
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub ready_workers: usize,
    pub names: Vec<String>,
}

/// Registry of named worker contexts.
pub struct WorkerRegistry {
    registrations: Arc<RwLock<HashMap<String, WorkerRegistration>>>,
    bridge: EventBridge,
    loader: Arc<dyn WorkerLoader>,
    config: DispatchConfig,
}

impl WorkerRegistry {
    pub fn new(bridge: EventBridge, loader: Arc<dyn WorkerLoader>, config: DispatchConfig) -> Self {
        info!("Creating new WorkerRegistry");
        Self {
            registrations: Arc::new(RwLock::new(HashMap::new())),
            bridge,
            loader,
            config,
        }
    }

    /// Register a worker to run on pages matching the pattern set and report
    /// results to the listener.
    ///
    /// Spawns the worker context, synchronously enqueues its `init` envelope
    /// (guaranteed first on the channel), installs the result pump, and
    /// subscribes the worker to the event bridge.
    pub fn register(
        &self,
        path: impl Into<String>,
        patterns: MatchPatternSet,
        name: impl Into<String>,
        init_data: Value,
        listener: ResultListener,
    ) -> DispatchResult<RegistrationHandle> {
        let path = path.into();
        let name = name.into();

        if patterns.is_empty() {
            return Err(DispatchError::invalid_pattern(
                "",
                "match pattern set must be non-empty",
            ));
        }

        let mut registrations = self
            .registrations
            .write()
            .map_err(|e| DispatchError::internal(format!("registrations lock poisoned: {e}")))?;

        if registrations.contains_key(&name) {
            return Err(DispatchError::duplicate_registration(&name));
        }

        // Resolve the module before touching any state, so a load failure
        // leaves no partial registration behind.
        let processor = self.loader.load(&path)?;

        let (handle, mut results) = spawn_worker(
            name.as_str(),
            processor,
            self.config.pre_init_buffer,
            self.config.processing_timeout(),
        );

        let init_wire = WorkerBound::Init(InitEnvelope {
            version: PROTOCOL_VERSION,
            name: name.clone(),
            args: init_data,
        })
        .to_wire()?;
        handle.send_envelope(init_wire)?;

        let pump_name = name.clone();
        let pump = tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                listener(result).await;
            }
            tracing::debug!(worker = %pump_name, "Result pump ended");
        });

        let subscription =
            self.bridge
                .subscribe(name.as_str(), patterns.clone(), handle.forward_sender())?;

        let id = Uuid::new_v4();
        let registration_handle = RegistrationHandle {
            id,
            name: name.clone(),
            state_rx: handle.state_receiver(),
        };

        registrations.insert(
            name.clone(),
            WorkerRegistration {
                id,
                name: name.clone(),
                path: path.clone(),
                patterns,
                registered_at: Utc::now(),
                subscription,
                handle,
                pump,
            },
        );

        info!(worker = %name, path = %path, registration_id = %id, "Worker registered");
        Ok(registration_handle)
    }

    /// Tear down a registration: unsubscribe it from the bridge, terminate
    /// its worker context, and stop the result pump. Returns whether a
    /// registration was present.
    pub async fn unregister(&self, name: &str) -> DispatchResult<bool> {
        let registration = {
            let mut registrations = self.registrations.write().map_err(|e| {
                DispatchError::internal(format!("registrations lock poisoned: {e}"))
            })?;
            registrations.remove(name)
        };

        let Some(registration) = registration else {
            warn!(worker = %name, "Worker not found for unregister");
            return Ok(false);
        };

        self.bridge.unsubscribe(registration.subscription)?;
        registration.handle.terminate().await;
        if let Err(e) = registration.pump.await {
            warn!(worker = %name, error = %e, "Result pump ended abnormally");
        }

        info!(worker = %name, "Worker unregistered");
        Ok(true)
    }

    /// Tear down every registration.
    pub async fn shutdown(&self) -> DispatchResult<()> {
        let names: Vec<String> = {
            let registrations = self.registrations.read().map_err(|e| {
                DispatchError::internal(format!("registrations lock poisoned: {e}"))
            })?;
            registrations.keys().cloned().collect()
        };

        for name in names {
            self.unregister(&name).await?;
        }
        Ok(())
    }

    /// Whether a worker with this name is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.registrations
            .read()
            .map(|r| r.contains_key(name))
            .unwrap_or(false)
    }

    /// Diagnostic snapshot of one registration, or `None` if no worker with
    /// this name is registered.
    pub fn info(&self, name: &str) -> Option<RegistrationInfo> {
        let registrations = self.registrations.read().ok()?;
        let registration = registrations.get(name)?;

        Some(RegistrationInfo {
            id: registration.id,
            name: registration.name.clone(),
            path: registration.path.clone(),
            patterns: registration.patterns.clone(),
            registered_at: registration.registered_at,
            state: registration.handle.state(),
        })
    }

    /// Registry statistics.
    pub fn stats(&self) -> DispatchResult<RegistryStats> {
        let registrations = self
            .registrations
            .read()
            .map_err(|e| DispatchError::internal(format!("registrations lock poisoned: {e}")))?;

        let mut names: Vec<String> = registrations.keys().cloned().collect();
        names.sort();

        Ok(RegistryStats {
            total_workers: registrations.len(),
            ready_workers: registrations
                .values()
                .filter(|r| r.handle.state() == WorkerState::Ready)
                .count(),
            names,
        })
    }
}
