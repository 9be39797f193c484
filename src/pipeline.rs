//! # Dispatch Pipeline
//!
//! Composition root wiring the pieces together:
//! page-event source → event bridge (pattern filter) → worker registry
//! (named workers) → result listeners/sinks.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use page_dispatch::config::DispatchConfig;
//! use page_dispatch::envelope::TextParsedDetails;
//! use page_dispatch::patterns::MatchPatternSet;
//! use page_dispatch::pipeline::DispatchPipeline;
//! use page_dispatch::registry::sink_listener;
//! use page_dispatch::sink::MemorySink;
//! use page_dispatch::worker::{ModuleLoader, PageContentProcessor};
//!
//! # tokio_test::block_on(async {
//! let loader = Arc::new(ModuleLoader::new());
//! loader.register_module("/dist/pageContents.worker.js", Arc::new(PageContentProcessor));
//!
//! let pipeline = DispatchPipeline::new(DispatchConfig::default(), loader);
//! let sink = Arc::new(MemorySink::new());
//!
//! let handle = pipeline
//!     .register_worker(
//!         "/dist/pageContents.worker.js",
//!         MatchPatternSet::all_urls(),
//!         "page-content",
//!         serde_json::json!({}),
//!         sink_listener(sink.clone()),
//!     )
//!     .unwrap();
//! handle.wait_ready().await.unwrap();
//!
//! pipeline.emit(TextParsedDetails::new(
//!     "https://example.com", "p1", "Example", "hello",
//! ));
//! assert_eq!(sink.wait_for_results(1).await.len(), 1);
//! # });
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::{EventBridge, PageEventSource};
use crate::config::DispatchConfig;
use crate::envelope::TextParsedDetails;
use crate::error::DispatchResult;
use crate::patterns::MatchPatternSet;
use crate::registry::{RegistrationHandle, ResultListener, WorkerRegistry};
use crate::worker::WorkerLoader;

/// The assembled event-to-worker dispatch pipeline.
pub struct DispatchPipeline {
    registry: WorkerRegistry,
    bridge: EventBridge,
    source: PageEventSource,
    pump: JoinHandle<()>,
}

impl DispatchPipeline {
    /// Assemble a pipeline from configuration and a worker module loader.
    pub fn new(config: DispatchConfig, loader: Arc<dyn WorkerLoader>) -> Self {
        let bridge = EventBridge::new();
        let source = PageEventSource::new(config.event_buffer_size);
        let pump = bridge.attach_source(source.subscribe());
        let registry = WorkerRegistry::new(bridge.clone(), loader, config);

        info!("Dispatch pipeline assembled");

        Self {
            registry,
            bridge,
            source,
            pump,
        }
    }

    /// Register a named worker; see [`WorkerRegistry::register`].
    pub fn register_worker(
        &self,
        path: impl Into<String>,
        patterns: MatchPatternSet,
        name: impl Into<String>,
        init_data: Value,
        listener: ResultListener,
    ) -> DispatchResult<RegistrationHandle> {
        self.registry.register(path, patterns, name, init_data, listener)
    }

    /// Tear down one worker; see [`WorkerRegistry::unregister`].
    pub async fn unregister_worker(&self, name: &str) -> DispatchResult<bool> {
        self.registry.unregister(name).await
    }

    /// Feed one parsed-page event into the pipeline, as the external
    /// instrumentation layer would.
    pub fn emit(&self, details: TextParsedDetails) {
        self.source.emit(details);
    }

    /// Handle to the page-event source, for wiring an external producer.
    pub fn source(&self) -> PageEventSource {
        self.source.clone()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    /// Tear everything down: all registrations, then the source pump.
    pub async fn shutdown(self) -> DispatchResult<()> {
        self.registry.shutdown().await?;
        drop(self.source);
        // External producers may still hold source clones; stop the pump
        // rather than waiting for every sender to drop.
        self.pump.abort();
        if let Err(e) = self.pump.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Source pump ended abnormally");
            }
        }
        info!("Dispatch pipeline shut down");
        Ok(())
    }
}
