#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Page Dispatch
//!
//! Event-to-worker dispatch pipeline for browser page instrumentation.
//!
//! ## Overview
//!
//! The pipeline observes page-load events from an external instrumentation
//! layer, forwards extracted page text to one or more isolated worker tasks
//! for processing (classification or content extraction), and routes each
//! worker's result back to a sink: console, in-process storage, or an
//! external native-messaging host.
//!
//! ## Architecture
//!
//! Control flow, leaves first:
//!
//! - [`envelope`] - the message envelope protocol crossing the
//!   dispatch/worker boundary
//! - [`patterns`] - URL match patterns filtering which pages reach a worker
//! - [`worker`] - the worker context runtime and its lifecycle state machine
//! - [`bridge`] - pattern-filtered fan-out from the page-event source
//! - [`registry`] - named worker registration, routing, and teardown
//! - [`sink`] - result consumers, including the native host handoff
//! - [`pipeline`] - composition root wiring all of the above
//!
//! Workers share no memory with the dispatch side; communication is
//! exclusively asynchronous message passing over per-worker FIFO channels.
//! Registration-time failures surface to the caller, runtime failures are
//! logged and the affected page event dropped, never crashing the pipeline.
//!
//! ## Quick Start
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
//!         MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
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
//!
//! let results = sink.wait_for_results(1).await;
//! assert_eq!(results[0].worker_name, "page-content");
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod native;
pub mod patterns;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod worker;

pub use bridge::{EventBridge, PageEventSource, SubscriptionId};
pub use config::DispatchConfig;
pub use envelope::{
    EventEnvelope, InitEnvelope, PageContent, ResultEnvelope, TextParsedDetails, WorkerBound,
};
pub use error::{DispatchError, DispatchResult};
pub use native::{FramedNativeHost, NativeHost};
pub use patterns::{MatchPattern, MatchPatternSet};
pub use pipeline::DispatchPipeline;
pub use registry::{
    sink_listener, RegistrationHandle, RegistrationInfo, RegistryStats, ResultListener,
    WorkerRegistry,
};
pub use sink::{LoggingSink, MemorySink, MultiSink, NativeHostSink, ResultSink};
pub use worker::{
    spawn_worker, ModuleLoader, PageContentProcessor, PageProcessor, WorkerHandle, WorkerLoader,
    WorkerState,
};
