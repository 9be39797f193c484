//! # Result Sinks
//!
//! Final consumers of worker results. A sink is a pure side-effecting
//! callback; nothing in the pipeline depends on what it does with a result,
//! and an external handoff failing never propagates back into dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::constants::NATIVE_PAYLOAD_DELIMITER;
use crate::envelope::{PageContent, ResultEnvelope};
use crate::native::NativeHost;

/// Consumer of result envelopes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn on_result(&self, result: &ResultEnvelope);
}

/// Sink that logs each result.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl ResultSink for LoggingSink {
    async fn on_result(&self, result: &ResultEnvelope) {
        info!(
            worker = %result.worker_name,
            url = %result.url,
            page_id = %result.page_id,
            "Page result received"
        );
    }
}

/// Sink that stores results in process memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<ResultEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far.
    pub fn results(&self) -> Vec<ResultEnvelope> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait (bounded) until at least `count` results have arrived, then
    /// return the snapshot. Intended for tests observing async delivery.
    pub async fn wait_for_results(&self, count: usize) -> Vec<ResultEnvelope> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let results = self.results();
            if results.len() >= count || Instant::now() >= deadline {
                return results;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn on_result(&self, result: &ResultEnvelope) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result.clone());
    }
}

/// Sink that forwards results to an external native host.
///
/// The `{url, title, textContent}` fields are joined into a single
/// delimiter-separated string and handed off fire-and-forget: the request
/// runs on its own task, and success or failure is only logged.
pub struct NativeHostSink {
    host: Arc<dyn NativeHost>,
}

impl NativeHostSink {
    pub fn new(host: Arc<dyn NativeHost>) -> Self {
        Self { host }
    }

    /// Build the delimiter-joined payload for one result.
    pub fn payload(result: &ResultEnvelope) -> String {
        // Results from content workers carry {title, textContent}; anything
        // else degrades to empty fields rather than failing the handoff.
        let content: PageContent =
            serde_json::from_value(result.data.clone()).unwrap_or_default();

        [
            result.url.as_str(),
            content.title.as_str(),
            content.text_content.as_str(),
        ]
        .join(NATIVE_PAYLOAD_DELIMITER)
    }
}

#[async_trait]
impl ResultSink for NativeHostSink {
    async fn on_result(&self, result: &ResultEnvelope) {
        let host = Arc::clone(&self.host);
        let payload = Self::payload(result);
        let url = result.url.clone();

        tokio::spawn(async move {
            match host.request(payload).await {
                Ok(response) => {
                    debug!(host = %host.name(), url = %url, response = %response, "External handoff complete");
                }
                Err(e) => {
                    error!(host = %host.name(), url = %url, error = %e, "External handoff failed");
                }
            }
        });
    }
}

/// Fan a result out to several sinks in order.
pub struct MultiSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for MultiSink {
    async fn on_result(&self, result: &ResultEnvelope) {
        for sink in &self.sinks {
            sink.on_result(result).await;
        }
    }
}
