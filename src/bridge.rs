//! # Event Bridge
//!
//! Pattern-filtered subscription layer between the external page-event
//! source and worker contexts. The bridge does not interpret event contents;
//! it filters by URL match pattern and repackages the event's arguments into
//! a page-event envelope.
//!
//! Subscriptions with overlapping pattern sets each receive their own copy
//! of a matching event (fan-out, not exclusive routing). Delivery to a
//! single worker is FIFO in source order; there is no ordering guarantee
//! across workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::{EventEnvelope, TextParsedDetails, WorkerBound};
use crate::error::{DispatchError, DispatchResult};
use crate::patterns::MatchPatternSet;
use uuid::Uuid;

/// Identifier of one bridge subscription, used for teardown.
pub type SubscriptionId = Uuid;

struct Subscription {
    worker_name: String,
    patterns: MatchPatternSet,
    forward: mpsc::UnboundedSender<Value>,
}

/// Fan-out router from page events to subscribed workers.
#[derive(Clone, Default)]
pub struct EventBridge {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a worker's inbound channel to events matching the pattern
    /// set.
    pub fn subscribe(
        &self,
        worker_name: impl Into<String>,
        patterns: MatchPatternSet,
        forward: mpsc::UnboundedSender<Value>,
    ) -> DispatchResult<SubscriptionId> {
        if patterns.is_empty() {
            return Err(DispatchError::invalid_pattern(
                "",
                "match pattern set must be non-empty",
            ));
        }

        let worker_name = worker_name.into();
        let id = Uuid::new_v4();
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|e| DispatchError::internal(format!("subscriptions lock poisoned: {e}")))?;

        subscriptions.insert(
            id,
            Subscription {
                worker_name: worker_name.clone(),
                patterns,
                forward,
            },
        );

        info!(worker = %worker_name, subscription_id = %id, "Event bridge subscription added");
        Ok(id)
    }

    /// Remove a subscription. Returns whether one was present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> DispatchResult<bool> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|e| DispatchError::internal(format!("subscriptions lock poisoned: {e}")))?;

        let removed = subscriptions.remove(&id);
        if let Some(subscription) = &removed {
            info!(
                worker = %subscription.worker_name,
                subscription_id = %id,
                "Event bridge subscription removed"
            );
        }
        Ok(removed.is_some())
    }

    /// Route one parsed-page event to every subscription whose pattern set
    /// matches its URL. Returns the number of workers the event was
    /// forwarded to.
    pub fn dispatch(&self, details: &TextParsedDetails) -> DispatchResult<usize> {
        let envelope = EventEnvelope::text_parsed(details)?;
        let wire = WorkerBound::PageEvent(envelope).to_wire()?;

        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|e| DispatchError::internal(format!("subscriptions lock poisoned: {e}")))?;

        let mut delivered = 0;
        for subscription in subscriptions.values() {
            if !subscription.patterns.matches(&details.url) {
                continue;
            }

            // Each matching worker gets its own copy.
            if subscription.forward.send(wire.clone()).is_err() {
                warn!(
                    worker = %subscription.worker_name,
                    url = %details.url,
                    "Worker channel closed, event not delivered"
                );
                continue;
            }
            delivered += 1;
        }

        debug!(
            url = %details.url,
            page_id = %details.page_id,
            delivered = delivered,
            "Page event dispatched"
        );
        Ok(delivered)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Pump events from an attached source into the bridge until the source
    /// closes.
    pub fn attach_source(&self, mut events: broadcast::Receiver<TextParsedDetails>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(details) => {
                        if let Err(e) = bridge.dispatch(&details) {
                            warn!(error = %e, "Failed to dispatch page event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Page event source overran the bridge");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Page event source closed, bridge pump ending");
        })
    }
}

/// Handle to the external page-event source.
///
/// The instrumentation layer (or a test) pushes parsed-page details in; the
/// bridge consumes them via [`EventBridge::attach_source`].
#[derive(Clone)]
pub struct PageEventSource {
    sender: broadcast::Sender<TextParsedDetails>,
}

impl PageEventSource {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit one parsed-page event. Returns the number of attached consumers.
    pub fn emit(&self, details: TextParsedDetails) -> usize {
        self.sender.send(details).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TextParsedDetails> {
        self.sender.subscribe()
    }
}
