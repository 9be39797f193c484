//! # Message Envelopes
//!
//! Wire types crossing the dispatch/worker boundary, as tagged unions with an
//! explicit discriminant validated at the boundary.
//!
//! ## Architecture
//!
//! Two directions, one envelope family each:
//! - **Dispatch → worker** ([`WorkerBound`]): an `init` envelope sent exactly
//!   once at startup, then zero or more page-event envelopes.
//! - **Worker → dispatch** ([`ResultEnvelope`]): one result per processed
//!   page event, correlated to the originating event by `url` and `pageId`.
//!
//! Wire field names keep the extension protocol's casing (`eventName`,
//! `listenerArguments`, `pageId`) so envelopes are byte-compatible with the
//! browser side. Every envelope carries a protocol `version` stamped at
//! encode time; decoding accepts envelopes without one for compatibility.
//!
//! Envelopes that do not match a recognized discriminant decode to a
//! [`DispatchError::MalformedEnvelope`], which callers log and drop; no error
//! is propagated and no reply is sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{INIT_ENVELOPE_TYPE, PROTOCOL_VERSION, TEXT_PARSED_EVENT};
use crate::error::{DispatchError, DispatchResult};

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

/// Nested content object carried by a parsed-page event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageContent {
    pub title: String,
    #[serde(rename = "textContent")]
    pub text_content: String,
}

/// Details delivered by the external page-event source for one parsed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextParsedDetails {
    pub url: String,
    #[serde(rename = "pageId")]
    pub page_id: String,
    pub content: PageContent,
}

impl TextParsedDetails {
    pub fn new(
        url: impl Into<String>,
        page_id: impl Into<String>,
        title: impl Into<String>,
        text_content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            page_id: page_id.into(),
            content: PageContent {
                title: title.into(),
                text_content: text_content.into(),
            },
        }
    }
}

/// Initialization envelope, sent exactly once and first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitEnvelope {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    pub args: Value,
}

/// Page-event envelope forwarded by the event bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "listenerArguments")]
    pub listener_arguments: Vec<Value>,
}

impl EventEnvelope {
    /// Build a text-parsed event envelope from source details.
    pub fn text_parsed(details: &TextParsedDetails) -> DispatchResult<Self> {
        let args = serde_json::to_value(details).map_err(|e| {
            DispatchError::malformed_envelope(format!("event serialization failed: {e}"))
        })?;

        Ok(Self {
            version: PROTOCOL_VERSION,
            event_name: TEXT_PARSED_EVENT.to_string(),
            listener_arguments: vec![args],
        })
    }

    /// Extract the text-parsed details from the ordered argument list.
    ///
    /// The source delivers `(textParsedDetails)` as the single listener
    /// argument; anything else is malformed.
    pub fn text_parsed_details(&self) -> DispatchResult<TextParsedDetails> {
        let first = self.listener_arguments.first().ok_or_else(|| {
            DispatchError::malformed_envelope("event envelope has no listener arguments")
        })?;

        serde_json::from_value(first.clone()).map_err(|e| {
            DispatchError::malformed_envelope(format!("invalid textParsedDetails: {e}"))
        })
    }
}

/// Envelope sent from the dispatch side into a worker context.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerBound {
    Init(InitEnvelope),
    PageEvent(EventEnvelope),
}

impl WorkerBound {
    /// Encode to the JSON wire form.
    ///
    /// Init envelopes carry a `type: "init"` discriminant; event envelopes
    /// are discriminated by the presence of `eventName`.
    pub fn to_wire(&self) -> DispatchResult<Value> {
        let value = match self {
            WorkerBound::Init(init) => {
                let mut value = serde_json::to_value(init).map_err(|e| {
                    DispatchError::malformed_envelope(format!("init serialization failed: {e}"))
                })?;
                value
                    .as_object_mut()
                    .ok_or_else(|| DispatchError::internal("init envelope is not an object"))?
                    .insert("type".to_string(), Value::String(INIT_ENVELOPE_TYPE.into()));
                value
            }
            WorkerBound::PageEvent(event) => serde_json::to_value(event).map_err(|e| {
                DispatchError::malformed_envelope(format!("event serialization failed: {e}"))
            })?,
        };

        Ok(value)
    }

    /// Decode from the JSON wire form, validating the discriminant.
    ///
    /// Unknown `type` tags and objects with no recognized discriminant are
    /// distinct `MalformedEnvelope` cases, reported to the caller for
    /// logging rather than passed through silently.
    pub fn from_wire(value: &Value) -> DispatchResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DispatchError::malformed_envelope("envelope is not an object"))?;

        if let Some(tag) = object.get("type") {
            let tag = tag
                .as_str()
                .ok_or_else(|| DispatchError::malformed_envelope("type tag is not a string"))?;

            if tag != INIT_ENVELOPE_TYPE {
                return Err(DispatchError::malformed_envelope(format!(
                    "unknown envelope tag: {tag}"
                )));
            }

            let init: InitEnvelope = serde_json::from_value(value.clone()).map_err(|e| {
                DispatchError::malformed_envelope(format!("invalid init envelope: {e}"))
            })?;
            return Ok(WorkerBound::Init(init));
        }

        if object.contains_key("eventName") {
            let event: EventEnvelope = serde_json::from_value(value.clone()).map_err(|e| {
                DispatchError::malformed_envelope(format!("invalid event envelope: {e}"))
            })?;
            return Ok(WorkerBound::PageEvent(event));
        }

        Err(DispatchError::malformed_envelope(
            "missing type/eventName discriminant",
        ))
    }
}

/// Result envelope sent from a worker context back to the dispatch side.
///
/// The `type` wire field carries the producing worker's registered name so
/// the dispatch side can identify which worker a result came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "type")]
    pub worker_name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub url: String,
    #[serde(rename = "pageId")]
    pub page_id: String,
    pub data: Value,
}

impl ResultEnvelope {
    pub fn new(
        worker_name: impl Into<String>,
        url: impl Into<String>,
        page_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            version: PROTOCOL_VERSION,
            url: url.into(),
            page_id: page_id.into(),
            data,
        }
    }
}
