//! # Protocol Constants
//!
//! Shared constants for the envelope protocol between the dispatch side and
//! worker contexts, and for the external native-messaging payload format.

/// Event name carried by page-event envelopes. Workers only process envelopes
/// whose `eventName` matches this value.
pub const TEXT_PARSED_EVENT: &str = "pageText.onTextParsed";

/// Discriminant value for initialization envelopes.
pub const INIT_ENVELOPE_TYPE: &str = "init";

/// Envelope protocol version, stamped on every envelope at encode time.
pub const PROTOCOL_VERSION: u32 = 1;

/// Delimiter used when joining result fields into the single string payload
/// handed to the external native host.
pub const NATIVE_PAYLOAD_DELIMITER: &str = "&&&&&";

/// Default name of the external native-messaging host.
pub const DEFAULT_NATIVE_HOST: &str = "save_page_data";

/// Match pattern that matches every URL.
pub const ALL_URLS: &str = "<all_urls>";
