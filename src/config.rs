//! # Dispatch Configuration
//!
//! Environment-aware configuration for the dispatch pipeline. Defaults cover
//! every knob; an optional `config/dispatch.{environment}.toml` file and
//! `PAGE_DISPATCH_*` environment variables override them, layered through the
//! `config` crate.
//!
//! ## Usage
//!
//! ```rust
//! use page_dispatch::config::DispatchConfig;
//!
//! let config = DispatchConfig::load().unwrap();
//! assert!(config.pre_init_buffer > 0);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_NATIVE_HOST;
use crate::error::{DispatchError, DispatchResult};

/// Tunables for the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the page-event source broadcast channel.
    pub event_buffer_size: usize,

    /// Maximum page events a worker buffers while waiting for its `init`
    /// envelope. Events past the cap are dropped with a log line.
    pub pre_init_buffer: usize,

    /// Per-event processing timeout inside a worker, in milliseconds.
    /// A timed-out event is reported and dropped; the worker stays live.
    pub processing_timeout_ms: u64,

    /// Name of the external native-messaging host.
    pub native_host: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            pre_init_buffer: 64,
            processing_timeout_ms: 30_000,
            native_host: DEFAULT_NATIVE_HOST.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration with environment auto-detection.
    pub fn load() -> DispatchResult<Self> {
        Self::load_for_environment(&detect_environment())
    }

    /// Load configuration for an explicit environment. Useful for tests
    /// without touching process-wide environment variables.
    pub fn load_for_environment(environment: &str) -> DispatchResult<Self> {
        let defaults = Self::default();

        let settings = config::Config::builder()
            .set_default("event_buffer_size", defaults.event_buffer_size as u64)
            .and_then(|b| b.set_default("pre_init_buffer", defaults.pre_init_buffer as u64))
            .and_then(|b| b.set_default("processing_timeout_ms", defaults.processing_timeout_ms))
            .and_then(|b| b.set_default("native_host", defaults.native_host.clone()))
            .map_err(|e| DispatchError::configuration(e.to_string()))?
            .add_source(
                config::File::with_name(&format!("config/dispatch.{environment}"))
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("PAGE_DISPATCH"))
            .build()
            .map_err(|e| DispatchError::configuration(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| DispatchError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would silently disable parts of the
    /// pipeline.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.event_buffer_size == 0 {
            return Err(DispatchError::configuration(
                "event_buffer_size must be greater than zero",
            ));
        }
        if self.pre_init_buffer == 0 {
            return Err(DispatchError::configuration(
                "pre_init_buffer must be greater than zero",
            ));
        }
        if self.processing_timeout_ms == 0 {
            return Err(DispatchError::configuration(
                "processing_timeout_ms must be greater than zero",
            ));
        }
        if self.native_host.is_empty() {
            return Err(DispatchError::configuration("native_host must be set"));
        }
        Ok(())
    }

    /// Processing timeout as a [`Duration`].
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }
}

/// Detect the current environment from environment variables.
pub fn detect_environment() -> String {
    std::env::var("PAGE_DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}
