//! Configuration for Ruleguard
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for Ruleguard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleguardConfig {
    /// Rule storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Trace buffering configuration
    #[serde(default)]
    pub trace: TraceConfig,
}

impl RuleguardConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.trace.validate()?;
        Ok(())
    }
}

/// Rule storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the rule record
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Permission bits for rule files
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(STORAGE_DATA_DIR_DEFAULT)
}

fn default_file_mode() -> u32 {
    STORAGE_FILE_MODE_DEFAULT
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_mode: default_file_mode(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "storage.data_dir".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.file_mode > 0o7777 {
            return Err(Error::InvalidConfiguration {
                field: "storage.file_mode".into(),
                reason: format!("{:o} is not a permission mode", self.file_mode),
            });
        }
        Ok(())
    }
}

/// Trace buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Quiet period after the last span before a trace completes (milliseconds)
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    /// Maximum traces buffered awaiting completion
    #[serde(default = "default_buffered_traces_max")]
    pub buffered_traces_max: usize,

    /// Maximum spans per trace
    #[serde(default = "default_spans_per_trace_max")]
    pub spans_per_trace_max: usize,
}

fn default_completion_timeout_ms() -> u64 {
    TRACE_COMPLETION_TIMEOUT_MS_DEFAULT
}

fn default_buffered_traces_max() -> usize {
    TRACE_BUFFERED_COUNT_MAX
}

fn default_spans_per_trace_max() -> usize {
    TRACE_SPANS_COUNT_MAX
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: default_completion_timeout_ms(),
            buffered_traces_max: default_buffered_traces_max(),
            spans_per_trace_max: default_spans_per_trace_max(),
        }
    }
}

impl TraceConfig {
    fn validate(&self) -> Result<()> {
        if self.completion_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "trace.completion_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.buffered_traces_max == 0 || self.buffered_traces_max > TRACE_BUFFERED_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "trace.buffered_traces_max".into(),
                reason: format!("must be in 1..={}", TRACE_BUFFERED_COUNT_MAX),
            });
        }
        if self.spans_per_trace_max == 0 || self.spans_per_trace_max > TRACE_SPANS_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "trace.spans_per_trace_max".into(),
                reason: format!("must be in 1..={}", TRACE_SPANS_COUNT_MAX),
            });
        }
        Ok(())
    }
}
