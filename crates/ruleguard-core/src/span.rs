//! Span model
//!
//! A span is one timed operation inside a distributed trace.

use crate::constants::TRACE_ID_LENGTH_BYTES_MAX;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single span of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub service: String,
    pub name: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Span {
    /// Create a root span with no attributes
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            service: service.into(),
            name: name.into(),
            start_ms: 0,
            duration_ms: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    pub fn with_timing(mut self, start_ms: u64, duration_ms: u64) -> Self {
        self.start_ms = start_ms;
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Check the span can be buffered
    pub fn validate(&self) -> Result<()> {
        if self.trace_id.is_empty() {
            return Err(Error::InvalidSpan {
                trace_id: self.trace_id.clone(),
                reason: "trace_id must not be empty".into(),
            });
        }
        if self.trace_id.len() > TRACE_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidSpan {
                trace_id: self.trace_id.clone(),
                reason: format!("trace_id exceeds {} bytes", TRACE_ID_LENGTH_BYTES_MAX),
            });
        }
        if self.span_id.is_empty() {
            return Err(Error::InvalidSpan {
                trace_id: self.trace_id.clone(),
                reason: "span_id must not be empty".into(),
            });
        }
        Ok(())
    }
}
