//! Trace buffering
//!
//! TigerStyle: Bounded buffers, explicit completion.
//!
//! Spans arrive out of order and a trace has no end marker, so a trace is
//! complete once no span for it has arrived for a quiet period. The buffer
//! only tracks activity; whoever owns the clock decides when that period has
//! elapsed and calls `take`.

use crate::error::{Error, Result};
use crate::span::Span;
use std::collections::BTreeMap;

/// Spans collected for one trace
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedTrace {
    pub trace_id: String,
    pub spans: Vec<Span>,
    pub first_seen_ms: u64,
    pub last_activity_ms: u64,
}

/// Outcome of buffering one span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanAdded {
    /// First span of a trace
    NewTrace,
    /// Appended to an existing trace
    Appended,
}

/// Buffer of incomplete traces keyed by trace ID
#[derive(Debug)]
pub struct TraceBuffer {
    traces: BTreeMap<String, BufferedTrace>,
    traces_count_max: usize,
    spans_per_trace_max: usize,
    spans_count: usize,
}

impl TraceBuffer {
    pub fn new(traces_count_max: usize, spans_per_trace_max: usize) -> Self {
        assert!(traces_count_max > 0, "traces_count_max must be positive");
        assert!(spans_per_trace_max > 0, "spans_per_trace_max must be positive");
        Self {
            traces: BTreeMap::new(),
            traces_count_max,
            spans_per_trace_max,
            spans_count: 0,
        }
    }

    /// Buffer a span observed at `now_ms`
    pub fn add_span(&mut self, span: Span, now_ms: u64) -> Result<SpanAdded> {
        span.validate()?;

        if let Some(trace) = self.traces.get_mut(&span.trace_id) {
            if trace.spans.len() >= self.spans_per_trace_max {
                return Err(Error::InvalidSpan {
                    trace_id: span.trace_id,
                    reason: format!("trace already holds {} spans", self.spans_per_trace_max),
                });
            }
            trace.last_activity_ms = now_ms;
            trace.spans.push(span);
            self.spans_count += 1;
            return Ok(SpanAdded::Appended);
        }

        if self.traces.len() >= self.traces_count_max {
            return Err(Error::TraceBufferFull {
                count: self.traces.len(),
                max: self.traces_count_max,
            });
        }

        let trace_id = span.trace_id.clone();
        self.traces.insert(
            trace_id.clone(),
            BufferedTrace {
                trace_id,
                spans: vec![span],
                first_seen_ms: now_ms,
                last_activity_ms: now_ms,
            },
        );
        self.spans_count += 1;
        Ok(SpanAdded::NewTrace)
    }

    /// Remove a trace for processing
    pub fn take(&mut self, trace_id: &str) -> Option<BufferedTrace> {
        let trace = self.traces.remove(trace_id)?;
        self.spans_count -= trace.spans.len();
        Some(trace)
    }

    pub fn contains(&self, trace_id: &str) -> bool {
        self.traces.contains_key(trace_id)
    }

    /// Last time a span arrived for `trace_id`
    pub fn last_activity_ms(&self, trace_id: &str) -> Option<u64> {
        self.traces.get(trace_id).map(|t| t.last_activity_ms)
    }

    /// Number of buffered traces
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Number of buffered spans across all traces
    pub fn spans_count(&self) -> usize {
        self.spans_count
    }

    pub fn traces_count_max(&self) -> usize {
        self.traces_count_max
    }

    /// Buffered trace IDs, sorted
    pub fn trace_ids(&self) -> Vec<String> {
        self.traces.keys().cloned().collect()
    }

    /// Drop everything, as a crash would
    pub fn clear(&mut self) {
        self.traces.clear();
        self.spans_count = 0;
    }
}
