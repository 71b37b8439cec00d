//! Ruleguard Core
//!
//! Core types, errors, storage and trace buffering for Ruleguard, a
//! behavioral rule engine for distributed traces.
//!
//! # Overview
//!
//! - `Rule` / `Span`: the data the engine manages and evaluates
//! - `FileSystem`: the only path to disk, so simulation can swap it out
//! - `DiskRuleStore`: crash-safe rule persistence over a `FileSystem`
//! - `TraceBuffer`: groups spans into traces until they go quiet
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `TRACE_SPANS_COUNT_MAX`)
//! - No ambient I/O: disk goes through `FileSystem`

pub mod config;
pub mod constants;
pub mod error;
pub mod fs;
pub mod rule;
pub mod rule_store;
pub mod span;
pub mod telemetry;
pub mod trace_buffer;

pub use config::{RuleguardConfig, StorageConfig, TraceConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use fs::{FileInfo, FileSystem, MemFileSystem, StdFileSystem};
pub use rule::{Rule, Severity};
pub use rule_store::{decode_record, encode_record, DiskRuleStore, RuleStore};
pub use span::Span;
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use trace_buffer::{BufferedTrace, SpanAdded, TraceBuffer};
