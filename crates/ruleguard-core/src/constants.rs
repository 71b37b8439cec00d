//! TigerStyle constants for Ruleguard
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Rule Limits
// =============================================================================

/// Maximum length of a rule expression in bytes
pub const RULE_EXPRESSION_LENGTH_BYTES_MAX: usize = 4 * 1024;

/// Maximum length of a rule name in bytes
pub const RULE_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Maximum number of rules held by a single store
pub const RULE_STORE_RULES_COUNT_MAX: usize = 100_000;

// =============================================================================
// Storage
// =============================================================================

/// Default directory holding the durable rule record
pub const STORAGE_DATA_DIR_DEFAULT: &str = "/var/lib/ruleguard";

/// File name of the committed rule record
pub const RULES_FILE_NAME: &str = "rules.json";

/// File name of the in-flight rule record, renamed over `RULES_FILE_NAME` on commit
pub const RULES_TMP_FILE_NAME: &str = "rules.json.tmp";

/// Default permission bits for rule files
pub const STORAGE_FILE_MODE_DEFAULT: u32 = 0o644;

/// Default permission bits for the data directory
pub const STORAGE_DIR_MODE_DEFAULT: u32 = 0o755;

/// Maximum size of the durable rule record in bytes (64 MB)
pub const RULES_FILE_SIZE_BYTES_MAX: usize = 64 * 1024 * 1024;

// =============================================================================
// Trace Buffering
// =============================================================================

/// Quiet period after the last span before a trace is considered complete (5 sec)
pub const TRACE_COMPLETION_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Maximum number of traces buffered awaiting completion
pub const TRACE_BUFFERED_COUNT_MAX: usize = 10_000;

/// Maximum number of spans accepted for a single trace
pub const TRACE_SPANS_COUNT_MAX: usize = 1_000;

/// Maximum length of a trace ID in bytes
pub const TRACE_ID_LENGTH_BYTES_MAX: usize = 128;

// Compile-time assertions for constant validity
const _: () = {
    assert!(RULE_EXPRESSION_LENGTH_BYTES_MAX >= RULE_NAME_LENGTH_BYTES_MAX);
    assert!(RULES_FILE_SIZE_BYTES_MAX <= 100 * 1024 * 1024); // <= 100 MB
    assert!(TRACE_COMPLETION_TIMEOUT_MS_DEFAULT >= 1000);
    assert!(TRACE_SPANS_COUNT_MAX <= TRACE_BUFFERED_COUNT_MAX);
    assert!(STORAGE_FILE_MODE_DEFAULT <= 0o777);
};
