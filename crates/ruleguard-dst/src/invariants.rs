//! Invariant checking for simulation runs
//!
//! Each invariant inspects, and may drive, a `Simulator`. Several of them
//! deliberately crash and restart the system or inject work, which is why
//! `Invariant::check` takes `&mut Simulator`.
//!
//! # TigerStyle
//!
//! - Every violation carries the seed and virtual time needed to replay it
//! - `check_all` never short-circuits; one run reports every broken property
//! - Fail-fast helpers (`check_invariant`, `must_hold`) for hard preconditions
//!
//! # Example
//!
//! ```rust,ignore
//! use ruleguard_dst::{InvariantChecker, Simulator};
//!
//! let mut sim = Simulator::new(12345);
//! let mut checker = InvariantChecker::with_default_invariants();
//!
//! sim.generate_rule()?;
//! if !checker.check_all(&mut sim) {
//!     panic!("{}", checker.report());
//! }
//! ```

use crate::simulation::Simulator;
use chrono::{DateTime, Utc};
use ruleguard_core::Rule;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Extra virtual time added past the trace timeout when waiting for completion
const TRACE_COMPLETION_SLACK_MS: u64 = 1_000;

// =============================================================================
// Core Types
// =============================================================================

/// A recorded invariant failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invariant '{name}' violated: {message} (seed: {seed}, time: {simulated_time})")]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub name: String,
    /// Human-readable description of the violation
    pub message: String,
    /// Virtual time when the check ran
    pub simulated_time: DateTime<Utc>,
    /// Seed of the run, to replay it
    pub seed: i64,
}

/// A property checked against a running simulator
pub trait Invariant: Send + Sync {
    /// Name used in reports
    fn name(&self) -> &str;

    /// Check the property; `Err` carries the violation message
    ///
    /// May drive `sim` (crash it, send spans, advance time).
    fn check(&self, sim: &mut Simulator) -> Result<(), String>;
}

/// Invariant backed by a closure
pub struct FnInvariant<F> {
    name: String,
    check: F,
}

impl<F> FnInvariant<F>
where
    F: Fn(&mut Simulator) -> Result<(), String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> Invariant for FnInvariant<F>
where
    F: Fn(&mut Simulator) -> Result<(), String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        (self.check)(sim)
    }
}

/// Ordered registry of invariants with an append-only violation log
#[derive(Default)]
pub struct InvariantChecker {
    invariants: Vec<Box<dyn Invariant>>,
    violations: Vec<InvariantViolation>,
    checks_run: u64,
}

impl InvariantChecker {
    /// Create a new empty invariant checker
    pub fn new() -> Self {
        Self::default()
    }

    /// Checker with the crash-safety invariants: persistence, no duplicates,
    /// atomic writes and idempotent recovery
    pub fn with_default_invariants() -> Self {
        Self::new()
            .with_invariant(RulePersistence)
            .with_invariant(NoDuplicateRules)
            .with_invariant(AtomicWrite)
            .with_invariant(IdempotentRecovery)
    }

    /// Checker with every built-in invariant
    pub fn with_all_invariants() -> Self {
        Self::with_default_invariants()
            .with_invariant(NoDataLossUnderFaults)
            .with_invariant(GracefulDegradation)
            .with_invariant(TraceCompletion)
            .with_invariant(NoSpanLoss)
            .with_invariant(DeterministicEvaluation)
            .with_invariant(SignatureIntegrity)
            .with_invariant(NoLeakedTimers)
            .with_invariant(BoundedTraceBuffer)
    }

    /// Add an invariant to the checker
    pub fn with_invariant(mut self, inv: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(inv));
        self
    }

    /// Register a closure as a named invariant
    pub fn register<F>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn(&mut Simulator) -> Result<(), String> + Send + Sync + 'static,
    {
        self.invariants.push(Box::new(FnInvariant::new(name, check)));
    }

    /// Run every invariant in registration order
    ///
    /// Returns true if all held. Failures are appended to `violations`.
    pub fn check_all(&mut self, sim: &mut Simulator) -> bool {
        let mut all_held = true;
        for inv in &self.invariants {
            self.checks_run += 1;
            if let Err(message) = inv.check(sim) {
                all_held = false;
                let violation = InvariantViolation {
                    name: inv.name().to_string(),
                    message,
                    simulated_time: sim.now(),
                    seed: sim.seed(),
                };
                tracing::warn!(
                    seed = violation.seed,
                    invariant = %violation.name,
                    message = %violation.message,
                    "Invariant violated"
                );
                self.violations.push(violation);
            }
        }
        all_held
    }

    /// Every violation recorded so far, oldest first
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Get the names of all registered invariants
    pub fn names(&self) -> Vec<&str> {
        self.invariants.iter().map(|i| i.name()).collect()
    }

    /// Get the number of registered invariants
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if the checker has no invariants
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Summary of checks run and every violation
    pub fn report(&self) -> String {
        let mut out = format!(
            "Invariant report: {} invariants, {} checks, {} passed, {} violations\n",
            self.invariants.len(),
            self.checks_run,
            self.checks_run - self.violations.len() as u64,
            self.violations.len()
        );
        for v in &self.violations {
            out.push_str(&format!(
                "  [{}] {}: {} (seed: {})\n",
                v.simulated_time.to_rfc3339(),
                v.name,
                v.message,
                v.seed
            ));
        }
        out
    }
}

impl fmt::Debug for InvariantChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvariantChecker")
            .field("invariants", &self.names())
            .field("violations", &self.violations.len())
            .finish()
    }
}

/// Check one invariant and panic if it fails
///
/// # Panics
///
/// Panics with the invariant name, message and seed on failure.
pub fn check_invariant(
    sim: &mut Simulator,
    name: &str,
    inv: impl FnOnce(&mut Simulator) -> Result<(), String>,
) {
    if let Err(message) = inv(sim) {
        panic!(
            "Invariant '{}' violated: {} (seed: {})",
            name,
            message,
            sim.seed()
        );
    }
}

/// Assert that an invariant holds at `context`, panicking if not
///
/// # Panics
///
/// Panics with the context, message and seed on failure.
pub fn must_hold(sim: &mut Simulator, inv: &dyn Invariant, context: &str) {
    if let Err(message) = inv.check(sim) {
        panic!(
            "Invariant violated in {}: {} (seed: {})",
            context,
            message,
            sim.seed()
        );
    }
}

fn by_id(rules: Vec<Rule>) -> BTreeMap<String, Rule> {
    rules.into_iter().map(|r| (r.id.clone(), r)).collect()
}

/// Compare two rule snapshots by ID and expression
fn compare_rules(before: &[Rule], after: &[Rule], phase: &str) -> Result<(), String> {
    let before = by_id(before.to_vec());
    let after = by_id(after.to_vec());

    if let Some(id) = before.keys().find(|id| !after.contains_key(*id)) {
        return Err(format!(
            "rule {} lost {} ({} before, {} after)",
            id,
            phase,
            before.len(),
            after.len()
        ));
    }
    for (id, rule) in &after {
        match before.get(id) {
            None => return Err(format!("rule {} appeared {}", id, phase)),
            Some(original) if original.expression != rule.expression => {
                return Err(format!(
                    "rule {} expression changed {}: {:?} -> {:?}",
                    id, phase, original.expression, rule.expression
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn wait_for_completion(sim: &mut Simulator) {
    let wait = sim.trace_timeout() + Duration::from_millis(TRACE_COMPLETION_SLACK_MS);
    sim.advance(wait);
}

/// Send a generated trace, returning its ID
fn submit_trace(sim: &mut Simulator, span_count: usize) -> Result<String, String> {
    let spans = sim.generate_trace(span_count);
    let trace_id = spans
        .first()
        .map(|s| s.trace_id.clone())
        .ok_or_else(|| "workload generated an empty trace".to_string())?;
    sim.send_trace(spans)
        .map_err(|e| format!("trace {} rejected: {}", trace_id, e))?;
    Ok(trace_id)
}

/// The workload can still produce and the pipeline still accept a trace
fn still_accepts_work(sim: &mut Simulator, context: &str) -> Result<(), String> {
    submit_trace(sim, 2)
        .map(|_| ())
        .map_err(|e| format!("{} ({})", context, e))
}

// =============================================================================
// Rule Store Invariants
// =============================================================================

/// Rules survive a crash and restart unchanged
///
/// Forces a crash. Fails on any ID lost or added, on a changed expression,
/// or if recovery itself errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RulePersistence;

impl Invariant for RulePersistence {
    fn name(&self) -> &str {
        "rule_persistence"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let before = sim.get_rules();
        sim.crash_and_restart()
            .map_err(|e| format!("crash recovery failed: {}", e))?;
        compare_rules(&before, &sim.get_rules(), "after crash")
    }
}

/// No two live rules share an ID
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDuplicateRules;

impl Invariant for NoDuplicateRules {
    fn name(&self) -> &str {
        "no_duplicate_rules"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for rule in sim.get_rules() {
            if !seen.insert(rule.id.clone()) {
                return Err(format!("duplicate rule id {}", rule.id));
            }
        }
        Ok(())
    }
}

/// The committed record either reads back as well-formed rules or errors
///
/// Re-reads the record through the faulty file system. An unreadable record
/// is acceptable; a readable one containing an empty ID or expression means a
/// torn write was accepted as valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicWrite;

impl Invariant for AtomicWrite {
    fn name(&self) -> &str {
        "atomic_writes"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let Ok(rules) = sim.stored_rules() else {
            return Ok(());
        };
        for rule in rules {
            if rule.id.is_empty() {
                return Err("rule with empty id readable from store".to_string());
            }
            if rule.expression.is_empty() {
                return Err(format!("rule {} has empty expression", rule.id));
            }
        }
        Ok(())
    }
}

/// Two back-to-back restarts recover the same rule set
///
/// Recovery must be a function of durable state only.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotentRecovery;

impl Invariant for IdempotentRecovery {
    fn name(&self) -> &str {
        "idempotent_recovery"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        sim.crash_and_restart()
            .map_err(|e| format!("first restart failed: {}", e))?;
        let first = sim.get_rules();
        sim.crash_and_restart()
            .map_err(|e| format!("second restart failed: {}", e))?;
        compare_rules(&first, &sim.get_rules(), "on second restart")
    }
}

/// Creating rules under faults never shrinks the live rule set
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDataLossUnderFaults;

/// Rules attempted by `NoDataLossUnderFaults`
pub const NO_DATA_LOSS_RULES_COUNT: usize = 10;

impl Invariant for NoDataLossUnderFaults {
    fn name(&self) -> &str {
        "no_data_loss_under_faults"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let before = sim.get_rules();
        for _ in 0..NO_DATA_LOSS_RULES_COUNT {
            let _ = sim.generate_rule();
        }
        let after = by_id(sim.get_rules());
        if after.len() < before.len() {
            return Err(format!(
                "rules lost: started with {}, ended with {}",
                before.len(),
                after.len()
            ));
        }
        if let Some(lost) = before.iter().find(|r| !after.contains_key(&r.id)) {
            return Err(format!("committed rule {} lost while creating rules", lost.id));
        }
        Ok(())
    }
}

/// After stress the store still holds rules and accepts new ones
#[derive(Debug, Clone, Copy, Default)]
pub struct GracefulDegradation;

impl Invariant for GracefulDegradation {
    fn name(&self) -> &str {
        "graceful_degradation"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        if sim.get_rules().is_empty() {
            return Err("no rules loaded; system stopped".to_string());
        }
        sim.create_rule("test-invariant-rule")
            .map(|_| ())
            .map_err(|e| format!("cannot create rules after stress: {}", e))
    }
}

// =============================================================================
// Trace Pipeline Invariants
// =============================================================================

/// A submitted trace completes once its quiet period elapses
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCompletion;

impl Invariant for TraceCompletion {
    fn name(&self) -> &str {
        "trace_completion"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let trace_id = submit_trace(sim, 3)?;
        wait_for_completion(sim);
        if sim.is_trace_buffered(&trace_id) {
            return Err(format!(
                "trace {} still buffered {}ms past its timeout",
                trace_id, TRACE_COMPLETION_SLACK_MS
            ));
        }
        still_accepts_work(sim, "pipeline stopped accepting traces")
    }
}

/// Every span of completed traces reaches processing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpanLoss;

impl Invariant for NoSpanLoss {
    fn name(&self) -> &str {
        "no_span_loss"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let processed_before = sim.stats().spans_processed;
        let mut trace_ids = Vec::new();
        let mut total_spans = 0u64;
        for i in 0..5 {
            trace_ids.push(submit_trace(sim, 3 + i)?);
            total_spans += 3 + i as u64;
        }

        wait_for_completion(sim);

        if let Some(id) = trace_ids.iter().find(|id| sim.is_trace_buffered(id)) {
            return Err(format!("trace {} never completed", id));
        }
        let processed = sim.stats().spans_processed - processed_before;
        if processed < total_spans {
            return Err(format!(
                "sent {} spans, only {} processed",
                total_spans, processed
            ));
        }
        still_accepts_work(sim, "pipeline stopped accepting traces after flush")
    }
}

/// Traces are not completed before their quiet period, with a rule present
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicEvaluation;

impl Invariant for DeterministicEvaluation {
    fn name(&self) -> &str {
        "deterministic_evaluation"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        sim.create_rule("span.duration > 100")
            .map_err(|e| format!("failed to create test rule: {}", e))?;

        let mut trace_ids = Vec::new();
        for _ in 0..3 {
            trace_ids.push(submit_trace(sim, 4)?);
        }

        let short = Duration::from_millis(100);
        if short < sim.trace_timeout() {
            sim.advance(short);
            if let Some(id) = trace_ids.iter().find(|id| !sim.is_trace_buffered(id)) {
                return Err(format!("trace {} completed before its timeout", id));
            }
        }
        still_accepts_work(sim, "pipeline unresponsive after evaluation")
    }
}

/// Rule creation still works after a batch of traces is processed
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureIntegrity;

impl Invariant for SignatureIntegrity {
    fn name(&self) -> &str {
        "signature_integrity"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        sim.create_rule("span.duration > 100")
            .map_err(|e| format!("failed to create test rule: {}", e))?;

        for _ in 0..5 {
            submit_trace(sim, 4)?;
        }
        sim.advance(Duration::from_millis(500));

        sim.create_rule("span.name == 'test'")
            .map(|_| ())
            .map_err(|e| format!("unresponsive after violation processing: {}", e))
    }
}

/// Every buffered trace has exactly one live completion path
///
/// A trace with no pending or queued completion would stay buffered forever;
/// a tracked timer with no trace behind it is a leak.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLeakedTimers;

impl Invariant for NoLeakedTimers {
    fn name(&self) -> &str {
        "no_leaked_timers"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        if let Some(id) = sim.traces_without_timer().first() {
            return Err(format!("trace {} buffered with no completion timer", id));
        }
        if let Some(id) = sim.timers_without_trace().first() {
            return Err(format!("completion timer for unbuffered trace {}", id));
        }
        Ok(())
    }
}

/// The trace buffer never exceeds its configured bound
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundedTraceBuffer;

impl Invariant for BoundedTraceBuffer {
    fn name(&self) -> &str {
        "bounded_trace_buffer"
    }

    fn check(&self, sim: &mut Simulator) -> Result<(), String> {
        let buffered = sim.buffered_traces();
        let max = sim.buffered_traces_max();
        if buffered > max {
            return Err(format!("{} traces buffered, max {}", buffered, max));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checker_collects_without_short_circuit() {
        let mut checker = InvariantChecker::new();
        checker.register("always_pass", |_| Ok(()));
        checker.register("always_fail", |_| Err("boom".to_string()));
        checker.register("fail_again", |_| Err("bang".to_string()));

        let mut sim = Simulator::new(12345);
        assert!(!checker.check_all(&mut sim));

        let names: Vec<&str> = checker.violations().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["always_fail", "fail_again"]);
        assert_eq!(checker.violations()[0].seed, 12345);
        assert_eq!(checker.violations()[0].simulated_time, sim.now());
    }

    #[test]
    fn test_violations_accumulate() {
        let mut checker = InvariantChecker::new();
        checker.register("fails", |_| Err("x".to_string()));
        let mut sim = Simulator::new(1);

        checker.check_all(&mut sim);
        checker.check_all(&mut sim);
        assert_eq!(checker.violations().len(), 2);
        assert!(checker.report().contains("2 checks, 0 passed, 2 violations"));
    }

    #[test]
    fn test_default_and_all_invariants() {
        let defaults = InvariantChecker::with_default_invariants();
        assert_eq!(
            defaults.names(),
            vec![
                "rule_persistence",
                "no_duplicate_rules",
                "atomic_writes",
                "idempotent_recovery"
            ]
        );
        assert_eq!(InvariantChecker::with_all_invariants().len(), 12);
        assert!(InvariantChecker::new().is_empty());
    }

    #[test]
    fn test_all_invariants_hold_without_faults() {
        let mut sim = Simulator::new(2024);
        for _ in 0..5 {
            sim.generate_rule().unwrap();
        }
        let mut checker = InvariantChecker::with_all_invariants();
        assert!(checker.check_all(&mut sim), "{}", checker.report());
    }

    #[test]
    fn test_violation_display_includes_seed() {
        let v = InvariantViolation {
            name: "x".into(),
            message: "broken".into(),
            simulated_time: DateTime::from_timestamp(0, 0).unwrap(),
            seed: 99,
        };
        let s = v.to_string();
        assert!(s.contains("Invariant 'x' violated: broken"));
        assert!(s.contains("seed: 99"));
    }

    #[test]
    fn test_check_invariant_passes() {
        let mut sim = Simulator::new(1);
        check_invariant(&mut sim, "no_duplicate_rules", |s| NoDuplicateRules.check(s));
        must_hold(&mut sim, &NoDuplicateRules, "startup");
    }

    #[test]
    #[should_panic(expected = "Invariant 'always_fail' violated: nope (seed: 31337)")]
    fn test_check_invariant_panics_with_seed() {
        let mut sim = Simulator::new(31337);
        check_invariant(&mut sim, "always_fail", |_| Err("nope".to_string()));
    }

    #[test]
    #[should_panic(expected = "Invariant violated in startup: no rules loaded")]
    fn test_must_hold_panics_with_context() {
        let mut sim = Simulator::new(5);
        must_hold(&mut sim, &GracefulDegradation, "startup");
    }

    #[test]
    fn test_graceful_degradation_needs_rules() {
        let mut sim = Simulator::new(5);
        assert!(GracefulDegradation.check(&mut sim).is_err());
        sim.create_rule("span.duration > 1").unwrap();
        assert!(GracefulDegradation.check(&mut sim).is_ok());
    }
}
