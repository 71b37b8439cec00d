//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! A `Simulator` owns one seeded RNG, one virtual clock and one fault
//! injector, and wires them into the system under test: a `DiskRuleStore`
//! writing through a fault-injecting in-memory file system, and a
//! `TraceBuffer` whose completion timers live on the virtual clock.
//!
//! Timer callbacks only enqueue completed trace IDs. The simulator drains
//! that queue after the clock returns, so all processing stays on the
//! caller's thread and in deadline order.

use crate::clock::{duration_ms, TimerHandle, VirtualClock};
use crate::fault::{FaultInjector, FaultProfile};
use crate::rng::{seed_from_env_or_random, DeterministicRng};
use crate::storage::FaultyFileSystem;
use crate::workload::{SimWorkload, WorkloadGenerator, WorkloadProfile};
use chrono::{DateTime, Utc};
use ruleguard_core::{
    decode_record, DiskRuleStore, Error, FileSystem, MemFileSystem, Result, Rule, RuleStore,
    RuleguardConfig, Severity, Span, TraceBuffer, RULES_FILE_NAME,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Maximum virtual time a single `run` may cover (24 hours)
pub const SIM_RUN_TIME_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Maximum spans in one generated trace
pub const SIM_TRACE_SPANS_COUNT_MAX: u64 = 256;

/// Data directory used inside the simulated file system
pub const SIM_DATA_DIR_DEFAULT: &str = "/sim/ruleguard";

/// The decorated file system every simulator writes through
pub type SimFileSystem = FaultyFileSystem<Arc<MemFileSystem>>;

/// The rule store as wired by the simulator
pub type SimRuleStore = DiskRuleStore<Arc<SimFileSystem>>;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: i64,
    /// Virtual time at construction in milliseconds since epoch
    pub start_time_ms: u64,
    /// Profile applied to the injector; `None` keeps its defaults
    pub fault_profile: Option<FaultProfile>,
    /// Whether faults are injected from the start
    pub faults_enabled: bool,
    /// System-under-test configuration
    pub app: RuleguardConfig,
}

impl SimConfig {
    /// Create a new simulation config with the given seed
    ///
    /// Faults start disabled so the baseline run is exact; enable them
    /// explicitly per scenario.
    pub fn new(seed: i64) -> Self {
        let mut app = RuleguardConfig::default();
        app.storage.data_dir = PathBuf::from(SIM_DATA_DIR_DEFAULT);
        Self {
            seed,
            start_time_ms: crate::clock::CLOCK_START_MS_DEFAULT,
            fault_profile: None,
            faults_enabled: false,
            app,
        }
    }

    /// Create config from DST_SEED environment variable or random
    pub fn from_env_or_random() -> Self {
        let seed = seed_from_env_or_random();
        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);
        Self::new(seed)
    }

    /// Apply a fault profile and enable injection
    pub fn with_fault_profile(mut self, profile: FaultProfile) -> Self {
        self.fault_profile = Some(profile);
        self.faults_enabled = true;
        self
    }

    pub fn with_faults_enabled(mut self, enabled: bool) -> Self {
        self.faults_enabled = enabled;
        self
    }

    pub fn with_start_time_ms(mut self, ms: u64) -> Self {
        self.start_time_ms = ms;
        self
    }

    /// Set the quiet period after which a trace completes
    pub fn with_trace_timeout_ms(mut self, ms: u64) -> Self {
        self.app.trace.completion_timeout_ms = ms;
        self
    }

    pub fn with_app_config(mut self, app: RuleguardConfig) -> Self {
        self.app = app;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Counters describing what a simulator has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    pub rules_created: u64,
    pub rule_create_failures: u64,
    pub rules_deleted: u64,
    pub crashes: u64,
    pub recovery_failures: u64,
    pub spans_generated: u64,
    pub spans_received: u64,
    pub spans_rejected: u64,
    pub traces_completed: u64,
    pub spans_processed: u64,
    pub ticks: u64,
}

/// Deterministic simulator driving the rule engine
pub struct Simulator {
    config: SimConfig,
    rng: DeterministicRng,
    clock: VirtualClock,
    faults: Arc<FaultInjector>,
    disk: Arc<MemFileSystem>,
    fs: Arc<SimFileSystem>,
    /// `None` while recovery has failed; writes are refused until a restart succeeds
    store: Option<SimRuleStore>,
    workload: SimWorkload,
    traces: TraceBuffer,
    trace_timers: BTreeMap<String, TimerHandle>,
    completions: Arc<Mutex<Vec<String>>>,
    rule_seq: u64,
    stats: SimulatorStats,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("seed", &self.config.seed)
            .field("now_ms", &self.clock.now_ms())
            .field("store_available", &self.store.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Simulator {
    /// Create a simulator with default configuration
    pub fn new(seed: i64) -> Self {
        Self::build(SimConfig::new(seed))
    }

    /// Create a simulator from a validated configuration
    pub fn with_config(config: SimConfig) -> Result<Self> {
        config.app.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        let rng = DeterministicRng::new(config.seed);
        let clock = VirtualClock::from_millis(config.start_time_ms);
        let faults = Arc::new(FaultInjector::new(rng.clone()));
        if let Some(profile) = &config.fault_profile {
            faults.apply_profile(profile);
        }
        faults.set_enabled(config.faults_enabled);

        let disk = Arc::new(MemFileSystem::new());
        let fs = Arc::new(FaultyFileSystem::new(
            disk.clone(),
            faults.clone(),
            clock.clone(),
        ));
        let traces = TraceBuffer::new(
            config.app.trace.buffered_traces_max,
            config.app.trace.spans_per_trace_max,
        );

        tracing::info!(
            seed = config.seed,
            faults_enabled = config.faults_enabled,
            profile = config.fault_profile.as_ref().map(FaultProfile::name).unwrap_or("default"),
            "Simulator created"
        );

        let mut sim = Self {
            workload: SimWorkload::new(rng.clone(), clock.clone()),
            config,
            rng,
            clock,
            faults,
            disk,
            fs,
            store: None,
            traces,
            trace_timers: BTreeMap::new(),
            completions: Arc::new(Mutex::new(Vec::new())),
            rule_seq: 0,
            stats: SimulatorStats::default(),
        };
        if let Err(e) = sim.open_store() {
            sim.stats.recovery_failures += 1;
            tracing::warn!(seed = sim.seed(), error = %e, "Initial rule store open failed");
        }
        sim
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn seed(&self) -> i64 {
        self.config.seed
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current virtual time
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// The fault-injecting file system the store writes through
    pub fn file_system(&self) -> &Arc<SimFileSystem> {
        &self.fs
    }

    /// The raw durable state, untouched by fault injection
    pub fn disk(&self) -> &Arc<MemFileSystem> {
        &self.disk
    }

    pub fn workload(&self) -> &SimWorkload {
        &self.workload
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    /// The live rule store, `None` after a failed recovery
    pub fn rule_store(&self) -> Option<&SimRuleStore> {
        self.store.as_ref()
    }

    pub fn is_store_available(&self) -> bool {
        self.store.is_some()
    }

    /// Quiet period after which a buffered trace completes
    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.config.app.trace.completion_timeout_ms)
    }

    // =========================================================================
    // Rules
    // =========================================================================

    fn rules_path(&self) -> PathBuf {
        self.config.app.storage.data_dir.join(RULES_FILE_NAME)
    }

    fn open_store(&mut self) -> Result<()> {
        let store = DiskRuleStore::open(
            self.fs.clone(),
            self.config.app.storage.data_dir.clone(),
            self.config.app.storage.file_mode,
        )?;
        self.store = Some(store);
        Ok(())
    }

    /// Create a rule with a generated expression, name and severity
    pub fn generate_rule(&mut self) -> Result<Rule> {
        let expression = self.workload.generate_rule_expression();
        let name = format!("generated-{}", self.rng.string(8));
        let severity = self.rng.choice(&Severity::ALL);
        self.create_rule_with(name, expression, severity)
    }

    /// Durably create a rule with the given expression
    ///
    /// An error means the rule was not created: it is absent from
    /// `get_rules` and was never acknowledged.
    pub fn create_rule(&mut self, expression: &str) -> Result<Rule> {
        let name = format!("rule-{}", self.rule_seq + 1);
        self.create_rule_with(name, expression.to_string(), Severity::default())
    }

    fn create_rule_with(
        &mut self,
        name: String,
        expression: String,
        severity: Severity,
    ) -> Result<Rule> {
        self.rule_seq += 1;
        let id = self.rng.uuid();

        let result = match self.store.as_mut() {
            None => Err(Error::store_unavailable("recovery failed; restart required")),
            Some(store) => Rule::new(id, name, expression).and_then(|rule| {
                let rule = rule.with_severity(severity);
                store.create(rule.clone())?;
                Ok(rule)
            }),
        };

        match &result {
            Ok(rule) => {
                self.stats.rules_created += 1;
                tracing::debug!(rule_id = %rule.id, "Rule created");
            }
            Err(e) => {
                self.stats.rule_create_failures += 1;
                tracing::debug!(error = %e, "Rule creation failed");
            }
        }
        self.drain_completions();
        result
    }

    /// Durably delete a rule by ID
    ///
    /// On error the rule stays live and durable.
    pub fn delete_rule(&mut self, id: &str) -> Result<()> {
        let result = match self.store.as_mut() {
            None => Err(Error::store_unavailable("recovery failed; restart required")),
            Some(store) => store.delete(id),
        };
        match &result {
            Ok(()) => {
                self.stats.rules_deleted += 1;
                tracing::debug!(rule_id = %id, "Rule deleted");
            }
            Err(e) => tracing::debug!(rule_id = %id, error = %e, "Rule deletion failed"),
        }
        self.drain_completions();
        result
    }

    /// Live rules, sorted by ID; empty while the store is unavailable
    pub fn get_rules(&self) -> Vec<Rule> {
        self.store
            .as_ref()
            .and_then(|store| store.list().ok())
            .unwrap_or_default()
    }

    /// Re-read the committed rule record through the fault-injecting file system
    ///
    /// A missing record reads as no rules. Torn or corrupted records are
    /// errors, never partial rule sets.
    pub fn stored_rules(&self) -> Result<Vec<Rule>> {
        let path = self.rules_path();
        match self.fs.read_file(&path) {
            Ok(data) => decode_record(&path, &data),
            Err(Error::FileNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Simulate a process crash followed by recovery from durable state
    ///
    /// All in-memory state is dropped: live rules, buffered spans, trace
    /// completion timers and queued completions. Virtual time and timers
    /// registered on `clock()` by the driver are untouched, as is the file
    /// system. If recovery fails the store stays unavailable until the next
    /// successful restart.
    pub fn crash_and_restart(&mut self) -> Result<()> {
        self.stats.crashes += 1;
        tracing::info!(
            seed = self.seed(),
            crash = self.stats.crashes,
            now_ms = self.now_ms(),
            "Simulated crash"
        );

        self.store = None;
        self.traces.clear();
        // Only the process's own timers die; time and driver timers survive.
        for (_, timer) in std::mem::take(&mut self.trace_timers) {
            timer.cancel();
        }
        self.lock_completions().clear();

        match self.open_store() {
            Ok(()) => {
                tracing::info!(
                    seed = self.seed(),
                    rules = self.get_rules().len(),
                    "Recovered after crash"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.recovery_failures += 1;
                tracing::warn!(seed = self.seed(), error = %e, "Recovery failed");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Traces
    // =========================================================================

    fn lock_completions(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a trace through the workload generator
    pub fn generate_trace(&mut self, span_count: usize) -> Vec<Span> {
        let spans = self.workload.generate_trace(span_count);
        self.stats.spans_generated += spans.len() as u64;
        spans
    }

    /// Feed one span to the trace buffer, restarting its trace's quiet period
    pub fn send_span(&mut self, span: Span) -> Result<()> {
        let trace_id = span.trace_id.clone();
        if let Err(e) = self.traces.add_span(span, self.clock.now_ms()) {
            self.stats.spans_rejected += 1;
            return Err(e);
        }
        self.stats.spans_received += 1;

        if let Some(previous) = self.trace_timers.remove(&trace_id) {
            previous.cancel();
        }
        let queue = self.completions.clone();
        let completed_id = trace_id.clone();
        let handle = self.clock.after_fn(self.trace_timeout(), move || {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(completed_id);
        });
        self.trace_timers.insert(trace_id, handle);
        Ok(())
    }

    /// Send every span of a trace, stopping at the first rejection
    pub fn send_trace(&mut self, spans: Vec<Span>) -> Result<()> {
        for span in spans {
            self.send_span(span)?;
        }
        Ok(())
    }

    /// Advance virtual time, then process every trace that completed
    pub fn advance(&mut self, duration: Duration) {
        self.clock.advance(duration);
        self.drain_completions();
    }

    fn drain_completions(&mut self) {
        let completed = std::mem::take(&mut *self.lock_completions());
        for trace_id in completed {
            // Re-armed by a later span: not complete yet.
            if self
                .trace_timers
                .get(&trace_id)
                .is_some_and(TimerHandle::is_pending)
            {
                continue;
            }
            self.trace_timers.remove(&trace_id);
            if let Some(trace) = self.traces.take(&trace_id) {
                self.stats.traces_completed += 1;
                self.stats.spans_processed += trace.spans.len() as u64;
                tracing::trace!(
                    trace_id = %trace.trace_id,
                    spans = trace.spans.len(),
                    "Trace completed"
                );
            }
        }
    }

    /// Whether `trace_id` is still waiting for its quiet period
    pub fn is_trace_buffered(&self, trace_id: &str) -> bool {
        self.traces.contains(trace_id)
    }

    pub fn buffered_traces(&self) -> usize {
        self.traces.len()
    }

    pub fn buffered_spans(&self) -> usize {
        self.traces.spans_count()
    }

    pub fn buffered_traces_max(&self) -> usize {
        self.traces.traces_count_max()
    }

    /// Buffered trace IDs without a completion pending or queued
    pub fn traces_without_timer(&self) -> Vec<String> {
        let queued = self.lock_completions().clone();
        self.traces
            .trace_ids()
            .into_iter()
            .filter(|id| {
                let pending = self
                    .trace_timers
                    .get(id)
                    .is_some_and(TimerHandle::is_pending);
                !pending && !queued.contains(id)
            })
            .collect()
    }

    /// Tracked completion timers whose trace is no longer buffered
    pub fn timers_without_trace(&self) -> Vec<String> {
        self.trace_timers
            .keys()
            .filter(|id| !self.traces.contains(id))
            .cloned()
            .collect()
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Drive a bounded workload for `duration` of virtual time
    ///
    /// Individual rule, span and recovery failures are expected under
    /// faults and only counted. Errors are reserved for an invalid profile.
    pub fn run(&mut self, duration: Duration, profile: &WorkloadProfile) -> Result<()> {
        validate_profile(duration, profile)?;

        let tick_ms = duration_ms(profile.tick);
        let total_ms = duration_ms(duration);
        let ticks = total_ms / tick_ms;
        tracing::info!(
            seed = self.seed(),
            profile = %profile.name,
            ticks = ticks,
            "Simulation run started"
        );

        for tick in 0..ticks {
            if profile.creates_rule_on(tick) {
                let _ = self.generate_rule();
            }

            for _ in 0..profile.traces_for_tick(tick) {
                let span_count = self
                    .rng
                    .next_range(profile.spans_per_trace_min, profile.spans_per_trace_max + 1);
                let spans = self.generate_trace(span_count as usize);
                for span in spans {
                    let _ = self.send_span(span);
                }
            }

            if self.rng.chance(profile.crash_probability) {
                let _ = self.crash_and_restart();
            }

            self.advance(profile.tick);
            self.stats.ticks += 1;
        }

        let remainder_ms = total_ms - ticks * tick_ms;
        if remainder_ms > 0 {
            self.advance(Duration::from_millis(remainder_ms));
        }

        tracing::info!(
            seed = self.seed(),
            rules = self.get_rules().len(),
            spans_generated = self.stats.spans_generated,
            crashes = self.stats.crashes,
            "Simulation run finished"
        );
        Ok(())
    }

    /// Human-readable summary of the run, including the seed to replay it
    pub fn report(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        out.push_str(&format!(
            "Simulation report (seed: {}, set DST_SEED={} to replay)\n",
            self.seed(),
            self.seed()
        ));
        out.push_str(&format!("  virtual time:        {}\n", self.now().to_rfc3339()));
        out.push_str(&format!("  ticks:               {}\n", s.ticks));
        out.push_str(&format!("  live rules:          {}\n", self.get_rules().len()));
        out.push_str(&format!(
            "  rules created:       {} ({} failed)\n",
            s.rules_created, s.rule_create_failures
        ));
        out.push_str(&format!("  rules deleted:       {}\n", s.rules_deleted));
        out.push_str(&format!(
            "  crashes:             {} ({} failed recoveries)\n",
            s.crashes, s.recovery_failures
        ));
        out.push_str(&format!(
            "  spans:               {} generated, {} received, {} rejected\n",
            s.spans_generated, s.spans_received, s.spans_rejected
        ));
        out.push_str(&format!(
            "  traces completed:    {} ({} spans)\n",
            s.traces_completed, s.spans_processed
        ));
        out.push_str(&format!(
            "  buffered:            {} traces, {} spans\n",
            self.buffered_traces(),
            self.buffered_spans()
        ));
        out.push_str(&self.faults.report());
        out
    }
}

fn validate_profile(duration: Duration, profile: &WorkloadProfile) -> Result<()> {
    if duration_ms(profile.tick) == 0 {
        return Err(Error::invalid_argument("profile.tick", "must be at least 1ms"));
    }
    if duration_ms(duration) > SIM_RUN_TIME_MS_MAX {
        return Err(Error::invalid_argument(
            "duration",
            format!("exceeds {}ms", SIM_RUN_TIME_MS_MAX),
        ));
    }
    if profile.spans_per_trace_min == 0
        || profile.spans_per_trace_min > profile.spans_per_trace_max
        || profile.spans_per_trace_max > SIM_TRACE_SPANS_COUNT_MAX
    {
        return Err(Error::invalid_argument(
            "profile.spans_per_trace",
            format!(
                "need 1 <= min <= max <= {}, got {}..={}",
                SIM_TRACE_SPANS_COUNT_MAX, profile.spans_per_trace_min, profile.spans_per_trace_max
            ),
        ));
    }
    if !(0.0..=1.0).contains(&profile.crash_probability) {
        return Err(Error::invalid_argument(
            "profile.crash_probability",
            "must be in [0, 1]",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;

    #[test]
    fn test_sim_config_builder() {
        let config = SimConfig::new(42)
            .with_fault_profile(FaultProfile::chaos())
            .with_trace_timeout_ms(250)
            .with_start_time_ms(0);
        assert_eq!(config.seed, 42);
        assert!(config.faults_enabled);
        assert_eq!(config.app.trace.completion_timeout_ms, 250);
        assert_eq!(config.start_time_ms, 0);
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let config = SimConfig::new(1).with_trace_timeout_ms(0);
        assert!(matches!(
            Simulator::with_config(config),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_new_simulator_defaults() {
        let sim = Simulator::new(7);
        assert_eq!(sim.seed(), 7);
        assert!(sim.is_store_available());
        assert!(!sim.faults().is_enabled());
        assert!(sim.get_rules().is_empty());
        assert_eq!(sim.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_create_rule_and_restart() {
        let mut sim = Simulator::new(1);
        let rule = sim.create_rule("span.duration > 100").unwrap();
        assert!(!rule.id.is_empty());
        assert_eq!(rule.expression, "span.duration > 100");

        sim.crash_and_restart().unwrap();
        assert_eq!(sim.get_rules(), vec![rule]);
        assert_eq!(sim.stats().crashes, 1);
    }

    #[test]
    fn test_create_rule_failure_not_visible() {
        let mut sim = Simulator::new(11111);
        sim.faults().set_enabled(true);
        sim.faults().set_probability(FaultKind::DiskFull, 1.0).unwrap();

        let err = sim.create_rule("span.duration > 100").unwrap_err();
        assert!(err.to_string().contains("no space left on device"));
        assert!(sim.get_rules().is_empty());
        assert_eq!(sim.stats().rule_create_failures, 1);
    }

    #[test]
    fn test_empty_expression_rejected() {
        let mut sim = Simulator::new(1);
        assert!(sim.create_rule("").is_err());
        assert!(sim.get_rules().is_empty());
    }

    #[test]
    fn test_trace_completes_after_quiet_period() {
        let mut sim = Simulator::new(3);
        let spans = sim.generate_trace(3);
        let trace_id = spans[0].trace_id.clone();
        sim.send_trace(spans).unwrap();

        sim.advance(sim.trace_timeout() - Duration::from_millis(1));
        assert!(sim.is_trace_buffered(&trace_id));

        sim.advance(Duration::from_millis(1));
        assert!(!sim.is_trace_buffered(&trace_id));
        assert_eq!(sim.stats().traces_completed, 1);
        assert_eq!(sim.stats().spans_processed, 3);
    }

    #[test]
    fn test_late_span_extends_quiet_period() {
        let mut sim = Simulator::new(4);
        let mut spans = sim.generate_trace(2);
        let late = spans.pop().unwrap();
        let trace_id = late.trace_id.clone();
        sim.send_trace(spans).unwrap();

        sim.advance(Duration::from_secs(4));
        sim.send_span(late).unwrap();
        sim.advance(Duration::from_secs(4));
        assert!(sim.is_trace_buffered(&trace_id));

        sim.advance(Duration::from_secs(1));
        assert!(!sim.is_trace_buffered(&trace_id));
        assert_eq!(sim.stats().spans_processed, 2);
        assert_eq!(sim.clock().pending_timers(), 0);
    }

    #[test]
    fn test_run_with_tick_longer_than_duration() {
        let mut sim = Simulator::new(10);
        let start = sim.now_ms();
        let mut profile = WorkloadProfile::steady();
        profile.tick = Duration::MAX;

        sim.run(Duration::from_millis(750), &profile).unwrap();
        assert_eq!(sim.stats().ticks, 0);
        assert_eq!(sim.now_ms() - start, 750);
    }

    #[test]
    fn test_crash_keeps_driver_timers() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut sim = Simulator::new(6);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = sim
            .clock()
            .after_fn(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst));
        let spans = sim.generate_trace(2);
        sim.send_trace(spans).unwrap();
        assert_eq!(sim.clock().pending_timers(), 2);

        sim.crash_and_restart().unwrap();
        // The trace timer is gone, the driver's timer is not.
        assert_eq!(sim.clock().pending_timers(), 1);
        assert!(handle.is_pending());

        sim.advance(Duration::from_secs(2));
        assert!(ran.load(Ordering::SeqCst));
        assert!(handle.has_fired());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_delete_rule_survives_restart() {
        let mut sim = Simulator::new(12);
        let gone = sim.create_rule("span.duration > 1").unwrap();
        let kept = sim.create_rule("span.duration > 2").unwrap();

        sim.delete_rule(&gone.id).unwrap();
        assert!(matches!(
            sim.delete_rule(&gone.id),
            Err(Error::RuleNotFound { .. })
        ));
        sim.crash_and_restart().unwrap();
        assert_eq!(sim.get_rules(), vec![kept.clone()]);
        assert_eq!(sim.stats().rules_deleted, 1);

        // A delete that cannot persist leaves the rule in place.
        sim.faults().set_enabled(true);
        sim.faults().set_probability(FaultKind::DiskFull, 1.0).unwrap();
        assert!(sim.delete_rule(&kept.id).is_err());
        sim.faults().set_enabled(false);
        sim.crash_and_restart().unwrap();
        assert_eq!(sim.get_rules(), vec![kept]);
    }

    #[test]
    fn test_crash_drops_buffered_traces() {
        let mut sim = Simulator::new(5);
        let spans = sim.generate_trace(4);
        sim.send_trace(spans).unwrap();
        assert_eq!(sim.buffered_spans(), 4);

        sim.crash_and_restart().unwrap();
        assert_eq!(sim.buffered_traces(), 0);
        assert_eq!(sim.clock().pending_timers(), 0);

        sim.advance(Duration::from_secs(10));
        assert_eq!(sim.stats().traces_completed, 0);
    }

    #[test]
    fn test_failed_recovery_refuses_writes() {
        let mut sim = Simulator::new(6);
        let rule = sim.create_rule("span.duration > 5").unwrap();

        sim.faults().set_enabled(true);
        for kind in FaultKind::ALL {
            sim.faults().set_probability(kind, 0.0).unwrap();
        }
        sim.faults().set_probability(FaultKind::Corruption, 1.0).unwrap();
        assert!(sim.crash_and_restart().is_err());
        assert!(!sim.is_store_available());
        assert!(sim.get_rules().is_empty());
        assert!(matches!(
            sim.create_rule("span.duration > 6"),
            Err(Error::StoreUnavailable { .. })
        ));

        // Durable state untouched; a clean restart brings the rule back.
        sim.faults().set_enabled(false);
        sim.crash_and_restart().unwrap();
        assert_eq!(sim.get_rules(), vec![rule]);
    }

    #[test]
    fn test_run_rejects_zero_tick() {
        let mut sim = Simulator::new(1);
        let mut profile = WorkloadProfile::steady();
        profile.tick = Duration::ZERO;
        assert!(sim.run(Duration::from_secs(1), &profile).is_err());
    }

    #[test]
    fn test_run_steady() {
        let mut sim = Simulator::new(8);
        let start = sim.now_ms();
        sim.run(Duration::from_millis(2_050), &WorkloadProfile::steady())
            .unwrap();

        assert_eq!(sim.now_ms() - start, 2_050);
        assert_eq!(sim.stats().ticks, 20);
        // Ticks 0 and 10
        assert_eq!(sim.get_rules().len(), 2);
        assert!(sim.stats().spans_generated >= 20 * 5 * 3);
        assert_eq!(sim.stats().spans_received, sim.stats().spans_generated);
    }

    #[test]
    fn test_report_contains_seed_and_faults() {
        let mut sim = Simulator::new(424242);
        sim.create_rule("span.duration > 1").unwrap();
        let report = sim.report();
        assert!(report.contains("seed: 424242"));
        assert!(report.contains("live rules:          1"));
        assert!(report.contains("Fault injection report"));
    }

    #[test]
    fn test_stats_serialize() {
        let mut sim = Simulator::new(9);
        sim.create_rule("span.duration > 1").unwrap();
        let json = serde_json::to_value(sim.stats()).unwrap();
        assert_eq!(json["rules_created"], 1);
        assert_eq!(json["crashes"], 0);
    }
}
