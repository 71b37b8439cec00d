//! Synthetic workload generation
//!
//! TigerStyle: Every generated value comes from the run's RNG.
//!
//! Realism is not the goal. The generator only has to produce well-formed
//! traces and rule expressions whose shape depends on the seed.

use crate::clock::VirtualClock;
use crate::rng::DeterministicRng;
use ruleguard_core::Span;
use std::time::Duration;

const SERVICES: &[&str] = &["gateway", "auth", "checkout", "payments", "inventory", "search"];
const OPERATIONS: &[&str] = &[
    "GET /api/items",
    "POST /api/orders",
    "db.query",
    "cache.get",
    "llm.complete",
    "queue.publish",
];
const STATUS_CODES: &[&str] = &["200", "200", "200", "201", "404", "500"];

/// Produces traces and rules for the simulator
pub trait WorkloadGenerator {
    /// A trace of exactly `span_count` spans sharing one trace ID
    fn generate_trace(&self, span_count: usize) -> Vec<Span>;

    /// A rule expression in the engine's DSL
    fn generate_rule_expression(&self) -> String;
}

/// Workload generator drawing from the shared RNG
#[derive(Debug, Clone)]
pub struct SimWorkload {
    rng: DeterministicRng,
    clock: VirtualClock,
}

impl SimWorkload {
    pub fn new(rng: DeterministicRng, clock: VirtualClock) -> Self {
        Self { rng, clock }
    }
}

impl WorkloadGenerator for SimWorkload {
    fn generate_trace(&self, span_count: usize) -> Vec<Span> {
        let trace_id = self.rng.hex(32);
        let start_ms = self.clock.now_ms();
        let mut spans: Vec<Span> = Vec::with_capacity(span_count);

        for i in 0..span_count {
            let mut span = Span::new(
                trace_id.clone(),
                self.rng.hex(16),
                self.rng.choice(SERVICES),
                self.rng.choice(OPERATIONS),
            )
            .with_timing(start_ms + i as u64, self.rng.next_range(1, 2_000))
            .with_attribute("http.status_code", self.rng.choice(STATUS_CODES));

            if i > 0 {
                let parent = &spans[self.rng.next_index(i)];
                span = span.with_parent(parent.span_id.clone());
            }
            spans.push(span);
        }
        spans
    }

    fn generate_rule_expression(&self) -> String {
        match self.rng.int_n(5) {
            0 => format!("span.duration > {}", self.rng.next_range(50, 1_000)),
            1 => format!(
                "span.service == '{}' and span.status_code >= 500",
                self.rng.choice(SERVICES)
            ),
            2 => format!("span.name == '{}'", self.rng.choice(OPERATIONS)),
            3 => format!(
                "trace.has(span.service == '{}') and not trace.has(span.service == '{}')",
                self.rng.choice(SERVICES),
                self.rng.choice(SERVICES)
            ),
            _ => format!(
                "trace.count(span.name == '{}') > {}",
                self.rng.choice(OPERATIONS),
                self.rng.next_range(1, 10)
            ),
        }
    }
}

/// Shape of a bounded simulation run
///
/// `Simulator::run` steps virtual time in `tick` increments. Each tick sends
/// `traces_per_tick` traces (times `burst_multiplier` on burst ticks), creates
/// a rule every `rule_interval_ticks` ticks and crashes with
/// `crash_probability`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadProfile {
    pub name: String,
    pub tick: Duration,
    /// Create one rule every this many ticks (0 disables)
    pub rule_interval_ticks: u64,
    pub traces_per_tick: u64,
    pub spans_per_trace_min: u64,
    /// Inclusive
    pub spans_per_trace_max: u64,
    /// Every this many ticks is a burst tick (0 disables)
    pub burst_interval_ticks: u64,
    pub burst_multiplier: u64,
    /// Chance per tick of a crash and restart
    pub crash_probability: f64,
}

impl WorkloadProfile {
    /// Constant moderate load, no crashes
    pub fn steady() -> Self {
        Self {
            name: "steady".into(),
            tick: Duration::from_millis(100),
            rule_interval_ticks: 10,
            traces_per_tick: 5,
            spans_per_trace_min: 3,
            spans_per_trace_max: 8,
            burst_interval_ticks: 0,
            burst_multiplier: 1,
            crash_probability: 0.0,
        }
    }

    /// Heavier load with a 5x spike every second
    pub fn burst() -> Self {
        Self {
            name: "burst".into(),
            tick: Duration::from_millis(100),
            rule_interval_ticks: 5,
            traces_per_tick: 8,
            spans_per_trace_min: 5,
            spans_per_trace_max: 10,
            burst_interval_ticks: 10,
            burst_multiplier: 5,
            crash_probability: 0.0,
        }
    }

    /// Light load with frequent rule churn and crashes
    pub fn crash_heavy() -> Self {
        Self {
            name: "crash_heavy".into(),
            tick: Duration::from_millis(100),
            rule_interval_ticks: 2,
            traces_per_tick: 2,
            spans_per_trace_min: 2,
            spans_per_trace_max: 6,
            burst_interval_ticks: 0,
            burst_multiplier: 1,
            crash_probability: 0.05,
        }
    }

    /// Look up a named profile
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "steady" => Some(Self::steady()),
            "burst" => Some(Self::burst()),
            "crash_heavy" => Some(Self::crash_heavy()),
            _ => None,
        }
    }

    /// Traces to send on tick `tick`
    pub fn traces_for_tick(&self, tick: u64) -> u64 {
        if self.burst_interval_ticks > 0 && tick % self.burst_interval_ticks == 0 {
            self.traces_per_tick * self.burst_multiplier
        } else {
            self.traces_per_tick
        }
    }

    /// Whether a rule is created on tick `tick`
    pub fn creates_rule_on(&self, tick: u64) -> bool {
        self.rule_interval_ticks > 0 && tick % self.rule_interval_ticks == 0
    }
}
