//! Fault injection for simulation
//!
//! TigerStyle: Explicit fault types with configurable probabilities.
//!
//! The injector owns five live probabilities, one per `FaultKind`, and a
//! counter per kind. Every decision draws from the run's shared RNG, so the
//! same seed and the same call sequence inject the same faults.

use crate::rng::DeterministicRng;
use ruleguard_core::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default probability of a write failing with disk full
pub const FAULT_DISK_FULL_PROBABILITY_DEFAULT: f64 = 0.02;
/// Default probability of a read returning corrupted bytes
pub const FAULT_CORRUPTION_PROBABILITY_DEFAULT: f64 = 0.01;
/// Default probability of an operation being delayed
pub const FAULT_SLOW_IO_PROBABILITY_DEFAULT: f64 = 0.05;
/// Default probability of a rename being interrupted
pub const FAULT_CRASH_PROBABILITY_DEFAULT: f64 = 0.10;
/// Default probability of a write persisting only a prefix
pub const FAULT_PARTIAL_WRITE_PROBABILITY_DEFAULT: f64 = 0.03;

/// Kinds of fault the injector decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaultKind {
    /// Write fails with "no space left on device"
    DiskFull,
    /// Read returns the file with one byte inverted
    Corruption,
    /// Operation is delayed on the virtual clock
    SlowIo,
    /// Rename is interrupted before taking effect
    Crash,
    /// Write persists only a strict prefix of the data
    PartialWrite,
}

impl FaultKind {
    /// All kinds, in report order
    pub const ALL: [FaultKind; 5] = [
        Self::DiskFull,
        Self::Corruption,
        Self::SlowIo,
        Self::Crash,
        Self::PartialWrite,
    ];

    /// Get a short name for this fault kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiskFull => "disk_full",
            Self::Corruption => "corruption",
            Self::SlowIo => "slow_io",
            Self::Crash => "crash",
            Self::PartialWrite => "partial_write",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::DiskFull => 0,
            Self::Corruption => 1,
            Self::SlowIo => 2,
            Self::Crash => 3,
            Self::PartialWrite => 4,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn check_probability(kind: FaultKind, probability: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(Error::invalid_argument(
            kind.name(),
            format!("probability must be in [0, 1], got {}", probability),
        ));
    }
    Ok(())
}

// =============================================================================
// Profiles
// =============================================================================

/// Named bundle of fault probabilities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultProfile {
    name: String,
    description: String,
    probabilities: [f64; 5],
}

impl FaultProfile {
    /// Create a profile with every probability at zero
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            probabilities: [0.0; 5],
        }
    }

    /// Set one probability
    pub fn with_probability(mut self, kind: FaultKind, probability: f64) -> Result<Self> {
        check_probability(kind, probability)?;
        self.probabilities[kind.index()] = probability;
        Ok(self)
    }

    fn from_parts(name: &str, description: &str, probabilities: [f64; 5]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            probabilities,
        }
    }

    /// Low fault rates for basic resilience testing
    pub fn conservative() -> Self {
        Self::from_parts(
            "conservative",
            "Low fault rates for basic resilience testing",
            [0.01, 0.005, 0.02, 0.05, 0.01],
        )
    }

    /// High fault rates for extreme stress testing
    pub fn aggressive() -> Self {
        Self::from_parts(
            "aggressive",
            "High fault rates for extreme stress testing",
            [0.10, 0.05, 0.15, 0.20, 0.08],
        )
    }

    /// Extreme fault rates to test absolute limits
    pub fn chaos() -> Self {
        Self::from_parts(
            "chaos",
            "Extreme fault rates to test absolute limits",
            [0.20, 0.10, 0.25, 0.30, 0.15],
        )
    }

    /// The built-in profiles, mildest first
    pub fn builtin() -> [FaultProfile; 3] {
        [Self::conservative(), Self::aggressive(), Self::chaos()]
    }

    /// Look up a built-in profile by name
    pub fn by_name(name: &str) -> Option<Self> {
        Self::builtin().into_iter().find(|p| p.name == name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn probability(&self, kind: FaultKind) -> f64 {
        self.probabilities[kind.index()]
    }
}

// =============================================================================
// Injector
// =============================================================================

#[derive(Debug)]
struct InjectorState {
    probabilities: [f64; 5],
    enabled: bool,
}

/// Fault injector for simulation
///
/// Decisions are made once per guarded operation. A disabled injector, or a
/// kind at probability zero, consumes no randomness.
#[derive(Debug)]
pub struct FaultInjector {
    rng: DeterministicRng,
    state: Mutex<InjectorState>,
    counts: [AtomicU64; 5],
}

impl FaultInjector {
    /// Create an enabled injector with the default probabilities
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            state: Mutex::new(InjectorState {
                probabilities: [
                    FAULT_DISK_FULL_PROBABILITY_DEFAULT,
                    FAULT_CORRUPTION_PROBABILITY_DEFAULT,
                    FAULT_SLOW_IO_PROBABILITY_DEFAULT,
                    FAULT_CRASH_PROBABILITY_DEFAULT,
                    FAULT_PARTIAL_WRITE_PROBABILITY_DEFAULT,
                ],
                enabled: true,
            }),
            counts: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InjectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The RNG decisions are drawn from
    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    /// Decide whether to inject a fault of `kind`, counting it if so
    pub fn should_inject(&self, kind: FaultKind) -> bool {
        let probability = {
            let state = self.lock();
            if !state.enabled {
                return false;
            }
            state.probabilities[kind.index()]
        };

        if !self.rng.chance(probability) {
            return false;
        }

        let count = self.counts[kind.index()].fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            fault = kind.name(),
            probability = probability,
            trigger_count = count,
            "Injecting fault"
        );
        true
    }

    pub fn should_inject_disk_full(&self) -> bool {
        self.should_inject(FaultKind::DiskFull)
    }

    pub fn should_inject_corruption(&self) -> bool {
        self.should_inject(FaultKind::Corruption)
    }

    pub fn should_inject_slow_io(&self) -> bool {
        self.should_inject(FaultKind::SlowIo)
    }

    pub fn should_inject_crash(&self) -> bool {
        self.should_inject(FaultKind::Crash)
    }

    pub fn should_inject_partial_write(&self) -> bool {
        self.should_inject(FaultKind::PartialWrite)
    }

    /// Count a fault that was forced rather than drawn
    pub(crate) fn record_forced(&self, kind: FaultKind) {
        let count = self.counts[kind.index()].fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(fault = kind.name(), trigger_count = count, "Injecting scripted fault");
    }

    /// Set one probability
    pub fn set_probability(&self, kind: FaultKind, probability: f64) -> Result<()> {
        check_probability(kind, probability)?;
        self.lock().probabilities[kind.index()] = probability;
        Ok(())
    }

    /// Current probability for `kind`
    pub fn probability(&self, kind: FaultKind) -> f64 {
        self.lock().probabilities[kind.index()]
    }

    /// Replace all five probabilities at once
    pub fn apply_profile(&self, profile: &FaultProfile) {
        self.lock().probabilities = profile.probabilities;
        tracing::debug!(profile = profile.name(), "Applied fault profile");
    }

    /// Hand-tuned high fault rates
    pub fn set_aggressive_mode(&self) {
        self.apply_profile(&FaultProfile::aggressive());
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Number of faults injected of `kind`
    pub fn count(&self, kind: FaultKind) -> u64 {
        self.counts[kind.index()].load(Ordering::SeqCst)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> FaultStats {
        FaultStats {
            disk_full_count: self.count(FaultKind::DiskFull),
            corruption_count: self.count(FaultKind::Corruption),
            slow_io_count: self.count(FaultKind::SlowIo),
            crash_count: self.count(FaultKind::Crash),
            partial_write_count: self.count(FaultKind::PartialWrite),
        }
    }

    /// Human-readable summary of probabilities and counts
    pub fn report(&self) -> String {
        let (probabilities, enabled) = {
            let state = self.lock();
            (state.probabilities, state.enabled)
        };
        let stats = self.stats();

        let mut out = format!(
            "Fault injection report (enabled: {}, total injected: {})\n",
            enabled,
            stats.total()
        );
        for kind in FaultKind::ALL {
            out.push_str(&format!(
                "  {:<14} p={:<6.3} injected={}\n",
                kind.name(),
                probabilities[kind.index()],
                stats.get(kind)
            ));
        }
        out
    }
}

/// Counts of injected faults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaultStats {
    pub disk_full_count: u64,
    pub corruption_count: u64,
    pub slow_io_count: u64,
    pub crash_count: u64,
    pub partial_write_count: u64,
}

impl FaultStats {
    pub fn get(&self, kind: FaultKind) -> u64 {
        match kind {
            FaultKind::DiskFull => self.disk_full_count,
            FaultKind::Corruption => self.corruption_count,
            FaultKind::SlowIo => self.slow_io_count,
            FaultKind::Crash => self.crash_count,
            FaultKind::PartialWrite => self.partial_write_count,
        }
    }

    pub fn total(&self) -> u64 {
        FaultKind::ALL.iter().map(|k| self.get(*k)).sum()
    }
}

/// Builder for FaultInjector
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    profile: Option<FaultProfile>,
    overrides: Vec<(FaultKind, f64)>,
    enabled: bool,
}

impl FaultInjectorBuilder {
    /// Create a new builder
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            profile: None,
            overrides: Vec::new(),
            enabled: true,
        }
    }

    /// Start from a profile instead of the defaults
    pub fn with_profile(mut self, profile: FaultProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Override one probability after the profile is applied
    pub fn with_probability(mut self, kind: FaultKind, probability: f64) -> Self {
        self.overrides.push((kind, probability));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build the injector, validating overrides
    pub fn build(self) -> Result<FaultInjector> {
        let injector = FaultInjector::new(self.rng);
        if let Some(profile) = &self.profile {
            injector.apply_profile(profile);
        }
        for (kind, probability) in self.overrides {
            injector.set_probability(kind, probability)?;
        }
        injector.set_enabled(self.enabled);
        Ok(injector)
    }
}
