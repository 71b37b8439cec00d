//! Ruleguard DST - Deterministic Simulation Testing
//!
//! Seeded, single-threaded simulation of the ruleguard rule store and trace
//! pipeline under injected storage faults and crashes.
//!
//! # Overview
//!
//! A `Simulator` owns every source of nondeterminism:
//! - Reproducible random numbers (DeterministicRng)
//! - Virtual time with deadline-ordered timers (VirtualClock)
//! - Probabilistic and scripted faults (FaultInjector, FaultyFileSystem)
//! - Synthetic traces and rule expressions (SimWorkload)
//!
//! Properties are checked with an `InvariantChecker`.
//!
//! # Example
//!
//! ```rust,ignore
//! use ruleguard_dst::{InvariantChecker, SimConfig, Simulator};
//!
//! #[test]
//! fn test_rules_survive_crashes() {
//!     let mut sim = Simulator::with_config(SimConfig::from_env_or_random()).unwrap();
//!     for _ in 0..20 {
//!         sim.generate_rule().unwrap();
//!     }
//!     let mut checker = InvariantChecker::with_default_invariants();
//!     assert!(checker.check_all(&mut sim), "{}", checker.report());
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All operations are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault kinds and probabilities

pub mod clock;
pub mod fault;
pub mod invariants;
pub mod rng;
pub mod simulation;
pub mod storage;
pub mod workload;

pub use clock::{FiredTimer, TimerHandle, TimerId, VirtualClock};
pub use fault::{FaultInjector, FaultInjectorBuilder, FaultKind, FaultProfile, FaultStats};
pub use invariants::{
    check_invariant, must_hold, AtomicWrite, BoundedTraceBuffer, DeterministicEvaluation,
    FnInvariant, GracefulDegradation, IdempotentRecovery, Invariant, InvariantChecker,
    InvariantViolation, NoDataLossUnderFaults, NoDuplicateRules, NoLeakedTimers, NoSpanLoss,
    RulePersistence, SignatureIntegrity, TraceCompletion,
};
pub use rng::{seed_from_env_or_random, DeterministicRng};
pub use simulation::{SimConfig, SimFileSystem, SimRuleStore, Simulator, SimulatorStats};
pub use storage::{CrashPoint, FaultyFileSystem, FileSystemStats};
pub use workload::{SimWorkload, WorkloadGenerator, WorkloadProfile};
