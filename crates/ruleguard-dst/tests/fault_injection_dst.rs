//! DST tests for fault injection
//!
//! TigerStyle: Faults are explicit, counted, and reproducible by seed.

use ruleguard_core::{Error, FileSystem, MemFileSystem};
use ruleguard_dst::{
    DeterministicRng, FaultInjector, FaultKind, FaultProfile, FaultyFileSystem, Simulator,
    VirtualClock,
};
use std::path::Path;
use std::sync::Arc;

/// Simulator with injection enabled but every probability at zero
fn quiet_sim(seed: i64) -> Simulator {
    let sim = Simulator::new(seed);
    for kind in FaultKind::ALL {
        sim.faults().set_probability(kind, 0.0).unwrap();
    }
    sim.faults().set_enabled(true);
    sim
}

#[test]
fn test_disk_full_fails_rule_creation() {
    let mut sim = quiet_sim(11111);
    sim.faults()
        .set_probability(FaultKind::DiskFull, 1.0)
        .unwrap();

    let err = sim.create_rule("span.duration > 100").unwrap_err();
    assert!(
        err.to_string().contains("no space left on device"),
        "unexpected error: {} (seed: 11111)",
        err
    );
    assert_eq!(sim.faults().stats().disk_full_count, 1);
    assert_eq!(sim.faults().stats().total(), 1);
    assert!(sim.get_rules().is_empty());
    println!("✅ disk full surfaced as a failed create");
}

#[test]
fn test_disk_full_write_leaves_no_file() {
    let faults = Arc::new(FaultInjector::new(DeterministicRng::new(11111)));
    faults.set_probability(FaultKind::DiskFull, 1.0).unwrap();
    let disk = Arc::new(MemFileSystem::new());
    let fs = FaultyFileSystem::new(disk.clone(), faults.clone(), VirtualClock::default());
    let path = Path::new("/test.txt");

    let err = fs.write_file(path, b"data", 0o644).unwrap_err();
    assert!(
        err.to_string().contains("no space left on device"),
        "unexpected error: {} (seed: 11111)",
        err
    );
    assert!(!disk.exists(path));
    assert!(matches!(fs.read_file(path), Err(Error::FileNotFound { .. })));
    assert_eq!(faults.stats().disk_full_count, 1);
    assert_eq!(faults.stats().partial_write_count, 0);
    println!("✅ disk full rejected the write at the file system");
}

#[test]
fn test_counters_track_only_guarded_kind() {
    let injector = FaultInjector::new(DeterministicRng::new(7));
    for kind in FaultKind::ALL {
        injector.set_probability(kind, 0.0).unwrap();
    }
    injector.set_probability(FaultKind::SlowIo, 1.0).unwrap();

    for _ in 0..25 {
        assert!(injector.should_inject_slow_io());
        assert!(!injector.should_inject_crash());
    }
    let stats = injector.stats();
    assert_eq!(stats.slow_io_count, 25);
    assert_eq!(stats.total(), 25);
}

#[test]
fn test_disabled_injector_never_fires() {
    let injector = FaultInjector::new(DeterministicRng::new(3));
    injector.apply_profile(&FaultProfile::chaos());
    injector.set_enabled(false);

    for _ in 0..1000 {
        for kind in FaultKind::ALL {
            assert!(!injector.should_inject(kind));
        }
    }
    assert_eq!(injector.stats().total(), 0);
}

#[test]
fn test_profiles_strictly_increase() {
    let [conservative, aggressive, chaos] = FaultProfile::builtin();
    for kind in FaultKind::ALL {
        assert!(conservative.probability(kind) < aggressive.probability(kind));
        assert!(aggressive.probability(kind) < chaos.probability(kind));
    }
}

#[test]
fn test_corruption_keeps_length_and_changes_bytes() {
    let rng = DeterministicRng::new(66666);
    let faults = Arc::new(FaultInjector::new(rng));
    for kind in FaultKind::ALL {
        faults.set_probability(kind, 0.0).unwrap();
    }
    let disk = Arc::new(MemFileSystem::new());
    let fs = FaultyFileSystem::new(disk.clone(), faults.clone(), VirtualClock::default());
    let path = Path::new("/data/blob");
    let original = b"ruleguard durable record".to_vec();
    fs.write_file(path, &original, 0o644).unwrap();

    faults
        .set_probability(FaultKind::Corruption, 1.0)
        .unwrap();
    for _ in 0..20 {
        let read = fs.read_file(path).unwrap();
        assert_eq!(read.len(), original.len());
        assert_ne!(read, original);
    }
    // Disk contents are untouched by read corruption.
    assert_eq!(disk.read_file(path).unwrap(), original);
    assert_eq!(faults.stats().corruption_count, 20);
}

#[test]
fn test_partial_write_persists_strict_prefix() {
    let faults = Arc::new(FaultInjector::new(DeterministicRng::new(77777)));
    for kind in FaultKind::ALL {
        faults.set_probability(kind, 0.0).unwrap();
    }
    faults
        .set_probability(FaultKind::PartialWrite, 1.0)
        .unwrap();
    let disk = Arc::new(MemFileSystem::new());
    let fs = FaultyFileSystem::new(disk.clone(), faults, VirtualClock::default());
    let path = Path::new("/data/blob");
    let data = vec![0xAB; 512];

    for _ in 0..20 {
        fs.write_file(path, &data, 0o644).unwrap();
        let stored = disk.read_file(path).unwrap();
        assert!(stored.len() < data.len());
        assert_eq!(stored[..], data[..stored.len()]);
    }
}

#[test]
fn test_partial_write_never_acknowledges_rule() {
    let mut sim = quiet_sim(4242);
    sim.faults()
        .set_probability(FaultKind::PartialWrite, 1.0)
        .unwrap();

    for _ in 0..10 {
        assert!(sim.generate_rule().is_err());
    }
    assert!(sim.get_rules().is_empty());

    sim.faults().set_enabled(false);
    sim.crash_and_restart().unwrap();
    assert!(sim.get_rules().is_empty(), "torn write became visible (seed: 4242)");
}

#[test]
fn test_slow_io_advances_virtual_time_only() {
    let mut sim = quiet_sim(555);
    sim.faults().set_probability(FaultKind::SlowIo, 1.0).unwrap();

    let before = sim.now_ms();
    sim.create_rule("span.duration > 100").unwrap();
    // One write and one rename, each delayed.
    let elapsed = sim.now_ms() - before;
    assert!((20..=1000).contains(&elapsed), "elapsed {}ms", elapsed);
    assert_eq!(sim.faults().stats().slow_io_count, 2);
}
