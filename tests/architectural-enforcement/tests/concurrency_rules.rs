//! Integration Test: Client Concurrency Rules
//!
//! **Policy**: The client core never sleeps, never blocks inside async code
//! and guards shared state with `parking_lot` locks held for one short
//! operation. Application-side polling (the simulator's workers) may sleep
//! asynchronously, but never block a runtime thread.

use architectural_enforcement::{production_lines, SourceLine};

const CORE: &str = "client/core/src";
const SIM: &str = "client/sim/src";

fn report(rule: &str, violations: &[SourceLine]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

fn find(dir: &str, matches: impl Fn(&SourceLine) -> bool) -> Vec<SourceLine> {
    production_lines(dir).into_iter().filter(|line| matches(line)).collect()
}

/// The send path waits on a `tokio::time::interval`, nothing in the core sleeps
#[test]
fn test_no_sleep_in_client_core() {
    let violations = find(CORE, |line| {
        line.code.contains("thread::sleep") || line.code.contains("time::sleep")
    });
    report("Sleep calls in client core", &violations);
}

/// Blocking sleeps stall the runtime the session driver shares
#[test]
fn test_no_thread_sleep_in_simulator() {
    let violations = find(SIM, |line| line.code.contains("thread::sleep"));
    report("Blocking sleep in simulator", &violations);
}

#[test]
fn test_no_std_sync_locks() {
    let mut violations = find(CORE, |line| {
        line.code.contains("std::sync::Mutex")
            || line.code.contains("std::sync::RwLock")
            || line.code.contains("sync::{Mutex")
    });
    violations.extend(find(SIM, |line| line.code.contains("std::sync::Mutex")));
    report("std::sync locks (use parking_lot)", &violations);
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find(CORE, |line| {
        line.in_async_fn
            && (line.code.contains("std::fs::")
                || line.code.contains("std::net::")
                || line.code.contains("std::io::stdin()"))
    });
    report("Blocking I/O inside async code", &violations);
}

#[test]
fn test_no_unwrap_in_client_core() {
    let violations = find(CORE, |line| {
        line.code.contains(".unwrap()") || line.code.contains(".expect(")
    });
    report("unwrap()/expect() in library code", &violations);
}

#[test]
fn test_sources_were_scanned() {
    assert!(!production_lines(CORE).is_empty(), "client core sources not found");
    assert!(!production_lines(SIM).is_empty(), "simulator sources not found");
}
