//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread to wait.
//! **Required**: Debounce timers and poll intervals use `tokio::time`, so
//! tests can drive them with a paused clock.

use architectural_enforcement::{production_lines, report};

/// Test that production code does not use thread-blocking sleeps
#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| {
            line.code.contains("thread::sleep") || line.code.contains("std::thread::park")
        })
        .collect();

    report(
        "CRITICAL: thread-blocking sleep calls found in production code!",
        "Use tokio::time::sleep(...).await or tokio::time::interval instead",
        &violations,
    );
}

/// Test that coordinator timing goes through tokio's clock
#[test]
fn test_no_std_instant_in_production_code() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| line.code.contains("std::time::Instant"))
        .collect();

    report(
        "std::time::Instant found in production code!",
        "Use tokio::time::Instant so paused-clock tests control expiry",
        &violations,
    );
}

#[test]
fn test_production_sources_were_scanned() {
    assert!(
        production_lines()
            .iter()
            .any(|line| line.path.ends_with("coordinator/debounce.rs")),
        "expected to scan mirror/core/src"
    );
}
