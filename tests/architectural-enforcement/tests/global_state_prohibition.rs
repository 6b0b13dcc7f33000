//! Integration Test: Global State Prohibition
//!
//! **Policy**: Caches and coordinators are owned by the session that created
//! them. Production code MUST NOT keep process-wide mutable state.
//! **Required**: Construct an `ExpiringCache` per namespace inside a
//! `SessionCaches`; pass it to whoever needs it.

use architectural_enforcement::{production_lines, report, SourceLine};

const FORBIDDEN: &[&str] = &[
    "lazy_static!",
    "once_cell",
    "OnceLock",
    "LazyLock",
    "OnceCell",
    "static mut ",
    "thread_local!",
];

fn is_mutable_static(line: &SourceLine) -> bool {
    let code = line.code.trim_start();
    let code = code.strip_prefix("pub ").unwrap_or(code);
    code.starts_with("static ")
        && (code.contains("Mutex") || code.contains("RwLock") || code.contains("Atomic"))
}

/// Test that production code holds no global caches or singletons
#[test]
fn test_no_global_state_in_production_code() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| FORBIDDEN.iter().any(|f| line.code.contains(f)) || is_mutable_static(line))
        .collect();

    report(
        "CRITICAL: process-wide mutable state found in production code!",
        "Keep caches in SessionCaches and hand them out explicitly",
        &violations,
    );
}

/// Test that production code never uses the blocking HTTP client
#[test]
fn test_no_blocking_http_client() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| line.code.contains("reqwest::blocking"))
        .collect();

    report(
        "CRITICAL: blocking HTTP client found in production code!",
        "Use the async reqwest::Client",
        &violations,
    );
}
