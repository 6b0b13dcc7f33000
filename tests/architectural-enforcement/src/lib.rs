//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! of the workspace:
//! - No thread-blocking sleeps in production code (timers go through tokio)
//! - No process-wide cache singletons (caches are per-session instances)
//! - No blocking HTTP client
//!
//! The helpers here walk the production sources of each crate and hand every
//! line outside `#[cfg(test)]` blocks to the individual checks.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["mirror/core/src", "mirror/cli/src"];

/// One line of production code
#[derive(Clone, Debug)]
pub struct SourceLine {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// The line with any trailing `//` comment removed
    pub code: String,
    /// The original line
    pub raw: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.raw.trim())
    }
}

/// Root of the workspace this package lives in
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../..")))
}

/// Every production line of every `.rs` file under [`PRODUCTION_DIRS`]
#[must_use]
pub fn production_lines() -> Vec<SourceLine> {
    let root = workspace_root();
    let mut lines = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                collect_file(entry.path(), &mut lines);
            }
        }
    }

    lines
}

fn collect_file(path: &Path, lines: &mut Vec<SourceLine>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (idx, raw) in content.lines().enumerate() {
        // Test modules sit at the bottom of each file
        if raw.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        let trimmed = raw.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }

        let code = raw.split("//").next().unwrap_or(raw).to_string();
        lines.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            raw: raw.to_string(),
        });
    }
}

/// Print violations and fail the calling test if there are any
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(title: &str, hint: &str, violations: &[SourceLine]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!("\n✅ {hint}\n");

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}
