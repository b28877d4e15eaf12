//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the choreographer crates:
//! - No sleep() calls in production code (the scheduler is tick-driven)
//! - No ambient global state (everything is injected through constructors)
//!
//! The helpers here locate production sources and strip the parts the
//! checks should not look at (comments and `#[cfg(test)]` modules).

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by the enforcement tests, relative to
/// the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["choreographer/core/src"];

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under a directory relative to the workspace root
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Production lines of a file: `(line_number, code)` pairs with line
/// comments removed and everything from the first `#[cfg(test)]` on dropped
#[must_use]
pub fn production_lines(path: &Path) -> Vec<(usize, String)> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, code_part(line).to_string()))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Run `check` over every production line, collecting `path:line - code`
/// for each hit
pub fn find_violations(check: impl Fn(&Path, &[(usize, String)], usize) -> bool) -> Vec<String> {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(dir) {
            let lines = production_lines(&path);
            for idx in 0..lines.len() {
                if check(&path, &lines, idx) {
                    let (number, code) = &lines[idx];
                    violations.push(format!("{}:{} - {}", path.display(), number, code.trim()));
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("// only a comment"), "");
    }

    #[test]
    fn test_production_sources_exist() {
        assert!(
            !rust_files(PRODUCTION_DIRS[0]).is_empty(),
            "expected sources under {}",
            PRODUCTION_DIRS[0]
        );
    }
}
