//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//! - No unwrap()/expect() outside tests
//!
//! Production code is everything in `buddy/core/src` and `buddy/cli/src`
//! up to the file's `#[cfg(test)] mod tests` block.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source directories scanned, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["buddy/core/src", "buddy/cli/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line_number: usize,
    pub line: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line_number, self.line)
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Every `.rs` file under the production directories
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Index of the `#[cfg(test)]` line that opens the test module, if any
///
/// A `#[cfg(test)]` on a single item (a test-only helper method) does not
/// end production code.
pub fn test_module_start(lines: &[&str]) -> Option<usize> {
    lines.iter().enumerate().find_map(|(idx, line)| {
        if line.trim() != "#[cfg(test)]" {
            return None;
        }
        let next = lines[idx + 1..].iter().find(|l| !l.trim().is_empty())?;
        next.trim_start().starts_with("mod ").then_some(idx)
    })
}

/// Code portion of a line with any `//` comment removed
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Check whether the line at `idx` sits inside a synchronous `fn`
pub fn is_in_non_async_function(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        let code = code_part(line);
        if code.contains("fn ") {
            return !code.contains("async fn");
        }
    }
    false
}

/// Scan production code with `check`, which sees all lines of the file and
/// the index of the candidate line
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&Path, &[&str], usize) -> bool,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let end = test_module_start(&lines).unwrap_or(lines.len());

        for idx in 0..end {
            if lines[idx].trim_start().starts_with("//") {
                continue;
            }
            if check(&path, &lines, idx) {
                violations.push(Violation {
                    path: path.clone(),
                    line_number: idx + 1,
                    line: lines[idx].trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Print violations and fail the test when any exist
pub fn report(title: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_start_skips_item_attributes() {
        let lines = vec![
            "impl Foo {",
            "    #[cfg(test)]",
            "    pub fn helper(&self) {}",
            "}",
            "",
            "#[cfg(test)]",
            "",
            "mod tests {",
        ];
        assert_eq!(test_module_start(&lines), Some(5));
    }

    #[test]
    fn test_async_function_detection() {
        let lines = vec![
            "fn load() {",
            "    std::fs::read_to_string(path);",
            "}",
            "async fn fetch() {",
            "    std::fs::read(path);",
            "}",
        ];
        assert!(is_in_non_async_function(&lines, 1));
        assert!(!is_in_non_async_function(&lines, 4));
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("buddy/core/src/lib.rs")));
        assert!(files.iter().any(|p| p.ends_with("buddy/cli/src/main.rs")));
    }
}
