//! Architectural Enforcement Integration Tests
//!
//! Source scanning helpers for the tests in `tests/`. They enforce rules the
//! compiler can't:
//! - No process-wide mutable state in the controller crates
//! - No blocking calls inside the async runtime
//! - No panicking shortcuts in production code
//!
//! Only production code is scanned: everything from a file's first
//! `#[cfg(test)]` onwards is skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["controller/core/src", "controller/daemon/src"];

/// A line of production code
#[derive(Debug)]
pub struct SourceLine {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any `//` comment stripped
    pub code: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every production line under [`PRODUCTION_DIRS`]
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
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                collect_file(entry.path(), &mut lines);
            }
        }
    }

    lines
}

fn collect_file(path: &Path, out: &mut Vec<SourceLine>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        let code = line.split("//").next().unwrap_or(line);
        if code.trim().is_empty() {
            continue;
        }

        out.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code: code.to_string(),
        });
    }
}

/// Lines containing any of `patterns`
pub fn find_violations(lines: &[SourceLine], patterns: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| patterns.iter().any(|p| line.code.contains(p)))
        .map(ToString::to_string)
        .collect()
}

/// Panic with a readable report if `violations` is not empty
pub fn assert_clean(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!("\nFound {} violation(s) of: {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_finds_sources() {
        let lines = production_lines();
        assert!(lines
            .iter()
            .any(|l| l.path.ends_with("controller/core/src/lib.rs")));
    }

    #[test]
    fn test_comments_are_ignored() {
        let lines = vec![SourceLine {
            path: PathBuf::from("x.rs"),
            number: 1,
            code: "let a = 1; ".to_string(),
        }];
        assert!(find_violations(&lines, &["static mut"]).is_empty());
    }
}
