//! Architectural Enforcement
//!
//! Source scanners behind the integration tests in `tests/`. They enforce two
//! rules on the production code of the relay crates:
//! - No sleeping. Async code waits on I/O, timers with a purpose, or
//!   cancellation.
//! - No blocking I/O inside async functions. Use `tokio::fs`, `tokio::net`,
//!   `tokio::process` and `tokio::io`, or move the work to `spawn_blocking`.
//!
//! The scanners are line-based heuristics, not a parser. Test-only items are
//! expected at the end of each file, after the first top-level
//! `#[cfg(test)]`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const SCANNED_DIRS: [&str; 2] = ["relay/core/src", "relay/daemon/src"];

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One Rust source file, split into lines
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// File contents by line
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text
    #[must_use]
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    fn line_refs(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }
}

/// Every `.rs` file under [`SCANNED_DIRS`]
///
/// # Panics
///
/// Panics if a scanned directory is missing, so a moved crate cannot make
/// the checks pass vacuously.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in SCANNED_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "scanned directory missing: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(text) = fs::read_to_string(entry.path()) {
                files.push(SourceFile::from_text(entry.path(), &text));
            }
        }
    }

    files
}

/// A rule violation at one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub kind: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

// =============================================================================
// Context detection
// =============================================================================

/// The kind of function a line sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnContext {
    /// Inside an `async fn`
    Async,
    /// Inside a plain `fn`
    Sync,
    /// Not inside any function the scanner could find
    Unknown,
}

fn declares_fn(line: &str) -> Option<FnContext> {
    let line = line.trim();
    if line.starts_with("//") {
        return None;
    }
    if line.contains("async fn ") {
        Some(FnContext::Async)
    } else if line.starts_with("fn ") || line.contains(" fn ") {
        Some(FnContext::Sync)
    } else {
        None
    }
}

/// Find the nearest enclosing function declaration above `idx`
///
/// Stops at module and impl boundaries.
#[must_use]
pub fn enclosing_fn(lines: &[&str], idx: usize) -> FnContext {
    for line in lines[..idx].iter().rev() {
        if let Some(context) = declares_fn(line) {
            return context;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("mod ") || (trimmed.starts_with("impl") && trimmed.contains('{')) {
            return FnContext::Unknown;
        }
    }
    FnContext::Unknown
}

/// True if the line at `idx` belongs to test-only code
///
/// That is the trailing `#[cfg(test)]` section of the file, or a function
/// marked `#[test]` / `#[tokio::test]`.
#[must_use]
pub fn is_test_code(lines: &[&str], idx: usize) -> bool {
    if lines[..idx].iter().any(|l| l.starts_with("#[cfg(test)]")) {
        return true;
    }

    let Some(fn_idx) = (0..idx).rev().find(|&i| declares_fn(lines[i]).is_some()) else {
        return false;
    };
    for line in lines[..fn_idx].iter().rev() {
        let line = line.trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if !line.starts_with("#[") && !line.starts_with("///") {
            break;
        }
    }
    false
}

fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

// =============================================================================
// Rules
// =============================================================================

const BLOCKING_CALLS: [(&str, &str); 5] = [
    ("std::fs::", "Blocking file I/O"),
    ("use std::fs", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
];

const BLOCKING_STDIO: [&str; 2] = ["std::io::stdin()", "std::io::stdout()"];

/// Blocking I/O in async context
///
/// Blocking calls are fine in plain functions (before the runtime starts,
/// or inside `spawn_blocking` helpers) and in test code. Module-level `use`
/// items count as async context, since they make the blocking API
/// available to every function in the file.
#[must_use]
pub fn find_blocking_io(file: &SourceFile) -> Vec<Violation> {
    let lines = file.line_refs();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if code.trim().is_empty() || is_test_code(&lines, idx) {
            continue;
        }

        let context = enclosing_fn(&lines, idx);
        if context == FnContext::Sync {
            continue;
        }

        let mut push = |kind: &'static str| {
            violations.push(Violation {
                path: file.path.clone(),
                line: idx + 1,
                kind,
                text: line.trim().to_string(),
            });
        };

        if let Some((_, kind)) = BLOCKING_CALLS.iter().find(|(pat, _)| code.contains(pat)) {
            push(*kind);
        } else if context == FnContext::Async && BLOCKING_STDIO.iter().any(|p| code.contains(p)) {
            push("Blocking stdin/stdout in async");
        }
    }

    violations
}

/// Sleep calls outside test code
///
/// Exponential backoff in retry loops and `tokio::time::interval` ticking
/// are allowed.
#[must_use]
pub fn find_sleeps(file: &SourceFile) -> Vec<Violation> {
    let lines = file.line_refs();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }
        if is_test_code(&lines, idx)
            || is_backoff_context(&lines, idx)
            || is_interval_pattern(&lines, idx)
        {
            continue;
        }

        violations.push(Violation {
            path: file.path.clone(),
            line: idx + 1,
            kind: "Sleep",
            text: line.trim().to_string(),
        });
    }

    violations
}

/// Sleep inside a retry loop with an exponential delay
#[must_use]
pub fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let window = &lines[idx.saturating_sub(15)..(idx + 5).min(lines.len())];

    let has_backoff_calc = window.iter().any(|l| {
        let l = l.to_lowercase();
        l.contains("<<") || l.contains("pow") || l.contains("* 2")
    });
    let has_retry_context = window.iter().any(|l| {
        let l = l.to_lowercase();
        ["retry", "reconnect", "backoff", "attempt"]
            .iter()
            .any(|w| l.contains(w))
    });

    has_backoff_calc && has_retry_context
}

/// Sleep that is really an interval tick
#[must_use]
pub fn is_interval_pattern(lines: &[&str], idx: usize) -> bool {
    let before = &lines[idx.saturating_sub(20)..idx];
    let after = &lines[idx..(idx + 5).min(lines.len())];

    before
        .iter()
        .any(|l| l.contains("interval.tick()") || l.contains("tokio::time::interval"))
        || after.iter().any(|l| l.contains("interval.tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> SourceFile {
        SourceFile::from_text("sample.rs", text)
    }

    #[test]
    fn test_async_fn_detection() {
        let lines = [
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];
        assert_eq!(enclosing_fn(&lines, 1), FnContext::Async);

        let lines = ["pub(crate) fn load() {", "    let x = 1;", "}"];
        assert_eq!(enclosing_fn(&lines, 1), FnContext::Sync);
    }

    #[test]
    fn test_blocking_io_in_async_fn_is_flagged() {
        let file = scan(
            "async fn bad() {\n    let s = std::fs::read_to_string(\"f\")?;\n}\n\
             fn fine() {\n    let s = std::fs::read_to_string(\"f\")?;\n}\n",
        );
        let violations = find_blocking_io(&file);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].kind, "Blocking file I/O");
    }

    #[test]
    fn test_module_level_use_is_flagged() {
        let file = scan("use std::fs;\n\nasync fn run() {}\n");
        assert_eq!(find_blocking_io(&file).len(), 1);
    }

    #[test]
    fn test_test_section_is_ignored() {
        let file = scan(
            "async fn run() {}\n\n#[cfg(test)]\nmod tests {\n    use std::fs;\n\n    \
             #[tokio::test]\n    async fn reads() {\n        std::fs::read(\"x\").unwrap();\n        \
             tokio::time::sleep(d).await;\n    }\n}\n",
        );
        assert!(find_blocking_io(&file).is_empty());
        assert!(find_sleeps(&file).is_empty());
    }

    #[test]
    fn test_sleep_is_flagged() {
        let file = scan("async fn poll() {\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n");
        let violations = find_sleeps(&file);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].to_string().starts_with("sample.rs:2 - Sleep"));
    }

    #[test]
    fn test_backoff_detection() {
        let lines = [
            "async fn reconnect() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tracing::warn!(attempt, \"Retrying\");",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];
        assert!(is_backoff_context(&lines, 3));
    }

    #[test]
    fn test_commented_sleep_is_ignored() {
        let file = scan("async fn wait() {\n    // tokio::time::sleep(d).await;\n}\n");
        assert!(find_sleeps(&file).is_empty());
    }
}
