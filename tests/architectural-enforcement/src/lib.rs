//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce the concurrency
//! rules of the Read Until client:
//! - No sleeping in the client core (the send path waits on an interval)
//! - Short, non-poisoning critical sections (`parking_lot`, never `std::sync`)
//! - No blocking I/O inside async code
//! - No `unwrap()`/`expect()` in library code
//!
//! The helpers here scan production source lines; test modules (everything
//! from a `#[cfg(test)]` marker to the end of the file) are skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// One production source line
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
    /// Whether the enclosing function is `async`
    pub in_async_fn: bool,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Production lines of every `.rs` file under `dir` (relative to the root)
#[must_use]
pub fn production_lines(dir: &str) -> Vec<SourceLine> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(&path)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            lines.extend(scan_file(entry.path()));
        }
    }
    lines
}

fn scan_file(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    scan_source(path, &content)
}

/// Split `content` into production lines
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> Vec<SourceLine> {
    let all: Vec<&str> = content.lines().collect();
    let mut lines = Vec::new();

    for (idx, line) in all.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line).to_string();
        lines.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            in_async_fn: is_in_async_function(&all, idx),
        });
    }
    lines
}

/// Whether the line at `current_idx` sits in an `async fn` or async block
#[must_use]
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") || line.contains("async {") || line.contains("async move {") {
            return true;
        }

        if (line.starts_with("fn ") || line.contains(" fn ")) && !line.contains("async") {
            return false;
        }

        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_detection() {
        let code = vec![
            "pub async fn drive() {",
            "    let contents = std::fs::read_to_string(\"file.txt\");",
            "}",
            "fn load() {",
            "    let contents = std::fs::read_to_string(\"config.toml\");",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_test_modules_skipped() {
        let source = "fn a() {}\n// note\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n";
        let lines = scan_source(Path::new("x.rs"), source);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 1);
    }

    #[test]
    fn test_workspace_root_contains_client() {
        assert!(workspace_root().join("client").join("core").exists());
    }
}
