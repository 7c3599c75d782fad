//! Shared helpers for the portage crate.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static CAMEL_BOUNDARY_A: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
static CAMEL_BOUNDARY_B: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

/// Write `content` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. Readers never observe a partial record.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Path has no parent directory: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Convert a CamelCase or mixedCase identifier to snake_case.
pub fn to_snake(s: &str) -> String {
    let s = CAMEL_BOUNDARY_A.replace_all(s, "${1}_${2}");
    let s = CAMEL_BOUNDARY_B.replace_all(&s, "${1}_${2}");
    s.to_lowercase()
}

/// Convert a CamelCase or mixedCase identifier to kebab-case.
pub fn to_kebab(s: &str) -> String {
    to_snake(s).replace('_', "-")
}

/// Slug suitable for filenames: lowercase, non-word runs collapsed to `-`.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_to_snake() {
        assert_eq!(to_snake("ActionHistory"), "action_history");
        assert_eq!(to_snake("already_snake"), "already_snake");
        assert_eq!(to_snake("Single"), "single");
    }

    #[test]
    fn test_to_kebab() {
        assert_eq!(to_kebab("ActionHistory"), "action-history");
    }

    #[test]
    fn test_slug_collapses_punctuation() {
        assert_eq!(slug("Action History!"), "action-history");
        assert_eq!(slug("  spaced  out  "), "spaced-out");
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/file.json");
        write_atomic(&path, "{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.json");
        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
