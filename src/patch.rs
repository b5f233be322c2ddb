//! Patch reconciliation
//!
//! Writes a failing test's actual output back into the test file by
//! applying the whole-file unified diff produced by the runner. Either every
//! hunk applies against the file as it is now, or nothing is written.

use std::io::Write;
use std::path::Path;

use similar::TextDiff;
use tracing::{debug, info};

use crate::error::ScriptError;

/// Render a unified diff between two line sequences.
///
/// Lines must carry their terminators. Returns no lines when the sequences
/// are equal.
pub fn unified_diff(old: &[String], new: &[String], old_name: &str, new_name: &str) -> Vec<String> {
    if old == new {
        return Vec::new();
    }
    let old_text: String = old.concat();
    let new_text: String = new.concat();
    let diff = TextDiff::from_lines(&old_text, &new_text);
    let udiff = diff
        .unified_diff()
        .context_radius(3)
        .header(old_name, new_name)
        .to_string();
    udiff.split_inclusive('\n').map(str::to_string).collect()
}

/// One `@@ -a,b +c,d @@` hunk
#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    /// Body lines, each starting with ' ', '-' or '+'
    lines: Vec<String>,
}

/// Apply a unified diff to `original`, returning the patched text.
///
/// Context and removed lines must match the original exactly (line
/// terminators aside). The first hunk that does not fit aborts the whole
/// application.
pub fn apply(original: &str, diff: &[String]) -> Result<String, ScriptError> {
    let hunks = parse_hunks(diff)?;
    if hunks.is_empty() {
        return Err(ScriptError::patch("diff has no hunks"));
    }

    let source: Vec<&str> = original.split_inclusive('\n').collect();
    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;

    for (n, hunk) in hunks.iter().enumerate() {
        // A zero-length old range names the line *after* which to insert
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor || start > source.len() {
            return Err(ScriptError::patch(format!(
                "hunk {} does not apply: bad position {}",
                n + 1,
                hunk.old_start
            )));
        }
        for line in &source[cursor..start] {
            out.push_str(line);
        }
        cursor = start;

        for body in &hunk.lines {
            let (tag, text) = body.split_at(1);
            match tag {
                " " | "-" => {
                    let current = source.get(cursor).ok_or_else(|| {
                        ScriptError::patch(format!("hunk {} does not apply: file too short", n + 1))
                    })?;
                    if strip_eol(current) != strip_eol(text) {
                        return Err(ScriptError::patch(format!(
                            "hunk {} does not apply at line {}",
                            n + 1,
                            cursor + 1
                        )));
                    }
                    if tag == " " {
                        out.push_str(current);
                    }
                    cursor += 1;
                }
                "+" => {
                    out.push_str(strip_eol(text));
                    out.push('\n');
                }
                _ => {}
            }
        }
    }

    for line in &source[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Apply `diff` to the file at `path`, replacing it atomically.
///
/// The file is re-read first, so edits made since the test ran make the
/// merge fail instead of being overwritten.
pub fn merge_file(path: &Path, diff: &[String]) -> Result<(), ScriptError> {
    let name = path.display().to_string();
    let original = std::fs::read_to_string(path)
        .map_err(|e| ScriptError::patch(format!("failed to read: {}", e)).with_file(&name))?;
    let patched = apply(&original, diff).map_err(|e| e.with_file(&name))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(patched.as_bytes())?;
    tmp.flush()?;
    if let Ok(meta) = std::fs::metadata(path) {
        let _ = std::fs::set_permissions(tmp.path(), meta.permissions());
    }
    tmp.persist(path)
        .map_err(|e| ScriptError::patch(format!("failed to replace file: {}", e.error)).with_file(&name))?;

    info!(file = %name, "merged output");
    Ok(())
}

fn parse_hunks(diff: &[String]) -> Result<Vec<Hunk>, ScriptError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in diff {
        if let Some(header) = line.strip_prefix("@@ ") {
            let (old_start, old_len) = parse_range(header)?;
            hunks.push(Hunk {
                old_start,
                old_len,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            // File headers and anything else before the first hunk
            continue;
        };
        if line.starts_with(' ') || line.starts_with('-') || line.starts_with('+') {
            hunk.lines.push(line.clone());
        } else if line.starts_with('\\') {
            debug!(marker = %line.trim_end(), "ignoring diff marker");
        } else if line.trim().is_empty() {
            // An empty context line whose leading space was lost
            hunk.lines.push(format!(" {}", line));
        } else {
            return Err(ScriptError::patch(format!(
                "malformed diff line: {}",
                line.trim_end()
            )));
        }
    }
    Ok(hunks)
}

/// Parse the old-file range of a hunk header body (`-a,b +c,d @@`).
fn parse_range(header: &str) -> Result<(usize, usize), ScriptError> {
    let bad = || ScriptError::patch(format!("malformed hunk header: @@ {}", header.trim_end()));
    let old = header
        .split_whitespace()
        .next()
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(bad)?;
    let (start, len) = match old.split_once(',') {
        Some((start, len)) => (start, len),
        None => (old, "1"),
    };
    let start = start.parse().map_err(|_| bad())?;
    let len = len.parse().map_err(|_| bad())?;
    Ok((start, len))
}

fn strip_eol(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.split_inclusive('\n').map(str::to_string).collect()
    }

    #[test]
    fn test_unified_diff_equal_is_empty() {
        let a = lines("x\ny\n");
        assert!(unified_diff(&a, &a, "t", "t.err").is_empty());
    }

    #[test]
    fn test_unified_diff_headers() {
        let diff = unified_diff(&lines("  $ echo hi\n  bye\n"), &lines("  $ echo hi\n  hi\n"), "a.t", "a.t.err");
        assert_eq!(diff[0], "--- a.t\n");
        assert_eq!(diff[1], "+++ a.t.err\n");
        assert!(diff[2].starts_with("@@ -1,2 +1,2 @@"));
        assert!(diff.contains(&"-  bye\n".to_string()));
        assert!(diff.contains(&"+  hi\n".to_string()));
    }

    #[test]
    fn test_apply_round_trip() {
        let old = "intro\n  $ echo hi\n  bye\n\nmiddle\n1\n2\n3\n4\n5\n6\n  $ false\nend\n";
        let new = "intro\n  $ echo hi\n  hi\n\nmiddle\n1\n2\n3\n4\n5\n6\n  $ false\n  [1]\nend\n";
        let diff = unified_diff(&lines(old), &lines(new), "t", "t.err");
        assert_eq!(apply(old, &diff).unwrap(), new);
    }

    #[test]
    fn test_apply_insert_at_start_and_end() {
        let old = "a\nb\n";
        let new = "start\na\nb\nend\n";
        let diff = unified_diff(&lines(old), &lines(new), "t", "t.err");
        assert_eq!(apply(old, &diff).unwrap(), new);
    }

    #[test]
    fn test_apply_conflict_fails() {
        let old = "  $ echo hi\n  bye\n";
        let new = "  $ echo hi\n  hi\n";
        let diff = unified_diff(&lines(old), &lines(new), "t", "t.err");
        let edited = "  $ echo hello\n  bye\n";
        let err = apply(edited, &diff).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Patch);
    }

    #[test]
    fn test_apply_rejects_empty_and_malformed() {
        assert!(apply("x\n", &[]).is_err());
        let diff = lines("@@ -1 +1 @@\n-x\n+y\ngarbage\n");
        assert!(apply("x\n", &diff).is_err());
        let diff = lines("@@ -q +1 @@\n-x\n+y\n");
        assert!(apply("x\n", &diff).is_err());
    }

    #[test]
    fn test_apply_single_line_range() {
        let diff = lines("--- t\n+++ t.err\n@@ -1 +1 @@\n-x\n+y\n");
        assert_eq!(apply("x\n", &diff).unwrap(), "y\n");
    }

    #[test]
    fn test_merge_file_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basic.t");
        let old = "  $ echo hi\n  bye\n";
        std::fs::write(&path, old).unwrap();
        let diff = unified_diff(&lines(old), &lines("  $ echo hi\n  hi\n"), "basic.t", "basic.t.err");

        merge_file(&path, &diff).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "  $ echo hi\n  hi\n");

        // Applying again no longer fits; the file is left alone
        let err = merge_file(&path, &diff).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Patch);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "  $ echo hi\n  hi\n");
    }
}
