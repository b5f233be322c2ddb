//! Output matching
//!
//! Compares a block's expected lines against the lines its command actually
//! printed, pairwise and in order, and renders the block's post-output: the
//! text that would make the block pass, used for `.err` files and merges.

use std::fmt;

use crate::document::{terminated, CommandBlock, ExpectedLine, MatchMode};
use crate::session::{ActualLine, ExecutionResult};

/// Outcome of comparing one expected line with one actual line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    Match,
    Mismatch,
    /// Content matches but only one side ends without a line break
    EolMismatch,
}

/// One entry of a block-level diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// Expected and actual agree
    Same(String),
    /// Expected, missing from the actual output
    Missing(String),
    /// Actual, not expected
    Unexpected(String),
    /// The content matched but the `(no-eol)` state differs
    NoEol { line: String, expected: bool },
    /// The exit status differs. `actual` is `None` when the shell never
    /// reported one.
    ExitStatus { expected: i32, actual: Option<i32> },
}

/// Label used for exit status entries in block diffs
pub const EXIT_STATUS_LABEL: &str = "[exit status]";

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Same(s) => write!(f, " {}", s),
            DiffLine::Missing(s) => write!(f, "-{}", s),
            DiffLine::Unexpected(s) => write!(f, "+{}", s),
            DiffLine::NoEol { line, expected: true } => {
                write!(f, "\\ {}: expected no trailing newline", line)
            }
            DiffLine::NoEol { line, expected: false } => {
                write!(f, "\\ {}: unexpected missing trailing newline", line)
            }
            DiffLine::ExitStatus { expected, actual: Some(actual) } => {
                write!(f, "{} expected {}, got {}", EXIT_STATUS_LABEL, expected, actual)
            }
            DiffLine::ExitStatus { expected, actual: None } => {
                write!(f, "{} expected {}, got none", EXIT_STATUS_LABEL, expected)
            }
        }
    }
}

/// Result of comparing a whole block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockComparison {
    pub matched: bool,
    pub diff: Vec<DiffLine>,
    /// Expected output bodies, in order
    pub expected: Vec<String>,
    /// Rendered actual output bodies, in order
    pub actual: Vec<String>,
    /// The block's output lines as they should read for the block to pass,
    /// indent and terminators included. Command lines are not part of it.
    pub post_lines: Vec<String>,
}

/// Compare an expected line with an actual line.
pub fn match_line(expected: &ExpectedLine, actual: &ActualLine) -> LineMatch {
    if expected.body == actual.render() {
        return LineMatch::Match;
    }
    let content = match expected.mode {
        MatchMode::Exact => expected.text == actual.text,
        MatchMode::Glob => glob_matches(&expected.text, &actual.text),
        MatchMode::Regex => regex_matches(&expected.text, &actual.text),
        MatchMode::Escaped => unescape(&expected.text) == actual.text,
    };
    if !content {
        LineMatch::Mismatch
    } else if expected.no_trailing_newline != actual.no_eol {
        LineMatch::EolMismatch
    } else {
        LineMatch::Match
    }
}

/// Compare a block's expectations with what its command produced.
///
/// `indent` is the prefix used when rendering actual output lines.
pub fn compare_block(block: &CommandBlock, result: &ExecutionResult, indent: &str) -> BlockComparison {
    let expected = &block.expected_output;
    let actual = &result.output;

    let mut matched = true;
    let mut diff = Vec::new();
    let mut post_lines = Vec::new();

    for i in 0..expected.len().max(actual.len()) {
        match (expected.get(i), actual.get(i)) {
            (Some(e), Some(a)) => match match_line(e, a) {
                LineMatch::Match => {
                    diff.push(DiffLine::Same(e.body.clone()));
                    post_lines.push(terminated(&e.raw));
                }
                LineMatch::Mismatch => {
                    matched = false;
                    diff.push(DiffLine::Missing(e.body.clone()));
                    diff.push(DiffLine::Unexpected(a.render()));
                    post_lines.push(render_line(indent, a));
                }
                LineMatch::EolMismatch => {
                    matched = false;
                    diff.push(DiffLine::NoEol {
                        line: e.text.clone(),
                        expected: e.no_trailing_newline,
                    });
                    post_lines.push(render_line(indent, a));
                }
            },
            (Some(e), None) => {
                matched = false;
                diff.push(DiffLine::Missing(e.body.clone()));
            }
            (None, Some(a)) => {
                matched = false;
                diff.push(DiffLine::Unexpected(a.render()));
                post_lines.push(render_line(indent, a));
            }
            (None, None) => unreachable!(),
        }
    }

    let expected_code = block.expected_exit_code();
    match result.exit_code {
        Some(code) if code == expected_code => {
            if let Some(exit) = &block.expected_exit {
                post_lines.push(terminated(&exit.raw));
            }
        }
        Some(code) => {
            matched = false;
            diff.push(DiffLine::ExitStatus {
                expected: expected_code,
                actual: Some(code),
            });
            if code != 0 {
                post_lines.push(format!("{}[{}]\n", indent, code));
            }
        }
        // The command never ran to completion: the shell could not be
        // started, died earlier, or was killed.
        None => {
            matched = false;
            diff.push(DiffLine::ExitStatus {
                expected: expected_code,
                actual: None,
            });
            post_lines.push(format!("{}{} none\n", indent, EXIT_STATUS_LABEL));
        }
    }

    BlockComparison {
        matched,
        diff,
        expected: expected.iter().map(|e| e.body.clone()).collect(),
        actual: actual.iter().map(|a| a.render()).collect(),
        post_lines,
    }
}

/// Post-output of a block that is not executed: its lines pass through.
pub fn passthrough_block(block: &CommandBlock) -> BlockComparison {
    BlockComparison {
        matched: true,
        diff: block
            .expected_output
            .iter()
            .map(|e| DiffLine::Same(e.body.clone()))
            .collect(),
        expected: block.expected_output.iter().map(|e| e.body.clone()).collect(),
        actual: Vec::new(),
        post_lines: block
            .expected_output
            .iter()
            .map(|e| terminated(&e.raw))
            .chain(block.expected_exit.iter().map(|e| terminated(&e.raw)))
            .collect(),
    }
}

fn render_line(indent: &str, line: &ActualLine) -> String {
    format!("{}{}\n", indent, line.render())
}

/// Match `text` against a glob where `*` is any run of characters and `?`
/// a single character. `\*`, `\?` and `\\` stand for themselves.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let mut re = String::from("^(?:");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('*' | '?' | '\\')) => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push_str(")$");
    compile_regex(&re).map_or(false, |r| r.is_match(text))
}

/// Match `text` against a regular expression anchored at both ends.
/// An invalid pattern never matches.
pub fn regex_matches(pattern: &str, text: &str) -> bool {
    compile_regex(&format!("^(?:{})$", pattern)).map_or(false, |r| r.is_match(text))
}

/// Compile a pattern with a size limit to keep hostile patterns cheap.
fn compile_regex(pattern: &str) -> Option<regex::Regex> {
    regex::RegexBuilder::new(pattern)
        .size_limit(1 << 20)
        .build()
        .ok()
}

/// Whether a captured line has bytes that need `(esc)` to stay printable.
pub fn needs_escape(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_control() && c != '\n')
}

/// Escape control characters and backslashes.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`]. Unknown escapes are kept as written.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('x') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                let hex: String = lookahead.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 => {
                        out.push(char::from(byte));
                        chars = lookahead;
                    }
                    _ => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}
