//! Test document parser
//!
//! Recognizes the transcript syntax:
//! - `<indent>$ ` starts a command block
//! - `<indent>> ` continues the command on the previous line
//! - other `<indent>`-prefixed lines after a command are its expected output
//! - a final `<indent>[N]` line declares the expected exit status
//! - everything else is narrative
//!
//! Expected output lines may end in annotations, each preceded by a space:
//! `(glob)`, `(re)`, `(esc)` select how the line is compared and `(no-eol)`
//! says the output ends there without a line break. Anything else in
//! parentheses is literal text. Parsing never fails.

use crate::document::{
    CommandBlock, CommandLine, ExitLine, ExpectedLine, MatchMode, Segment, TestDocument,
};

/// Annotations that select a match mode, checked from the end of the line
const MODE_ANNOTATIONS: &[(&str, MatchMode)] = &[
    (" (glob)", MatchMode::Glob),
    (" (re)", MatchMode::Regex),
    (" (esc)", MatchMode::Escaped),
];

const NO_EOL_ANNOTATION: &str = " (no-eol)";

/// Parse a test document.
///
/// `indent` is the number of spaces before `$ `, `> ` and output lines.
pub fn parse_document(content: &str, indent: usize) -> TestDocument {
    let prefix = " ".repeat(indent);
    let command_marker = format!("{}$ ", prefix);
    let continuation_marker = format!("{}> ", prefix);

    let mut segments = Vec::new();
    let mut narrative: Vec<String> = Vec::new();
    let mut block: Option<CommandBlock> = None;

    for (i, raw) in content.split_inclusive('\n').enumerate() {
        let line_number = i + 1;
        let line = raw.strip_suffix('\n').unwrap_or(raw);

        if let Some(text) = line.strip_prefix(&command_marker) {
            flush_narrative(&mut segments, &mut narrative);
            flush_block(&mut segments, &mut block);
            block = Some(CommandBlock {
                line: line_number,
                command_lines: vec![CommandLine {
                    raw: raw.to_string(),
                    text: text.to_string(),
                }],
                expected_output: Vec::new(),
                expected_exit: None,
            });
            continue;
        }

        if let Some(current) = block.as_mut() {
            // A continuation only extends a command whose output hasn't started
            if current.is_executable() && current.expected_output.is_empty() {
                if let Some(text) = line.strip_prefix(&continuation_marker) {
                    current.command_lines.push(CommandLine {
                        raw: raw.to_string(),
                        text: text.to_string(),
                    });
                    continue;
                }
            }
        }

        if let Some(body) = line.strip_prefix(&prefix) {
            let expected = parse_expected_line(raw, body);
            match block.as_mut() {
                Some(current) => current.expected_output.push(expected),
                None => {
                    // Output with no command above it
                    flush_narrative(&mut segments, &mut narrative);
                    block = Some(CommandBlock {
                        line: line_number,
                        command_lines: Vec::new(),
                        expected_output: vec![expected],
                        expected_exit: None,
                    });
                }
            }
            continue;
        }

        flush_block(&mut segments, &mut block);
        narrative.push(raw.to_string());
    }

    flush_narrative(&mut segments, &mut narrative);
    flush_block(&mut segments, &mut block);

    TestDocument { indent, segments }
}

fn flush_narrative(segments: &mut Vec<Segment>, narrative: &mut Vec<String>) {
    if !narrative.is_empty() {
        segments.push(Segment::Narrative {
            lines: std::mem::take(narrative),
        });
    }
}

fn flush_block(segments: &mut Vec<Segment>, block: &mut Option<CommandBlock>) {
    if let Some(mut finished) = block.take() {
        if finished.is_executable() {
            take_exit_line(&mut finished);
        }
        segments.push(Segment::Command(finished));
    }
}

/// Move a trailing `[N]` output line into `expected_exit`.
fn take_exit_line(block: &mut CommandBlock) {
    let code = match block.expected_output.last() {
        Some(last) if last.mode == MatchMode::Exact && !last.no_trailing_newline => {
            parse_exit_code(&last.text)
        }
        _ => None,
    };
    if let Some(code) = code {
        if let Some(last) = block.expected_output.pop() {
            block.expected_exit = Some(ExitLine { raw: last.raw, code });
        }
    }
}

/// Parse `[N]`, returning N.
pub fn parse_exit_code(text: &str) -> Option<i32> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner.parse().ok()
}

/// Split the trailing annotations off an expected output line.
///
/// Annotations are consumed right to left: at most one `(no-eol)` and at
/// most one mode annotation. A repeated or unknown annotation stops the
/// scan and stays part of the text.
pub fn parse_expected_line(raw: &str, body: &str) -> ExpectedLine {
    let mut text = body;
    let mut mode: Option<MatchMode> = None;
    let mut no_eol = false;

    'scan: loop {
        if !no_eol {
            if let Some(rest) = text.strip_suffix(NO_EOL_ANNOTATION) {
                text = rest;
                no_eol = true;
                continue;
            }
        }
        if mode.is_none() {
            for (annotation, m) in MODE_ANNOTATIONS {
                if let Some(rest) = text.strip_suffix(annotation) {
                    text = rest;
                    mode = Some(*m);
                    continue 'scan;
                }
            }
        }
        break;
    }

    ExpectedLine {
        raw: raw.to_string(),
        body: body.to_string(),
        text: text.to_string(),
        mode: mode.unwrap_or(MatchMode::Exact),
        no_trailing_newline: no_eol,
    }
}
