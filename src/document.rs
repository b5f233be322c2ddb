//! Test document model
//!
//! A test document is kept as an ordered list of segments holding the raw
//! text they were parsed from, so that joining every segment's raw lines
//! gives back the original file byte for byte.

/// How an expected output line is compared against the actual line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Byte-for-byte equality
    Exact,
    /// `*` / `?` wildcards, whole-line anchored (`(glob)`)
    Glob,
    /// Whole-line anchored regular expression (`(re)`)
    Regex,
    /// Backslash escapes for non-printable bytes (`(esc)`)
    Escaped,
}

impl MatchMode {
    /// The annotation keyword selecting this mode, if any.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            MatchMode::Exact => None,
            MatchMode::Glob => Some("glob"),
            MatchMode::Regex => Some("re"),
            MatchMode::Escaped => Some("esc"),
        }
    }
}

/// One expected output line of a command block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedLine {
    /// The line as it appears in the file, indent and line terminator included
    pub raw: String,
    /// The line with the indent and terminator removed, annotations kept
    pub body: String,
    /// The text to compare, annotations stripped
    pub text: String,
    pub mode: MatchMode,
    /// `(no-eol)`: the actual output must end without a line terminator here
    pub no_trailing_newline: bool,
}

/// One `$ ` or `> ` line of a command block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The line as it appears in the file
    pub raw: String,
    /// Shell text after the `$ ` / `> ` marker, without the line terminator
    pub text: String,
}

/// A trailing `[N]` line declaring the expected exit status of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitLine {
    pub raw: String,
    pub code: i32,
}

/// Shell command lines plus the output expected from them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBlock {
    /// 1-based line number of the first line of the block
    pub line: usize,
    /// The `$ ` line followed by its `> ` continuations. Empty for indented
    /// output that follows no command.
    pub command_lines: Vec<CommandLine>,
    pub expected_output: Vec<ExpectedLine>,
    pub expected_exit: Option<ExitLine>,
}

impl CommandBlock {
    /// Whether the block has a command to run.
    pub fn is_executable(&self) -> bool {
        !self.command_lines.is_empty()
    }

    /// The shell script for this block: command and continuation lines
    /// joined with line breaks.
    pub fn script(&self) -> String {
        let mut script = String::new();
        for line in &self.command_lines {
            script.push_str(&line.text);
            script.push('\n');
        }
        script
    }

    /// The exit status the block expects, 0 unless an `[N]` line is present.
    pub fn expected_exit_code(&self) -> i32 {
        self.expected_exit.as_ref().map_or(0, |e| e.code)
    }

    /// Raw lines of the block in file order.
    pub fn raw_lines(&self) -> impl Iterator<Item = &str> {
        self.command_lines
            .iter()
            .map(|l| l.raw.as_str())
            .chain(self.expected_output.iter().map(|l| l.raw.as_str()))
            .chain(self.expected_exit.iter().map(|l| l.raw.as_str()))
    }
}

/// A piece of a test document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Prose, copied through unchanged and never executed
    Narrative { lines: Vec<String> },
    Command(CommandBlock),
}

impl Segment {
    pub fn raw_lines(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Segment::Narrative { lines } => Box::new(lines.iter().map(|l| l.as_str())),
            Segment::Command(block) => Box::new(block.raw_lines()),
        }
    }
}

/// A parsed test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDocument {
    /// Indentation width the document was parsed with
    pub indent: usize,
    pub segments: Vec<Segment>,
}

impl TestDocument {
    /// Iterate over the command blocks, in document order.
    pub fn command_blocks(&self) -> impl Iterator<Item = &CommandBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Command(block) => Some(block),
            Segment::Narrative { .. } => None,
        })
    }

    /// Whether any block has a command to run.
    pub fn has_commands(&self) -> bool {
        self.command_blocks().any(|b| b.is_executable())
    }

    /// The original text, reassembled from the segments.
    pub fn to_text(&self) -> String {
        self.segments.iter().flat_map(|s| s.raw_lines()).collect()
    }

    /// The document's lines, each terminated by a line break.
    ///
    /// A final line without a terminator gets one, so line-based diffs of
    /// the document never need a "no newline at end of file" marker.
    pub fn lines(&self) -> Vec<String> {
        self.segments
            .iter()
            .flat_map(|s| s.raw_lines())
            .map(terminated)
            .collect()
    }

    /// The indent prefix of command and output lines.
    pub fn indent_prefix(&self) -> String {
        " ".repeat(self.indent)
    }
}

/// Return `line` with a trailing `\n`, adding one if it is missing.
pub(crate) fn terminated(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{}\n", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    #[test]
    fn test_lines_terminate_last_line() {
        let doc = parse_document("intro\n  $ echo hi\n  hi", 2);
        assert_eq!(doc.to_text(), "intro\n  $ echo hi\n  hi");
        assert_eq!(doc.lines(), vec!["intro\n", "  $ echo hi\n", "  hi\n"]);
    }

    #[test]
    fn test_block_script_and_exit() {
        let doc = parse_document("  $ echo a \\\n  > b\n  a b\n  [2]\n", 2);
        let block = doc.command_blocks().next().unwrap();
        assert_eq!(block.script(), "echo a \\\nb\n");
        assert_eq!(block.expected_exit_code(), 2);
        assert_eq!(block.raw_lines().count(), 4);
        assert!(doc.has_commands());
    }

    #[test]
    fn test_orphan_block_is_not_executable() {
        let doc = parse_document("  stray\n", 2);
        assert_eq!(doc.command_blocks().count(), 1);
        assert!(!doc.has_commands());
        assert_eq!(doc.indent_prefix(), "  ");
        assert_eq!(MatchMode::Glob.keyword(), Some("glob"));
        assert_eq!(MatchMode::Exact.keyword(), None);
    }
}
