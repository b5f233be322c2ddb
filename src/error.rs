//! Engine errors
//!
//! Only conditions that stop a file (or the whole run) are errors. An output
//! mismatch is a normal, failing [`TestOutcome`](crate::TestOutcome), and an
//! unknown annotation is literal text.

use std::fmt;

/// The kind of engine error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid settings: missing shell, mutually exclusive options, bad values.
    /// Fatal, reported before any test runs.
    Configuration,
    /// A named test path does not exist
    Discovery,
    /// The shell subprocess could not be spawned or talked to
    Session,
    /// A merge of actual output back into a test file could not be applied.
    /// The file is left untouched.
    Patch,
    /// IO error
    Io,
}

/// An engine error with optional file/line context
#[derive(Debug)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }

    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Discovery, msg)
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, msg)
    }

    pub fn patch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Patch, msg)
    }

    /// Errors that abort the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration | ErrorKind::Discovery)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}
