//! Option resolution
//!
//! Settings come from three places: the command line, extra arguments in
//! the `SHELLTEST` environment variable, and a TOML file named by
//! `SHELLTESTRC` (default `.shelltestrc`). The command line wins; boolean
//! flags set anywhere stay set.
//!
//! ```toml
//! [shelltest]
//! verbose = true
//! shell = "bash"
//! shell-opts = "--norc"
//! indent = 4
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ScriptError;
use crate::report::{Answer, PromptPolicy, ReportConfig};
use crate::runner::RunConfig;

/// Config file read when `SHELLTESTRC` is unset
pub const DEFAULT_CONFIG_FILE: &str = ".shelltestrc";

/// The `[shelltest]` table of a config file
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSettings {
    pub quiet: Option<bool>,
    pub verbose: Option<bool>,
    pub interactive: Option<bool>,
    pub debug: Option<bool>,
    pub yes: Option<bool>,
    pub no: Option<bool>,
    #[serde(alias = "preserve_env")]
    pub preserve_env: Option<bool>,
    #[serde(alias = "keep_tmpdir")]
    pub keep_tmpdir: Option<bool>,
    pub shell: Option<String>,
    #[serde(alias = "shell_opts")]
    pub shell_opts: Option<String>,
    pub indent: Option<usize>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    shelltest: Option<FileSettings>,
}

/// Parse config file text.
pub fn parse_file(text: &str) -> Result<FileSettings, ScriptError> {
    let file: ConfigFile =
        toml::from_str(text).map_err(|e| ScriptError::config(format!("invalid config: {}", e)))?;
    Ok(file.shelltest.unwrap_or_default())
}

/// Load the config file at `path`; a missing file yields no settings.
pub fn load_file(path: &Path) -> Result<FileSettings, ScriptError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file");
            return Ok(FileSettings::default());
        }
        Err(e) => return Err(ScriptError::config(e.to_string()).with_file(path.display().to_string())),
    };
    parse_file(&text).map_err(|e| e.with_file(path.display().to_string()))
}

/// Path of the config file: `$SHELLTESTRC` or `.shelltestrc`, expanded.
pub fn config_path() -> PathBuf {
    let raw = std::env::var("SHELLTESTRC").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    PathBuf::from(expand_path(&raw, &|key| std::env::var(key).ok()))
}

/// Shell-split the arguments held in environment variable `var`.
pub fn env_args(var: &str) -> Result<Vec<String>, ScriptError> {
    match std::env::var(var) {
        Ok(value) => split_args(&value)
            .ok_or_else(|| ScriptError::config(format!("{}: unbalanced quotes", var))),
        Err(_) => Ok(Vec::new()),
    }
}

fn split_args(value: &str) -> Option<Vec<String>> {
    shlex::split(value)
}

/// Fully resolved options for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub tests: Vec<PathBuf>,
    pub quiet: bool,
    pub verbose: bool,
    pub interactive: bool,
    pub debug: bool,
    pub yes: bool,
    pub no: bool,
    pub preserve_env: bool,
    pub keep_tmpdir: bool,
    pub shell: Option<String>,
    pub shell_opts: Option<String>,
    pub indent: Option<usize>,
    pub timeout: Option<u64>,
}

impl Settings {
    /// Fill in what the command line left unset from `file`.
    pub fn merged(mut self, file: &FileSettings) -> Self {
        let flag = |v: Option<bool>| v.unwrap_or(false);
        self.quiet |= flag(file.quiet);
        self.verbose |= flag(file.verbose);
        self.interactive |= flag(file.interactive);
        self.debug |= flag(file.debug);
        self.yes |= flag(file.yes);
        self.no |= flag(file.no);
        self.preserve_env |= flag(file.preserve_env);
        self.keep_tmpdir |= flag(file.keep_tmpdir);
        if self.shell.is_none() {
            self.shell = file.shell.clone();
        }
        if self.shell_opts.is_none() {
            self.shell_opts = file.shell_opts.clone();
        }
        if self.indent.is_none() {
            self.indent = file.indent;
        }
        if self.timeout.is_none() {
            self.timeout = file.timeout;
        }
        self
    }

    /// First pair of options that may not be combined.
    pub fn conflict(&self) -> Option<(&'static str, &'static str)> {
        let pairs = [
            (self.yes && self.no, ("--yes", "--no")),
            (self.quiet && self.interactive, ("--quiet", "--interactive")),
            (self.debug && self.quiet, ("--debug", "--quiet")),
            (self.debug && self.interactive, ("--debug", "--interactive")),
            (self.debug && self.verbose, ("--debug", "--verbose")),
        ];
        pairs.into_iter().find(|(set, _)| *set).map(|(_, names)| names)
    }

    pub fn validate(&self) -> Result<(), ScriptError> {
        if let Some((a, b)) = self.conflict() {
            return Err(ScriptError::config(format!(
                "options {} and {} are mutually exclusive",
                a, b
            )));
        }
        if self.indent == Some(0) {
            return Err(ScriptError::config("--indent must be at least 1"));
        }
        if self.timeout == Some(0) {
            return Err(ScriptError::config("--timeout must be at least 1 second"));
        }
        Ok(())
    }

    pub fn prompt_policy(&self) -> PromptPolicy {
        if self.yes {
            PromptPolicy::AutoYes
        } else if self.no {
            PromptPolicy::AutoNo
        } else {
            PromptPolicy::Ask { default: Answer::No }
        }
    }

    pub fn report_config(&self) -> ReportConfig {
        ReportConfig {
            quiet: self.quiet,
            verbose: self.verbose,
            interactive: self.interactive,
            prompt: self.prompt_policy(),
        }
    }

    /// Resolve the shell executable and its arguments.
    pub fn shell_command(&self) -> Result<(PathBuf, Vec<String>), ScriptError> {
        let name = self.shell.as_deref().unwrap_or("/bin/sh");
        let path_var = std::env::var("PATH").unwrap_or_default();
        let shell = which(name, &path_var)
            .ok_or_else(|| ScriptError::config(format!("shell not found: {}", name)))?;
        let args = match &self.shell_opts {
            Some(opts) => split_args(opts)
                .ok_or_else(|| ScriptError::config("--shell-opts: unbalanced quotes"))?,
            None => Vec::new(),
        };
        Ok((shell, args))
    }

    /// Runner configuration for these settings.
    pub fn run_config(&self) -> Result<RunConfig, ScriptError> {
        let (shell, shell_args) = self.shell_command()?;
        Ok(RunConfig {
            shell,
            shell_args,
            indent: self.indent.unwrap_or(2),
            debug: self.debug,
            timeout: self.timeout.map(Duration::from_secs),
        })
    }
}

/// Locate `command` the way a shell would: names containing a separator are
/// taken as paths, anything else is searched for in `path_var`.
pub fn which(command: &str, path_var: &str) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let path = PathBuf::from(command);
        return is_executable(&path).then_some(path);
    }
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references; unknown variables
/// expand to nothing.
pub fn expand_path(s: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    let rest = match s.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            result.push_str(&lookup("HOME").unwrap_or_else(|| "~".to_string()));
            rest
        }
        _ => s,
    };

    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        if name.is_empty() {
            result.push('$');
        } else if let Some(value) = lookup(&name) {
            result.push_str(&value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_keys() {
        let settings = parse_file(
            "[shelltest]\nverbose = true\nshell-opts = \"-e\"\nkeep_tmpdir = true\nindent = 4\n",
        )
        .unwrap();
        assert_eq!(settings.verbose, Some(true));
        assert_eq!(settings.shell_opts.as_deref(), Some("-e"));
        assert_eq!(settings.keep_tmpdir, Some(true));
        assert_eq!(settings.indent, Some(4));
        assert_eq!(settings.quiet, None);
    }

    #[test]
    fn test_parse_file_without_table() {
        assert_eq!(parse_file("").unwrap(), FileSettings::default());
        assert_eq!(parse_file("[other]\nx = 1\n").unwrap(), FileSettings::default());
    }

    #[test]
    fn test_parse_file_errors() {
        let err = parse_file("[shelltest]\nindent = \"wide\"\n").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Configuration);
        assert!(parse_file("[shelltest]\nbogus = 1\n").is_err());
        assert!(parse_file("not toml [").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file(&dir.path().join("absent")).unwrap();
        assert_eq!(settings, FileSettings::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".shelltestrc");
        std::fs::write(&path, "[shelltest]\nquiet = true\n").unwrap();
        assert_eq!(load_file(&path).unwrap().quiet, Some(true));
    }

    #[test]
    fn test_command_line_wins() {
        let cli = Settings {
            shell: Some("bash".into()),
            verbose: false,
            ..Default::default()
        };
        let file = FileSettings {
            shell: Some("zsh".into()),
            verbose: Some(true),
            indent: Some(4),
            ..Default::default()
        };
        let merged = cli.merged(&file);
        assert_eq!(merged.shell.as_deref(), Some("bash"));
        assert!(merged.verbose);
        assert_eq!(merged.indent, Some(4));
    }

    #[test]
    fn test_conflicts() {
        let s = Settings {
            yes: true,
            no: true,
            ..Default::default()
        };
        assert_eq!(s.conflict(), Some(("--yes", "--no")));
        let s = Settings {
            debug: true,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(s.conflict(), Some(("--debug", "--verbose")));
        let err = s.validate().unwrap_err();
        assert_eq!(err.message, "options --debug and --verbose are mutually exclusive");
        assert_eq!(Settings::default().conflict(), None);
    }

    #[test]
    fn test_zero_values_rejected() {
        let s = Settings {
            timeout: Some(0),
            ..Default::default()
        };
        assert!(s.validate().is_err());
        let s = Settings {
            indent: Some(0),
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_prompt_policy() {
        let s = Settings {
            yes: true,
            ..Default::default()
        };
        assert_eq!(s.prompt_policy(), PromptPolicy::AutoYes);
        assert_eq!(
            Settings::default().prompt_policy(),
            PromptPolicy::Ask { default: Answer::No }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_command() {
        let s = Settings {
            shell: Some("sh".into()),
            shell_opts: Some("-e -u".into()),
            ..Default::default()
        };
        let (shell, args) = s.shell_command().unwrap();
        assert!(shell.ends_with("sh"));
        assert_eq!(args, vec!["-e", "-u"]);

        let s = Settings {
            shell: Some("no-such-shell-here".into()),
            ..Default::default()
        };
        let err = s.shell_command().unwrap_err();
        assert_eq!(err.message, "shell not found: no-such-shell-here");
    }

    #[cfg(unix)]
    #[test]
    fn test_which() {
        assert_eq!(which("/bin/sh", ""), Some(PathBuf::from("/bin/sh")));
        assert!(which("sh", "/bin").is_some());
        assert_eq!(which("sh", ""), None);
    }

    #[test]
    fn test_expand_path() {
        let lookup = |key: &str| match key {
            "HOME" => Some("/home/u".to_string()),
            "CFG" => Some("cfg".to_string()),
            _ => None,
        };
        assert_eq!(expand_path("~/.shelltestrc", &lookup), "/home/u/.shelltestrc");
        assert_eq!(expand_path("$CFG/rc", &lookup), "cfg/rc");
        assert_eq!(expand_path("${CFG}rc", &lookup), "cfgrc");
        assert_eq!(expand_path("$NOPE/rc", &lookup), "/rc");
        assert_eq!(expand_path("a~b$", &lookup), "a~b$");
    }
}
