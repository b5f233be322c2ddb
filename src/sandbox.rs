//! Run sandbox
//!
//! A private temporary root shared by all test files of one run, plus the
//! environment every shell is started with. The parent process environment
//! is only read, never changed: scrubbing happens on the map handed to the
//! shell.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ScriptError;

/// Variables pinned for reproducible output unless the environment is preserved
const PINNED_VARS: &[(&str, &str)] = &[
    ("LANG", "C"),
    ("LC_ALL", "C"),
    ("LANGUAGE", "C"),
    ("TZ", "GMT"),
    ("CDPATH", ""),
    ("COLUMNS", "80"),
];

/// Variables removed unless the environment is preserved
const SCRUBBED_VARS: &[&str] = &["GREP_OPTIONS"];

/// Temporary root and shell environment for one run
pub struct Sandbox {
    dir: tempfile::TempDir,
    env: Vec<(String, String)>,
}

impl Sandbox {
    /// Create a sandbox under the system temp directory.
    ///
    /// With `clean_env`, locale, time zone and terminal width are pinned.
    pub fn create(clean_env: bool) -> Result<Self, ScriptError> {
        let dir = tempfile::Builder::new().prefix("shelltest-").tempdir()?;
        Self::with_dir(dir, clean_env)
    }

    /// Create a sandbox under `parent`.
    pub fn create_in(parent: &Path, clean_env: bool) -> Result<Self, ScriptError> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix("shelltest-")
            .tempdir_in(parent)?;
        Self::with_dir(dir, clean_env)
    }

    fn with_dir(dir: tempfile::TempDir, clean_env: bool) -> Result<Self, ScriptError> {
        let tmp = dir.path().join("tmp");
        std::fs::create_dir(&tmp)?;

        let mut env: Vec<(String, String)> = std::env::vars().collect();
        if clean_env {
            for (key, value) in PINNED_VARS {
                set_var(&mut env, key, *value);
            }
            for key in SCRUBBED_VARS {
                remove_var(&mut env, key);
            }
        }
        set_var(&mut env, "SHELLTEST_TEMP", dir.path().to_string_lossy());
        let tmp = tmp.to_string_lossy().into_owned();
        for key in ["TMPDIR", "TEMP", "TMP"] {
            set_var(&mut env, key, &tmp);
        }

        debug!(root = %dir.path().display(), clean_env, "sandbox created");
        Ok(Self { dir, env })
    }

    /// The sandbox root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The environment shells start from.
    pub fn environ(&self) -> &[(String, String)] {
        &self.env
    }

    /// Override a variable for every shell of the run.
    pub fn setenv(&mut self, key: &str, value: impl AsRef<str>) {
        set_var(&mut self.env, key, value);
    }

    /// Look up a variable of the shell environment.
    pub fn getenv(&self, key: &str) -> Option<&str> {
        get_var(&self.env, key)
    }

    /// Remove the sandbox, or keep it on disk and return its path.
    pub fn finish(self, keep: bool) -> Result<Option<PathBuf>, ScriptError> {
        if keep {
            let path = self.dir.path().to_path_buf();
            std::mem::forget(self.dir); // leak to preserve
            Ok(Some(path))
        } else {
            self.dir.close()?;
            Ok(None)
        }
    }
}

/// Create an exclusive working directory for `test` under `root`.
///
/// The directory is named after the test file; a numeric suffix is added
/// when two tests share a name.
pub fn create_workdir(root: &Path, test: &Path) -> Result<PathBuf, ScriptError> {
    let name = test
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_string());

    let mut candidate = root.join(&name);
    let mut n = 1;
    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                n += 1;
                candidate = root.join(format!("{}-{}", name, n));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Set `key` in an ordered environment list, replacing an existing entry.
pub fn set_var(env: &mut Vec<(String, String)>, key: &str, value: impl AsRef<str>) {
    let value = value.as_ref().to_string();
    match env.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => env.push((key.to_string(), value)),
    }
}

pub fn get_var<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

pub fn remove_var(env: &mut Vec<(String, String)>, key: &str) {
    env.retain(|(k, _)| k != key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_environment() {
        let parent = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create_in(parent.path(), true).unwrap();
        assert_eq!(sandbox.getenv("LANG"), Some("C"));
        assert_eq!(sandbox.getenv("TZ"), Some("GMT"));
        assert_eq!(sandbox.getenv("COLUMNS"), Some("80"));
        assert_eq!(sandbox.getenv("GREP_OPTIONS"), None);
        let tmp = sandbox.path().join("tmp");
        assert!(tmp.is_dir());
        assert_eq!(sandbox.getenv("TMPDIR"), tmp.to_str());
        assert_eq!(sandbox.getenv("SHELLTEST_TEMP"), sandbox.path().to_str());
    }

    #[test]
    fn test_preserved_environment_keeps_values() {
        let parent = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create_in(parent.path(), false).unwrap();
        assert_eq!(sandbox.getenv("PATH"), std::env::var("PATH").ok().as_deref());
        assert!(sandbox.getenv("SHELLTEST_TEMP").is_some());
    }

    #[test]
    fn test_setenv_replaces() {
        let mut env = vec![("A".to_string(), "1".to_string())];
        set_var(&mut env, "A", "2");
        set_var(&mut env, "B", "3");
        assert_eq!(env.len(), 2);
        assert_eq!(get_var(&env, "A"), Some("2"));
        remove_var(&mut env, "A");
        assert_eq!(get_var(&env, "A"), None);
    }

    #[test]
    fn test_workdirs_are_exclusive() {
        let root = tempfile::tempdir().unwrap();
        let a = create_workdir(root.path(), Path::new("x/basic.t")).unwrap();
        let b = create_workdir(root.path(), Path::new("y/basic.t")).unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("basic.t"));
        assert!(b.ends_with("basic.t-2"));
    }

    #[test]
    fn test_finish_removes_or_keeps() {
        let parent = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create_in(parent.path(), true).unwrap();
        let path = sandbox.path().to_path_buf();
        assert_eq!(sandbox.finish(false).unwrap(), None);
        assert!(!path.exists());

        let sandbox = Sandbox::create_in(parent.path(), true).unwrap();
        let kept = sandbox.finish(true).unwrap().unwrap();
        assert!(kept.is_dir());
    }
}
