//! External tool integration
//!
//! The pipeline delegates the heavy lifting to standard command line tools:
//! `du` for size estimation, `tar` for archiving and `gpg` for encryption.
//! Each one sits behind a small async trait so the orchestrator can be driven
//! with other implementations in tests.

use std::ffi::{OsStr, OsString};
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

pub mod du;
pub mod gpg;
pub mod tar;

pub use du::{DiskUsage, PathSize, SizeEstimate, SizeReport};
pub use gpg::{Encryptor, GpgEncryptor};
pub use tar::{Archiver, TarArchiver};

/// Errors raised while running an external tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", describe_exit(*code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from `{program}`: {output:?}")]
    UnexpectedOutput { program: String, output: String },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// A single invocation of an external program
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
}

impl ToolCommand {
    /// Start building an invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        command
    }

    /// Run to completion and return stdout
    pub async fn output(&self) -> Result<String, ToolError> {
        debug!(program = %self.program, args = ?self.args, "Running external tool");
        let output = self.command().output().await;
        self.check(output)
    }

    /// Spawn without waiting; stdout is discarded and stderr captured
    pub fn spawn(&self) -> Result<Child, ToolError> {
        debug!(program = %self.program, args = ?self.args, "Spawning external tool");
        self.command()
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Turn the result of a finished process into stdout or a [`ToolError`]
    pub fn check(&self, output: std::io::Result<Output>) -> Result<String, ToolError> {
        let output = output.map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `--exclude=<pattern>` arguments understood by both `du` and `tar`
pub fn exclusion_args(ignore: &[String]) -> Vec<String> {
    ignore
        .iter()
        .map(|pattern| format!("--exclude={}", pattern))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_args() {
        let ignore = vec!["*.log".to_string(), "node_modules".to_string()];
        assert_eq!(
            exclusion_args(&ignore),
            vec!["--exclude=*.log", "--exclude=node_modules"]
        );
        assert!(exclusion_args(&[]).is_empty());
    }

    #[test]
    fn test_failed_error_display() {
        let err = ToolError::Failed {
            program: "tar".to_string(),
            code: Some(2),
            stderr: "Cannot stat".to_string(),
        };
        assert_eq!(err.to_string(), "`tar` exited with status 2: Cannot stat");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = ToolCommand::new("sss-backup-no-such-program")
            .arg("--version")
            .output()
            .await;
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failed_error() {
        let result = ToolCommand::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .output()
            .await;
        match result {
            Err(ToolError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
