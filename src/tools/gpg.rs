//! Encryption with `gpg`

use std::path::Path;

use async_trait::async_trait;
use tracing::error;

use super::ToolCommand;
use crate::{BackupError, Result};

/// Encrypts the archive for a public key recipient
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Encrypt `input` for `recipient`, writing the result to `output`
    async fn encrypt(&self, input: &Path, recipient: &str, output: &Path) -> Result<()>;
}

/// [`Encryptor`] backed by `gpg --batch -e`
#[derive(Debug, Clone)]
pub struct GpgEncryptor {
    program: String,
}

impl GpgEncryptor {
    pub fn new() -> Self {
        Self {
            program: "gpg".to_string(),
        }
    }

    /// Use a different `gpg` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, input: &Path, recipient: &str, output: &Path) -> ToolCommand {
        // Non-interactive: overwrite, trust the recipient key as-is
        ToolCommand::new(&self.program)
            .args(["--yes", "--trust-model", "always", "--batch", "-e", "-r"])
            .arg(recipient)
            .arg("-o")
            .arg(output)
            .arg(input)
    }
}

impl Default for GpgEncryptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encryptor for GpgEncryptor {
    async fn encrypt(&self, input: &Path, recipient: &str, output: &Path) -> Result<()> {
        self.command(input, recipient, output)
            .output()
            .await
            .map_err(|e| {
                error!(error = %e, "Error encrypting backup");
                BackupError::Encryption(e)
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let command = GpgEncryptor::new().command(
            Path::new("in.tar.gz"),
            "ops@example.com",
            Path::new("in.tar.gz.gpg"),
        );
        let args: Vec<String> = command
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(command.program(), "gpg");
        assert_eq!(
            args,
            vec![
                "--yes",
                "--trust-model",
                "always",
                "--batch",
                "-e",
                "-r",
                "ops@example.com",
                "-o",
                "in.tar.gz.gpg",
                "in.tar.gz"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_encryption_error() {
        let err = GpgEncryptor::new()
            .with_program("sss-backup-no-such-gpg")
            .encrypt(Path::new("a"), "r", Path::new("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Encryption(_)));
    }
}
