//! Unix implementation: run the trust-store commands directly.

use anyhow::{Context, Result};
use std::process::Command;

use super::TrustStore;

pub struct CommandTrustStore;

impl CommandTrustStore {
    fn run(command: &[String]) -> Result<()> {
        let (program, args) = command
            .split_first()
            .context("empty trust store command")?;
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("spawn {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(command = %command.join(" "), stderr = %stderr.trim(), "trust store command failed");
            anyhow::bail!(
                "{} exited with {}: {}",
                command.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl TrustStore for CommandTrustStore {
    fn reconfigure(&self, command: &[String]) -> Result<()> {
        Self::run(command)
    }

    fn rebuild(&self, command: &[String]) -> Result<()> {
        Self::run(command)
    }
}
