//! Bearer-token suppliers for the management and storage clients.
//!
//! The clients take a `TokenSource` rather than fetching credentials
//! themselves; the bundle augmentation path never needs one.
use crate::error::{AugmentError, Result};
use std::process::Command;
use std::time::Instant;

pub trait TokenSource {
    fn token(&self) -> Result<String>;
}

/// A token supplied up front (flag or environment).
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(AugmentError::Config("access token is empty".to_string()));
        }
        Ok(token.to_string())
    }
}

/// Asks the gcloud CLI for the active account's access token on each call.
#[derive(Debug, Clone)]
pub struct GcloudToken {
    program: String,
}

impl GcloudToken {
    pub fn new() -> Self {
        Self::with_program("gcloud")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        GcloudToken {
            program: program.into(),
        }
    }
}

impl Default for GcloudToken {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for GcloudToken {
    fn token(&self) -> Result<String> {
        let program = which::which(&self.program)
            .map_err(|_| AugmentError::not_found("program", self.program.clone()))?;
        let start = Instant::now();
        let output = Command::new(&program)
            .args(["auth", "print-access-token"])
            .output()
            .map_err(|err| AugmentError::io("run", &program, err))?;
        let elapsed_ms = start.elapsed().as_millis();
        tracing::info!(elapsed_ms, success = output.status.success(), "gcloud token request complete");

        if !output.status.success() {
            return Err(AugmentError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AugmentError::Config(format!(
                "{} printed an empty access token",
                self.program
            )));
        }
        Ok(token)
    }
}
