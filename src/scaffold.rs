//! Proxy bundle scaffolding through `apigeecli`.
//!
//! The tool turns an OpenAPI document into a bundle archive named after the
//! API, written to its working directory. A non-zero exit aborts the run
//! before any augmentation happens.
use crate::error::{AugmentError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

const REDACTED: &str = "<redacted>";

/// Inputs for `apigeecli apis create openapi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldRequest {
    pub name: String,
    pub base_path: String,
    pub oas_dir: PathBuf,
    pub oas_file: String,
    pub org: String,
    pub target_url: Option<String>,
    /// Let the tool resolve its own credentials.
    pub default_token: bool,
    pub token: Option<String>,
}

impl ScaffoldRequest {
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["apis", "create", "openapi"]
            .into_iter()
            .map(str::to_string)
            .collect();
        let pairs = [
            ("--basepath", self.base_path.clone()),
            ("--name", self.name.clone()),
            ("--oas-base-folderpath", self.oas_dir.display().to_string()),
            ("--oas-name", self.oas_file.clone()),
            ("--org", self.org.clone()),
        ];
        for (flag, value) in pairs {
            args.push(flag.to_string());
            args.push(value);
        }
        if let Some(url) = &self.target_url {
            args.push("--target-url".to_string());
            args.push(url.clone());
        }
        if self.default_token {
            args.push("--default-token".to_string());
        } else if let Some(token) = &self.token {
            args.push("--token".to_string());
            args.push(token.clone());
        }
        args.push("--import=false".to_string());
        args.push("--validate".to_string());
        args.push("--skip-policy".to_string());
        args
    }

    /// Archive the tool writes into `out_dir`.
    pub fn archive_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}.zip", self.name))
    }
}

/// Shell-quoted command line with the token value masked.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(program);
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            words.push(REDACTED);
            mask_next = false;
            continue;
        }
        mask_next = arg == "--token";
        words.push(arg.as_str());
    }
    shell_words::join(words)
}

/// Run the scaffolding tool in `out_dir` and return the archive it produced.
pub fn run_scaffold(program: &str, request: &ScaffoldRequest, out_dir: &Path) -> Result<PathBuf> {
    let resolved =
        which::which(program).map_err(|_| AugmentError::not_found("program", program))?;
    let args = request.build_args();
    tracing::info!(command = %display_command(program, &args), "running scaffolding tool");

    let start = Instant::now();
    let output = Command::new(&resolved)
        .args(&args)
        .current_dir(out_dir)
        .output()
        .map_err(|err| AugmentError::io("run", &resolved, err))?;
    let elapsed_ms = start.elapsed().as_millis();
    tracing::info!(
        elapsed_ms,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "scaffolding tool complete"
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        tracing::info!(stdout = %stdout.trim(), "scaffolding output");
    }
    if !stderr.trim().is_empty() {
        tracing::warn!(stderr = %stderr.trim(), "scaffolding diagnostics");
    }
    if !output.status.success() {
        return Err(AugmentError::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    let archive = request.archive_path(out_dir);
    if !archive.is_file() {
        return Err(AugmentError::not_found(
            "scaffolded archive",
            archive.display().to_string(),
        ));
    }
    Ok(archive)
}
