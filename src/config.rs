//! Run configuration.
//!
//! An optional JSON file supplies shared-flow names, callout policy names and
//! service endpoints. Environment variables override the file and command-line
//! flags override both; the command layer applies those last and validates.
use crate::error::{AugmentError, Result};
use crate::policy::validate_policy_name;
use crate::routing::PolicyPair;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_API_URL: &str = "https://apigee.googleapis.com/v1";
pub const DEFAULT_STORAGE_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_APIGEECLI: &str = "apigeecli";

pub const ENV_APIGEECLI: &str = "PROXY_AUGMENT_APIGEECLI";
pub const ENV_API_URL: &str = "PROXY_AUGMENT_API_URL";
pub const ENV_STORAGE_URL: &str = "PROXY_AUGMENT_STORAGE_URL";
pub const ENV_ACCESS_TOKEN: &str = "APIGEE_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    /// Shared flows called by the base request/response policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_shared_flows: Option<PolicyPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_shared_flows: Option<PolicyPair>,
    /// Conditional flows routed to the override pair.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub override_flows: Vec<String>,
    #[serde(default = "default_base_policies")]
    pub base_policies: PolicyPair,
    #[serde(default = "default_override_policies")]
    pub override_policies: PolicyPair,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
    #[serde(default = "default_apigeecli")]
    pub apigeecli: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schema_version: CONFIG_SCHEMA_VERSION,
            base_shared_flows: None,
            override_shared_flows: None,
            override_flows: Vec::new(),
            base_policies: default_base_policies(),
            override_policies: default_override_policies(),
            api_url: default_api_url(),
            storage_url: default_storage_url(),
            apigeecli: default_apigeecli(),
        }
    }
}

fn default_base_policies() -> PolicyPair {
    PolicyPair {
        request: "FC-base-request-process".to_string(),
        response: "FC-base-response-process".to_string(),
    }
}

fn default_override_policies() -> PolicyPair {
    PolicyPair {
        request: "FC-override-request-process".to_string(),
        response: "FC-override-response-process".to_string(),
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_storage_url() -> String {
    DEFAULT_STORAGE_URL.to_string()
}

fn default_apigeecli() -> String {
    DEFAULT_APIGEECLI.to_string()
}

/// `<config dir>/proxy-augment/config.json`, when the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("proxy-augment").join("config.json"))
}

/// Load the explicit config file, else the default one if it exists, else
/// built-in defaults; then apply environment overrides.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.is_file()),
    };
    let mut config = match path {
        Some(path) => read_config(&path)?,
        None => Config::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parse one config file.
pub fn read_config(path: &Path) -> anyhow::Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(AugmentError::Config(format!(
            "unsupported schema_version {} in {}",
            config.schema_version,
            path.display()
        ))
        .into());
    }
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Overlay non-empty environment values.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let fields: [(&str, &mut String); 3] = [
        (ENV_APIGEECLI, &mut config.apigeecli),
        (ENV_API_URL, &mut config.api_url),
        (ENV_STORAGE_URL, &mut config.storage_url),
    ];
    for (key, field) in fields {
        if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
            tracing::debug!(key, "config value taken from environment");
            *field = value.trim().to_string();
        }
    }
}

/// Check values after every override has been applied.
pub fn validate_config(config: &Config) -> Result<()> {
    let names = [
        &config.base_policies.request,
        &config.base_policies.response,
        &config.override_policies.request,
        &config.override_policies.response,
    ];
    for (idx, name) in names.iter().enumerate() {
        validate_policy_name(name)?;
        if names[..idx].contains(name) {
            return Err(AugmentError::Config(format!(
                "callout policy name '{name}' is used twice"
            )));
        }
    }
    for (label, pair) in [
        ("base_shared_flows", &config.base_shared_flows),
        ("override_shared_flows", &config.override_shared_flows),
    ] {
        if let Some(pair) = pair {
            if pair.request.trim().is_empty() || pair.response.trim().is_empty() {
                return Err(AugmentError::Config(format!(
                    "{label} must name both a request and a response shared flow"
                )));
            }
        }
    }
    for (label, url) in [("api_url", &config.api_url), ("storage_url", &config.storage_url)] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AugmentError::Config(format!(
                "{label} must be an http(s) URL (got {url:?})"
            )));
        }
    }
    if config.apigeecli.trim().is_empty() {
        return Err(AugmentError::Config("apigeecli must be non-empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
