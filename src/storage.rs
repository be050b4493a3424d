//! Object storage for bundle archives, so a later run in another environment
//! can pick up what an earlier one produced.
use crate::apigee::{describe_body, http_agent, transport};
use crate::auth::TokenSource;
use crate::error::{AugmentError, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Instant;
use ureq::Agent;

pub trait ObjectStore {
    fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<()>;
    /// Fetch `key` into `local`; a partially written file is removed on failure.
    fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<()>;
}

/// `<prefix>/<api>.zip`, or `<api>.zip` without a prefix.
pub fn object_key(prefix: Option<&str>, api_name: &str) -> String {
    match prefix.map(|prefix| prefix.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{api_name}.zip"),
        _ => format!("{api_name}.zip"),
    }
}

/// Cloud Storage JSON API client.
pub struct GcsStore<'a> {
    agent: Agent,
    base_url: String,
    tokens: &'a dyn TokenSource,
}

impl<'a> GcsStore<'a> {
    pub fn new(base_url: &str, tokens: &'a dyn TokenSource) -> Self {
        GcsStore {
            agent: http_agent(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn fetch_into(&self, bucket: &str, key: &str, target: &mut File) -> Result<u64> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            encode_segment(bucket),
            encode_segment(key)
        );
        let token = self.tokens.token()?;
        let mut response = self
            .agent
            .get(&url)
            .query("alt", "media")
            .header("Authorization", format!("Bearer {token}"))
            .call()
            .map_err(|err| transport("download", err))?;
        let status = response.status().as_u16();
        if status == 404 {
            return Err(AugmentError::not_found("object", format!("gs://{bucket}/{key}")));
        }
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(AugmentError::Api {
                operation: "download",
                status,
                body: describe_body(&body),
            });
        }
        io::copy(&mut response.body_mut().as_reader(), target).map_err(|err| {
            AugmentError::Transport {
                operation: "download",
                reason: err.to_string(),
            }
        })
    }
}

impl ObjectStore for GcsStore<'_> {
    fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<()> {
        let bytes = fs::read(local).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => AugmentError::not_found("file", local.display().to_string()),
            _ => AugmentError::io("read", local, err),
        })?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, encode_segment(bucket));
        let token = self.tokens.token()?;
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&url)
            .query("uploadType", "media")
            .query("name", key)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/zip")
            .send(&bytes[..])
            .map_err(|err| transport("upload", err))?;
        let status = response.status().as_u16();
        let elapsed_ms = start.elapsed().as_millis();
        tracing::info!(elapsed_ms, status, bytes = bytes.len(), "object upload complete");
        if status == 404 {
            return Err(AugmentError::not_found("bucket", bucket));
        }
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(AugmentError::Api {
                operation: "upload",
                status,
                body: describe_body(&body),
            });
        }
        tracing::info!(object = %format!("gs://{bucket}/{key}"), "uploaded bundle");
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| AugmentError::io("create", parent, err))?;
        }
        let start = Instant::now();
        let mut file = File::create(local).map_err(|err| AugmentError::io("create", local, err))?;
        let result = self.fetch_into(bucket, key, &mut file);
        drop(file);
        match result {
            Ok(bytes) => {
                let elapsed_ms = start.elapsed().as_millis();
                tracing::info!(
                    elapsed_ms,
                    bytes,
                    object = %format!("gs://{bucket}/{key}"),
                    path = %local.display(),
                    "downloaded bundle"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rm_err) = fs::remove_file(local) {
                    tracing::warn!(path = %local.display(), error = %rm_err, "could not remove partial download");
                } else {
                    tracing::info!(path = %local.display(), "removed partial download");
                }
                Err(err)
            }
        }
    }
}

/// Percent-encode one URL path segment.
fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
