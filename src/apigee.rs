//! Management API client: bundle validation and revision deployment.
//!
//! Calls are single-shot. A non-2xx status becomes `AugmentError::Api` with
//! the response body attached; retry policy belongs to the caller.
use crate::auth::TokenSource;
use crate::error::{AugmentError, Result};
use serde_json::Value;
use std::time::{Duration, Instant};
use ureq::Agent;

const TIMEOUT: Duration = Duration::from_secs(120);

pub struct ManagementClient<'a> {
    agent: Agent,
    base_url: String,
    org: String,
    tokens: &'a dyn TokenSource,
}

impl<'a> ManagementClient<'a> {
    pub fn new(base_url: &str, org: &str, tokens: &'a dyn TokenSource) -> Self {
        ManagementClient {
            agent: http_agent(),
            base_url: base_url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            tokens,
        }
    }

    /// Ask the service to validate a bundle archive without importing it.
    pub fn validate(&self, name: &str, archive: &[u8]) -> Result<Value> {
        let url = format!("{}/organizations/{}/apis", self.base_url, self.org);
        let token = self.tokens.token()?;
        let start = Instant::now();
        let response = self
            .agent
            .post(&url)
            .query("name", name)
            .query("action", "validate")
            .query("validate", "true")
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/octet-stream")
            .send(archive);
        finish("validate", response, start)
    }

    pub fn deploy(&self, name: &str, env: &str, revision: &str) -> Result<Value> {
        let url = format!("{}?override=true", self.deployment_url(name, env, revision));
        let token = self.tokens.token()?;
        let start = Instant::now();
        let response = self
            .agent
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .send_empty();
        finish("deploy", response, start)
    }

    pub fn undeploy(&self, name: &str, env: &str, revision: &str) -> Result<Value> {
        let url = self.deployment_url(name, env, revision);
        let token = self.tokens.token()?;
        let start = Instant::now();
        let response = self
            .agent
            .delete(&url)
            .header("Authorization", format!("Bearer {token}"))
            .call();
        finish("undeploy", response, start)
    }

    fn deployment_url(&self, name: &str, env: &str, revision: &str) -> String {
        format!(
            "{}/organizations/{}/environments/{env}/apis/{name}/revisions/{revision}/deployments",
            self.base_url, self.org
        )
    }
}

/// Agent that hands 4xx/5xx responses back instead of erroring, so the body
/// can be reported.
pub(crate) fn http_agent() -> Agent {
    let config = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(TIMEOUT))
        .build();
    Agent::new_with_config(config)
}

fn finish(
    operation: &'static str,
    response: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    start: Instant,
) -> Result<Value> {
    let mut response = response.map_err(|err| transport(operation, err))?;
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|err| transport(operation, err))?;
    let elapsed_ms = start.elapsed().as_millis();
    tracing::info!(elapsed_ms, status, operation, "management API call complete");

    if !(200..300).contains(&status) {
        return Err(AugmentError::Api {
            operation,
            status,
            body: describe_body(&body),
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(&body).map_err(|err| AugmentError::Transport {
        operation,
        reason: format!("response is not JSON: {err}"),
    })?;
    tracing::debug!(operation, response = %value, "management API response");
    Ok(value)
}

pub(crate) fn transport(operation: &'static str, err: ureq::Error) -> AugmentError {
    AugmentError::Transport {
        operation,
        reason: err.to_string(),
    }
}

/// Pretty JSON when the body parses, raw text otherwise.
pub(crate) fn describe_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::testutil::serve;

    #[test]
    fn validate_posts_archive_bytes_with_bearer_token() {
        let (base, server) = serve(vec![(200, r#"{"name":"petstore","revision":"1"}"#)]);
        let tokens = StaticToken::new("tok-123");
        let client = ManagementClient::new(&format!("{base}/v1/"), "acme", &tokens);

        let value = client.validate("petstore", b"PK-bytes").unwrap();
        assert_eq!(value["name"], "petstore");

        let requests = server.join().unwrap();
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(
            request.target,
            "/v1/organizations/acme/apis?name=petstore&action=validate&validate=true"
        );
        assert_eq!(request.header("authorization"), Some("Bearer tok-123"));
        assert_eq!(request.header("content-type"), Some("application/octet-stream"));
        assert_eq!(request.body, b"PK-bytes");
    }

    #[test]
    fn validate_encodes_proxy_name_in_query() {
        let (base, server) = serve(vec![(200, "{}")]);
        let tokens = StaticToken::new("tok");
        let client = ManagementClient::new(&base, "acme", &tokens);

        client.validate("pets&more", b"zip").unwrap();

        let requests = server.join().unwrap();
        let target = &requests[0].target;
        assert!(target.starts_with("/organizations/acme/apis?name=pets%26more&"));
        assert_eq!(target.matches('&').count(), 2);
    }

    #[test]
    fn deploy_and_undeploy_target_revision_deployments() {
        let (base, server) = serve(vec![(200, r#"{"state":"READY"}"#), (200, "{}")]);
        let tokens = StaticToken::new("tok");
        let client = ManagementClient::new(&base, "acme", &tokens);

        client.deploy("petstore", "prod", "7").unwrap();
        client.undeploy("petstore", "prod", "7").unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].target,
            "/organizations/acme/environments/prod/apis/petstore/revisions/7/deployments?override=true"
        );
        assert_eq!(requests[1].method, "DELETE");
        assert_eq!(
            requests[1].target,
            "/organizations/acme/environments/prod/apis/petstore/revisions/7/deployments"
        );
    }

    #[test]
    fn error_status_reports_pretty_body() {
        let (base, server) = serve(vec![(
            400,
            r#"{"error":{"code":400,"message":"bundle invalid"}}"#,
        )]);
        let tokens = StaticToken::new("tok");
        let client = ManagementClient::new(&base, "acme", &tokens);

        let err = client.validate("petstore", b"zip").unwrap_err();
        server.join().unwrap();
        match err {
            AugmentError::Api {
                operation,
                status,
                body,
            } => {
                assert_eq!(operation, "validate");
                assert_eq!(status, 400);
                assert!(body.contains('\n'));
                assert!(body.contains("\"message\": \"bundle invalid\""));
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_is_kept_verbatim() {
        assert_eq!(describe_body(" upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn token_failure_stops_before_any_request() {
        let tokens = StaticToken::new("");
        let client = ManagementClient::new("http://127.0.0.1:9", "acme", &tokens);
        assert!(matches!(
            client.deploy("petstore", "prod", "1"),
            Err(AugmentError::Config(_))
        ));
    }
}
