//! Lightweight signed AWS access.
//!
//! The agent touches exactly two AWS services, Secrets Manager and
//! CodePipeline, both speaking the JSON 1.1 protocol. Requests are signed
//! with SigV4 and sent over a shared reqwest client instead of pulling in
//! per-service SDK crates.

use anyhow::{anyhow, Result};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4::SigningParams;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::Client;
use std::env;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// AWS credentials for request signing.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Load from the standard environment variables the execution role
    /// provides.
    pub fn from_env() -> Result<Self> {
        let access_key_id =
            env::var("AWS_ACCESS_KEY_ID").map_err(|_| anyhow!("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| anyhow!("AWS_SECRET_ACCESS_KEY is not set"))?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Definition of one JSON-protocol service.
#[derive(Debug, Clone, Copy)]
pub struct JsonService {
    pub signing_name: &'static str,
    pub endpoint_prefix: &'static str,
    pub target_prefix: &'static str,
}

pub const SECRETS_MANAGER: JsonService = JsonService {
    signing_name: "secretsmanager",
    endpoint_prefix: "secretsmanager",
    target_prefix: "secretsmanager",
};

pub const CODEPIPELINE: JsonService = JsonService {
    signing_name: "codepipeline",
    endpoint_prefix: "codepipeline",
    target_prefix: "CodePipeline_20150709",
};

/// Failure of one signed call.
#[derive(Debug, Error)]
pub enum AwsError {
    /// The service rejected the request with an AWS exception code.
    #[error("{service} request failed ({status}): {code}")]
    Api {
        service: &'static str,
        status: u16,
        code: String,
        message: String,
    },
    /// The request never produced a service response, or could not be
    /// signed in the first place.
    #[error("{service} request failed: {source:#}")]
    Transport {
        service: &'static str,
        source: anyhow::Error,
    },
}

impl AwsError {
    /// AWS exception code, or a fixed marker when there is no service
    /// response to read one from.
    pub fn code(&self) -> &str {
        match self {
            AwsError::Api { code, .. } => code,
            AwsError::Transport { .. } => "RequestError",
        }
    }
}

/// Extract the exception code from a JSON-protocol error body.
///
/// The `__type` field may be namespaced
/// (`com.amazonaws.secretsmanager#ResourceNotFoundException`) or carry a
/// trailing annotation (`ResourceNotFoundException:http://...`).
fn error_code(body: &str) -> String {
    let code = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("__type").and_then(|t| t.as_str().map(String::from)));

    match code {
        Some(raw) => {
            let raw = raw.rsplit('#').next().unwrap_or(&raw);
            raw.split(':').next().unwrap_or(raw).to_string()
        }
        None => "UnknownError".to_string(),
    }
}

/// Signed HTTP client for the AWS JSON 1.1 protocol.
#[derive(Clone)]
pub struct AwsClient {
    http: Client,
    credentials: Credentials,
    region: String,
    endpoint_url: Option<String>,
}

impl AwsClient {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            credentials,
            region: region.into(),
            endpoint_url: None,
        }
    }

    /// Route every service through a custom endpoint (LocalStack etc.).
    pub fn with_endpoint_url(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }

    fn endpoint(&self, service: &JsonService) -> String {
        if let Some(endpoint) = &self.endpoint_url {
            return endpoint.clone();
        }
        format!(
            "https://{}.{}.amazonaws.com",
            service.endpoint_prefix, self.region
        )
    }

    /// POST one JSON-protocol operation and return the raw response body.
    pub async fn json_request(
        &self,
        service: &JsonService,
        operation: &str,
        body: &str,
    ) -> Result<String, AwsError> {
        let transport = |source: anyhow::Error| AwsError::Transport {
            service: service.signing_name,
            source,
        };

        debug!(
            service = service.signing_name,
            operation, "issuing signed AWS request"
        );

        let endpoint = self.endpoint(service);
        let url = format!("{endpoint}/");
        let parsed = url::Url::parse(&url).map_err(|err| transport(err.into()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| transport(anyhow!("endpoint has no host: {url}")))?;

        let target = format!("{}.{}", service.target_prefix, operation);
        let headers = [
            ("host", host.to_string()),
            ("x-amz-target", target.clone()),
            ("content-type", "application/x-amz-json-1.1".to_string()),
        ];

        let identity: Identity = aws_credential_types::Credentials::new(
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
            self.credentials.session_token.clone(),
            None,
            "github-release-agent",
        )
        .into();

        let signing_params = SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(service.signing_name)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|err| transport(err.into()))?
            .into();

        let signable = SignableRequest::new(
            "POST",
            parsed.path(),
            headers.iter().map(|(k, v)| (*k, v.as_str())),
            SignableBody::Bytes(body.as_bytes()),
        )
        .map_err(|err| transport(err.into()))?;

        let (instructions, _signature) = sign(signable, &signing_params)
            .map_err(|err| transport(err.into()))?
            .into_parts();

        let mut request = self
            .http
            .post(&url)
            .header("X-Amz-Target", &target)
            .header("Content-Type", "application/x-amz-json-1.1")
            .body(body.to_string());
        for (name, value) in instructions.headers() {
            request = request.header(name.to_string(), value.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport(err.into()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| transport(err.into()))?;

        trace!(%status, body = %text, "AWS response");

        if !status.is_success() {
            let code = error_code(&text);
            warn!(
                service = service.signing_name,
                operation,
                %status,
                code = %code,
                "AWS request rejected"
            );
            return Err(AwsError::Api {
                service: service.signing_name,
                status: status.as_u16(),
                code,
                message: text,
            });
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn regional_endpoints() {
        let client = AwsClient::new(credentials(), "eu-west-1");
        assert_eq!(
            client.endpoint(&SECRETS_MANAGER),
            "https://secretsmanager.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            client.endpoint(&CODEPIPELINE),
            "https://codepipeline.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn endpoint_override_wins() {
        let client =
            AwsClient::new(credentials(), "eu-west-1").with_endpoint_url("http://localhost:4566");
        assert_eq!(client.endpoint(&SECRETS_MANAGER), "http://localhost:4566");
    }

    #[test]
    fn error_code_plain() {
        assert_eq!(
            error_code(r#"{"__type":"ResourceNotFoundException","message":"gone"}"#),
            "ResourceNotFoundException"
        );
    }

    #[test]
    fn error_code_namespaced() {
        assert_eq!(
            error_code(r#"{"__type":"com.amazonaws.secretsmanager#DecryptionFailureException"}"#),
            "DecryptionFailureException"
        );
    }

    #[test]
    fn error_code_with_annotation() {
        assert_eq!(
            error_code(r#"{"__type":"InvalidParameterException:http://internal.amazon.com/x"}"#),
            "InvalidParameterException"
        );
    }

    #[test]
    fn error_code_unparseable_body() {
        assert_eq!(error_code("<html>503</html>"), "UnknownError");
        assert_eq!(error_code(r#"{"message":"no type field"}"#), "UnknownError");
    }

    #[test]
    fn transport_errors_have_a_fixed_code() {
        let err = AwsError::Transport {
            service: "secretsmanager",
            source: anyhow!("connection refused"),
        };
        assert_eq!(err.code(), "RequestError");
    }
}
