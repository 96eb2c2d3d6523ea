//! Cold-start configuration.
//!
//! Read once when the process starts; nothing here is re-read between
//! invocations.

/// Deployment configuration for the agent.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment name (dev, staging, prod). Informational,
    /// carried into log events only.
    pub environment: String,
    /// AWS region hosting the token secret and the pipeline.
    pub region: String,
    /// Secrets Manager id or ARN of the GitHub token secret. When absent,
    /// only a previously cached credential can serve an invocation.
    pub secret_token_arn: Option<String>,
    /// GitHub API base URL, overridable for self-hosted deployments.
    pub github_api_url: String,
}

impl Config {
    pub fn has_credential_source(&self) -> bool {
        self.secret_token_arn.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_source_requires_a_secret_id() {
        let mut config = Config {
            environment: "dev".to_string(),
            region: "eu-west-1".to_string(),
            secret_token_arn: None,
            github_api_url: "https://api.github.com".to_string(),
        };
        assert!(!config.has_credential_source());

        config.secret_token_arn = Some("arn:aws:secretsmanager:eu-west-1:123:secret:gh".to_string());
        assert!(config.has_credential_source());
    }
}
