//! CodePipeline → GitHub release agent entry point.
//!
//! Reads one pipeline job event (file path argument or stdin), runs the
//! operation it names, and reports the outcome to CodePipeline. The exit
//! status mirrors the report: zero after a delivered success report,
//! non-zero otherwise.

use anyhow::{Context, Result};
use clap::Parser;
use github_release_agent::aws::{AwsClient, Credentials};
use github_release_agent::secrets::ResolvedSecret;
use github_release_agent::{
    handler, CodePipelineReporter, Config, GitHubClient, JobContext, OperationParameters,
    PipelineEvent, SecretStore, TokenCache,
};
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Process-wide credential cache, reused across invocations when the
/// execution environment keeps the process warm.
static TOKEN_CACHE: TokenCache = TokenCache::const_new();

#[derive(Parser, Debug)]
#[command(name = "github-release-agent")]
#[command(about = "CodePipeline action agent for GitHub release automation")]
#[command(version)]
struct Args {
    /// Deployment environment name (dev, staging, prod)
    #[arg(long, env = "ENVIRONMENT", default_value = "dev")]
    environment: String,

    /// AWS region hosting the token secret and the pipeline
    #[arg(long, env = "REGION")]
    region: String,

    /// Secrets Manager id or ARN of the GitHub token secret
    #[arg(long, env = "SECRET_TOKEN_ARN")]
    secret_token_arn: Option<String>,

    /// GitHub API base URL (self-hosted deployments)
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    github_api_url: String,

    /// Execution id reported as externalExecutionId; generated when absent
    #[arg(long, env = "REQUEST_ID")]
    request_id: Option<String>,

    /// Path to the pipeline event JSON; reads stdin when absent
    event: Option<PathBuf>,
}

fn read_event(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event from {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read event from stdin")?;
            Ok(raw)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config {
        environment: args.environment,
        region: args.region,
        secret_token_arn: args.secret_token_arn,
        github_api_url: args.github_api_url,
    };

    info!(
        environment = %config.environment,
        region = %config.region,
        "github-release-agent starting"
    );
    if !config.has_credential_source() {
        warn!("SECRET_TOKEN_ARN not set; only a previously cached credential can serve this invocation");
    }

    let raw = read_event(args.event.as_ref())?;
    let event: PipelineEvent =
        serde_json::from_str(&raw).context("event is not a CodePipeline job")?;
    let params = OperationParameters::parse(
        &event.job.data.action_configuration.configuration.user_parameters,
    )?;

    let ctx = JobContext {
        job_id: event.job.id,
        request_id: args
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };
    info!(job_id = %ctx.job_id, "processing pipeline job");

    let credentials = Credentials::from_env()?;
    let aws = AwsClient::new(credentials, config.region.as_str());
    let reporter = CodePipelineReporter::new(aws.clone());
    let store = config
        .secret_token_arn
        .as_ref()
        .map(|secret_id| SecretStore::new(aws, secret_id.clone()));
    let fetch = store.as_ref().map(|store| move || store.fetch());

    let api_base = config.github_api_url.clone();
    let outcome = handler::handle(
        &ctx,
        &params,
        &TOKEN_CACHE,
        fetch,
        |secret: &ResolvedSecret| {
            GitHubClient::new(secret.token.as_str()).with_api_base(api_base.as_str())
        },
        &reporter,
    )
    .await;

    match outcome {
        Ok(message) => {
            info!(message, "invocation complete");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "invocation failed");
            Err(err.into())
        }
    }
}
