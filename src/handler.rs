//! Mode dispatch and terminal reporting.
//!
//! One invocation runs exactly one operation and sends exactly one
//! terminal report. The credential is resolved first (cache, then store),
//! the mode picks the operation, and every outcome collapses to one of
//! the fixed messages the pipeline console shows.

use crate::event::{JobContext, OperationParameters, ReleaseMode};
use crate::github::{build_release_body, NewRelease, ReleaseHost};
use crate::pipeline::OutcomeReporter;
use crate::secrets::{ResolvedSecret, SecretError, TokenCache};
use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Terminal failure of one invocation. The `Display` rendering is exactly
/// the message the orchestrator sees; the underlying cause stays in the
/// `detail` field, which is logged and never forwarded.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("No release mode was set.")]
    NoMode,
    #[error("Token value has not been set.")]
    MissingTokenConfig,
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("GitHub Release Creation Failed")]
    ReleaseCreate { detail: anyhow::Error },
    #[error("GitHub Branch Creation Failed")]
    BranchCreate { detail: anyhow::Error },
    #[error("GitHub Branch Update Failed")]
    BranchUpdate { detail: anyhow::Error },
    #[error("Failed to retrieve GitHub Release information.")]
    ReleaseLookup { detail: anyhow::Error },
    #[error("GitHub Release Update Failed")]
    ReleaseUpdate { detail: anyhow::Error },
    /// The job itself succeeded but the success report never reached the
    /// pipeline; the orchestrator never sees this rendering.
    #[error("GitHub job succeeded but the success report failed")]
    SuccessReport { detail: anyhow::Error },
}

impl HandlerError {
    /// Underlying cause, for local logs only.
    pub fn detail(&self) -> Option<&anyhow::Error> {
        match self {
            HandlerError::ReleaseCreate { detail }
            | HandlerError::BranchCreate { detail }
            | HandlerError::BranchUpdate { detail }
            | HandlerError::ReleaseLookup { detail }
            | HandlerError::ReleaseUpdate { detail }
            | HandlerError::SuccessReport { detail } => Some(detail),
            _ => None,
        }
    }
}

/// Run one full invocation: resolve the credential, dispatch the
/// operation, send exactly one terminal report.
///
/// `fetch` is the secret-store call, absent when no secret id is
/// configured; `make_host` builds the GitHub client once the credential
/// is known.
pub async fn handle<H, R, F, Fut, B>(
    ctx: &JobContext,
    params: &OperationParameters,
    cache: &TokenCache,
    fetch: Option<F>,
    make_host: B,
    reporter: &R,
) -> Result<&'static str, HandlerError>
where
    H: ReleaseHost,
    R: OutcomeReporter,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResolvedSecret, SecretError>>,
    B: FnOnce(&ResolvedSecret) -> H,
{
    let outcome = run(params, cache, fetch, make_host).await;

    match outcome {
        Ok(message) => {
            reporter.report_success(ctx).await.map_err(|detail| {
                error!(
                    job_id = %ctx.job_id,
                    error = %format!("{detail:#}"),
                    "job succeeded but the success report did not go through"
                );
                HandlerError::SuccessReport { detail }
            })?;
            info!(job_id = %ctx.job_id, message, "job reported successful");
            Ok(message)
        }
        Err(err) => {
            match err.detail() {
                Some(detail) => error!(
                    job_id = %ctx.job_id,
                    message = %err,
                    detail = %format!("{detail:#}"),
                    "job failed"
                ),
                None => error!(job_id = %ctx.job_id, message = %err, "job failed"),
            }
            let message = err.to_string();
            if let Err(report_err) = reporter.report_failure(ctx, &message).await {
                warn!(
                    job_id = %ctx.job_id,
                    error = %format!("{report_err:#}"),
                    "failure report did not go through"
                );
            }
            Err(err)
        }
    }
}

async fn run<H, F, Fut, B>(
    params: &OperationParameters,
    cache: &TokenCache,
    fetch: Option<F>,
    make_host: B,
) -> Result<&'static str, HandlerError>
where
    H: ReleaseHost,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResolvedSecret, SecretError>>,
    B: FnOnce(&ResolvedSecret) -> H,
{
    let secret = match fetch {
        Some(fetch) => cache.get_or_fetch(fetch).await?,
        None => cache.get().ok_or(HandlerError::MissingTokenConfig)?,
    };

    debug!(
        mode = %params.mode,
        owner = %params.owner,
        repository = %params.repository,
        "dispatching release operation"
    );

    dispatch(make_host(secret), params).await
}

/// Select and execute exactly one operation for the given mode.
pub async fn dispatch<H: ReleaseHost>(
    host: H,
    params: &OperationParameters,
) -> Result<&'static str, HandlerError> {
    let Some(mode) = params.release_mode() else {
        return Err(HandlerError::NoMode);
    };

    match mode {
        ReleaseMode::CreateRelease => create_release(&host, params).await,
        ReleaseMode::CreateUnstableBranch => create_unstable_branch(&host, params).await,
        ReleaseMode::UpdateRelease => update_release(&host, params).await,
    }
}

async fn create_release<H: ReleaseHost>(
    host: &H,
    params: &OperationParameters,
) -> Result<&'static str, HandlerError> {
    let body = build_release_body(
        &params.owner,
        &params.repository,
        &params.current_release,
        &params.prev_release,
    );
    let release = NewRelease {
        tag_name: params.current_release.clone(),
        target_commitish: params.commit.clone(),
        name: params.current_release.clone(),
        body,
        draft: false,
        prerelease: params.prerelease_flag(),
    };

    host.create_release(&params.owner, &params.repository, &release)
        .await
        .map_err(|detail| HandlerError::ReleaseCreate { detail })?;
    Ok("GitHub Release Created")
}

async fn create_unstable_branch<H: ReleaseHost>(
    host: &H,
    params: &OperationParameters,
) -> Result<&'static str, HandlerError> {
    let branch = params.unstable_branch.as_str();
    let exists = match host
        .branch_exists(&params.owner, &params.repository, branch)
        .await
    {
        Ok(exists) => exists,
        // A failed probe is treated as a missing branch; the creation
        // attempt surfaces whatever is actually wrong.
        Err(err) => {
            debug!(branch, error = %format!("{err:#}"), "branch probe failed");
            false
        }
    };

    if exists {
        info!(branch, commit = %params.commit, "branch exists, updating to commit");
        host.update_branch_head(&params.owner, &params.repository, branch, &params.commit)
            .await
            .map_err(|detail| HandlerError::BranchUpdate { detail })?;
        Ok("GitHub Branch Updated")
    } else {
        info!(branch, commit = %params.commit, "branch missing, creating at commit");
        host.create_branch(&params.owner, &params.repository, branch, &params.commit)
            .await
            .map_err(|detail| HandlerError::BranchCreate { detail })?;
        Ok("GitHub Branch Created")
    }
}

async fn update_release<H: ReleaseHost>(
    host: &H,
    params: &OperationParameters,
) -> Result<&'static str, HandlerError> {
    let release = host
        .find_release_by_tag(&params.owner, &params.repository, &params.current_release)
        .await
        .map_err(|detail| HandlerError::ReleaseLookup { detail })?;

    host.set_release_prerelease(
        &params.owner,
        &params.repository,
        release.id,
        params.prerelease_flag(),
    )
    .await
    .map_err(|detail| HandlerError::ReleaseUpdate { detail })?;
    Ok("GitHub Release Updated")
}
