//! CodePipeline job event types.
//!
//! The pipeline delivers one job per invocation: an envelope carrying the
//! job id and a `UserParameters` string holding the release parameters as
//! JSON. The blob is doubly encoded (a JSON string inside the event JSON),
//! so parsing happens in two steps.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level invocation event.
#[derive(Debug, Deserialize)]
pub struct PipelineEvent {
    #[serde(rename = "CodePipeline.job")]
    pub job: PipelineJob,
}

#[derive(Debug, Deserialize)]
pub struct PipelineJob {
    pub id: String,
    pub data: JobData,
}

#[derive(Debug, Deserialize)]
pub struct JobData {
    #[serde(rename = "actionConfiguration")]
    pub action_configuration: ActionConfiguration,
}

#[derive(Debug, Deserialize)]
pub struct ActionConfiguration {
    pub configuration: ActionParameters,
}

#[derive(Debug, Deserialize)]
pub struct ActionParameters {
    #[serde(rename = "UserParameters")]
    pub user_parameters: String,
}

/// Identity of the current invocation, carried into the terminal report.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// Execution id of this invocation, sent as `externalExecutionId` in
    /// failure reports.
    pub request_id: String,
}

/// The three operations this agent knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    CreateRelease,
    CreateUnstableBranch,
    UpdateRelease,
}

impl ReleaseMode {
    /// Lenient parse: an unknown mode is `None`, which the dispatcher
    /// turns into a job failure without touching the GitHub API.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "createRelease" => Some(Self::CreateRelease),
            "createUnstableBranch" => Some(Self::CreateUnstableBranch),
            "updateRelease" => Some(Self::UpdateRelease),
            _ => None,
        }
    }
}

/// Release parameters attached to the job as `UserParameters`.
///
/// Every field arrives as a string, and a given mode only reads its own
/// subset, so absent fields decode to empty strings rather than failing
/// the whole blob. [`OperationParameters::prerelease_flag`] is the one
/// place the `"true"`-string convention becomes a real bool.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationParameters {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub current_release: String,
    #[serde(default)]
    pub prev_release: String,
    #[serde(default)]
    pub unstable_branch: String,
    #[serde(default)]
    pub prerelease: String,
}

impl OperationParameters {
    /// Decode the `UserParameters` blob.
    pub fn parse(blob: &str) -> Result<Self> {
        serde_json::from_str(blob).context("UserParameters is not valid JSON")
    }

    pub fn release_mode(&self) -> Option<ReleaseMode> {
        ReleaseMode::parse(&self.mode)
    }

    /// `"true"` marks a prerelease; anything else, including absence,
    /// does not.
    pub fn prerelease_flag(&self) -> bool {
        self.prerelease == "true"
    }
}
