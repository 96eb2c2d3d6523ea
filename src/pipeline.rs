//! Job outcome reporting.
//!
//! CodePipeline expects exactly one terminal call per job: success keyed
//! by job id, or failure carrying a `JobFailed` details payload. Neither
//! call is retried.

use crate::aws::{AwsClient, CODEPIPELINE};
use crate::event::JobContext;
use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

/// Terminal report sink for the orchestrator. Implemented over
/// CodePipeline; faked in dispatcher tests.
pub trait OutcomeReporter {
    fn report_success(
        &self,
        ctx: &JobContext,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn report_failure(
        &self,
        ctx: &JobContext,
        message: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// The message is JSON-stringified inside the details payload; the
/// pipeline console renders the quoted form.
fn failure_details(ctx: &JobContext, message: &str) -> Result<serde_json::Value> {
    Ok(json!({
        "jobId": ctx.job_id,
        "failureDetails": {
            "message": serde_json::to_string(message).context("failure message did not encode")?,
            "type": "JobFailed",
            "externalExecutionId": ctx.request_id,
        }
    }))
}

pub struct CodePipelineReporter {
    aws: AwsClient,
}

impl CodePipelineReporter {
    pub fn new(aws: AwsClient) -> Self {
        Self { aws }
    }
}

impl OutcomeReporter for CodePipelineReporter {
    async fn report_success(&self, ctx: &JobContext) -> Result<()> {
        debug!(job_id = %ctx.job_id, "reporting job success");
        let body = json!({ "jobId": ctx.job_id }).to_string();
        self.aws
            .json_request(&CODEPIPELINE, "PutJobSuccessResult", &body)
            .await
            .context("PutJobSuccessResult failed")?;
        Ok(())
    }

    async fn report_failure(&self, ctx: &JobContext, message: &str) -> Result<()> {
        debug!(job_id = %ctx.job_id, message, "reporting job failure");
        let body = failure_details(ctx, message)?.to_string();
        self.aws
            .json_request(&CODEPIPELINE, "PutJobFailureResult", &body)
            .await
            .context("PutJobFailureResult failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> JobContext {
        JobContext {
            job_id: "job-123".to_string(),
            request_id: "req-456".to_string(),
        }
    }

    #[test]
    fn failure_details_carry_the_job_identity() {
        let details = failure_details(&ctx(), "No release mode was set.").unwrap();
        assert_eq!(details["jobId"], "job-123");
        assert_eq!(details["failureDetails"]["type"], "JobFailed");
        assert_eq!(details["failureDetails"]["externalExecutionId"], "req-456");
    }

    #[test]
    fn failure_message_is_json_stringified() {
        let details = failure_details(&ctx(), "GitHub Release Creation Failed").unwrap();
        assert_eq!(
            details["failureDetails"]["message"],
            "\"GitHub Release Creation Failed\""
        );
    }
}
