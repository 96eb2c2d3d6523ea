//! CodePipeline → GitHub release automation agent.
//!
//! One invocation is one pipeline job: resolve the GitHub credential from
//! Secrets Manager (cached for the process lifetime), run exactly one of
//! three release operations, and report the outcome back to CodePipeline.
//!
//! Operations, selected by the `mode` field of the job's user parameters:
//!
//! - `createRelease`: tag a commit as a release with a changelog body
//! - `createUnstableBranch`: create or force-move the unstable branch
//! - `updateRelease`: flip an existing release's prerelease flag

pub mod aws;
pub mod config;
pub mod event;
pub mod github;
pub mod handler;
pub mod pipeline;
pub mod secrets;

pub use config::Config;
pub use event::{JobContext, OperationParameters, PipelineEvent, ReleaseMode};
pub use github::GitHubClient;
pub use handler::{dispatch, handle, HandlerError};
pub use pipeline::CodePipelineReporter;
pub use secrets::{SecretStore, TokenCache};
