//! GitHub REST client.
//!
//! Branch refs and releases for one repository, over the plain REST API
//! with a bearer token. Each call maps to a single endpoint; nothing here
//! retries or paginates.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "github-release-agent";

/// Host of the release changelog compare view. This is the web UI, not
/// the API host.
const WEB_BASE: &str = "https://github.com";

/// Sentinel `prevRelease` value marking the very first release.
const NO_PREVIOUS_RELEASE: &str = "none";

/// Changelog body for a new release: a compare link between the previous
/// and current tags, or a fixed marker for the first release.
pub fn build_release_body(owner: &str, repository: &str, current: &str, previous: &str) -> String {
    if previous == NO_PREVIOUS_RELEASE {
        "(Initial Release)".to_string()
    } else {
        format!(
            "[ [Release Changelog]({WEB_BASE}/{owner}/{repository}/compare/{previous}...{current}) ]"
        )
    }
}

/// Release creation request.
#[derive(Debug, Clone, Serialize)]
pub struct NewRelease {
    pub tag_name: String,
    pub target_commitish: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

/// Remote release looked up by tag.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDescriptor {
    pub id: u64,
    pub tag_name: String,
    pub prerelease: bool,
}

/// Branch and release operations the dispatcher needs from the hosting
/// service. Implemented by [`GitHubClient`]; test doubles implement it to
/// observe which calls are issued.
pub trait ReleaseHost {
    fn branch_exists(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn create_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        sha: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn update_branch_head(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        sha: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn create_release(
        &self,
        owner: &str,
        repository: &str,
        release: &NewRelease,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn find_release_by_tag(
        &self,
        owner: &str,
        repository: &str,
        tag: &str,
    ) -> impl std::future::Future<Output = Result<ReleaseDescriptor>> + Send;

    fn set_release_prerelease(
        &self,
        owner: &str,
        repository: &str,
        release_id: u64,
        prerelease: bool,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// GitHub API client bound to one bearer token.
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
        }
    }

    /// Point the client at a different API host (GitHub Enterprise,
    /// a local stub).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn expect_success(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!(
            "{action} failed ({status}): {}",
            body.chars().take(500).collect::<String>()
        ))
    }
}

impl ReleaseHost for GitHubClient {
    async fn branch_exists(&self, owner: &str, repository: &str, branch: &str) -> Result<bool> {
        let response = self
            .request(
                Method::GET,
                &format!("/repos/{owner}/{repository}/branches/{branch}"),
            )
            .send()
            .await
            .context("branch lookup request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect_success(response, "branch lookup").await?;
        Ok(true)
    }

    async fn create_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        sha: &str,
    ) -> Result<()> {
        debug!(branch, sha, "creating branch ref");
        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repository}/git/refs"))
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": sha,
            }))
            .send()
            .await
            .context("branch creation request failed")?;
        Self::expect_success(response, "branch creation").await?;
        Ok(())
    }

    async fn update_branch_head(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        sha: &str,
    ) -> Result<()> {
        debug!(branch, sha, "force-updating branch head");
        let response = self
            .request(
                Method::PATCH,
                &format!("/repos/{owner}/{repository}/git/refs/heads/{branch}"),
            )
            .json(&serde_json::json!({ "sha": sha, "force": true }))
            .send()
            .await
            .context("branch update request failed")?;
        Self::expect_success(response, "branch update").await?;
        Ok(())
    }

    async fn create_release(
        &self,
        owner: &str,
        repository: &str,
        release: &NewRelease,
    ) -> Result<()> {
        debug!(tag = %release.tag_name, prerelease = release.prerelease, "creating release");
        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repository}/releases"))
            .json(release)
            .send()
            .await
            .context("release creation request failed")?;
        Self::expect_success(response, "release creation").await?;
        Ok(())
    }

    /// Tag-based lookup, the one release read the promote flow needs.
    async fn find_release_by_tag(
        &self,
        owner: &str,
        repository: &str,
        tag: &str,
    ) -> Result<ReleaseDescriptor> {
        let response = self
            .request(
                Method::GET,
                &format!("/repos/{owner}/{repository}/releases/tags/{tag}"),
            )
            .send()
            .await
            .context("release lookup request failed")?;
        let response = Self::expect_success(response, "release lookup").await?;
        response
            .json::<ReleaseDescriptor>()
            .await
            .context("release lookup response did not decode")
    }

    async fn set_release_prerelease(
        &self,
        owner: &str,
        repository: &str,
        release_id: u64,
        prerelease: bool,
    ) -> Result<()> {
        debug!(release_id, prerelease, "updating release prerelease flag");
        let response = self
            .request(
                Method::PATCH,
                &format!("/repos/{owner}/{repository}/releases/{release_id}"),
            )
            .json(&serde_json::json!({ "prerelease": prerelease }))
            .send()
            .await
            .context("release update request failed")?;
        Self::expect_success(response, "release update").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_release_gets_the_fixed_marker() {
        assert_eq!(
            build_release_body("acme", "widget", "v1.0.0", "none"),
            "(Initial Release)"
        );
    }

    #[test]
    fn later_releases_get_a_compare_link() {
        assert_eq!(
            build_release_body("acme", "widget", "v1.1.0", "v1.0.0"),
            "[ [Release Changelog](https://github.com/acme/widget/compare/v1.0.0...v1.1.0) ]"
        );
    }

    #[test]
    fn compare_link_substitutes_tags_verbatim() {
        let body = build_release_body("o", "r", "2024.06.01+hotfix", "2024.05.01");
        assert!(body.contains("/compare/2024.05.01...2024.06.01+hotfix"));
    }

    #[test]
    fn new_release_serializes_the_creation_payload() {
        let release = NewRelease {
            tag_name: "v1.1.0".to_string(),
            target_commitish: "0123abcd".to_string(),
            name: "v1.1.0".to_string(),
            body: "(Initial Release)".to_string(),
            draft: false,
            prerelease: true,
        };
        let value = serde_json::to_value(&release).unwrap();
        assert_eq!(value["tag_name"], "v1.1.0");
        assert_eq!(value["target_commitish"], "0123abcd");
        assert_eq!(value["draft"], false);
        assert_eq!(value["prerelease"], true);
    }

    #[test]
    fn api_base_override_trims_trailing_slash() {
        let client = GitHubClient::new("ghp_test").with_api_base("http://localhost:8080/");
        assert_eq!(client.api_base, "http://localhost:8080");
    }
}
