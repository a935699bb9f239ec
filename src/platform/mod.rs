pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Remote issue tracker operations used by the workflow.
///
/// `create_issue` and `create_pull_request` are primary: callers propagate
/// their errors. Board operations and `get_issue` used for display are
/// auxiliary: callers log failures and carry on.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Create an issue.
    async fn create_issue(&self, owner: &str, repo: &str, issue: &CreateIssue) -> Result<Issue>;

    /// Fetch an issue.
    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue>;

    /// Attach an issue to a Projects V2 board.
    async fn add_issue_to_project(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        project_id: &str,
    ) -> Result<()>;

    /// Move an issue or PR card to a status column.
    async fn update_project_item_status(
        &self,
        owner: &str,
        repo: &str,
        update: &StatusUpdate<'_>,
    ) -> Result<()>;

    /// Create a pull request.
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest>;
}
