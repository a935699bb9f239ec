use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;

use super::mapper;

const ITEM_LOOKUP_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    CONTENT(number: $number) {
      id
      projectItems(first: 50) { nodes { id project { id } } }
    }
  }
}"#;

const ADD_ITEM_MUTATION: &str = r#"
mutation($projectId: ID!, $contentId: ID!) {
  addProjectV2ItemById(input: { projectId: $projectId, contentId: $contentId }) {
    item { id }
  }
}"#;

const SET_STATUS_MUTATION: &str = r#"
mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
  updateProjectV2ItemFieldValue(input: {
    projectId: $projectId, itemId: $itemId, fieldId: $fieldId,
    value: { singleSelectOptionId: $optionId }
  }) {
    projectV2Item { id }
  }
}"#;

pub struct GitHubPlatform {
    client: Octocrab,
}

impl GitHubPlatform {
    pub fn new(token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(AppError::Config("GitHub bot token is empty".to_string()));
        }

        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self { client })
    }

    async fn graphql(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value> {
        let response: serde_json::Value = self
            .client
            .graphql(&json!({ "query": query, "variables": variables }))
            .await?;

        if let Some(message) = mapper::graphql_error(&response) {
            return Err(AppError::GitHubApi(format!("GraphQL error: {message}")));
        }
        Ok(response)
    }

    /// Returns (content node id, existing board item id on `project_id`).
    async fn lookup_item(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        kind: ItemKind,
        project_id: &str,
    ) -> Result<(String, Option<String>)> {
        let content = match kind {
            ItemKind::Issue => "issue",
            ItemKind::PullRequest => "pullRequest",
        };
        let query = ITEM_LOOKUP_QUERY.replace("CONTENT", content);
        let response = self
            .graphql(
                &query,
                json!({ "owner": owner, "repo": repo, "number": number }),
            )
            .await?;

        let content_id = response
            .pointer(&format!("/data/repository/{content}/id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                AppError::GitHubApi(format!("{content} #{number} not found in {owner}/{repo}"))
            })?
            .to_string();

        Ok((
            content_id,
            mapper::project_item_id(&response, content, project_id),
        ))
    }

    async fn add_content_to_project(&self, project_id: &str, content_id: &str) -> Result<String> {
        let response = self
            .graphql(
                ADD_ITEM_MUTATION,
                json!({ "projectId": project_id, "contentId": content_id }),
            )
            .await?;

        response
            .pointer("/data/addProjectV2ItemById/item/id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::GitHubApi("No item id in addProjectV2ItemById response".to_string()))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn create_issue(&self, owner: &str, repo: &str, issue: &CreateIssue) -> Result<Issue> {
        let issues = self.client.issues(owner, repo);
        let mut builder = issues.create(&issue.title).body(&issue.body);
        if !issue.assignees.is_empty() {
            builder = builder.assignees(issue.assignees.clone());
        }
        if !issue.labels.is_empty() {
            builder = builder.labels(issue.labels.clone());
        }

        let created = builder.send().await?;
        Ok(mapper::map_issue(&created))
    }

    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let issue = self.client.issues(owner, repo).get(number).await?;
        Ok(mapper::map_issue(&issue))
    }

    async fn add_issue_to_project(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        project_id: &str,
    ) -> Result<()> {
        let (content_id, existing) = self
            .lookup_item(owner, repo, number, ItemKind::Issue, project_id)
            .await?;

        if existing.is_some() {
            tracing::debug!(issue = number, "Issue already on project board");
            return Ok(());
        }

        self.add_content_to_project(project_id, &content_id).await?;
        Ok(())
    }

    async fn update_project_item_status(
        &self,
        owner: &str,
        repo: &str,
        update: &StatusUpdate<'_>,
    ) -> Result<()> {
        let (content_id, existing) = self
            .lookup_item(owner, repo, update.item_number, update.kind, update.project_id)
            .await?;

        let item_id = match existing {
            Some(id) => id,
            None => self.add_content_to_project(update.project_id, &content_id).await?,
        };

        self.graphql(
            SET_STATUS_MUTATION,
            json!({
                "projectId": update.project_id,
                "itemId": item_id,
                "fieldId": update.status_field_id,
                "optionId": update.status_option_id,
            }),
        )
        .await?;

        Ok(())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(owner, repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        let number = created.number;

        // Follow-up decorations are best-effort: the PR exists either way.
        if !pr.reviewers.is_empty() {
            let url = format!("/repos/{owner}/{repo}/pulls/{number}/requested_reviewers");
            let result: std::result::Result<serde_json::Value, _> = self
                .client
                .post(&url, Some(&json!({ "reviewers": pr.reviewers })))
                .await;
            if let Err(e) = result {
                tracing::warn!(pr = number, error = %e, "Failed to request reviewers");
            }
        }

        if !pr.assignees.is_empty() {
            let url = format!("/repos/{owner}/{repo}/issues/{number}/assignees");
            let result: std::result::Result<serde_json::Value, _> = self
                .client
                .post(&url, Some(&json!({ "assignees": pr.assignees })))
                .await;
            if let Err(e) = result {
                tracing::warn!(pr = number, error = %e, "Failed to add assignees");
            }
        }

        if !pr.labels.is_empty() {
            if let Err(e) = self
                .client
                .issues(owner, repo)
                .add_labels(number, &pr.labels)
                .await
            {
                tracing::warn!(pr = number, error = %e, "Failed to add labels");
            }
        }

        Ok(mapper::map_pull_request(&created))
    }
}
