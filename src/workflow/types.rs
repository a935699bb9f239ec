use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

/// What a dispatch was asked to do.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRequest {
    pub issue: Option<u64>,
    pub prompt: Option<String>,
    pub create_issue: bool,
    pub reviewer: Option<String>,
    /// Overrides the configured working branch for this run.
    pub base: Option<String>,
    pub dry_run: bool,
    /// Run despite configuration validation errors.
    pub force: bool,
}

impl WorkflowRequest {
    pub fn validate(&self) -> Result<()> {
        let prompt = self.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());

        if self.issue.is_none() && prompt.is_none() {
            return Err(AppError::InvalidRequest(
                "Provide either --issue <number> or --prompt <text>".to_string(),
            ));
        }
        if self.create_issue && self.issue.is_some() {
            return Err(AppError::InvalidRequest(
                "--create-issue cannot be combined with an existing --issue".to_string(),
            ));
        }
        if self.create_issue && prompt.is_none() {
            return Err(AppError::InvalidRequest(
                "--create-issue requires --prompt".to_string(),
            ));
        }
        if self.issue == Some(0) {
            return Err(AppError::InvalidRequest(
                "Issue numbers start at 1".to_string(),
            ));
        }
        if let Some(base) = &self.base {
            crate::config::check_branch_name(base).map_err(AppError::InvalidRequest)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkflowStage {
    Start,
    IssueResolved,
    StatusSet,
    EnvPrepared,
    Executing,
    ResultParsed,
    Summarized,
    TornDown,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Start => "start",
            WorkflowStage::IssueResolved => "issue_resolved",
            WorkflowStage::StatusSet => "status_set",
            WorkflowStage::EnvPrepared => "env_prepared",
            WorkflowStage::Executing => "executing",
            WorkflowStage::ResultParsed => "result_parsed",
            WorkflowStage::Summarized => "summarized",
            WorkflowStage::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values scraped from agent output. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArtifacts {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    /// Quality check command to pass (`true`) or fail (`false`).
    pub checks: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<String>,
}

/// Everything known about one dispatch.
#[derive(Debug, Clone)]
pub struct WorkflowRunState {
    pub stage: WorkflowStage,
    pub issue_number: Option<u64>,
    pub issue_title: Option<String>,
    pub issue_created: bool,
    pub prompt: Option<String>,
    pub working_branch: String,
    pub reviewer: Option<String>,
    pub container_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub exit_code: Option<i64>,
    /// Bootstrap step that reported failure, if any.
    pub failed_step: Option<String>,
    pub artifacts: RunArtifacts,
    /// Trailing environment logs captured on failure.
    pub diagnostics: Option<String>,
    pub teardown_warnings: Vec<String>,
    /// Hints printed with a failed run.
    pub troubleshooting: Vec<&'static str>,
}

impl WorkflowRunState {
    pub fn new(request: &WorkflowRequest, working_branch: &str) -> Self {
        Self {
            stage: WorkflowStage::Start,
            issue_number: request.issue,
            issue_title: None,
            issue_created: false,
            prompt: request.prompt.clone(),
            working_branch: working_branch.to_string(),
            reviewer: None,
            container_id: None,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            exit_code: None,
            failed_step: None,
            artifacts: RunArtifacts::default(),
            diagnostics: None,
            teardown_warnings: Vec::new(),
            troubleshooting: Vec::new(),
        }
    }

    pub fn advance(&mut self, stage: WorkflowStage) {
        tracing::debug!(from = %self.stage, to = %stage, "Workflow stage");
        self.stage = stage;
    }

    /// Record the terminal outcome. Only the first call has any effect.
    pub fn finalize(&mut self, success: bool, error: Option<String>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.finished_at = Some(Utc::now());
        self.outcome = Some(Outcome { success, error });
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn success(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.error.as_deref())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
