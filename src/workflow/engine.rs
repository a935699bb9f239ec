use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent::prompt::{self, BoardIds, PromptContext, TaskKind};
use crate::config::AppConfig;
use crate::container::{ContainerRuntime, ImageRequest, ImageResolver};
use crate::error::{AppError, Result};
use crate::platform::types::{BoardStatus, CreateIssue, ItemKind, StatusUpdate};
use crate::platform::Platform;
use crate::shutdown::CleanupRegistry;
use crate::tools::ToolManager;
use crate::workspace::bootstrap::AGENT_STEP;
use crate::workspace::{BootstrapParams, BootstrapScript, StagingArea};

use super::environment::{self, EnvironmentGuard, EnvironmentInputs};
use super::extract;
use super::progress::Progress;
use super::title::split_title;
use super::types::{WorkflowRequest, WorkflowRunState, WorkflowStage};

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const OUTPUT_BUFFER: usize = 256;

/// Secrets a run injects into its environment.
#[derive(Clone, Default)]
pub struct RunSecrets {
    pub bot_token: String,
    /// Value of the configured reviewer environment variable.
    pub reviewer: Option<String>,
    pub tool_secrets: Vec<(String, String)>,
}

// Manual Debug impl to avoid leaking tokens into logs
impl std::fmt::Debug for RunSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tools: Vec<&str> = self.tool_secrets.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("RunSecrets")
            .field("bot_token", &"[redacted]")
            .field("reviewer", &self.reviewer)
            .field("tool_secrets", &tools)
            .finish()
    }
}

impl RunSecrets {
    /// Read secrets from the process environment.
    pub fn from_env(config: &AppConfig, tools: &ToolManager) -> Result<Self> {
        let bot_token = config.bot_token().ok_or_else(|| {
            AppError::Config(format!(
                "Bot token not found: set ${}",
                config.github.bot_token_env
            ))
        })?;

        let lookup = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let (tool_secrets, missing) = tools.resolve_secrets(lookup);
        if !missing.is_empty() {
            return Err(AppError::Config(format!(
                "Missing secrets for enabled tools: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            bot_token,
            reviewer: lookup(&config.github.reviewer_env),
            tool_secrets,
        })
    }
}

/// `--reviewer` flag, then the reviewer env var, then the configured default.
pub fn resolve_reviewer(
    flag: Option<&str>,
    from_env: Option<&str>,
    default: Option<&str>,
) -> Option<String> {
    [flag, from_env, default]
        .into_iter()
        .flatten()
        .map(|r| r.trim().trim_start_matches('@'))
        .find(|r| !r.is_empty())
        .map(str::to_string)
}

/// What a dry run would do.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub issue_title: Option<String>,
    pub working_branch: String,
    pub reviewer: Option<String>,
    pub prompt: String,
    pub script: String,
}

#[derive(Debug)]
pub enum Dispatch {
    Ran(WorkflowRunState),
    Planned(DispatchPlan),
}

/// Turns a [`WorkflowRequest`] into one run of the agent in a fresh
/// environment.
pub struct WorkflowEngine {
    config: Arc<AppConfig>,
    platform: Arc<dyn Platform>,
    runtime: Arc<dyn ContainerRuntime>,
    images: Arc<dyn ImageResolver>,
    registry: Arc<CleanupRegistry>,
    repo_root: PathBuf,
    secrets: RunSecrets,
    interactive: bool,
}

impl WorkflowEngine {
    pub fn new(
        config: Arc<AppConfig>,
        platform: Arc<dyn Platform>,
        runtime: Arc<dyn ContainerRuntime>,
        images: Arc<dyn ImageResolver>,
        registry: Arc<CleanupRegistry>,
        repo_root: PathBuf,
        secrets: RunSecrets,
    ) -> Self {
        Self {
            config,
            platform,
            runtime,
            images,
            registry,
            repo_root,
            secrets,
            interactive: false,
        }
    }

    /// Repaint a progress line on stderr while the agent runs.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    fn owner(&self) -> &str {
        &self.config.project.owner
    }

    fn repo(&self) -> &str {
        &self.config.project.name
    }

    /// Checks every run must pass before touching GitHub or the runtime.
    fn preflight(&self, request: &WorkflowRequest) -> Result<()> {
        request.validate()?;

        let problems = self.config.validate();
        if !problems.is_empty() {
            if request.force {
                for problem in &problems {
                    tracing::warn!(problem = %problem, "Ignoring invalid configuration (--force)");
                }
            } else {
                return Err(AppError::Config(format!(
                    "Invalid configuration:\n  - {}",
                    problems.join("\n  - ")
                )));
            }
        }
        Ok(())
    }

    fn working_branch(&self, request: &WorkflowRequest) -> String {
        request
            .base
            .clone()
            .unwrap_or_else(|| self.config.project.working_branch.clone())
    }

    fn reviewer(&self, request: &WorkflowRequest) -> Option<String> {
        resolve_reviewer(
            request.reviewer.as_deref(),
            self.secrets.reviewer.as_deref(),
            self.config.github.default_reviewer.as_deref(),
        )
    }

    pub async fn dispatch(&self, request: WorkflowRequest) -> Result<Dispatch> {
        if request.dry_run {
            self.plan(&request).await.map(Dispatch::Planned)
        } else {
            self.run(&request).await.map(Dispatch::Ran)
        }
    }

    /// Render the prompt and bootstrap script without creating anything.
    pub async fn plan(&self, request: &WorkflowRequest) -> Result<DispatchPlan> {
        self.preflight(request)?;

        let working_branch = self.working_branch(request);
        let reviewer = self.reviewer(request);
        let issue_title = match request.issue {
            Some(number) => self.fetch_issue_title(number).await,
            None => request.prompt.as_deref().map(|p| split_title(p).title),
        };

        let kind = self.task_kind(request.issue, issue_title.clone(), request.prompt.as_deref());
        let tools = ToolManager::new(&self.config.tools);
        let prompt = self.agent_prompt(kind, &working_branch, reviewer.as_deref());
        let script = self.bootstrap(&working_branch, &tools, prompt.clone()).render();

        Ok(DispatchPlan {
            issue_title,
            working_branch,
            reviewer,
            prompt,
            script,
        })
    }

    /// Execute a dispatch end to end.
    ///
    /// `Err` means the request was rejected before anything happened. Once
    /// the run starts, failures are recorded in the returned state, and the
    /// environment is always torn down first.
    pub async fn run(&self, request: &WorkflowRequest) -> Result<WorkflowRunState> {
        self.preflight(request)?;

        let working_branch = self.working_branch(request);
        let mut state = WorkflowRunState::new(request, &working_branch);
        state.reviewer = self.reviewer(request);

        let staging = StagingArea::new()?;
        let guard = Arc::new(EnvironmentGuard::new(
            Arc::clone(&self.runtime),
            Duration::from_secs(self.config.container.stop_grace_secs),
            staging,
        ));
        let cleanup_id = {
            let guard = Arc::clone(&guard);
            self.registry.register("environment", move || async move {
                for warning in guard.teardown().await {
                    eprintln!("{warning}");
                }
            })
        };

        let result = self.drive(request, &mut state, &guard).await;

        match result {
            Ok(()) => {
                state.finalize(true, None);
            }
            Err(e) => {
                tracing::error!(stage = %state.stage, error = %e, "Dispatch failed");
                state.finalize(false, Some(e.to_string()));
                state.troubleshooting = e.troubleshooting();
            }
        }
        state.advance(WorkflowStage::Summarized);

        state.teardown_warnings = guard.teardown().await;
        self.registry.unregister(cleanup_id);
        state.advance(WorkflowStage::TornDown);

        Ok(state)
    }

    async fn drive(
        &self,
        request: &WorkflowRequest,
        state: &mut WorkflowRunState,
        guard: &EnvironmentGuard,
    ) -> Result<()> {
        self.resolve_issue(request, state).await?;
        state.advance(WorkflowStage::IssueResolved);

        if let Some(number) = state.issue_number {
            self.sync_board(number, ItemKind::Issue, BoardStatus::InProgress)
                .await;
        }
        state.advance(WorkflowStage::StatusSet);

        let tools = ToolManager::new(&self.config.tools);
        self.prepare_environment(state, guard, &tools).await?;
        state.advance(WorkflowStage::EnvPrepared);

        let container_id = guard
            .container_id()
            .await
            .ok_or_else(|| AppError::Internal("Environment vanished before execution".to_string()))?;

        let kind = self.task_kind(
            state.issue_number,
            state.issue_title.clone(),
            state.prompt.as_deref(),
        );
        let prompt = self.agent_prompt(kind, &state.working_branch, state.reviewer.as_deref());
        let script = self.bootstrap(&state.working_branch, &tools, prompt);
        let script_path = guard.write_staged("bootstrap.sh", &script.render()).await?;
        self.runtime
            .copy_into(&container_id, &script_path, environment::BOOTSTRAP_TARGET)
            .await?;

        state.advance(WorkflowStage::Executing);
        let (exit_code, transcript) = self.execute(&container_id, state).await?;
        state.exit_code = Some(exit_code);
        if state.failed_step.is_none() && exit_code != 0 {
            state.failed_step = script
                .step_for_exit_code(exit_code)
                .map(|step| step.name().to_string());
        }

        state.artifacts = extract::extract_artifacts(
            &transcript,
            &state.working_branch,
            &self.config.quality.checks,
        );
        state.advance(WorkflowStage::ResultParsed);

        if exit_code != 0 {
            state.diagnostics = Some(self.diagnostics(&container_id, &transcript).await);
            return Err(match state.failed_step.as_deref() {
                Some(step) if step != AGENT_STEP => AppError::Workspace(format!(
                    "Bootstrap step '{step}' failed (exit code {exit_code})"
                )),
                _ => AppError::Agent(format!("Agent exited with code {exit_code}")),
            });
        }

        if let Some(pr) = state.artifacts.pr_number {
            self.sync_board(pr, ItemKind::PullRequest, BoardStatus::InReview)
                .await;
        }
        Ok(())
    }

    async fn fetch_issue_title(&self, number: u64) -> Option<String> {
        match self.platform.get_issue(self.owner(), self.repo(), number).await {
            Ok(issue) => Some(issue.title),
            Err(e) => {
                tracing::warn!(issue = number, error = %e, "Could not fetch issue title");
                None
            }
        }
    }

    async fn resolve_issue(&self, request: &WorkflowRequest, state: &mut WorkflowRunState) -> Result<()> {
        if let Some(number) = request.issue {
            state.issue_title = self.fetch_issue_title(number).await;
            return Ok(());
        }

        let prompt = request.prompt.as_deref().unwrap_or_default();
        if !request.create_issue {
            state.issue_title = Some(split_title(prompt).title);
            return Ok(());
        }

        let split = split_title(prompt);
        let issue = self
            .platform
            .create_issue(
                self.owner(),
                self.repo(),
                &CreateIssue {
                    title: split.title,
                    body: split.description,
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(issue = issue.number, url = %issue.url, "Created issue");

        state.issue_number = Some(issue.number);
        state.issue_title = Some(issue.title);
        state.issue_created = true;

        if let Some(board) = &self.config.github.board {
            match self
                .platform
                .add_issue_to_project(self.owner(), self.repo(), issue.number, &board.project_id)
                .await
            {
                Ok(()) => {
                    self.sync_board(issue.number, ItemKind::Issue, BoardStatus::Ready)
                        .await
                }
                Err(e) => {
                    tracing::warn!(issue = issue.number, error = %e, "Failed to add issue to project board")
                }
            }
        }
        Ok(())
    }

    /// Move a board card. Never fails the run.
    async fn sync_board(&self, number: u64, kind: ItemKind, status: BoardStatus) {
        let Some(board) = &self.config.github.board else {
            tracing::warn!(item = number, status = %status, "No project board configured, skipping status update");
            return;
        };
        let Some(option_id) = board.status.option_for(status) else {
            tracing::warn!(item = number, status = %status, "No board option configured for status");
            return;
        };

        let update = StatusUpdate {
            item_number: number,
            kind,
            project_id: &board.project_id,
            status_field_id: &board.status_field_id,
            status_option_id: option_id,
        };
        match self
            .platform
            .update_project_item_status(self.owner(), self.repo(), &update)
            .await
        {
            Ok(()) => tracing::info!(item = number, status = %status, "Board status updated"),
            Err(e) => tracing::warn!(item = number, status = %status, error = %e, "Failed to update board status"),
        }
    }

    async fn prepare_environment(
        &self,
        state: &mut WorkflowRunState,
        guard: &EnvironmentGuard,
        tools: &ToolManager,
    ) -> Result<()> {
        let container = &self.config.container;

        self.runtime.ensure_volume(&container.credential_volume).await?;

        let install_commands = tools.install_commands();
        let image = self
            .images
            .resolve(&ImageRequest {
                repo_root: &self.repo_root,
                devcontainer_path: &container.devcontainer_path,
                install_commands: &install_commands,
                staging_dir: guard.staging_path(),
            })
            .await?;

        let tool_config = tools.write_config(guard.staging_path())?;
        if tool_config.is_none() {
            tracing::debug!("No auxiliary tools enabled");
        }

        let suffix = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let spec = environment::environment_spec(EnvironmentInputs {
            config: &self.config,
            name: environment::container_name(self.repo(), state.issue_number, &suffix),
            image,
            repo_root: &self.repo_root,
            bot_token: &self.secrets.bot_token,
            reviewer: state.reviewer.as_deref(),
            issue: state.issue_number,
            tool_config,
            tool_secrets: self.secrets.tool_secrets.clone(),
        });

        let handle = guard.create(&spec).await?;
        tracing::info!(container = %handle.name, id = %handle.id, "Environment created");
        state.container_id = Some(handle.id.clone());

        self.runtime.start(&handle.id).await?;
        Ok(())
    }

    fn task_kind(&self, issue: Option<u64>, title: Option<String>, prompt: Option<&str>) -> TaskKind {
        match issue {
            Some(number) => TaskKind::Issue { number, title },
            None => TaskKind::Prompt {
                text: prompt.unwrap_or_default().to_string(),
            },
        }
    }

    fn read_instructions(&self) -> String {
        let path = self.repo_root.join(&self.config.project.instructions_file);
        match std::fs::read_to_string(&path) {
            Ok(raw) => prompt::filter_instructions(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read project instructions");
                String::new()
            }
        }
    }

    fn agent_prompt(&self, kind: TaskKind, working_branch: &str, reviewer: Option<&str>) -> String {
        let instructions = self.read_instructions();
        let repo_full_name = self.config.repo_full_name();
        let board = self.config.github.board.as_ref().map(|b| BoardIds {
            project_id: b.project_id.clone(),
            status_field_id: b.status_field_id.clone(),
            in_review_option_id: b.status.in_review.clone(),
        });

        prompt::build_agent_prompt(&PromptContext {
            kind,
            repo_full_name: &repo_full_name,
            working_branch,
            quality_checks: &self.config.quality.checks,
            package_manager: self.config.quality.package_manager.as_deref(),
            instructions: &instructions,
            reviewer,
            board,
        })
    }

    fn bootstrap(&self, working_branch: &str, tools: &ToolManager, prompt: String) -> BootstrapScript {
        let config = &self.config;
        BootstrapScript::new(BootstrapParams {
            workspace_dir: environment::WORKSPACE_DIR.to_string(),
            owner: config.project.owner.clone(),
            repo: config.project.name.clone(),
            working_branch: working_branch.to_string(),
            author_name: config.git.author_name.clone(),
            author_email: config.git.author_email.clone(),
            bot_username: config.github.bot_username.clone(),
            credential_file: environment::CREDENTIAL_FILE.to_string(),
            git_credential_store: environment::GIT_CREDENTIAL_STORE.to_string(),
            token_env: environment::TOKEN_ENV.to_string(),
            init_commands: tools.init_commands(),
            prompt_path: environment::PROMPT_PATH.to_string(),
            prompt,
            agent_command: config.container.agent_command.clone(),
            tool_config: (!tools.is_empty()).then(|| environment::TOOL_CONFIG_TARGET.to_string()),
        })
    }

    /// Run the bootstrap and consume its output. Returns the exit code and
    /// the full transcript.
    async fn execute(&self, container_id: &str, state: &mut WorkflowRunState) -> Result<(i64, String)> {
        let progress = Progress::new(self.interactive);
        let ticker = progress.spawn_ticker(TICK_INTERVAL);

        let (tx, mut rx) = mpsc::channel(OUTPUT_BUFFER);
        let argv = vec!["bash".to_string(), environment::BOOTSTRAP_TARGET.to_string()];
        let mut transcript = String::new();

        let exec = self.runtime.exec_streaming(container_id, &argv, tx);
        let consume = async {
            while let Some(line) = rx.recv().await {
                progress.observe(line.text());
                transcript.push_str(line.text());
                transcript.push('\n');
            }
        };
        let both = async { tokio::join!(exec, consume).0 };

        let limit = self.config.container.agent_timeout_secs;
        let outcome = if limit == 0 {
            both.await
        } else {
            match tokio::time::timeout(Duration::from_secs(limit), both).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "Agent did not finish within {limit}s (container.agent_timeout_secs)"
                ))),
            }
        };

        state.failed_step = progress.failed_step();
        let message = match &outcome {
            Ok(0) => "Agent finished".to_string(),
            Ok(code) => format!("Agent exited with code {code}"),
            Err(e) => format!("Agent run aborted: {e}"),
        };
        progress.finish(ticker, &message);

        outcome.map(|code| (code, transcript))
    }

    async fn diagnostics(&self, container_id: &str, transcript: &str) -> String {
        let tail = self.config.container.log_tail_lines;
        let lines: Vec<&str> = transcript.lines().collect();
        let mut text = lines[lines.len().saturating_sub(tail)..].join("\n");

        match self.runtime.logs(container_id, tail).await {
            Ok(logs) if !logs.trim().is_empty() => {
                text.push_str("\n--- environment logs ---\n");
                text.push_str(logs.trim_end());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(container = %container_id, error = %e, "Could not read environment logs"),
        }
        text
    }
}
