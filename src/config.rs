use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::platform::types::BoardStatus;

/// Location of the configuration file, relative to the host repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".spindle/config.toml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub project: ProjectConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub git: GitIdentityConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectConfig {
    pub owner: String,
    pub name: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Integration branch every generated feature branch starts from and targets.
    #[serde(default = "default_working_branch")]
    pub working_branch: String,
    #[serde(default = "default_instructions_file")]
    pub instructions_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GitHubConfig {
    /// Name of the environment variable holding the bot token. The token itself
    /// never lives in the file.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    pub bot_username: String,
    #[serde(default = "default_reviewer_env")]
    pub reviewer_env: String,
    #[serde(default)]
    pub default_reviewer: Option<String>,
    #[serde(default)]
    pub board: Option<BoardConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardConfig {
    pub project_id: String,
    pub status_field_id: String,
    #[serde(default)]
    pub status: StatusOptions,
}

/// Option ids of the board's single-select status field.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StatusOptions {
    pub backlog: Option<String>,
    pub ready: Option<String>,
    pub in_progress: Option<String>,
    pub in_review: Option<String>,
    pub done: Option<String>,
}

impl StatusOptions {
    pub fn option_for(&self, status: BoardStatus) -> Option<&str> {
        match status {
            BoardStatus::Backlog => self.backlog.as_deref(),
            BoardStatus::Ready => self.ready.as_deref(),
            BoardStatus::InProgress => self.in_progress.as_deref(),
            BoardStatus::InReview => self.in_review.as_deref(),
            BoardStatus::Done => self.done.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QualityConfig {
    /// Shell commands the agent must run before opening a PR.
    #[serde(default)]
    pub checks: Vec<String>,
    /// Informational only; surfaced in the agent prompt.
    #[serde(default)]
    pub package_manager: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GitIdentityConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for GitIdentityConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContainerConfig {
    #[serde(default = "default_runtime_bin")]
    pub runtime_bin: String,
    #[serde(default = "default_devcontainer_path")]
    pub devcontainer_path: PathBuf,
    #[serde(default = "default_credential_volume")]
    pub credential_volume: String,
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Ceiling on agent execution. `0` disables the ceiling.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime_bin: default_runtime_bin(),
            devcontainer_path: default_devcontainer_path(),
            credential_volume: default_credential_volume(),
            agent_command: default_agent_command(),
            agent_timeout_secs: default_agent_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

/// Auxiliary tool toggles.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub github: bool,
    #[serde(default)]
    pub semgrep: bool,
    #[serde(default)]
    pub context7: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_working_branch() -> String {
    "staging".to_string()
}

fn default_instructions_file() -> PathBuf {
    PathBuf::from("CLAUDE.md")
}

fn default_bot_token_env() -> String {
    "SPINDLE_BOT_TOKEN".to_string()
}

fn default_reviewer_env() -> String {
    "SPINDLE_REVIEWER".to_string()
}

fn default_author_name() -> String {
    "spindle[bot]".to_string()
}

fn default_author_email() -> String {
    "spindle-bot@users.noreply.github.com".to_string()
}

fn default_runtime_bin() -> String {
    "docker".to_string()
}

fn default_devcontainer_path() -> PathBuf {
    PathBuf::from(".devcontainer/devcontainer.json")
}

fn default_credential_volume() -> String {
    "spindle-agent-home".to_string()
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_log_tail_lines() -> usize {
    200
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            return Err(AppError::Config(format!(
                "No configuration at {} (run `spindle init`)",
                path.display()
            )));
        }

        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_path()).format(config::FileFormat::Toml))
            // Environment variable overrides with SPINDLE__ prefix
            .add_source(
                config::Environment::with_prefix("SPINDLE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// A configuration populated with defaults for everything except identity.
    pub fn with_identity(owner: &str, name: &str, default_branch: &str) -> Self {
        Self {
            project: ProjectConfig {
                owner: owner.to_string(),
                name: name.to_string(),
                default_branch: default_branch.to_string(),
                working_branch: default_working_branch(),
                instructions_file: default_instructions_file(),
            },
            github: GitHubConfig {
                bot_token_env: default_bot_token_env(),
                bot_username: String::new(),
                reviewer_env: default_reviewer_env(),
                default_reviewer: None,
                board: None,
            },
            quality: QualityConfig::default(),
            git: GitIdentityConfig::default(),
            container: ContainerConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// Every problem with the configuration. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (key, value) in [
            ("project.owner", &self.project.owner),
            ("project.name", &self.project.name),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{key} is empty"));
            } else if value.contains('/') || value.chars().any(char::is_whitespace) {
                problems.push(format!("{key} must be a bare GitHub name, got {value:?}"));
            }
        }

        for (key, value) in [
            ("project.default_branch", &self.project.default_branch),
            ("project.working_branch", &self.project.working_branch),
        ] {
            if let Err(e) = check_branch_name(value) {
                problems.push(format!("{key}: {e}"));
            }
        }

        if self.github.bot_token_env.trim().is_empty() {
            problems.push("github.bot_token_env is empty".to_string());
        }
        if self.github.bot_username.trim().is_empty() {
            problems.push("github.bot_username is empty".to_string());
        }
        if self.github.reviewer_env.trim().is_empty() {
            problems.push("github.reviewer_env is empty".to_string());
        }

        if let Some(board) = &self.github.board {
            if board.project_id.trim().is_empty() {
                problems.push("github.board.project_id is empty".to_string());
            }
            if board.status_field_id.trim().is_empty() {
                problems.push("github.board.status_field_id is empty".to_string());
            }
        }

        if self.quality.checks.iter().any(|c| c.trim().is_empty()) {
            problems.push("quality.checks contains an empty command".to_string());
        }

        if self.git.author_name.trim().is_empty() {
            problems.push("git.author_name is empty".to_string());
        }
        if !self.git.author_email.contains('@') {
            problems.push(format!(
                "git.author_email is not an email address: {:?}",
                self.git.author_email
            ));
        }

        if self.container.agent_command.trim().is_empty() {
            problems.push("container.agent_command is empty".to_string());
        }
        if self.container.credential_volume.trim().is_empty() {
            problems.push("container.credential_volume is empty".to_string());
        }

        problems
    }

    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.project.owner, self.project.name)
    }

    pub fn bot_token(&self) -> Option<String> {
        std::env::var(&self.github.bot_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Reject names that could be read as an option by git.
pub fn check_branch_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err("branch name is empty".to_string());
    }
    if name.starts_with('-') {
        return Err(format!("invalid branch name (starts with '-'): {name}"));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\') {
        return Err(format!("invalid characters in branch name: {name}"));
    }
    Ok(())
}

/// Where a setting's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    Configured(T),
    Detected(T),
    Default(T),
}

impl<T> Resolved<T> {
    /// Precedence: configured, then detected, then the default.
    pub fn pick(configured: Option<T>, detected: Option<T>, default: T) -> Self {
        match (configured, detected) {
            (Some(value), _) => Resolved::Configured(value),
            (None, Some(value)) => Resolved::Detected(value),
            (None, None) => Resolved::Default(default),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Resolved::Configured(v) | Resolved::Detected(v) | Resolved::Default(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Resolved::Configured(v) | Resolved::Detected(v) | Resolved::Default(v) => v,
        }
    }

    pub fn origin(&self) -> &'static str {
        match self {
            Resolved::Configured(_) => "configured",
            Resolved::Detected(_) => "detected",
            Resolved::Default(_) => "default",
        }
    }
}

/// Settings read from the host repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedSettings {
    pub owner: Option<String>,
    pub name: Option<String>,
    pub default_branch: Option<String>,
    pub package_manager: Option<String>,
}

/// Project identity after merging an existing config with detection results.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub owner: Resolved<String>,
    pub name: Resolved<String>,
    pub default_branch: Resolved<String>,
    pub package_manager: Resolved<Option<String>>,
}

impl ResolvedIdentity {
    pub fn resolve(existing: Option<&AppConfig>, detected: &DetectedSettings) -> Self {
        let non_empty = |s: &String| !s.trim().is_empty();
        Self {
            owner: Resolved::pick(
                existing.map(|c| c.project.owner.clone()).filter(non_empty),
                detected.owner.clone(),
                String::new(),
            ),
            name: Resolved::pick(
                existing.map(|c| c.project.name.clone()).filter(non_empty),
                detected.name.clone(),
                String::new(),
            ),
            default_branch: Resolved::pick(
                existing
                    .map(|c| c.project.default_branch.clone())
                    .filter(non_empty),
                detected.default_branch.clone(),
                default_branch(),
            ),
            package_manager: Resolved::pick(
                existing.and_then(|c| c.quality.package_manager.clone()).map(Some),
                detected.package_manager.clone().map(Some),
                None,
            ),
        }
    }

    /// Build a fresh config, keeping every non-identity field from `base`.
    pub fn apply(&self, base: Option<&AppConfig>) -> AppConfig {
        let mut config = base.cloned().unwrap_or_else(|| {
            AppConfig::with_identity("", "", self.default_branch.value())
        });
        config.project.owner = self.owner.value().clone();
        config.project.name = self.name.value().clone();
        config.project.default_branch = self.default_branch.value().clone();
        config.quality.package_manager = self.package_manager.value().clone();
        config
    }
}
