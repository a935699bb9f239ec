use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Operator-facing hints printed alongside a fatal error.
    pub fn troubleshooting(&self) -> Vec<&'static str> {
        match self {
            AppError::Config(_) => vec![
                "Run `spindle configure --validate` to list configuration problems",
                "Run `spindle init --force` to regenerate the configuration",
            ],
            AppError::InvalidRequest(_) => vec![
                "Pass either --issue <n> or --prompt <text>",
                "--create-issue requires --prompt and cannot be combined with --issue",
            ],
            AppError::GitHubApi(_) => vec![
                "Check that the bot token environment variable is set and not expired",
                "Check that the token has repo and project scopes",
                "Check that the repository owner/name in the configuration are correct",
            ],
            AppError::Container(_) | AppError::Timeout(_) => vec![
                "Check that the Docker daemon is running (`docker info`)",
                "Check that your user may access the Docker socket",
                "Run `spindle containers --all` to look for leftover environments",
            ],
            AppError::Git(_) | AppError::Workspace(_) => vec![
                "Check that the working branch exists on the GitHub remote",
                "Check that the bot account has push permission on the repository",
            ],
            AppError::Agent(_) => vec![
                "Check that the agent credential volume is logged in (`spindle doctor`)",
                "Re-run with --verbose to see the agent output",
            ],
            _ => vec!["Run `spindle doctor --verbose` for a full health check"],
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Toml(e.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(e: toml::ser::Error) -> Self {
        AppError::Toml(e.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
