use std::path::Path;

use crate::config::AppConfig;
use crate::container::ContainerRuntime;
use crate::tools::ToolManager;
use crate::workspace::host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
    pub hint: Option<&'static str>,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            detail: detail.into(),
            hint: None,
        }
    }

    fn warn(name: &'static str, detail: impl Into<String>, hint: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            detail: detail.into(),
            hint: Some(hint),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            detail: detail.into(),
            hint: Some(hint),
        }
    }
}

/// Run every health check. With `fix`, create what can be created.
pub async fn run_checks(
    runtime: &dyn ContainerRuntime,
    repo_root: Option<&Path>,
    config_path: &Path,
    fix: bool,
) -> Vec<Check> {
    let mut checks = Vec::new();

    match runtime.ping().await {
        Ok(version) => checks.push(Check::pass("container runtime", format!("server {version}"))),
        Err(e) => checks.push(Check::fail(
            "container runtime",
            e.to_string(),
            "Install Docker and make sure the daemon is running (`docker info`)",
        )),
    }

    match repo_root {
        Some(root) => checks.push(Check::pass("git repository", root.display().to_string())),
        None => checks.push(Check::fail(
            "git repository",
            "not inside a git repository",
            "Run spindle from a clone of your project",
        )),
    }

    if !config_path.exists() && fix {
        if let Some(root) = repo_root {
            match super::init::write_config(root, config_path, false).await {
                Ok(_) => tracing::info!(path = %config_path.display(), "Created default configuration"),
                Err(e) => tracing::warn!(error = %e, "Could not create configuration"),
            }
        }
    }

    let config = if config_path.exists() {
        match AppConfig::load(Some(config_path)) {
            Ok(config) => {
                let problems = config.validate();
                if problems.is_empty() {
                    checks.push(Check::pass("configuration", config_path.display().to_string()));
                } else {
                    checks.push(Check::fail(
                        "configuration",
                        problems.join("; "),
                        "Fix with `spindle configure <key> <value>`",
                    ));
                }
                Some(config)
            }
            Err(e) => {
                checks.push(Check::fail(
                    "configuration",
                    e.to_string(),
                    "Repair the file or recreate it with `spindle init --force`",
                ));
                None
            }
        }
    } else {
        checks.push(Check::fail(
            "configuration",
            format!("{} not found", config_path.display()),
            "Run `spindle init` (or `spindle doctor --fix`)",
        ));
        None
    };

    let Some(config) = config else {
        return checks;
    };

    if config.bot_token().is_some() {
        checks.push(Check::pass("bot token", format!("${} is set", config.github.bot_token_env)));
    } else {
        checks.push(Check::fail(
            "bot token",
            format!("${} is not set", config.github.bot_token_env),
            "Export a GitHub token for the bot account with repo and project scopes",
        ));
    }

    let tools = ToolManager::new(&config.tools);
    if !tools.is_empty() {
        let (_, missing) = tools.resolve_secrets(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
        if missing.is_empty() {
            checks.push(Check::pass("tool secrets", tools.enabled().join(", ")));
        } else {
            checks.push(Check::fail(
                "tool secrets",
                format!("missing {}", missing.join(", ")),
                "Export the listed variables or disable the tool under [tools]",
            ));
        }
    }

    let volume = &config.container.credential_volume;
    match runtime.volume_exists(volume).await {
        Ok(true) => checks.push(Check::pass("credential volume", volume.clone())),
        Ok(false) if fix => match runtime.ensure_volume(volume).await {
            Ok(()) => checks.push(Check::pass("credential volume", format!("{volume} (created)"))),
            Err(e) => checks.push(Check::fail(
                "credential volume",
                e.to_string(),
                "Create it manually with `docker volume create`",
            )),
        },
        Ok(false) => checks.push(Check::warn(
            "credential volume",
            format!("{volume} does not exist"),
            "Run `spindle doctor --fix`, then log the agent in once inside it",
        )),
        Err(e) => checks.push(Check::warn(
            "credential volume",
            e.to_string(),
            "Check the container runtime first",
        )),
    }

    checks
}

/// Print the report. Returns false when any check failed.
pub async fn run(
    runtime: &dyn ContainerRuntime,
    config_path: &Path,
    fix: bool,
    verbose: bool,
) -> bool {
    let cwd = std::env::current_dir().ok();
    let repo_root = cwd.and_then(|cwd| host::repository_root(&cwd).ok());
    let checks = run_checks(runtime, repo_root.as_deref(), config_path, fix).await;

    for check in &checks {
        let mark = match check.status {
            CheckStatus::Pass => "ok  ",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "FAIL",
        };
        println!("[{mark}] {}", check.name);
        if verbose || check.status != CheckStatus::Pass {
            println!("       {}", check.detail);
        }
        if let Some(hint) = check.hint {
            println!("       -> {hint}");
        }
    }

    checks.iter().all(|c| c.status != CheckStatus::Fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn status_of(checks: &[Check], name: &str) -> Option<CheckStatus> {
        checks.iter().find(|c| c.name == name).map(|c| c.status)
    }

    #[tokio::test]
    async fn test_missing_config_and_daemon() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime {
            fail_ping: true,
            ..Default::default()
        };
        let checks = run_checks(&runtime, None, &tmp.path().join("config.toml"), false).await;

        assert_eq!(status_of(&checks, "container runtime"), Some(CheckStatus::Fail));
        assert_eq!(status_of(&checks, "git repository"), Some(CheckStatus::Fail));
        assert_eq!(status_of(&checks, "configuration"), Some(CheckStatus::Fail));
        assert_eq!(status_of(&checks, "bot token"), None);
    }

    #[tokio::test]
    async fn test_fix_creates_config_and_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(tmp.path()).unwrap();
        repo.remote("origin", "https://github.com/acme/widgets.git").unwrap();
        let config_path = tmp.path().join(".spindle/config.toml");
        let runtime = FakeRuntime::default();

        let checks = run_checks(&runtime, Some(tmp.path()), &config_path, true).await;

        assert!(config_path.exists());
        assert_eq!(status_of(&checks, "container runtime"), Some(CheckStatus::Pass));
        assert_eq!(status_of(&checks, "credential volume"), Some(CheckStatus::Pass));
        assert_eq!(runtime.calls_named("ensure_volume"), 1);
    }

    #[tokio::test]
    async fn test_missing_volume_without_fix_is_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        let mut config = AppConfig::with_identity("acme", "widgets", "main");
        config.github.bot_token_env = "SPINDLE_TEST_TOKEN_THAT_IS_NEVER_SET".to_string();
        config.save(&config_path).unwrap();
        let runtime = FakeRuntime::default();

        let checks = run_checks(&runtime, Some(tmp.path()), &config_path, false).await;
        assert_eq!(status_of(&checks, "credential volume"), Some(CheckStatus::Warn));
        assert_eq!(status_of(&checks, "bot token"), Some(CheckStatus::Fail));
        assert_eq!(runtime.calls_named("ensure_volume"), 0);
    }
}
