//! The isolated execution environment of one run: how it is specified and
//! how it is torn down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, Mount, MANAGED_LABEL,
};
use crate::error::{AppError, Result};
use crate::workspace::StagingArea;

pub const HOST_REPO_MOUNT: &str = "/workspace/host";
pub const CREDENTIAL_DIR: &str = "/home/agent/.claude";
pub const CREDENTIAL_FILE: &str = "/home/agent/.claude/.credentials.json";
pub const TOOL_CONFIG_TARGET: &str = "/etc/spindle/mcp.json";
/// `docker cp` needs the parent to exist already, so this sits directly in `/tmp`.
pub const BOOTSTRAP_TARGET: &str = "/tmp/spindle-bootstrap.sh";
pub const PROMPT_PATH: &str = "/tmp/spindle/prompt.md";
pub const WORKSPACE_DIR: &str = "/tmp/spindle/work";
pub const GIT_CREDENTIAL_STORE: &str = "/tmp/spindle-git-credentials";
pub const TOKEN_ENV: &str = "GH_TOKEN";

/// Inputs for [`environment_spec`].
pub struct EnvironmentInputs<'a> {
    pub config: &'a AppConfig,
    pub name: String,
    pub image: String,
    pub repo_root: &'a Path,
    pub bot_token: &'a str,
    pub reviewer: Option<&'a str>,
    pub issue: Option<u64>,
    pub tool_config: Option<PathBuf>,
    pub tool_secrets: Vec<(String, String)>,
}

/// Container name for a run: `spindle-<repo>-<issue|run>-<suffix>`.
pub fn container_name(repo: &str, issue: Option<u64>, suffix: &str) -> String {
    let repo: String = repo
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    match issue {
        Some(n) => format!("spindle-{repo}-issue-{n}-{suffix}"),
        None => format!("spindle-{repo}-run-{suffix}"),
    }
}

pub fn environment_spec(inputs: EnvironmentInputs<'_>) -> ContainerSpec {
    let config = inputs.config;

    let mut env = vec![
        (TOKEN_ENV.to_string(), inputs.bot_token.to_string()),
        ("GITHUB_TOKEN".to_string(), inputs.bot_token.to_string()),
        ("SPINDLE_REPO_OWNER".to_string(), config.project.owner.clone()),
        ("SPINDLE_REPO_NAME".to_string(), config.project.name.clone()),
        ("SPINDLE_BOT_USERNAME".to_string(), config.github.bot_username.clone()),
        ("CLAUDE_CONFIG_DIR".to_string(), CREDENTIAL_DIR.to_string()),
    ];
    if let Some(reviewer) = inputs.reviewer {
        env.push(("SPINDLE_REVIEWER".to_string(), reviewer.to_string()));
    }
    env.extend(inputs.tool_secrets);

    let mut mounts = vec![
        Mount::Bind {
            source: inputs.repo_root.to_path_buf(),
            target: HOST_REPO_MOUNT.to_string(),
            read_only: true,
        },
        Mount::Volume {
            name: config.container.credential_volume.clone(),
            target: CREDENTIAL_DIR.to_string(),
            read_only: false,
        },
    ];
    if let Some(tool_config) = inputs.tool_config {
        mounts.push(Mount::Bind {
            source: tool_config,
            target: TOOL_CONFIG_TARGET.to_string(),
            read_only: true,
        });
    }

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert("spindle.repo".to_string(), config.repo_full_name());
    if let Some(issue) = inputs.issue {
        labels.insert("spindle.issue".to_string(), issue.to_string());
    }

    ContainerSpec {
        name: inputs.name,
        image: inputs.image,
        env,
        mounts,
        labels,
        workdir: Some("/home/agent".to_string()),
        user: Some("agent".to_string()),
        command: vec!["sleep".to_string(), "infinity".to_string()],
    }
}

/// Owns everything a run must release: the container and the staging dir.
///
/// [`teardown`](Self::teardown) takes both out, so however many callers
/// race to it (normal completion, interrupt handler) the work happens once.
/// [`create`](Self::create) holds the container slot across the runtime
/// call, so a teardown that starts mid-create waits for the handle.
pub struct EnvironmentGuard {
    runtime: Arc<dyn ContainerRuntime>,
    grace: Duration,
    staging_path: PathBuf,
    container: Mutex<ContainerSlot>,
    staging: Mutex<Option<StagingArea>>,
}

#[derive(Default)]
struct ContainerSlot {
    handle: Option<ContainerHandle>,
    closed: bool,
}

impl EnvironmentGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, grace: Duration, staging: StagingArea) -> Self {
        Self {
            runtime,
            grace,
            staging_path: staging.path().to_path_buf(),
            container: Mutex::new(ContainerSlot::default()),
            staging: Mutex::new(Some(staging)),
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Write a file into the staging dir. Fails after teardown.
    pub async fn write_staged(&self, name: &str, content: &str) -> Result<PathBuf> {
        match self.staging.lock().await.as_ref() {
            Some(staging) => staging.write_file(name, content),
            None => Err(AppError::Cancelled(
                "Environment already torn down".to_string(),
            )),
        }
    }

    /// Create the container and record its handle in one step. Refused
    /// once teardown has run.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let mut slot = self.container.lock().await;
        if slot.closed {
            return Err(AppError::Cancelled(
                "Environment already torn down".to_string(),
            ));
        }
        let handle = self.runtime.create(spec).await?;
        slot.handle = Some(handle.clone());
        Ok(handle)
    }

    pub async fn container_id(&self) -> Option<String> {
        self.container.lock().await.handle.as_ref().map(|h| h.id.clone())
    }

    /// Stop and remove the container, then delete the staging dir.
    /// Failures come back as operator-facing warnings.
    pub async fn teardown(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let handle = {
            let mut slot = self.container.lock().await;
            slot.closed = true;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            let id = handle.id.as_str();
            let running = match self.runtime.inspect(id).await {
                Ok(state) => state == ContainerState::Running,
                Err(e) => {
                    tracing::warn!(container = %id, error = %e, "Inspect before teardown failed");
                    true
                }
            };
            if running {
                if let Err(e) = self.runtime.stop(id, self.grace).await {
                    tracing::warn!(container = %id, error = %e, "Failed to stop container");
                }
            }
            match self.runtime.remove(id, true).await {
                Ok(()) => tracing::info!(container = %handle.name, "Environment removed"),
                Err(e) => {
                    tracing::error!(container = %id, error = %e, "Failed to remove container");
                    warnings.push(format!(
                        "Environment {} was not removed ({e}). Remove it manually with `docker rm -f {id}`",
                        handle.name
                    ));
                }
            }
        }

        if let Some(mut staging) = self.staging.lock().await.take() {
            let path = staging.path().display().to_string();
            if let Err(e) = staging.close() {
                tracing::warn!(path = %path, error = %e, "Failed to remove staging dir");
                warnings.push(format!("Temporary files left at {path}: {e}"));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn config() -> AppConfig {
        let mut config = AppConfig::with_identity("acme", "widgets", "main");
        config.github.bot_username = "acme-bot".to_string();
        config
    }

    fn minimal_spec() -> ContainerSpec {
        let config = config();
        environment_spec(EnvironmentInputs {
            config: &config,
            name: "spindle-test".to_string(),
            image: "spindle-agent:test".to_string(),
            repo_root: Path::new("/src"),
            bot_token: "t",
            reviewer: None,
            issue: None,
            tool_config: None,
            tool_secrets: vec![],
        })
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("Widgets.io", Some(4), "ab12"), "spindle-widgets-io-issue-4-ab12");
        assert_eq!(container_name("widgets", None, "ab12"), "spindle-widgets-run-ab12");
    }

    #[test]
    fn test_environment_spec_mounts_and_secrets() {
        let config = config();
        let spec = environment_spec(EnvironmentInputs {
            config: &config,
            name: "spindle-widgets-issue-4-x".to_string(),
            image: "spindle-agent:abc".to_string(),
            repo_root: Path::new("/src/widgets"),
            bot_token: "ghs_secret",
            reviewer: Some("octocat"),
            issue: Some(4),
            tool_config: Some(PathBuf::from("/tmp/stage/mcp.json")),
            tool_secrets: vec![("SEMGREP_APP_TOKEN".to_string(), "sg".to_string())],
        });

        let env: BTreeMap<_, _> = spec.env.iter().cloned().collect();
        assert_eq!(env["GH_TOKEN"], "ghs_secret");
        assert_eq!(env["GITHUB_TOKEN"], "ghs_secret");
        assert_eq!(env["SPINDLE_REVIEWER"], "octocat");
        assert_eq!(env["SPINDLE_REPO_OWNER"], "acme");
        assert_eq!(env["CLAUDE_CONFIG_DIR"], CREDENTIAL_DIR);
        assert_eq!(env["SEMGREP_APP_TOKEN"], "sg");

        assert!(spec.mounts.contains(&Mount::Bind {
            source: PathBuf::from("/src/widgets"),
            target: HOST_REPO_MOUNT.to_string(),
            read_only: true,
        }));
        assert!(spec.mounts.iter().any(|m| matches!(
            m,
            Mount::Volume { target, read_only: false, .. } if target == CREDENTIAL_DIR
        )));
        assert!(spec.mounts.iter().any(|m| matches!(
            m,
            Mount::Bind { target, read_only: true, .. } if target == TOOL_CONFIG_TARGET
        )));

        assert_eq!(spec.labels[MANAGED_LABEL], "true");
        assert_eq!(spec.labels["spindle.repo"], "acme/widgets");
        assert_eq!(spec.labels["spindle.issue"], "4");

        // Secrets never show up in debug output.
        assert!(!format!("{spec:?}").contains("ghs_secret"));
    }

    #[test]
    fn test_environment_spec_without_optional_parts() {
        let config = config();
        let spec = environment_spec(EnvironmentInputs {
            config: &config,
            name: "n".to_string(),
            image: "i".to_string(),
            repo_root: Path::new("/src"),
            bot_token: "t",
            reviewer: None,
            issue: None,
            tool_config: None,
            tool_secrets: vec![],
        });
        assert!(!spec.env.iter().any(|(k, _)| k == "SPINDLE_REVIEWER"));
        assert_eq!(spec.mounts.len(), 2);
        assert!(!spec.labels.contains_key("spindle.issue"));
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let runtime = Arc::new(FakeRuntime::default());
        let staging = StagingArea::new().unwrap();
        let staging_path = staging.path().to_path_buf();
        let guard = EnvironmentGuard::new(runtime.clone(), Duration::from_secs(1), staging);
        guard.create(&minimal_spec()).await.unwrap();

        guard.write_staged("bootstrap.sh", "true\n").await.unwrap();
        assert!(guard.teardown().await.is_empty());
        assert!(guard.teardown().await.is_empty());
        assert!(guard.write_staged("late.sh", "true\n").await.is_err());

        assert_eq!(runtime.calls_named("remove"), 1);
        assert_eq!(runtime.calls_named("stop"), 1);
        assert!(!staging_path.exists());
        assert_eq!(guard.container_id().await, None);
    }

    #[tokio::test]
    async fn test_teardown_reports_remove_failure() {
        let runtime = Arc::new(FakeRuntime {
            fail_remove: true,
            ..Default::default()
        });
        let guard = EnvironmentGuard::new(runtime.clone(), Duration::from_secs(1), StagingArea::new().unwrap());
        guard.create(&minimal_spec()).await.unwrap();

        let warnings = guard.teardown().await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("docker rm -f fake-1"));
    }

    #[tokio::test]
    async fn test_teardown_during_create_waits_for_the_container() {
        let runtime = Arc::new(FakeRuntime {
            create_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let guard = Arc::new(EnvironmentGuard::new(
            runtime.clone(),
            Duration::from_secs(1),
            StagingArea::new().unwrap(),
        ));

        let creating = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.create(&minimal_spec()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.calls_named("create"), 1);

        assert!(guard.teardown().await.is_empty());
        assert_eq!(runtime.removed(), vec!["fake-1".to_string()]);
        assert!(creating.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_create_after_teardown_is_refused() {
        let runtime = Arc::new(FakeRuntime::default());
        let guard = EnvironmentGuard::new(runtime.clone(), Duration::from_secs(1), StagingArea::new().unwrap());
        guard.teardown().await;

        let err = guard.create(&minimal_spec()).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
        assert_eq!(runtime.calls_named("create"), 0);
    }
}
