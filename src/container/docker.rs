//! [`ContainerRuntime`] backed by the `docker` CLI.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{
    BuildRequest, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState,
    ContainerSummary, Mount, OutputLine, MANAGED_LABEL,
};
use crate::error::{AppError, Result};

pub struct DockerRuntime {
    bin: String,
}

impl DockerRuntime {
    pub fn new(bin: &str) -> Self {
        Self {
            bin: bin.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout. Non-zero exit becomes an error
    /// carrying stderr.
    async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args);
        let output = cmd
            .output()
            .await
            .map_err(|e| AppError::Container(format!("failed to execute `{}`: {e}", self.bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AppError::Container(if stderr.is_empty() {
                format!("`{}` exited with {}", self.bin, output.status)
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn is_missing(err: &AppError) -> bool {
    matches!(err, AppError::Container(msg) if msg.contains("No such"))
}

/// Arguments for `docker create`, minus the env file which carries secrets.
pub fn create_args(spec: &ContainerSpec, env_file: Option<&Path>) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    if let Some(path) = env_file {
        args.push("--env-file".to_string());
        args.push(path.display().to_string());
    }

    for mount in &spec.mounts {
        let (kind, source, target, read_only) = match mount {
            Mount::Bind {
                source,
                target,
                read_only,
            } => ("bind", source.display().to_string(), target, *read_only),
            Mount::Volume {
                name,
                target,
                read_only,
            } => ("volume", name.clone(), target, *read_only),
        };
        let mut value = format!("type={kind},source={source},target={target}");
        if read_only {
            value.push_str(",readonly");
        }
        args.push("--mount".to_string());
        args.push(value);
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }

    if let Some(workdir) = &spec.workdir {
        args.push("--workdir".to_string());
        args.push(workdir.clone());
    }
    if let Some(user) = &spec.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

fn render_env_file(env: &[(String, String)]) -> Result<String> {
    let mut out = String::new();
    for (key, value) in env {
        if value.contains('\n') {
            return Err(AppError::Container(format!(
                "environment value for {key} contains a newline"
            )));
        }
        out.push_str(&format!("{key}={value}\n"));
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

/// Parse one line of `docker ps --format '{{json .}}'`.
pub fn parse_ps_line(line: &str) -> Result<ContainerSummary> {
    let row: PsRow = serde_json::from_str(line)?;
    let labels: BTreeMap<String, String> = row
        .labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Ok(ContainerSummary {
        id: row.id,
        name: row.names,
        state: row.state,
        status: row.status,
        created: row.created_at,
        labels,
    })
}

/// Parse `docker inspect --format '{{.State.Status}} {{.State.ExitCode}}'`.
pub fn parse_state(raw: &str) -> ContainerState {
    let mut parts = raw.split_whitespace();
    let status = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|c| c.parse::<i64>().ok()).unwrap_or(0);
    match status {
        "created" => ContainerState::Created,
        "running" => ContainerState::Running,
        "exited" | "dead" => ContainerState::Exited(code),
        "" => ContainerState::Missing,
        other => ContainerState::Other(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<String> {
        self.run(["version", "--format", "{{.Server.Version}}"]).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.run(["image", "inspect", "--format", "{{.Id}}", image]).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        tracing::info!(tag = %request.tag, dockerfile = %request.dockerfile.display(), "Building image");
        let dockerfile = request.dockerfile.display().to_string();
        let context = request.context.display().to_string();
        self.run(["build", "-f", dockerfile.as_str(), "-t", request.tag.as_str(), context.as_str()])
            .await
            .map_err(|e| AppError::Container(format!("image build failed: {e}")))?;
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.run(["volume", "inspect", "--format", "{{.Name}}", name]).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<()> {
        if !self.volume_exists(name).await? {
            tracing::info!(volume = name, "Creating credential volume");
            self.run(["volume", "create", name]).await?;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        // Secrets go through a short-lived env file rather than argv.
        let env_file = if spec.env.is_empty() {
            None
        } else {
            let mut file = tempfile::Builder::new().prefix("spindle-env-").tempfile()?;
            file.write_all(render_env_file(&spec.env)?.as_bytes())?;
            file.flush()?;
            Some(file)
        };

        let args = create_args(spec, env_file.as_ref().map(|f| f.path()));
        let id = self.run(&args).await?;
        drop(env_file);

        tracing::info!(container = %id, name = %spec.name, image = %spec.image, "Created environment");
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run(["start", id]).await?;
        Ok(())
    }

    async fn copy_into(&self, id: &str, source: &Path, target: &str) -> Result<()> {
        let source = source.display().to_string();
        let destination = format!("{id}:{target}");
        self.run(["cp", source.as_str(), destination.as_str()]).await?;
        Ok(())
    }

    async fn exec_streaming(
        &self,
        id: &str,
        argv: &[String],
        output: mpsc::Sender<OutputLine>,
    ) -> Result<i64> {
        let mut cmd = self.command();
        cmd.arg("exec")
            .arg(id)
            .args(argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Container(format!("failed to execute `{}`: {e}", self.bin)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("exec stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("exec stderr not captured".to_string()))?;

        let out_tx = output.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if out_tx.send(OutputLine::Stdout(line)).await.is_err() {
                    break;
                }
            }
        });
        let err_tx = output;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if err_tx.send(OutputLine::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        let status = child.wait().await?;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState> {
        match self
            .run(["inspect", "--format", "{{.State.Status}} {{.State.ExitCode}}", id])
            .await
        {
            Ok(raw) => Ok(parse_state(&raw)),
            Err(e) if is_missing(&e) => Ok(ContainerState::Missing),
            Err(e) => Err(e),
        }
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let mut cmd = self.command();
        let tail = tail.to_string();
        cmd.args(["logs", "--tail", tail.as_str(), id]);
        let output = cmd
            .output()
            .await
            .map_err(|e| AppError::Container(format!("failed to execute `{}`: {e}", self.bin)))?;
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        match self.run(["stop", "-t", secs.as_str(), id]).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id);
        match self.run(args).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_managed(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let filter = format!("label={MANAGED_LABEL}=true");
        let mut args = vec!["ps", "--filter", filter.as_str(), "--format", "{{json .}}", "--no-trunc"];
        if all {
            args.push("-a");
        }
        let raw = self.run(args).await?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }
}
