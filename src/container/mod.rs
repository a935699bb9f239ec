pub mod docker;
pub mod image;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use docker::DockerRuntime;
pub use image::{DefaultImageResolver, ImageRequest, ImageResolver};

/// Label carried by every environment this tool creates.
pub const MANAGED_LABEL: &str = "spindle.managed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    Bind {
        source: PathBuf,
        target: String,
        read_only: bool,
    },
    Volume {
        name: String,
        target: String,
        read_only: bool,
    },
}

#[derive(Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub labels: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    /// Keep-alive command; work is done later through exec.
    pub command: Vec<String>,
}

// Manual Debug impl to avoid leaking injected secrets
impl std::fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_names: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &env_names)
            .field("mounts", &self.mounts)
            .field("labels", &self.labels)
            .field("workdir", &self.workdir)
            .field("user", &self.user)
            .field("command", &self.command)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited(i64),
    Missing,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub status: String,
    pub created: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// One line of combined exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub tag: String,
}

/// Isolated execution environments.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Server version, used as a liveness check.
    async fn ping(&self) -> Result<String>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn build_image(&self, request: &BuildRequest) -> Result<()>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn ensure_volume(&self, name: &str) -> Result<()>;

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Copy a host file into the environment.
    async fn copy_into(&self, id: &str, source: &Path, target: &str) -> Result<()>;

    /// Run a command, forwarding each output line as it arrives. Returns the
    /// exit code once the command ends.
    async fn exec_streaming(
        &self,
        id: &str,
        argv: &[String],
        output: mpsc::Sender<OutputLine>,
    ) -> Result<i64>;

    async fn inspect(&self, id: &str) -> Result<ContainerState>;

    async fn logs(&self, id: &str, tail: usize) -> Result<String>;

    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Environments carrying [`MANAGED_LABEL`]. `all` includes stopped ones.
    async fn list_managed(&self, all: bool) -> Result<Vec<ContainerSummary>>;
}
