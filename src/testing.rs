//! Recording fakes for the collaborator traits.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::container::{
    BuildRequest, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState,
    ContainerSummary, ImageRequest, ImageResolver, OutputLine,
};
use crate::error::{AppError, Result};
use crate::platform::types::{CreateIssue, CreatePullRequest, Issue, ItemKind, PullRequest, StatusUpdate};
use crate::platform::Platform;

fn record(calls: &Mutex<Vec<String>>, name: &str) {
    calls.lock().unwrap().push(name.to_string());
}

fn count(calls: &Mutex<Vec<String>>, name: &str) -> usize {
    calls.lock().unwrap().iter().filter(|c| *c == name).count()
}

/// Directories every agent image has before the bootstrap runs.
const IMAGE_DIRS: &[&str] = &["", "/tmp", "/home/agent", "/etc"];

#[derive(Default)]
pub struct FakeRuntime {
    pub calls: Mutex<Vec<String>>,
    pub built: Mutex<HashSet<String>>,
    pub volumes: Mutex<HashSet<String>>,
    pub specs: Mutex<Vec<ContainerSpec>>,
    pub stopped: Mutex<HashSet<String>>,
    pub removed: Mutex<Vec<String>>,
    pub copied: Mutex<Vec<String>>,
    /// Lines streamed by `exec_streaming`.
    pub output: Vec<String>,
    pub exit_code: i64,
    pub exec_delay: Option<Duration>,
    pub create_delay: Option<Duration>,
    pub fail_exec: bool,
    pub fail_remove: bool,
    pub fail_ping: bool,
    pub managed: Vec<ContainerSummary>,
}

impl FakeRuntime {
    pub fn with_output(exit_code: i64, lines: &[&str]) -> Self {
        Self {
            output: lines.iter().map(|l| l.to_string()).collect(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        count(&self.calls, name)
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.specs.lock().unwrap().last().cloned()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<String> {
        record(&self.calls, "ping");
        if self.fail_ping {
            return Err(AppError::Container("Cannot connect to the daemon".to_string()));
        }
        Ok("27.0.0".to_string())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        record(&self.calls, "image_exists");
        Ok(self.built.lock().unwrap().contains(image))
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        record(&self.calls, "build_image");
        self.built.lock().unwrap().insert(request.tag.clone());
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        record(&self.calls, "volume_exists");
        Ok(self.volumes.lock().unwrap().contains(name))
    }

    async fn ensure_volume(&self, name: &str) -> Result<()> {
        record(&self.calls, "ensure_volume");
        self.volumes.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        record(&self.calls, "create");
        let id = {
            let mut specs = self.specs.lock().unwrap();
            specs.push(spec.clone());
            format!("fake-{}", specs.len())
        };
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, _id: &str) -> Result<()> {
        record(&self.calls, "start");
        Ok(())
    }

    async fn copy_into(&self, _id: &str, source: &Path, target: &str) -> Result<()> {
        record(&self.calls, "copy_into");
        if !source.exists() {
            return Err(AppError::Container(format!("{} does not exist", source.display())));
        }
        let parent = target.rsplit_once('/').map_or("", |(p, _)| p);
        if !IMAGE_DIRS.contains(&parent) {
            return Err(AppError::Container(format!(
                "Could not find the file {parent} in container"
            )));
        }
        self.copied.lock().unwrap().push(target.to_string());
        Ok(())
    }

    async fn exec_streaming(
        &self,
        id: &str,
        _argv: &[String],
        output: mpsc::Sender<OutputLine>,
    ) -> Result<i64> {
        record(&self.calls, "exec_streaming");
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        if self.removed.lock().unwrap().iter().any(|r| r == id) {
            return Err(AppError::Container(format!("container {id} was removed")));
        }
        if self.fail_exec {
            return Err(AppError::Container("exec connection lost".to_string()));
        }
        for line in &self.output {
            let _ = output.send(OutputLine::Stdout(line.clone())).await;
        }
        Ok(self.exit_code)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState> {
        record(&self.calls, "inspect");
        if self.stopped.lock().unwrap().contains(id) {
            Ok(ContainerState::Exited(0))
        } else {
            Ok(ContainerState::Running)
        }
    }

    async fn logs(&self, _id: &str, _tail: usize) -> Result<String> {
        record(&self.calls, "logs");
        Ok(String::new())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        record(&self.calls, "stop");
        self.stopped.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<()> {
        record(&self.calls, "remove");
        if self.fail_remove {
            return Err(AppError::Container(format!("removal of {id} is already in progress")));
        }
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn list_managed(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        record(&self.calls, "list_managed");
        Ok(self
            .managed
            .iter()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub calls: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<(u64, ItemKind, String)>>,
    pub fail_create_issue: bool,
    pub fail_get_issue: bool,
    /// Fail both board operations.
    pub fail_board: bool,
}

impl FakePlatform {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        count(&self.calls, name)
    }

    /// Successful status updates as `(item, kind, option id)`.
    pub fn status_updates(&self) -> Vec<(u64, ItemKind, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn create_issue(&self, owner: &str, repo: &str, issue: &CreateIssue) -> Result<Issue> {
        record(&self.calls, "create_issue");
        if self.fail_create_issue {
            return Err(AppError::GitHubApi("Resource not accessible by integration".to_string()));
        }
        Ok(Issue {
            number: 100,
            title: issue.title.clone(),
            body: issue.body.clone(),
            url: format!("https://github.com/{owner}/{repo}/issues/100"),
        })
    }

    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        record(&self.calls, "get_issue");
        if self.fail_get_issue {
            return Err(AppError::GitHubApi("Not Found".to_string()));
        }
        Ok(Issue {
            number,
            title: format!("Issue {number}"),
            body: String::new(),
            url: format!("https://github.com/{owner}/{repo}/issues/{number}"),
        })
    }

    async fn add_issue_to_project(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
        _project_id: &str,
    ) -> Result<()> {
        record(&self.calls, "add_issue_to_project");
        if self.fail_board {
            return Err(AppError::GitHubApi("Could not resolve to a ProjectV2".to_string()));
        }
        Ok(())
    }

    async fn update_project_item_status(
        &self,
        _owner: &str,
        _repo: &str,
        update: &StatusUpdate<'_>,
    ) -> Result<()> {
        record(&self.calls, "update_project_item_status");
        if self.fail_board {
            return Err(AppError::GitHubApi("Could not resolve to a ProjectV2".to_string()));
        }
        self.updates.lock().unwrap().push((
            update.item_number,
            update.kind,
            update.status_option_id.to_string(),
        ));
        Ok(())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        _pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        record(&self.calls, "create_pull_request");
        Ok(PullRequest {
            number: 1,
            url: format!("https://github.com/{owner}/{repo}/pull/1"),
        })
    }
}

#[derive(Default)]
pub struct FakeImageResolver {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageResolver for FakeImageResolver {
    async fn resolve(&self, _request: &ImageRequest<'_>) -> Result<String> {
        record(&self.calls, "resolve");
        Ok("spindle-agent:test".to_string())
    }
}
