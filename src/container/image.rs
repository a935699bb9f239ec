//! Resolve the image an environment is created from.
//!
//! A project-local dev-environment definition wins. Without one, a default
//! Dockerfile embedding the agent CLI and the enabled tool packages is
//! synthesised and tagged by content hash, so it is only rebuilt when it
//! changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{BuildRequest, ContainerRuntime};
use crate::error::{AppError, Result};

pub struct ImageRequest<'a> {
    pub repo_root: &'a Path,
    pub devcontainer_path: &'a Path,
    pub install_commands: &'a [String],
    /// Where a synthesised Dockerfile may be written.
    pub staging_dir: &'a Path,
}

#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Return a reference the runtime can create an environment from.
    async fn resolve(&self, request: &ImageRequest<'_>) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct DevContainerFile {
    image: Option<String>,
    build: Option<DevContainerBuild>,
}

#[derive(Debug, Deserialize)]
struct DevContainerBuild {
    dockerfile: Option<String>,
    context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevDefinition {
    Image(String),
    Build { dockerfile: PathBuf, context: PathBuf },
}

/// Drop `//` line comments so devcontainer.json parses as plain JSON.
fn strip_line_comments(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a devcontainer definition. `Ok(None)` when the file is absent.
pub fn read_dev_definition(path: &Path) -> Result<Option<DevDefinition>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path)?;
    let parsed: DevContainerFile = serde_json::from_str(&strip_line_comments(&raw))
        .map_err(|e| AppError::Config(format!("Invalid {}: {e}", path.display())))?;

    if let Some(image) = parsed.image.filter(|i| !i.trim().is_empty()) {
        return Ok(Some(DevDefinition::Image(image)));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    if let Some(build) = parsed.build {
        if let Some(dockerfile) = build.dockerfile {
            let context = build.context.unwrap_or_else(|| ".".to_string());
            return Ok(Some(DevDefinition::Build {
                dockerfile: base.join(dockerfile),
                context: base.join(context),
            }));
        }
    }

    Err(AppError::Config(format!(
        "{} defines neither `image` nor `build.dockerfile`",
        path.display()
    )))
}

/// Dockerfile for the default agent image.
pub fn default_dockerfile(install_commands: &[String]) -> String {
    let mut lines = vec![
        "FROM node:20-bookworm".to_string(),
        "RUN apt-get update \\".to_string(),
        " && apt-get install -y --no-install-recommends git gh ca-certificates curl python3 python3-pip \\".to_string(),
        " && rm -rf /var/lib/apt/lists/*".to_string(),
        "RUN npm install -g @anthropic-ai/claude-code".to_string(),
    ];
    for cmd in install_commands {
        lines.push(format!("RUN {cmd}"));
    }
    lines.extend([
        "RUN useradd --create-home --shell /bin/bash agent".to_string(),
        // A fresh named volume copies ownership from the image directory.
        "RUN mkdir -p /home/agent/.claude && chown agent:agent /home/agent/.claude".to_string(),
        "USER agent".to_string(),
        "WORKDIR /home/agent".to_string(),
    ]);
    let mut dockerfile = lines.join("\n");
    dockerfile.push('\n');
    dockerfile
}

pub fn content_tag(repository: &str, content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let hex = hex::encode(digest);
    format!("{repository}:{}", &hex[..12])
}

pub struct DefaultImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl DefaultImageResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn build_if_missing(&self, request: BuildRequest) -> Result<String> {
        if self.runtime.image_exists(&request.tag).await? {
            tracing::debug!(tag = %request.tag, "Image already built");
        } else {
            self.runtime.build_image(&request).await?;
        }
        Ok(request.tag)
    }
}

#[async_trait]
impl ImageResolver for DefaultImageResolver {
    async fn resolve(&self, request: &ImageRequest<'_>) -> Result<String> {
        let definition_path = request.repo_root.join(request.devcontainer_path);

        match read_dev_definition(&definition_path)? {
            Some(DevDefinition::Image(image)) => {
                tracing::info!(image = %image, "Using dev-environment image");
                Ok(image)
            }
            Some(DevDefinition::Build {
                dockerfile,
                context,
            }) => {
                let mut hashed = std::fs::read(&definition_path)?;
                hashed.extend(std::fs::read(&dockerfile).map_err(|e| {
                    AppError::Config(format!("Cannot read {}: {e}", dockerfile.display()))
                })?);
                let tag = content_tag("spindle-dev", &hashed);
                tracing::info!(tag = %tag, "Using dev-environment Dockerfile");
                self.build_if_missing(BuildRequest {
                    context,
                    dockerfile,
                    tag,
                })
                .await
            }
            None => {
                let content = default_dockerfile(request.install_commands);
                let tag = content_tag("spindle-agent", content.as_bytes());
                let dockerfile = request.staging_dir.join("Dockerfile");
                std::fs::write(&dockerfile, &content)?;
                tracing::info!(tag = %tag, "Using default agent image");
                self.build_if_missing(BuildRequest {
                    context: request.staging_dir.to_path_buf(),
                    dockerfile,
                    tag,
                })
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    #[test]
    fn test_devcontainer_image() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("devcontainer.json");
        std::fs::write(
            &path,
            "{\n  // pinned toolchain\n  \"name\": \"dev\",\n  \"image\": \"ghcr.io/acme/dev:1\"\n}\n",
        )
        .unwrap();

        assert_eq!(
            read_dev_definition(&path).unwrap(),
            Some(DevDefinition::Image("ghcr.io/acme/dev:1".to_string()))
        );
    }

    #[test]
    fn test_devcontainer_build_paths_are_relative_to_definition() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("devcontainer.json");
        std::fs::write(&path, r#"{"build": {"dockerfile": "Dockerfile", "context": ".."}}"#).unwrap();

        match read_dev_definition(&path).unwrap() {
            Some(DevDefinition::Build { dockerfile, context }) => {
                assert_eq!(dockerfile, tmp.path().join("Dockerfile"));
                assert_eq!(context, tmp.path().join(".."));
            }
            other => panic!("unexpected definition: {other:?}"),
        }
    }

    #[test]
    fn test_devcontainer_missing_or_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_dev_definition(&tmp.path().join("nope.json")).unwrap(), None);

        let path = tmp.path().join("devcontainer.json");
        std::fs::write(&path, r#"{"name": "dev"}"#).unwrap();
        assert!(read_dev_definition(&path).is_err());
    }

    #[test]
    fn test_default_dockerfile_includes_tool_installs() {
        let content = default_dockerfile(&["npm install -g some-tool".to_string()]);
        assert!(content.contains("@anthropic-ai/claude-code"));
        assert!(content.contains("RUN npm install -g some-tool"));
        assert!(content.trim_end().ends_with("WORKDIR /home/agent"));
    }

    #[test]
    fn test_default_dockerfile_prepares_credential_dir_for_agent() {
        let content = default_dockerfile(&[]);
        let chown = content
            .find("chown agent:agent /home/agent/.claude")
            .unwrap();
        assert!(content.find("useradd").unwrap() < chown);
        assert!(chown < content.find("USER agent").unwrap());
    }

    #[test]
    fn test_content_tag_changes_with_content() {
        let a = content_tag("spindle-agent", b"one");
        let b = content_tag("spindle-agent", b"two");
        assert_ne!(a, b);
        assert!(a.starts_with("spindle-agent:"));
        assert_eq!(a.len(), "spindle-agent:".len() + 12);
        assert_eq!(a, content_tag("spindle-agent", b"one"));
    }

    #[tokio::test]
    async fn test_default_image_built_once() {
        let repo = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let resolver = DefaultImageResolver::new(runtime.clone());

        let request = ImageRequest {
            repo_root: repo.path(),
            devcontainer_path: Path::new(".devcontainer/devcontainer.json"),
            install_commands: &[],
            staging_dir: staging.path(),
        };

        let tag = resolver.resolve(&request).await.unwrap();
        assert!(tag.starts_with("spindle-agent:"));
        assert!(staging.path().join("Dockerfile").exists());
        assert_eq!(runtime.calls_named("build_image"), 1);

        // Second resolution finds the image and skips the build.
        resolver.resolve(&request).await.unwrap();
        assert_eq!(runtime.calls_named("build_image"), 1);
    }
}
