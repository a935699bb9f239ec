//! Auxiliary tool integrations exposed to the coding agent.
//!
//! Every derivation here is pure. With no tool enabled each one returns an
//! empty result and callers skip the related step.

pub mod catalog;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::config::ToolsConfig;
use crate::error::Result;

/// A secret a tool reads from the execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretRequirement {
    pub name: &'static str,
    pub required: bool,
}

/// How the agent launches a tool server.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerLaunch {
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Generated configuration document, keyed by tool name.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfigDocument {
    #[serde(rename = "mcpServers")]
    pub servers: BTreeMap<String, ServerLaunch>,
}

pub trait AuxTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn secrets(&self) -> Vec<SecretRequirement>;
    /// Commands run while building the image.
    fn install_commands(&self) -> Vec<String>;
    /// Commands run inside the environment before the agent starts.
    fn init_commands(&self) -> Vec<String>;
    fn launch(&self) -> ServerLaunch;
}

pub struct ToolManager {
    tools: Vec<Box<dyn AuxTool>>,
}

impl ToolManager {
    pub fn new(config: &ToolsConfig) -> Self {
        let mut tools: Vec<Box<dyn AuxTool>> = Vec::new();
        if config.github {
            tools.push(Box::new(catalog::GitHubTool));
        }
        if config.semgrep {
            tools.push(Box::new(catalog::SemgrepTool));
        }
        if config.context7 {
            tools.push(Box::new(catalog::Context7Tool));
        }
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn enabled(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn secrets(&self) -> Vec<SecretRequirement> {
        let mut secrets: Vec<_> = self.tools.iter().flat_map(|t| t.secrets()).collect();
        secrets.sort();
        secrets.dedup_by(|a, b| a.name == b.name);
        secrets
    }

    /// Resolve tool secrets from the host environment.
    ///
    /// Missing optional secrets are skipped. Missing required ones are
    /// returned separately so the caller can warn.
    pub fn resolve_secrets<F>(&self, lookup: F) -> (Vec<(String, String)>, Vec<&'static str>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut present = Vec::new();
        let mut missing = Vec::new();
        for secret in self.secrets() {
            match lookup(secret.name) {
                Some(value) => present.push((secret.name.to_string(), value)),
                None if secret.required => missing.push(secret.name),
                None => {}
            }
        }
        (present, missing)
    }

    pub fn install_commands(&self) -> Vec<String> {
        self.tools.iter().flat_map(|t| t.install_commands()).collect()
    }

    pub fn init_commands(&self) -> Vec<String> {
        self.tools.iter().flat_map(|t| t.init_commands()).collect()
    }

    pub fn config_document(&self) -> ToolConfigDocument {
        ToolConfigDocument {
            servers: self
                .tools
                .iter()
                .map(|t| (t.name().to_string(), t.launch()))
                .collect(),
        }
    }

    /// Write the configuration document into `dir`. Returns `None` when no tool
    /// is enabled.
    pub fn write_config(&self, dir: &Path) -> Result<Option<std::path::PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }
        let path = dir.join("mcp.json");
        let raw = serde_json::to_string_pretty(&self.config_document())?;
        std::fs::write(&path, raw)?;
        Ok(Some(path))
    }
}
