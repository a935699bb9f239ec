use std::collections::BTreeMap;

use super::{AuxTool, SecretRequirement, ServerLaunch};

fn verify_on_path(binary: &str) -> String {
    format!("command -v {binary} >/dev/null 2>&1 || echo \"warning: {binary} not found on PATH\"")
}

/// Enhanced GitHub operations. Reuses the bot token already injected as
/// `GITHUB_TOKEN`.
pub struct GitHubTool;

impl AuxTool for GitHubTool {
    fn name(&self) -> &'static str {
        "github"
    }

    fn secrets(&self) -> Vec<SecretRequirement> {
        Vec::new()
    }

    fn install_commands(&self) -> Vec<String> {
        vec!["npm install -g @modelcontextprotocol/server-github".to_string()]
    }

    fn init_commands(&self) -> Vec<String> {
        vec![verify_on_path("mcp-server-github")]
    }

    fn launch(&self) -> ServerLaunch {
        ServerLaunch {
            command: "mcp-server-github".to_string(),
            args: Vec::new(),
            env: BTreeMap::from([(
                "GITHUB_PERSONAL_ACCESS_TOKEN".to_string(),
                "${GITHUB_TOKEN}".to_string(),
            )]),
        }
    }
}

/// Static analysis / security scanning.
pub struct SemgrepTool;

impl AuxTool for SemgrepTool {
    fn name(&self) -> &'static str {
        "semgrep"
    }

    fn secrets(&self) -> Vec<SecretRequirement> {
        vec![SecretRequirement {
            name: "SEMGREP_APP_TOKEN",
            required: true,
        }]
    }

    fn install_commands(&self) -> Vec<String> {
        vec!["pip3 install --no-cache-dir --break-system-packages semgrep-mcp".to_string()]
    }

    fn init_commands(&self) -> Vec<String> {
        vec![verify_on_path("semgrep-mcp")]
    }

    fn launch(&self) -> ServerLaunch {
        ServerLaunch {
            command: "semgrep-mcp".to_string(),
            args: Vec::new(),
            env: BTreeMap::from([(
                "SEMGREP_APP_TOKEN".to_string(),
                "${SEMGREP_APP_TOKEN}".to_string(),
            )]),
        }
    }
}

/// Library documentation lookup.
pub struct Context7Tool;

impl AuxTool for Context7Tool {
    fn name(&self) -> &'static str {
        "context7"
    }

    fn secrets(&self) -> Vec<SecretRequirement> {
        vec![SecretRequirement {
            name: "CONTEXT7_API_KEY",
            required: false,
        }]
    }

    fn install_commands(&self) -> Vec<String> {
        vec!["npm install -g @upstash/context7-mcp".to_string()]
    }

    fn init_commands(&self) -> Vec<String> {
        vec![verify_on_path("context7-mcp")]
    }

    fn launch(&self) -> ServerLaunch {
        ServerLaunch {
            command: "context7-mcp".to_string(),
            args: vec!["--transport".to_string(), "stdio".to_string()],
            env: BTreeMap::new(),
        }
    }
}
