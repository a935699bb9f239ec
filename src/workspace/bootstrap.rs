//! Workspace bootstrap protocol.
//!
//! The bootstrap is an ordered list of [`BootstrapStep`]s. Each step renders
//! to a shell fragment framed by marker lines:
//!
//! ```text
//! ::spindle-step::<name>::begin
//! ::spindle-step::<name>::ok        (or ::failed, followed by exit <code>)
//! ```
//!
//! The stream consumer parses markers with [`parse_marker`] to report
//! progress and to name the step that aborted a run.

use sha2::{Digest, Sha256};

pub const MARKER_PREFIX: &str = "::spindle-step::";
/// Name of the step that invokes the agent.
pub const AGENT_STEP: &str = "run-agent";

/// Quote a value for POSIX shells.
pub fn shell_escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | '+'))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
    VerifyCredentials {
        credential_file: String,
    },
    CreateWorkspace {
        dir: String,
    },
    InitRepository {
        author_name: String,
        author_email: String,
    },
    ConfigureCredentials {
        store_path: String,
        username: String,
        /// Name of the env var holding the token inside the environment.
        token_env: String,
    },
    AddRemote {
        url: String,
    },
    FetchBranch {
        branch: String,
    },
    CheckoutBranch {
        branch: String,
    },
    VerifyWorkspace {
        branch: String,
    },
    InitTools {
        commands: Vec<String>,
    },
    WritePrompt {
        path: String,
        prompt: String,
    },
    RunAgent {
        command: String,
        prompt_path: String,
        tool_config: Option<String>,
    },
}

impl BootstrapStep {
    pub fn name(&self) -> &'static str {
        match self {
            BootstrapStep::VerifyCredentials { .. } => "verify-credentials",
            BootstrapStep::CreateWorkspace { .. } => "create-workspace",
            BootstrapStep::InitRepository { .. } => "init-repository",
            BootstrapStep::ConfigureCredentials { .. } => "configure-credentials",
            BootstrapStep::AddRemote { .. } => "add-remote",
            BootstrapStep::FetchBranch { .. } => "fetch-branch",
            BootstrapStep::CheckoutBranch { .. } => "checkout-branch",
            BootstrapStep::VerifyWorkspace { .. } => "verify-workspace",
            BootstrapStep::InitTools { .. } => "init-tools",
            BootstrapStep::WritePrompt { .. } => "write-prompt",
            BootstrapStep::RunAgent { .. } => AGENT_STEP,
        }
    }

    /// Human label for progress output.
    pub fn label(&self) -> &'static str {
        label_for(self.name())
    }

    /// Exit code the script uses when this step fails. `None` for the agent
    /// step, which exits with the agent's own status.
    pub fn exit_code(&self) -> Option<i32> {
        let code = match self {
            BootstrapStep::VerifyCredentials { .. } => 10,
            BootstrapStep::CreateWorkspace { .. } => 11,
            BootstrapStep::InitRepository { .. } => 12,
            BootstrapStep::ConfigureCredentials { .. } => 13,
            BootstrapStep::AddRemote { .. } => 14,
            BootstrapStep::FetchBranch { .. } => 15,
            BootstrapStep::CheckoutBranch { .. } => 16,
            BootstrapStep::VerifyWorkspace { .. } => 17,
            BootstrapStep::InitTools { .. } => 18,
            BootstrapStep::WritePrompt { .. } => 19,
            BootstrapStep::RunAgent { .. } => return None,
        };
        Some(code)
    }

    /// Shell commands of the step body, without framing.
    pub fn body(&self) -> String {
        match self {
            BootstrapStep::VerifyCredentials { credential_file } => {
                let file = shell_escape(credential_file);
                format!(
                    "if [ ! -s {file} ]; then echo \"agent credentials not found at {credential_file}; log in once with the credential volume mounted\" >&2; false; fi"
                )
            }
            BootstrapStep::CreateWorkspace { dir } => {
                let dir = shell_escape(dir);
                format!("rm -rf {dir} && mkdir -p {dir} && cd {dir}")
            }
            BootstrapStep::InitRepository {
                author_name,
                author_email,
            } => format!(
                "git init -q && git config user.name {} && git config user.email {}",
                shell_escape(author_name),
                shell_escape(author_email)
            ),
            BootstrapStep::ConfigureCredentials {
                store_path,
                username,
                token_env,
            } => {
                let store = shell_escape(store_path);
                let user = shell_escape(&urlencoding::encode(username));
                format!(
                    "(umask 077 && printf 'https://%s:%s@github.com\\n' {user} \"${token_env}\" > {store}) && git config credential.helper {}",
                    shell_escape(&format!("store --file={store_path}"))
                )
            }
            BootstrapStep::AddRemote { url } => {
                format!("git remote add origin {}", shell_escape(url))
            }
            BootstrapStep::FetchBranch { branch } => format!(
                "git fetch --depth=1 origin {}",
                shell_escape(&format!("+refs/heads/{branch}:refs/remotes/origin/{branch}"))
            ),
            BootstrapStep::CheckoutBranch { branch } => format!(
                "git checkout -q -b {} {}",
                shell_escape(branch),
                shell_escape(&format!("origin/{branch}"))
            ),
            BootstrapStep::VerifyWorkspace { branch } => {
                let expected = shell_escape(branch);
                [
                    "current=\"$(git rev-parse --abbrev-ref HEAD)\"".to_string(),
                    format!(
                        "if [ \"$current\" != {expected} ]; then echo \"workspace is on '$current', expected {branch}\" >&2; false; fi"
                    ),
                    "dirty=\"$(git status --porcelain)\"".to_string(),
                    "if [ -n \"$dirty\" ]; then echo \"workspace has pending changes:\" >&2; echo \"$dirty\" >&2; false; fi".to_string(),
                ]
                .join(" &&\n  ")
            }
            BootstrapStep::InitTools { commands } => {
                if commands.is_empty() {
                    "true".to_string()
                } else {
                    commands.join(" &&\n  ")
                }
            }
            BootstrapStep::WritePrompt { path, prompt } => {
                let delimiter = heredoc_delimiter(prompt);
                let parent = path
                    .rsplit_once('/')
                    .map(|(p, _)| p)
                    .filter(|p| !p.is_empty())
                    .unwrap_or("/");
                format!(
                    "mkdir -p {} && cat > {} <<'{delimiter}'\n{prompt}\n{delimiter}",
                    shell_escape(parent),
                    shell_escape(path)
                )
            }
            BootstrapStep::RunAgent {
                command,
                prompt_path,
                tool_config,
            } => {
                let mut agent = vec![
                    shell_escape(command),
                    "-p".to_string(),
                    "--dangerously-skip-permissions".to_string(),
                    "--output-format".to_string(),
                    "text".to_string(),
                ];
                if let Some(config) = tool_config {
                    agent.push("--mcp-config".to_string());
                    agent.push(shell_escape(config));
                }
                format!("cat {} | {}", shell_escape(prompt_path), agent.join(" "))
            }
        }
    }

    /// Step body framed by markers; on failure prints the failed marker and
    /// exits with [`exit_code`](Self::exit_code), or with the body's own
    /// status when the step has none.
    pub fn render(&self) -> String {
        let name = self.name();
        let code = self
            .exit_code()
            .map_or_else(|| "\"$?\"".to_string(), |c| c.to_string());
        format!(
            "echo '{MARKER_PREFIX}{name}::begin'\n{{\n  {body}\n}} || step_failed {name} {code}\necho '{MARKER_PREFIX}{name}::ok'\n",
            body = self.body(),
        )
    }
}

fn label_for(name: &str) -> &'static str {
    match name {
        "verify-credentials" => "Checking agent credentials",
        "create-workspace" => "Creating isolated workspace",
        "init-repository" => "Initialising repository",
        "configure-credentials" => "Configuring git credentials",
        "add-remote" => "Adding GitHub remote",
        "fetch-branch" => "Fetching working branch",
        "checkout-branch" => "Checking out working branch",
        "verify-workspace" => "Verifying clean workspace",
        "init-tools" => "Initialising auxiliary tools",
        "write-prompt" => "Writing agent prompt",
        "run-agent" => "Agent working",
        _ => "Working",
    }
}

/// A heredoc delimiter that cannot occur as a line of `content`.
fn heredoc_delimiter(content: &str) -> String {
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    let mut delimiter = format!("SPINDLE_PROMPT_{}", &digest[..16]);
    while content.lines().any(|l| l == delimiter) {
        delimiter.push('_');
    }
    delimiter
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Begin,
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMarker {
    pub step: String,
    pub kind: MarkerKind,
}

impl StepMarker {
    pub fn label(&self) -> &'static str {
        label_for(&self.step)
    }
}

/// Recognise a marker line emitted by a rendered step.
pub fn parse_marker(line: &str) -> Option<StepMarker> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;
    let (step, kind) = rest.rsplit_once("::")?;
    let kind = match kind {
        "begin" => MarkerKind::Begin,
        "ok" => MarkerKind::Ok,
        "failed" => MarkerKind::Failed,
        _ => return None,
    };
    Some(StepMarker {
        step: step.to_string(),
        kind,
    })
}

/// Inputs for a run's bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapParams {
    pub workspace_dir: String,
    pub owner: String,
    pub repo: String,
    pub working_branch: String,
    pub author_name: String,
    pub author_email: String,
    pub bot_username: String,
    pub credential_file: String,
    pub git_credential_store: String,
    pub token_env: String,
    pub init_commands: Vec<String>,
    pub prompt_path: String,
    pub prompt: String,
    pub agent_command: String,
    pub tool_config: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BootstrapScript {
    steps: Vec<BootstrapStep>,
}

impl BootstrapScript {
    pub fn new(params: BootstrapParams) -> Self {
        let mut steps = vec![
            BootstrapStep::VerifyCredentials {
                credential_file: params.credential_file,
            },
            BootstrapStep::CreateWorkspace {
                dir: params.workspace_dir,
            },
            BootstrapStep::InitRepository {
                author_name: params.author_name,
                author_email: params.author_email,
            },
            BootstrapStep::ConfigureCredentials {
                store_path: params.git_credential_store,
                username: params.bot_username,
                token_env: params.token_env,
            },
            BootstrapStep::AddRemote {
                url: format!("https://github.com/{}/{}.git", params.owner, params.repo),
            },
            BootstrapStep::FetchBranch {
                branch: params.working_branch.clone(),
            },
            BootstrapStep::CheckoutBranch {
                branch: params.working_branch.clone(),
            },
            BootstrapStep::VerifyWorkspace {
                branch: params.working_branch,
            },
        ];
        if !params.init_commands.is_empty() {
            steps.push(BootstrapStep::InitTools {
                commands: params.init_commands,
            });
        }
        steps.push(BootstrapStep::WritePrompt {
            path: params.prompt_path.clone(),
            prompt: params.prompt,
        });
        steps.push(BootstrapStep::RunAgent {
            command: params.agent_command,
            prompt_path: params.prompt_path,
            tool_config: params.tool_config,
        });
        Self { steps }
    }

    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Step whose failure exit code is `code`, if any.
    pub fn step_for_exit_code(&self, code: i64) -> Option<&BootstrapStep> {
        self.steps
            .iter()
            .find(|s| s.exit_code().map(i64::from) == Some(code))
    }

    pub fn render(&self) -> String {
        let mut script = String::from(
            "#!/usr/bin/env bash\n\
             set -uo pipefail\n\
             step_failed() {\n  echo \"::spindle-step::$1::failed\"\n  exit \"$2\"\n}\n\n",
        );
        for step in &self.steps {
            script.push_str(&step.render());
            script.push('\n');
        }
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BootstrapParams {
        BootstrapParams {
            workspace_dir: "/tmp/spindle-work/run-1".to_string(),
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            working_branch: "staging".to_string(),
            author_name: "spindle[bot]".to_string(),
            author_email: "bot@example.com".to_string(),
            bot_username: "spindle[bot]".to_string(),
            credential_file: "/home/agent/.claude/.credentials.json".to_string(),
            git_credential_store: "/tmp/spindle-git-credentials".to_string(),
            token_env: "GH_TOKEN".to_string(),
            init_commands: vec![],
            prompt_path: "/tmp/spindle/prompt.md".to_string(),
            prompt: "Fix the bug. Don't break 'quotes' or $VARS.".to_string(),
            agent_command: "claude".to_string(),
            tool_config: None,
        }
    }

    #[test]
    fn test_step_order_matches_protocol() {
        let script = BootstrapScript::new(params());
        let names: Vec<_> = script.steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "verify-credentials",
                "create-workspace",
                "init-repository",
                "configure-credentials",
                "add-remote",
                "fetch-branch",
                "checkout-branch",
                "verify-workspace",
                "write-prompt",
                "run-agent",
            ]
        );
    }

    #[test]
    fn test_init_tools_step_only_when_commands_exist() {
        let mut p = params();
        p.init_commands = vec!["echo tool-ready".to_string()];
        p.tool_config = Some("/etc/spindle/mcp.json".to_string());
        let script = BootstrapScript::new(p);
        let names: Vec<_> = script.steps().iter().map(|s| s.name()).collect();
        let tools = names.iter().position(|n| *n == "init-tools").unwrap();
        let verify = names.iter().position(|n| *n == "verify-workspace").unwrap();
        assert!(tools > verify);

        let rendered = script.render();
        assert!(rendered.contains("echo tool-ready"));
        assert!(rendered.contains("--mcp-config /etc/spindle/mcp.json"));
    }

    #[test]
    fn test_render_frames_each_step() {
        let rendered = BootstrapScript::new(params()).render();
        assert!(rendered.starts_with("#!/usr/bin/env bash"));
        for step in BootstrapScript::new(params()).steps() {
            assert!(rendered.contains(&format!("{MARKER_PREFIX}{}::begin", step.name())));
            if let Some(code) = step.exit_code() {
                assert!(rendered.contains(&format!("step_failed {} {code}", step.name())));
            }
        }
        assert!(rendered.contains("step_failed run-agent \"$?\""));
        let verify = rendered.find("verify-workspace::begin").unwrap();
        let agent = rendered.find("run-agent::begin").unwrap();
        assert!(verify < agent);
    }

    #[test]
    fn test_exit_codes_are_unique() {
        let script = BootstrapScript::new(params());
        let mut codes: Vec<_> = script.steps().iter().filter_map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), script.steps().len() - 1);
        assert_eq!(script.step_for_exit_code(17).map(|s| s.name()), Some("verify-workspace"));
        assert!(script.step_for_exit_code(1).is_none());
    }

    #[test]
    fn test_token_never_rendered_only_referenced() {
        let rendered = BootstrapScript::new(params()).render();
        assert!(rendered.contains("\"$GH_TOKEN\""));
        // bot username is URL-encoded in the credential URL
        assert!(rendered.contains("spindle%5Bbot%5D"));
        assert!(rendered.contains("store --file=/tmp/spindle-git-credentials"));
    }

    #[test]
    fn test_fetch_is_exactly_the_working_branch() {
        let step = BootstrapStep::FetchBranch {
            branch: "staging".to_string(),
        };
        assert_eq!(
            step.body(),
            "git fetch --depth=1 origin +refs/heads/staging:refs/remotes/origin/staging"
        );
    }

    #[test]
    fn test_prompt_written_verbatim_through_quoted_heredoc() {
        let step = BootstrapStep::WritePrompt {
            path: "/tmp/spindle/prompt.md".to_string(),
            prompt: "line with 'quotes' and $HOME\nsecond line".to_string(),
        };
        let body = step.body();
        assert!(body.starts_with("mkdir -p /tmp/spindle && cat > /tmp/spindle/prompt.md <<'SPINDLE_PROMPT_"));
        assert!(body.contains("line with 'quotes' and $HOME\nsecond line\nSPINDLE_PROMPT_"));
    }

    #[test]
    fn test_heredoc_delimiter_avoids_collision() {
        let first = heredoc_delimiter("abc");
        let content = format!("abc\n{first}");
        let second = heredoc_delimiter(&content);
        assert!(!content.lines().any(|l| l == second));
    }

    #[test]
    fn test_agent_runs_unattended_from_prompt_file() {
        let step = BootstrapStep::RunAgent {
            command: "claude".to_string(),
            prompt_path: "/tmp/spindle/prompt.md".to_string(),
            tool_config: None,
        };
        assert_eq!(
            step.body(),
            "cat /tmp/spindle/prompt.md | claude -p --dangerously-skip-permissions --output-format text"
        );
    }

    #[test]
    fn test_parse_marker() {
        assert_eq!(
            parse_marker("::spindle-step::fetch-branch::failed"),
            Some(StepMarker {
                step: "fetch-branch".to_string(),
                kind: MarkerKind::Failed
            })
        );
        assert_eq!(
            parse_marker("  ::spindle-step::run-agent::begin ").map(|m| m.label()),
            Some("Agent working")
        );
        assert_eq!(parse_marker("::spindle-step::x::weird"), None);
        assert_eq!(parse_marker("regular output"), None);
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("staging"), "staging");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_escape(""), "''");
    }

    #[cfg(unix)]
    mod shell {
        use super::*;
        use std::process::Command;

        /// Run the verify step against a stubbed `git`, followed by a line
        /// standing in for the agent invocation.
        fn run_verify(current_branch: &str, porcelain: &str) -> (Option<i32>, String) {
            let step = BootstrapStep::VerifyWorkspace {
                branch: "staging".to_string(),
            };
            let script = format!(
                "step_failed() {{ echo \"::spindle-step::$1::failed\"; exit \"$2\"; }}\n\
                 git() {{ case \"$1\" in rev-parse) echo {current};; status) printf '%s' {dirty};; esac; }}\n\
                 {body}echo AGENT-INVOKED\n",
                current = shell_escape(current_branch),
                dirty = shell_escape(porcelain),
                body = step.render(),
            );
            let output = Command::new("sh").arg("-c").arg(&script).output().unwrap();
            (
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).to_string(),
            )
        }

        #[test]
        fn test_clean_workspace_reaches_agent() {
            let (code, stdout) = run_verify("staging", "");
            assert_eq!(code, Some(0));
            assert!(stdout.contains("verify-workspace::ok"));
            assert!(stdout.contains("AGENT-INVOKED"));
        }

        #[test]
        fn test_wrong_branch_aborts_before_agent() {
            let (code, stdout) = run_verify("main", "");
            assert_eq!(code, Some(17));
            assert!(stdout.contains("verify-workspace::failed"));
            assert!(!stdout.contains("AGENT-INVOKED"));
        }

        #[test]
        fn test_agent_failure_keeps_agent_status() {
            let step = BootstrapStep::RunAgent {
                command: "claude".to_string(),
                prompt_path: "/dev/null".to_string(),
                tool_config: None,
            };
            let script = format!(
                "step_failed() {{ echo \"::spindle-step::$1::failed\"; exit \"$2\"; }}\n\
                 claude() {{ cat >/dev/null; echo 'Error: model overloaded'; return 3; }}\n\
                 {body}",
                body = step.render(),
            );
            let output = Command::new("sh").arg("-c").arg(&script).output().unwrap();
            let stdout = String::from_utf8_lossy(&output.stdout);
            assert_eq!(output.status.code(), Some(3));
            assert!(stdout.contains("run-agent::failed"));
            assert!(!stdout.contains("run-agent::ok"));
        }

        #[test]
        fn test_untracked_files_abort_before_agent() {
            let (code, stdout) = run_verify("staging", "?? stray.txt");
            assert_eq!(code, Some(17));
            assert!(!stdout.contains("AGENT-INVOKED"));
        }
    }
}
