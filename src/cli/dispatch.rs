use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::container::{DefaultImageResolver, DockerRuntime};
use crate::platform::github::GitHubPlatform;
use crate::shutdown::{install_interrupt_handler, CleanupRegistry};
use crate::tools::ToolManager;
use crate::workflow::summary::render_summary;
use crate::workflow::{Dispatch, DispatchPlan, RunSecrets, WorkflowEngine, WorkflowRequest, WorkflowRunState};

const DIAGNOSTIC_LINES: usize = 40;

fn print_plan(plan: &DispatchPlan) {
    println!("# Dry run: nothing was created");
    if let Some(title) = &plan.issue_title {
        println!("# Task:     {title}");
    }
    println!("# Base:     {}", plan.working_branch);
    println!("# Reviewer: {}", plan.reviewer.as_deref().unwrap_or("(resolved by the agent)"));
    println!("\n## Prompt\n\n{}", plan.prompt);
    println!("\n## Bootstrap script\n\n{}", plan.script);
}

fn print_report(state: &WorkflowRunState) {
    eprintln!();
    println!("{}", render_summary(state));

    if state.success() {
        return;
    }
    if let Some(diagnostics) = &state.diagnostics {
        let lines: Vec<&str> = diagnostics.lines().collect();
        eprintln!("Last output:");
        for line in &lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..] {
            eprintln!("  {line}");
        }
    }
    if !state.troubleshooting.is_empty() {
        eprintln!("\nTroubleshooting:");
        for hint in &state.troubleshooting {
            eprintln!("  - {hint}");
        }
    }
}

/// Returns whether the dispatch succeeded.
pub async fn run(repo_root: &Path, config_path: &Path, request: WorkflowRequest) -> anyhow::Result<bool> {
    let config = AppConfig::load(Some(config_path))?;
    let tools = ToolManager::new(&config.tools);
    let secrets = RunSecrets::from_env(&config, &tools)?;

    let platform = Arc::new(GitHubPlatform::new(&secrets.bot_token)?);
    let runtime = Arc::new(DockerRuntime::new(&config.container.runtime_bin));
    let images = Arc::new(DefaultImageResolver::new(runtime.clone()));
    let registry = Arc::new(CleanupRegistry::new());
    let interrupts = install_interrupt_handler(Arc::clone(&registry));

    let engine = WorkflowEngine::new(
        Arc::new(config),
        platform,
        runtime,
        images,
        registry,
        repo_root.to_path_buf(),
        secrets,
    )
    .with_interactive(std::io::stderr().is_terminal());

    let outcome = engine.dispatch(request).await;
    interrupts.abort();

    match outcome.context("Dispatch rejected")? {
        Dispatch::Planned(plan) => {
            print_plan(&plan);
            Ok(true)
        }
        Dispatch::Ran(state) => {
            print_report(&state);
            Ok(state.success())
        }
    }
}
