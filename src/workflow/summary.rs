use std::fmt::Write;

use super::types::WorkflowRunState;

fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Human-readable end-of-run report.
pub fn render_summary(state: &WorkflowRunState) -> String {
    let mut out = String::new();
    let status = if state.success() { "SUCCESS" } else { "FAILED" };
    let _ = writeln!(out, "── Dispatch {status} ──");

    match (state.issue_number, &state.issue_title) {
        (Some(n), Some(title)) => {
            let created = if state.issue_created { " (created)" } else { "" };
            let _ = writeln!(out, "Issue:     #{n} {title}{created}");
        }
        (Some(n), None) => {
            let _ = writeln!(out, "Issue:     #{n}");
        }
        (None, _) => {
            if let Some(prompt) = &state.prompt {
                let title = super::title::split_title(prompt).title;
                let _ = writeln!(out, "Task:      {title}");
            }
        }
    }

    let _ = writeln!(out, "Base:      {}", state.working_branch);
    let _ = writeln!(out, "Duration:  {}", format_duration(state.duration()));
    if let Some(reviewer) = &state.reviewer {
        let _ = writeln!(out, "Reviewer:  @{reviewer}");
    }

    let artifacts = &state.artifacts;
    if let Some(branch) = &artifacts.branch {
        let _ = writeln!(out, "Branch:    {branch}");
    }
    if let Some(commit) = &artifacts.commit {
        let _ = writeln!(out, "Commit:    {commit}");
    }
    match (&artifacts.pr_url, artifacts.pr_number) {
        (Some(url), _) => {
            let _ = writeln!(out, "PR:        {url}");
        }
        (None, Some(n)) => {
            let _ = writeln!(out, "PR:        #{n}");
        }
        (None, None) => {}
    }
    if !artifacts.checks.is_empty() {
        let _ = writeln!(out, "Checks:");
        for (check, passed) in &artifacts.checks {
            let mark = if *passed { "pass" } else { "FAIL" };
            let _ = writeln!(out, "  [{mark}] {check}");
        }
    }

    if let Some(step) = &state.failed_step {
        let _ = writeln!(out, "Failed at: {step}");
    }
    if let Some(code) = state.exit_code.filter(|c| *c != 0) {
        let _ = writeln!(out, "Exit code: {code}");
    }
    if let Some(error) = state.error() {
        let _ = writeln!(out, "Error:     {error}");
    }
    for warning in &state.teardown_warnings {
        let _ = writeln!(out, "Warning:   {warning}");
    }
    out
}
