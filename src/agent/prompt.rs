//! Project instructions filtering and agent prompt synthesis.

pub const OPERATOR_START: &str = "<!-- spindle:operator-only -->";
pub const OPERATOR_END: &str = "<!-- /spindle:operator-only -->";

/// Remove every section bounded by a matched pair of operator-only markers.
///
/// A start marker without a following end marker (or a lone end marker) is
/// left in place along with everything after it. Blank-line runs are
/// collapsed only when something was removed, so text without markers comes
/// back byte-for-byte.
pub fn filter_instructions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut stripped = false;

    loop {
        let Some(start) = rest.find(OPERATOR_START) else {
            break;
        };
        let after_start = &rest[start + OPERATOR_START.len()..];
        let Some(end) = after_start.find(OPERATOR_END) else {
            break;
        };

        out.push_str(&rest[..start]);
        rest = &after_start[end + OPERATOR_END.len()..];
        stripped = true;
    }
    out.push_str(rest);

    if stripped {
        collapse_blank_lines(&out)
    } else {
        out
    }
}

/// Collapse runs of blank lines to a single blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(if blank { "" } else { line });
    }

    let mut collapsed = lines.join("\n");
    if text.ends_with('\n') {
        collapsed.push('\n');
    }
    collapsed
}

/// What the agent is asked to work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Issue { number: u64, title: Option<String> },
    Prompt { text: String },
}

/// Board identifiers the agent needs to move its PR card.
#[derive(Debug, Clone)]
pub struct BoardIds {
    pub project_id: String,
    pub status_field_id: String,
    pub in_review_option_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub kind: TaskKind,
    pub repo_full_name: &'a str,
    pub working_branch: &'a str,
    pub quality_checks: &'a [String],
    pub package_manager: Option<&'a str>,
    pub instructions: &'a str,
    pub reviewer: Option<&'a str>,
    pub board: Option<BoardIds>,
}

/// Branch name the agent is told to create.
pub fn suggested_branch(kind: &TaskKind) -> String {
    match kind {
        TaskKind::Issue { number, .. } => format!("spindle/issue-{number}"),
        TaskKind::Prompt { text } => {
            let slug: String = text
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect::<String>()
                .split('-')
                .filter(|s| !s.is_empty())
                .take(6)
                .collect::<Vec<_>>()
                .join("-");
            if slug.is_empty() {
                "spindle/task".to_string()
            } else {
                format!("spindle/{slug}")
            }
        }
    }
}

/// Render the full prompt handed to the agent. Pure.
pub fn build_agent_prompt(ctx: &PromptContext<'_>) -> String {
    let repo = ctx.repo_full_name;
    let base = ctx.working_branch;
    let branch = suggested_branch(&ctx.kind);

    let goal = match &ctx.kind {
        TaskKind::Issue { number, title } => match title {
            Some(title) => format!("Resolve GitHub issue #{number} (\"{title}\") in `{repo}`."),
            None => format!("Resolve GitHub issue #{number} in `{repo}`."),
        },
        TaskKind::Prompt { .. } => format!("Implement the task below in `{repo}`."),
    };

    let mut steps: Vec<String> = Vec::new();
    match &ctx.kind {
        TaskKind::Issue { number, .. } => {
            steps.push(format!(
                "Read the issue with `gh issue view {number} --repo {repo} --comments`."
            ));
        }
        TaskKind::Prompt { text } => {
            steps.push(format!("Read the task carefully:\n\n   > {}", text.replace('\n', "\n   > ")));
        }
    }
    steps.push(format!(
        "Create a feature branch from `{base}`: `git checkout -b {branch} origin/{base}`."
    ));
    steps.push("Explore the codebase, then implement focused changes.".to_string());
    if ctx.quality_checks.is_empty() {
        steps.push("Run the project's tests if any exist.".to_string());
    } else {
        let checks = ctx
            .quality_checks
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        steps.push(format!("Run every quality check and fix failures: {checks}."));
    }
    match &ctx.kind {
        TaskKind::Issue { number, .. } => {
            steps.push(format!("Commit with a message referencing #{number}."));
            steps.push(format!(
                "Push the branch and open a PR with `gh pr create --base {base}` whose body contains `Closes #{number}`."
            ));
        }
        TaskKind::Prompt { .. } => {
            steps.push("Commit with a descriptive message.".to_string());
            steps.push(format!(
                "Push the branch and open a PR with `gh pr create --base {base}`."
            ));
        }
    }
    steps.push("Print the PR URL as the last line of your output.".to_string());

    let mut out = String::new();
    out.push_str("You are an autonomous software engineer working unattended inside a disposable container.\n\n");
    out.push_str("## Goal\n");
    out.push_str(&goal);
    out.push_str("\n\n");

    if let TaskKind::Prompt { text } = &ctx.kind {
        out.push_str("## Task\n");
        out.push_str(text);
        out.push_str("\n\n");
    }

    out.push_str("## Steps\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {step}\n", i + 1));
    }
    out.push('\n');

    out.push_str("## Branch base\n");
    out.push_str(&format!(
        "Always branch from `{base}` and target `{base}` with the PR. Never push to `{base}` directly.\n\n"
    ));

    out.push_str("## Reviewer\n");
    match ctx.reviewer {
        Some(reviewer) => out.push_str(&format!(
            "Request a review from @{reviewer} (`gh pr edit --add-reviewer {reviewer}`).\n\n"
        )),
        None => out.push_str(
            "If `$SPINDLE_REVIEWER` is set, request a review from that user; otherwise leave the PR without reviewers.\n\n",
        ),
    }

    if let Some(board) = &ctx.board {
        out.push_str("## Project board\n");
        out.push_str(&format!("- Project id: `{}`\n", board.project_id));
        out.push_str(&format!("- Status field id: `{}`\n", board.status_field_id));
        if let Some(option) = &board.in_review_option_id {
            out.push_str(&format!("- \"In review\" option id: `{option}`\n"));
        }
        out.push('\n');
    }

    if let Some(pm) = ctx.package_manager {
        out.push_str(&format!("Use `{pm}` for dependency management.\n\n"));
    }

    let instructions = ctx.instructions.trim();
    if !instructions.is_empty() {
        out.push_str("## Project context\n");
        out.push_str(instructions);
        out.push('\n');
    }

    out
}
