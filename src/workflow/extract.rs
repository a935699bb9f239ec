//! Best-effort scraping of agent output.
//!
//! Every extractor returns `None` (or leaves a check unset) when nothing
//! matches. Callers must not branch on what is found here except for
//! informational follow-ups.

use std::sync::LazyLock;

use regex::Regex;

use super::types::RunArtifacts;

static BRANCH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"Switched to (?:a new )?branch '([^'\s]+)'").unwrap(),
        Regex::new(r"git (?:checkout -b|switch -c|switch --create)\s+([^\s;&|]+)").unwrap(),
        Regex::new(r"branch '([^'\s]+)' set up to track").unwrap(),
        Regex::new(r"(?i)(?:created|pushed) branch[:\s]+`?([A-Za-z0-9._/-]+)`?").unwrap(),
    ]
});

static COMMIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // git commit summary line: "[feature/x 1a2b3c4] message"
        Regex::new(r"(?m)^\[[^\]\s]+(?: \(root-commit\))? ([0-9a-f]{7,40})\]").unwrap(),
        Regex::new(r"(?i)\bcommit(?:ted)?(?: hash)?[:\s]+`?([0-9a-f]{7,40})\b").unwrap(),
    ]
});

static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/[A-Za-z0-9._-]+/[A-Za-z0-9._-]+/pull/(\d+)").unwrap()
});

static PR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:PR|pull request)\s*#(\d+)").unwrap());

static ZERO_FAILURES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:0|no|zero)\s+(?:fail(?:ed|ures?|ing)?|errors?)\b").unwrap()
});

static FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:fail(?:ed|ures?|ing|s)?|errors?|exit code [1-9])\b").unwrap());

/// Last match of any pattern, by position in `text`.
fn last_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .max_by_key(|m| m.start())
        .map(|m| m.as_str().to_string())
}

/// Feature branch the agent created. The working branch itself is ignored.
pub fn extract_branch(output: &str, working_branch: &str) -> Option<String> {
    BRANCH_PATTERNS
        .iter()
        .flat_map(|re| re.captures_iter(output))
        .filter_map(|caps| caps.get(1))
        .filter(|m| {
            let name = m.as_str().trim_end_matches(['.', ',', '`']);
            name != working_branch && name != format!("origin/{working_branch}")
        })
        .max_by_key(|m| m.start())
        .map(|m| m.as_str().trim_end_matches(['.', ',', '`']).to_string())
}

pub fn extract_commit(output: &str) -> Option<String> {
    last_capture(&COMMIT_PATTERNS, output)
}

/// PR number and URL. The URL form wins over a bare `#N` mention.
pub fn extract_pull_request(output: &str) -> (Option<u64>, Option<String>) {
    if let Some(m) = PR_URL.captures_iter(output).last() {
        let number = m.get(1).and_then(|n| n.as_str().parse().ok());
        return (number, m.get(0).map(|u| u.as_str().to_string()));
    }
    let number = PR_NUMBER
        .captures_iter(output)
        .last()
        .and_then(|m| m.get(1))
        .and_then(|n| n.as_str().parse().ok());
    (number, None)
}

/// Whether a line reports failure. "0 failed" and "no errors" do not count.
fn reports_failure(line: &str) -> bool {
    let cleaned = ZERO_FAILURES.replace_all(line, "");
    FAILURE.is_match(&cleaned)
}

/// Verdict per quality check, from the last line mentioning it. Checks
/// never mentioned are absent from the result.
pub fn extract_checks(output: &str, checks: &[String]) -> Vec<(String, bool)> {
    checks
        .iter()
        .filter(|check| !check.trim().is_empty())
        .filter_map(|check| {
            output
                .lines()
                .filter(|line| line.contains(check.as_str()))
                .last()
                .map(|line| (check.clone(), !reports_failure(line)))
        })
        .collect()
}

pub fn extract_artifacts(output: &str, working_branch: &str, checks: &[String]) -> RunArtifacts {
    let (pr_number, pr_url) = extract_pull_request(output);
    RunArtifacts {
        branch: extract_branch(output, working_branch),
        commit: extract_commit(output),
        pr_number,
        pr_url,
        checks: extract_checks(output, checks).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "\
::spindle-step::checkout-branch::begin
Switched to a new branch 'staging'
::spindle-step::run-agent::begin
I'll start by creating a feature branch.
Switched to a new branch 'spindle/issue-42'
Running npm test
Tests: 0 failed, 31 passed
npm run lint finished with 2 errors
Fixed lint. npm run lint passed
[spindle/issue-42 4f2a9c1] fix: handle empty input
Created https://github.com/acme/widgets/pull/77
";

    #[test]
    fn test_extracts_everything_from_transcript() {
        let checks = vec!["npm test".to_string(), "npm run lint".to_string(), "cargo fmt".to_string()];
        let artifacts = extract_artifacts(TRANSCRIPT, "staging", &checks);

        assert_eq!(artifacts.branch.as_deref(), Some("spindle/issue-42"));
        assert_eq!(artifacts.commit.as_deref(), Some("4f2a9c1"));
        assert_eq!(artifacts.pr_number, Some(77));
        assert_eq!(
            artifacts.pr_url.as_deref(),
            Some("https://github.com/acme/widgets/pull/77")
        );
        assert_eq!(artifacts.checks.get("npm test"), Some(&true));
        assert_eq!(artifacts.checks.get("npm run lint"), Some(&true));
        assert!(!artifacts.checks.contains_key("cargo fmt"));
    }

    #[test]
    fn test_unrecognised_output_leaves_everything_unset() {
        let artifacts = extract_artifacts("the agent said nothing useful\n", "staging", &[]);
        assert_eq!(artifacts, RunArtifacts::default());
    }

    #[test]
    fn test_working_branch_is_not_a_feature_branch() {
        let out = "Switched to a new branch 'staging'\ngit checkout -b staging\n";
        assert_eq!(extract_branch(out, "staging"), None);
        assert_eq!(
            extract_branch("git checkout -b feat/x && git add .", "staging").as_deref(),
            Some("feat/x")
        );
    }

    #[test]
    fn test_commit_patterns() {
        assert_eq!(
            extract_commit("[main (root-commit) abcdef1] init").as_deref(),
            Some("abcdef1")
        );
        assert_eq!(
            extract_commit("Committed: 0123456789abcdef").as_deref(),
            Some("0123456789abcdef")
        );
        assert_eq!(extract_commit("commit message was great"), None);
    }

    #[test]
    fn test_bare_pr_number() {
        assert_eq!(extract_pull_request("Opened PR #12 against staging"), (Some(12), None));
        assert_eq!(extract_pull_request("nothing here"), (None, None));
    }

    #[test]
    fn test_check_failure_keywords() {
        let checks = vec!["pytest".to_string()];
        assert_eq!(
            extract_checks("pytest: 3 failed, 10 passed", &checks),
            vec![("pytest".to_string(), false)]
        );
        assert_eq!(
            extract_checks("pytest completed with no errors", &checks),
            vec![("pytest".to_string(), true)]
        );
        assert_eq!(
            extract_checks("pytest exited with exit code 2", &checks),
            vec![("pytest".to_string(), false)]
        );
    }
}
