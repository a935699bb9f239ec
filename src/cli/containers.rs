use crate::container::{ContainerRuntime, ContainerSummary};

/// Containers `--clean` may remove. Running ones only with `force`.
pub fn select_for_cleanup(containers: &[ContainerSummary], force: bool) -> Vec<&ContainerSummary> {
    containers
        .iter()
        .filter(|c| force || !c.is_running())
        .collect()
}

pub fn render_table(containers: &[ContainerSummary]) -> String {
    let mut out = format!("{:<14} {:<40} {:<10} {:<8} {}\n", "ID", "NAME", "STATE", "ISSUE", "STATUS");
    for c in containers {
        let id: String = c.id.chars().take(12).collect();
        let issue = c.labels.get("spindle.issue").map_or("-", String::as_str);
        out.push_str(&format!(
            "{:<14} {:<40} {:<10} {:<8} {}\n",
            id, c.name, c.state, issue, c.status
        ));
    }
    out
}

/// List managed environments and optionally remove them. Returns how many
/// were removed.
pub async fn run(
    runtime: &dyn ContainerRuntime,
    all: bool,
    clean: bool,
    force: bool,
) -> anyhow::Result<usize> {
    let containers = runtime.list_managed(all || clean).await?;
    if containers.is_empty() {
        println!("No spindle environments found.");
        return Ok(0);
    }
    print!("{}", render_table(&containers));

    if !clean {
        return Ok(0);
    }

    let targets = select_for_cleanup(&containers, force);
    let skipped = containers.len() - targets.len();
    let mut removed = 0;
    for c in targets {
        match runtime.remove(&c.id, true).await {
            Ok(()) => {
                tracing::info!(container = %c.name, "Removed environment");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(container = %c.name, error = %e, "Failed to remove environment");
                eprintln!("Could not remove {}: {e}", c.name);
            }
        }
    }

    println!("Removed {removed} environment(s).");
    if skipped > 0 {
        println!("Skipped {skipped} running environment(s); use --force to remove them too.");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use std::collections::BTreeMap;

    fn summary(id: &str, state: &str, issue: Option<&str>) -> ContainerSummary {
        let mut labels = BTreeMap::new();
        labels.insert("spindle.managed".to_string(), "true".to_string());
        if let Some(issue) = issue {
            labels.insert("spindle.issue".to_string(), issue.to_string());
        }
        ContainerSummary {
            id: id.to_string(),
            name: format!("spindle-widgets-{id}"),
            state: state.to_string(),
            status: String::new(),
            created: String::new(),
            labels,
        }
    }

    #[test]
    fn test_select_for_cleanup() {
        let list = vec![summary("a", "running", None), summary("b", "exited", Some("3"))];
        let ids: Vec<_> = select_for_cleanup(&list, false).iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(select_for_cleanup(&list, true).len(), 2);
    }

    #[test]
    fn test_render_table_shows_issue_label() {
        let table = render_table(&[summary("0123456789abcdef", "exited", Some("42"))]);
        assert!(table.contains("0123456789ab "));
        assert!(table.contains("42"));
    }

    #[tokio::test]
    async fn test_clean_removes_only_stopped_without_force() {
        let runtime = FakeRuntime {
            managed: vec![summary("a", "running", None), summary("b", "exited", None)],
            ..Default::default()
        };
        assert_eq!(run(&runtime, false, true, false).await.unwrap(), 1);
        assert_eq!(runtime.removed(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_list_only_removes_nothing() {
        let runtime = FakeRuntime {
            managed: vec![summary("b", "exited", None)],
            ..Default::default()
        };
        assert_eq!(run(&runtime, true, false, false).await.unwrap(), 0);
        assert_eq!(runtime.calls_named("remove"), 0);
    }
}
