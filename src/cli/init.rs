use std::path::Path;

use anyhow::{bail, Context};

use crate::config::{AppConfig, ResolvedIdentity};
use crate::workspace::host;

/// Detect settings and write a config, keeping whatever an existing config
/// already sets.
pub async fn write_config(repo_root: &Path, path: &Path, force: bool) -> anyhow::Result<ResolvedIdentity> {
    let existing = if path.exists() {
        if !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        let raw = std::fs::read_to_string(path)?;
        match AppConfig::from_toml_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Existing config unreadable, starting fresh");
                None
            }
        }
    } else {
        None
    };

    let detected = host::detect(repo_root)
        .await
        .context("Could not inspect the host repository")?;
    let resolved = ResolvedIdentity::resolve(existing.as_ref(), &detected);
    let config = resolved.apply(existing.as_ref());
    config
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), "Configuration written");
    Ok(resolved)
}

pub async fn run(repo_root: &Path, path: &Path, force: bool) -> anyhow::Result<()> {
    let resolved = write_config(repo_root, path, force).await?;

    println!("Wrote {}", path.display());
    println!("  project.owner          = {:<20} ({})", resolved.owner.value(), resolved.owner.origin());
    println!("  project.name           = {:<20} ({})", resolved.name.value(), resolved.name.origin());
    println!(
        "  project.default_branch = {:<20} ({})",
        resolved.default_branch.value(),
        resolved.default_branch.origin()
    );
    println!(
        "  quality.package_manager = {:<19} ({})",
        resolved.package_manager.value().as_deref().unwrap_or("-"),
        resolved.package_manager.origin()
    );

    let config = AppConfig::load(Some(path))?;
    let problems = config.validate();
    if !problems.is_empty() {
        println!("\nBefore dispatching, set:");
        for problem in problems {
            println!("  - {problem}");
        }
        println!("Use `spindle configure <key> <value>`.");
    }
    Ok(())
}
