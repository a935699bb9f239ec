//! Read-only inspection of the host repository.
//!
//! Runs never mutate the host working tree; this module only reads remote
//! coordinates and branch names to seed configuration.

use std::path::{Path, PathBuf};

use git2::Repository;

use crate::config::DetectedSettings;
use crate::error::{AppError, Result};

/// Split a GitHub remote URL into `(owner, name)`.
///
/// Accepts `https://github.com/o/r(.git)`, `git@github.com:o/r(.git)` and
/// `ssh://git@github.com/o/r(.git)`.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        let without_scheme = url.split_once("://")?.1;
        let without_auth = without_scheme
            .rsplit_once('@')
            .map_or(without_scheme, |(_, host)| host);
        without_auth.split_once('/')?.1
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, name) = path.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((owner.to_string(), name.to_string()))
}

/// Package manager implied by the lockfiles at `root`.
pub fn detect_package_manager(root: &Path) -> Option<String> {
    const LOCKFILES: &[(&str, &str)] = &[
        ("pnpm-lock.yaml", "pnpm"),
        ("yarn.lock", "yarn"),
        ("bun.lockb", "bun"),
        ("package-lock.json", "npm"),
        ("Cargo.lock", "cargo"),
        ("poetry.lock", "poetry"),
        ("uv.lock", "uv"),
        ("go.sum", "go"),
    ];
    LOCKFILES
        .iter()
        .find(|(file, _)| root.join(file).exists())
        .map(|(_, manager)| manager.to_string())
}

fn default_branch(repo: &Repository) -> Option<String> {
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            if let Some(branch) = target.strip_prefix("refs/remotes/origin/") {
                return Some(branch.to_string());
            }
        }
    }

    let head = repo.head().ok()?;
    if head.is_branch() {
        head.shorthand().map(str::to_string)
    } else {
        None
    }
}

fn detect_blocking(root: &Path) -> Result<DetectedSettings> {
    let repo = Repository::discover(root)?;
    let workdir = repo
        .workdir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());

    let (owner, name) = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().and_then(parse_remote_url))
        .map_or((None, None), |(o, n)| (Some(o), Some(n)));

    Ok(DetectedSettings {
        owner,
        name,
        default_branch: default_branch(&repo),
        package_manager: detect_package_manager(&workdir),
    })
}

/// Detect project settings from the repository containing `root`.
pub async fn detect(root: &Path) -> Result<DetectedSettings> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || detect_blocking(&root))
        .await
        .map_err(|e| AppError::Git(format!("Detection task panicked: {e}")))?
}

/// Top-level directory of the repository containing `start`.
pub fn repository_root(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start)?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| AppError::Git("Bare repositories are not supported".to_string()))
}
