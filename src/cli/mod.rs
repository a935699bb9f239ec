//! Command handlers behind the `spindle` binary.

pub mod configure;
pub mod containers;
pub mod dispatch;
pub mod doctor;
pub mod init;

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::workspace::host;

/// Root of the repository the command runs in.
pub fn repo_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    host::repository_root(&cwd).context("spindle must run inside a git repository")
}

/// Explicit `--config` path, or the default one under `repo_root`.
pub fn config_path(repo_root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => repo_root.join(DEFAULT_CONFIG_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let root = Path::new("/src/widgets");
        assert_eq!(
            config_path(root, None),
            PathBuf::from("/src/widgets/.spindle/config.toml")
        );
        assert_eq!(
            config_path(root, Some(Path::new("custom.toml"))),
            PathBuf::from("custom.toml")
        );
    }
}
