//! Path utilities and XDG directory discovery.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for `picoclaw-swarm`.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    #[must_use]
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "picoclaw", "picoclaw-swarm"),
        }
    }

    /// `~/.config/picoclaw-swarm/`
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::XdgError("failed to determine user config directory".to_string()))
    }

    /// `~/.config/picoclaw-swarm/config.toml`
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// `swarm.toml`, git-tracked project config.
    #[must_use]
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("swarm.toml")
    }

    /// `swarm.local.toml`, gitignored local overrides.
    #[must_use]
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("swarm.local.toml")
    }

    /// `.picoclaw-swarm/` node state directory (claims cache, etc).
    #[must_use]
    pub fn state_dir(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(".picoclaw-swarm")
    }

    #[must_use]
    pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
        Self::project_config_file(project_dir).exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn project_paths_are_relative_to_project_dir() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        assert_eq!(
            Paths::project_config_file(project_dir),
            project_dir.join("swarm.toml")
        );
        assert_eq!(
            Paths::local_config_file(project_dir),
            project_dir.join("swarm.local.toml")
        );
        assert_eq!(Paths::state_dir(project_dir), project_dir.join(".picoclaw-swarm"));
        assert!(!Paths::is_initialized(project_dir));

        std::fs::write(Paths::project_config_file(project_dir), "[node]\n").unwrap();
        assert!(Paths::is_initialized(project_dir));
    }
}
