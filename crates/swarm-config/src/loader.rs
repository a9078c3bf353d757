//! Layered configuration loader.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Paths, SwarmConfig};

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SWARM".to_string(),
        }
    }

    #[must_use]
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(self) -> Result<SwarmConfig> {
        let mut builder = config::Config::builder();

        let defaults = SwarmConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build().context("failed to build configuration")?;
        let swarm_config: SwarmConfig = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        Ok(swarm_config)
    }

    #[must_use]
    pub fn load_or_default(self) -> SwarmConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_defaults_when_no_files_present() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigLoader::new().with_project_dir(temp_dir.path()).load().unwrap();
        assert_eq!(config.node.bind_port, 7946);
        assert_eq!(config.election.lease_duration_ms, 10_000);
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();
        fs::write(
            project_dir.join("swarm.toml"),
            "[node]\nid = \"n1\"\nbind_port = 9000\n",
        )
        .unwrap();

        let config = ConfigLoader::new().with_project_dir(project_dir).load().unwrap();
        assert_eq!(config.node.id, "n1");
        assert_eq!(config.node.bind_port, 9000);
    }

    #[test]
    fn local_config_overrides_project_config() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("swarm.toml"), "[node]\nbind_port = 9000\n").unwrap();
        fs::write(project_dir.join("swarm.local.toml"), "[node]\nbind_port = 9500\n").unwrap();

        let config = ConfigLoader::new().with_project_dir(project_dir).load().unwrap();
        assert_eq!(config.node.bind_port, 9500);
    }
}
