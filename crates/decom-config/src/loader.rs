//! Configuration loader with multi-source merging

use crate::HarnessConfig;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = "decom.toml";
const LOCAL_FILE: &str = "decom.local.toml";

/// A file layer consulted by [`ConfigLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// `~/.config/decom/config.toml` or the platform equivalent.
    User,
    /// `decom.toml` in the project directory.
    Project,
    /// `decom.local.toml` in the project directory, usually gitignored.
    Local,
    /// A file named on the command line.
    Explicit,
}

impl ConfigSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Local => "local",
            Self::Explicit => "explicit",
        }
    }
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_file: Option<PathBuf>,
    extra_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "DECOM".to_string(),
            user_file: ProjectDirs::from("dev", "Decom", "decom")
                .map(|dirs| dirs.config_dir().join("config.toml")),
            extra_file: None,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "DECOM")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Replace the per-user file, or skip it with `None`.
    pub fn with_user_file(mut self, path: Option<PathBuf>) -> Self {
        self.user_file = path;
        self
    }

    /// Layer an explicit file above the project files. The file must exist.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.extra_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// File layers in ascending precedence.
    ///
    /// Optional files that do not exist are left out; the explicit file is
    /// always listed so that a missing one fails [`load`](Self::load).
    pub fn sources(&self) -> Vec<(ConfigSource, PathBuf)> {
        let optional = [
            (ConfigSource::User, self.user_file.clone()),
            (ConfigSource::Project, Some(self.project_dir.join(PROJECT_FILE))),
            (ConfigSource::Local, Some(self.project_dir.join(LOCAL_FILE))),
        ];

        let mut sources: Vec<(ConfigSource, PathBuf)> = optional
            .into_iter()
            .filter_map(|(source, path)| path.filter(|p| p.exists()).map(|p| (source, p)))
            .collect();
        if let Some(extra) = &self.extra_file {
            sources.push((ConfigSource::Explicit, extra.clone()));
        }
        sources
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<HarnessConfig> {
        let mut builder = config::Config::builder();

        // Built-in defaults sit below every file.
        let defaults = HarnessConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        for (source, path) in self.sources() {
            builder = builder.add_source(
                config::File::from(path)
                    .required(source == ConfigSource::Explicit)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment variables (DECOM_CLUSTER__HOST, DECOM_RETRY__DEADLINE_MS, ...)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut harness_config: HarnessConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        harness_config.resolve_paths(&self.project_dir);
        harness_config.validate()?;

        Ok(harness_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> HarnessConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
