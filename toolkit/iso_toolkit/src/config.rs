//! Isolation context configuration.

use std::path::PathBuf;

use iso_host::EnvironmentSetup;
use serde::{Deserialize, Serialize};

use crate::{LoadStrategy, ToolkitResult};

/// Environment variable naming the application base directory.
pub const ENV_APPLICATION_BASE: &str = "ISO_APPLICATION_BASE";
/// Environment variable holding the private bin path (semicolon list).
pub const ENV_PRIVATE_BIN_PATH: &str = "ISO_PRIVATE_BIN_PATH";
/// Environment variable holding extra probe paths (semicolon list).
pub const ENV_PROBE_PATHS: &str = "ISO_PROBE_PATHS";
/// Environment variable selecting the remote resolver's load strategy.
pub const ENV_LOAD_STRATEGY: &str = "ISO_LOAD_STRATEGY";

/// Settings for [`IsolationContext::create_from_config`].
///
/// [`IsolationContext::create_from_config`]: crate::IsolationContext::create_from_config
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Friendly name of the isolated environment.
    pub application_name: Option<String>,
    /// Defaults to the directory of the running executable.
    pub application_base: Option<PathBuf>,
    /// Semicolon list relative to the application base.
    pub private_bin_path: Option<String>,
    /// Extra probe paths added to both resolvers.
    pub probe_paths: Vec<String>,
    /// Load strategy of the remote resolver.
    pub strategy: LoadStrategy,
}

impl ContextConfig {
    /// Read the `ISO_*` environment variables. Unset or blank variables keep
    /// their defaults.
    pub fn from_env() -> ToolkitResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ToolkitResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = ContextConfig::default();
        if let Some(base) = get(ENV_APPLICATION_BASE) {
            config.application_base = Some(PathBuf::from(base));
        }
        config.private_bin_path = get(ENV_PRIVATE_BIN_PATH);
        if let Some(paths) = get(ENV_PROBE_PATHS) {
            config.probe_paths = paths
                .split(';')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(strategy) = get(ENV_LOAD_STRATEGY) {
            config.strategy = strategy.parse()?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_application_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.application_base = Some(base.into());
        self
    }

    #[must_use]
    pub fn with_private_bin_path(mut self, paths: impl Into<String>) -> Self {
        self.private_bin_path = Some(paths.into());
        self
    }

    #[must_use]
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The environment setup this configuration describes.
    pub fn setup(&self) -> EnvironmentSetup {
        EnvironmentSetup {
            application_name: self.application_name.clone(),
            application_base: self.application_base.clone(),
            private_bin_path: self.private_bin_path.clone(),
        }
    }
}
