use crate::Config;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::Serialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SYMSRV_";
const CONFIG_FILE: &str = "config.toml";

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_every: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
}

/// `<config dir>/symsrv/config.toml` for the current platform, if a home
/// directory can be determined.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "symsrv").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Builder for the layered configuration.
#[derive(Debug, Clone)]
pub struct Loader {
    default_file: Option<PathBuf>,
    file: Option<PathBuf>,
    env_prefix: String,
}
impl Default for Loader {
    fn default() -> Self {
        Self {
            default_file: default_config_file(),
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}
impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer an explicit config file on top of the default one.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Ignore the per-user config file.
    pub fn without_default_file(mut self) -> Self {
        self.default_file = None;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn figment(&self, overrides: &Overrides) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(default_file) = self.default_file.as_deref().filter(|path| path.is_file()) {
            tracing::debug!(path = %default_file.display(), "Using default config file");
            figment = figment.merge(Toml::file(default_file));
        }
        if let Some(file) = &self.file {
            if !file.is_file() {
                exn::bail!(ErrorKind::NotFound(file.clone()));
            }
            figment = figment.merge(Toml::file(file));
        }
        Ok(figment.merge(Env::prefixed(&self.env_prefix)).merge(Serialized::defaults(overrides)))
    }

    /// Merge every layer, then validate the result.
    pub fn load(&self, overrides: &Overrides) -> Result<Config> {
        let config: Config = self.figment(overrides)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }
}

/// Load the configuration with the standard layers.
pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let loader = match file {
        Some(file) => Loader::new().with_file(file),
        None => Loader::new(),
    };
    loader.load(overrides)
}
