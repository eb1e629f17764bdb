//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::SidecarConfig;
use crate::config::validation::{check_sources, validate_config, ValidationError};
use crate::reload::{ReloadConfig, ReloadConfigError};

/// Used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/varnish/source/config.toml";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    Reload(ReloadConfigError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "IO error reading {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Reload(e) => write!(f, "Invalid reload configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
            ConfigError::Reload(e) => Some(e),
        }
    }
}

impl From<ReloadConfigError> for ConfigError {
    fn from(e: ReloadConfigError) -> Self {
        ConfigError::Reload(e)
    }
}

/// Load and validate configuration from a TOML file.
///
/// Relative paths inside the file resolve against its directory, and every
/// VCL source must be readable.
pub fn load_config(path: &Path) -> Result<SidecarConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: SidecarConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    let mut errors = validate_config(&config).err().unwrap_or_default();
    errors.extend(check_sources(&config));
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
///
/// The flag tells whether the file was found.
pub fn load_config_or_default(path: &Path) -> Result<(SidecarConfig, bool), ConfigError> {
    match load_config(path) {
        Ok(config) => Ok((config, true)),
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok((SidecarConfig::default(), false))
        }
        Err(e) => Err(e),
    }
}

/// Load the file and build what a reload cycle needs from it.
pub fn load_reload_config(path: &Path) -> Result<(SidecarConfig, ReloadConfig), ConfigError> {
    let config = load_config(path)?;
    let reload = config.reload_config()?;
    Ok((config, reload))
}
