//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, resolve relative paths)
//!     → validation.rs (semantic checks)
//!     → SidecarConfig (validated, immutable)
//!     → ReloadConfig / AdminClientConfig
//!
//! On change or SIGHUP:
//!     watcher.rs detects change (debounced)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → coordinator.trigger(new ReloadConfig)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - A config that fails to load never replaces the current one

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_config_or_default, ConfigError, DEFAULT_CONFIG_PATH};
pub use schema::{ParamValue, SidecarConfig, VclConfig};
pub use validation::{check_sources, validate_config, ValidationError};
pub use watcher::ConfigWatcher;
