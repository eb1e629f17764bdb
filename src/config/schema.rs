//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sidecar.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admin::{AdminClientConfig, SecretSource};
use crate::observability::logging::LogFormat;
use crate::reload::{ReloadConfig, ReloadConfigError, VclUnit};

/// Root configuration for the sidecar.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Admin socket of the daemon.
    pub admin: AdminConfig,

    /// Reload cycle settings.
    pub reload: ReloadSettings,

    /// Config file watching.
    pub watch: WatchConfig,

    /// VCL units, loaded in order.
    pub vcl: Vec<VclConfig>,

    /// Runtime parameters pushed with `param.set` on every cycle.
    pub parameters: BTreeMap<String, ParamValue>,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            admin: AdminConfig::default(),
            reload: ReloadSettings::default(),
            watch: WatchConfig::default(),
            vcl: vec![VclConfig {
                name: "default".to_string(),
                src: PathBuf::from("/etc/varnish/default.vcl"),
                dest: None,
                top: false,
            }],
            parameters: default_parameters(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_parameters() -> BTreeMap<String, ParamValue> {
    BTreeMap::from([
        (
            "feature".to_string(),
            ParamValue::Text("+http2,+esi_disable_xml_check".to_string()),
        ),
        ("default_grace".to_string(), ParamValue::Integer(86400)),
        ("default_keep".to_string(), ParamValue::Integer(3600)),
        ("default_ttl".to_string(), ParamValue::Integer(240)),
        ("backend_idle_timeout".to_string(), ParamValue::Integer(65)),
        ("timeout_idle".to_string(), ParamValue::Integer(60)),
        (
            "syslog_cli_traffic".to_string(),
            ParamValue::Text("off".to_string()),
        ),
    ])
}

impl SidecarConfig {
    /// Resolve relative paths against `base`, normally the config file's directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(path) = self.admin.secret_file.as_mut() {
            resolve(path);
        }
        resolve(&mut self.reload.output_dir);
        for unit in &mut self.vcl {
            resolve(&mut unit.src);
            if let Some(dest) = unit.dest.as_mut() {
                resolve(dest);
            }
        }
    }

    /// Build the immutable configuration a reload cycle consumes.
    ///
    /// Units without `dest` land in `reload.output_dir`. When no unit is
    /// marked top, the last one is.
    pub fn reload_config(&self) -> Result<ReloadConfig, ReloadConfigError> {
        let implicit_top = !self.vcl.iter().any(|unit| unit.top);
        let last = self.vcl.len().saturating_sub(1);

        let units = self
            .vcl
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                let dest = unit
                    .dest
                    .clone()
                    .unwrap_or_else(|| self.reload.output_dir.join(rendered_name(&unit.src)));
                VclUnit::new(
                    unit.name.clone(),
                    unit.src.clone(),
                    dest,
                    unit.top || (implicit_top && i == last),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();

        ReloadConfig::new(units, parameters, self.reload.start_daemon)
    }
}

/// `default.vcl.ejs` → `default.vcl`
fn rendered_name(src: &Path) -> PathBuf {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    PathBuf::from(name.strip_suffix(".ejs").unwrap_or(&name))
}

/// Admin socket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// `host:port` of the admin socket.
    pub address: String,

    /// Secret file, re-read on every connection attempt.
    pub secret_file: Option<PathBuf>,

    /// Inline secret. Takes precedence over `secret_file` and is never printed.
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2000".to_string(),
            secret_file: Some(PathBuf::from("/etc/varnish/secret")),
            secret: None,
            connect_timeout_ms: 5000,
            response_timeout_ms: 60000,
            reconnect_delay_ms: 300,
        }
    }
}

impl AdminConfig {
    pub fn client_config(&self) -> AdminClientConfig {
        let secret = match (&self.secret, &self.secret_file) {
            (Some(secret), _) => SecretSource::Inline(secret.as_bytes().to_vec()),
            (None, Some(path)) => SecretSource::File(path.clone()),
            (None, None) => SecretSource::Inline(Vec::new()),
        };

        AdminClientConfig {
            address: self.address.clone(),
            secret,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

/// Reload cycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadSettings {
    /// Pause before retrying a failed cycle.
    pub retry_delay_ms: u64,

    /// Send `start` after the first successful reload.
    pub start_daemon: bool,

    /// Default destination directory of rendered VCL.
    pub output_dir: PathBuf,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: 5000,
            start_daemon: false,
            output_dir: PathBuf::from("/etc/varnish"),
        }
    }
}

impl ReloadSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Config file watching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,

    /// Quiet period after the last file event before reloading.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 50,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// One `[[vcl]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VclConfig {
    pub name: String,
    pub src: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub top: bool,
}

/// A `param.set` value as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("on"),
            ParamValue::Bool(false) => f.write_str("off"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    pub log_format: LogFormat,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Prometheus listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "varnishconf=info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9131".to_string(),
        }
    }
}
