//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check VCL unit names, uniqueness and the top marker
//! - Validate value ranges (timeouts and delays > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SidecarConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is handed to the reload coordinator
//! - Source readability is a separate check since it touches the filesystem

use std::collections::HashSet;
use std::fs::File;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::SidecarConfig;
use crate::reload::types::is_valid_vcl_name;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one [[vcl]] unit is required")]
    NoVclUnits,

    #[error("invalid VCL name '{0}': must start with a letter and contain only letters, digits, '_' and '-'")]
    InvalidVclName(String),

    #[error("duplicate VCL name '{0}'")]
    DuplicateVclName(String),

    #[error("more than one VCL unit marked top: {}", .0.join(", "))]
    MultipleTopUnits(Vec<String>),

    #[error("admin.address must not be empty")]
    EmptyAdminAddress,

    #[error("invalid parameter name '{0}'")]
    InvalidParameterName(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),

    #[error("VCL '{name}' source {path} is not readable: {reason}")]
    UnreadableVclSource {
        name: String,
        path: String,
        reason: String,
    },
}

/// Check everything serde cannot.
pub fn validate_config(config: &SidecarConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.vcl.is_empty() {
        errors.push(ValidationError::NoVclUnits);
    }

    let mut seen = HashSet::new();
    for unit in &config.vcl {
        if !is_valid_vcl_name(&unit.name) {
            errors.push(ValidationError::InvalidVclName(unit.name.clone()));
        }
        if !seen.insert(unit.name.as_str()) {
            errors.push(ValidationError::DuplicateVclName(unit.name.clone()));
        }
    }

    let tops: Vec<String> = config
        .vcl
        .iter()
        .filter(|unit| unit.top)
        .map(|unit| unit.name.clone())
        .collect();
    if tops.len() > 1 {
        errors.push(ValidationError::MultipleTopUnits(tops));
    }

    if config.admin.address.trim().is_empty() {
        errors.push(ValidationError::EmptyAdminAddress);
    }

    for name in config.parameters.keys() {
        if name.is_empty() || name.contains(char::is_whitespace) {
            errors.push(ValidationError::InvalidParameterName(name.clone()));
        }
    }

    let durations = [
        ("admin.connect_timeout_ms", config.admin.connect_timeout_ms),
        ("admin.response_timeout_ms", config.admin.response_timeout_ms),
        ("admin.reconnect_delay_ms", config.admin.reconnect_delay_ms),
        ("reload.retry_delay_ms", config.reload.retry_delay_ms),
        ("watch.debounce_ms", config.watch.debounce_ms),
    ];
    for (field, value) in durations {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration(field));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Every VCL source must be a regular file this process can open.
pub fn check_sources(config: &SidecarConfig) -> Vec<ValidationError> {
    config
        .vcl
        .iter()
        .filter_map(|unit| {
            let reason = match File::open(&unit.src).and_then(|f| f.metadata()) {
                Ok(meta) if meta.is_file() => return None,
                Ok(_) => "not a regular file".to_string(),
                Err(e) => e.to_string(),
            };
            Some(ValidationError::UnreadableVclSource {
                name: unit.name.clone(),
                path: unit.src.display().to_string(),
                reason,
            })
        })
        .collect()
}
