//! Reload error definitions.

use std::fmt;
use thiserror::Error;

use crate::admin::AdminError;

/// The sequencer step that was executing when a reload failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadStep {
    ListingActive,
    Loading { id: String },
    Labelling { label: String, id: String },
    Activating { id: String },
    SettingParameter { name: String },
    Starting,
}

impl fmt::Display for ReloadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadStep::ListingActive => f.write_str("listing loaded configurations"),
            ReloadStep::Loading { id } => write!(f, "loading configuration {id}"),
            ReloadStep::Labelling { label, id } => write!(f, "labelling {id} as {label}"),
            ReloadStep::Activating { id } => write!(f, "activating top configuration {id}"),
            ReloadStep::SettingParameter { name } => write!(f, "setting parameter {name}"),
            ReloadStep::Starting => f.write_str("starting the daemon"),
        }
    }
}

/// Errors that abort a reload cycle.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// A protocol step failed; later steps were not attempted.
    #[error("{step} failed: {source}")]
    Step {
        step: ReloadStep,
        #[source]
        source: AdminError,
    },

    /// Rendered VCL could not be written.
    #[error("failed to write VCL file {path}: {source}")]
    Artifacts {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ReloadError {
    pub fn step(&self) -> Option<&ReloadStep> {
        match self {
            ReloadError::Step { step, .. } => Some(step),
            ReloadError::Artifacts { .. } => None,
        }
    }
}

/// Result type for reload operations.
pub type ReloadResult<T> = Result<T, ReloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_names_the_step() {
        let err = ReloadError::Step {
            step: ReloadStep::Activating {
                id: "default_200".into(),
            },
            source: AdminError::Disconnected,
        };
        assert_eq!(
            err.to_string(),
            "activating top configuration default_200 failed: admin socket disconnected"
        );
        assert!(matches!(err.step(), Some(ReloadStep::Activating { .. })));
    }
}
