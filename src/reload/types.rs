//! Reload inputs: VCL units, generations and the per-cycle configuration.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// Last generation handed out in this process.
static LAST_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Errors raised while assembling a [`ReloadConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReloadConfigError {
    #[error("invalid VCL name {0:?}: must start with a letter and contain only letters, digits, '_' or '-'")]
    InvalidUnitName(String),

    #[error("VCL name {0:?} is used more than once")]
    DuplicateUnit(String),

    #[error("no VCL unit is marked as top")]
    NoTopUnit,

    #[error("more than one VCL unit is marked as top: {}", .0.join(", "))]
    MultipleTopUnits(Vec<String>),

    #[error("invalid parameter name {0:?}")]
    InvalidParameterName(String),
}

/// Whether `name` is acceptable as a VCL name or label.
pub fn is_valid_vcl_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

/// Stamp distinguishing the units loaded by one reload attempt.
///
/// Millisecond timestamps, bumped when the clock has not advanced since the
/// previous stamp so two attempts never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn next() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut last = LAST_GENERATION.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match LAST_GENERATION.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named VCL program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VclUnit {
    name: String,
    source_path: PathBuf,
    dest_path: PathBuf,
    top: bool,
}

impl VclUnit {
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        dest_path: impl Into<PathBuf>,
        top: bool,
    ) -> Result<Self, ReloadConfigError> {
        let name = name.into();
        if !is_valid_vcl_name(&name) {
            return Err(ReloadConfigError::InvalidUnitName(name));
        }
        Ok(Self {
            name,
            source_path: source_path.into(),
            dest_path: dest_path.into(),
            top,
        })
    }

    /// Stable name, used as label for non-top units.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template or source file the artifact writer reads.
    pub fn source_path(&self) -> &PathBuf {
        &self.source_path
    }

    /// Rendered file the daemon loads.
    pub fn dest_path(&self) -> &PathBuf {
        &self.dest_path
    }

    pub fn is_top(&self) -> bool {
        self.top
    }

    /// `<name>_<generation>`
    pub fn generated_id(&self, generation: Generation) -> String {
        format!("{}_{}", self.name, generation)
    }
}

/// Everything one reload cycle needs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadConfig {
    units: Vec<VclUnit>,
    parameters: BTreeMap<String, String>,
    start_daemon: bool,
}

impl ReloadConfig {
    /// Validate and assemble a configuration.
    ///
    /// A non-empty unit list needs exactly one top unit; an empty one makes
    /// the cycle a parameter refresh.
    pub fn new(
        units: Vec<VclUnit>,
        parameters: BTreeMap<String, String>,
        start_daemon: bool,
    ) -> Result<Self, ReloadConfigError> {
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.name()) {
                return Err(ReloadConfigError::DuplicateUnit(unit.name.clone()));
            }
        }

        if !units.is_empty() {
            let tops: Vec<String> = units
                .iter()
                .filter(|u| u.is_top())
                .map(|u| u.name.clone())
                .collect();
            match tops.len() {
                0 => return Err(ReloadConfigError::NoTopUnit),
                1 => {}
                _ => return Err(ReloadConfigError::MultipleTopUnits(tops)),
            }
        }

        if let Some(name) = parameters
            .keys()
            .find(|name| name.is_empty() || name.contains(char::is_whitespace))
        {
            return Err(ReloadConfigError::InvalidParameterName(name.clone()));
        }

        Ok(Self {
            units,
            parameters,
            start_daemon,
        })
    }

    pub fn units(&self) -> &[VclUnit] {
        &self.units
    }

    pub fn top_unit(&self) -> Option<&VclUnit> {
        self.units.iter().find(|u| u.is_top())
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Whether the daemon still waits for a `start` command.
    pub fn start_daemon(&self) -> bool {
        self.start_daemon
    }
}
