//! Control-plane sidecar for a Varnish cache daemon.
//!
//! Speaks the daemon's admin protocol and keeps its running VCL and
//! parameters in line with a configuration file.

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod reload;

pub use admin::{AdminClient, AdminClientConfig};
pub use config::schema::SidecarConfig;
pub use lifecycle::Sidecar;
pub use reload::{HotReloadCoordinator, ReloadSequencer};
