//! Hot reload subsystem.
//!
//! # Data Flow
//! ```text
//! watcher / SIGHUP / startup
//!     → coordinator.rs (pending slot, single flight, retry)
//!     → cycle.rs (write artifacts, pick a generation)
//!     → sequencer.rs (list → load → label → use → discard → param.set → start)
//!     → admin client
//! ```

pub mod artifacts;
pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod sequencer;
pub mod types;

pub use artifacts::{ArtifactWriter, CopyArtifacts};
pub use coordinator::{HotReloadCoordinator, ReloadCycleState, ReloadOutcome, ReloadTrigger};
pub use cycle::{reload_once, ReloadCycle, VarnishReload};
pub use error::{ReloadError, ReloadResult, ReloadStep};
pub use sequencer::{ReloadReport, ReloadSequencer};
pub use types::{Generation, ReloadConfig, ReloadConfigError, VclUnit};
