//! Ordered reload protocol.
//!
//! # Steps
//! ```text
//! vcl.list -j                      capture currently active units
//! vcl.load <id> <path>             every unit, in order
//! vcl.label <name> <id>            every non-top unit
//! vcl.use <top id>                 switch traffic
//! vcl.discard <old>                best effort, failures only logged
//! param.set <name> <value>         every parameter, every cycle
//! start                            first start only, "already running" is fine
//! ```
//!
//! # Design Decisions
//! - Any failure except a discard aborts the remaining steps
//! - Parameters are always re-sent so a partially failed cycle converges
//! - The sequencer borrows the channel; opening and closing it is the
//!   caller's job

use serde::Deserialize;
use serde_json::Value;

use crate::admin::{AdminChannel, AdminError, Command, Response};
use crate::observability::metrics;
use crate::reload::error::{ReloadError, ReloadResult, ReloadStep};
use crate::reload::types::{Generation, ReloadConfig};

/// Status of a command the daemon cannot execute in its current state.
const STATUS_CANT: u16 = 300;

/// Leading entries of a `vcl.list -j` array: version, argv, timestamp.
const VCL_LIST_PREAMBLE: usize = 3;

#[derive(Debug, Deserialize)]
struct VclListEntry {
    status: String,
    name: String,
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Id of the unit now serving traffic.
    pub activated: Option<String>,
    /// Superseded units discarded.
    pub discarded: Vec<String>,
    /// Superseded units the daemon refused to discard.
    pub discard_failures: Vec<String>,
    pub parameters_set: usize,
    pub started: bool,
}

/// Drives one reload through an admin channel.
pub struct ReloadSequencer<'a, C> {
    channel: &'a C,
}

impl<'a, C: AdminChannel> ReloadSequencer<'a, C> {
    pub fn new(channel: &'a C) -> Self {
        Self { channel }
    }

    /// Run every step for `config`, stamping loaded units with `generation`.
    pub async fn run(
        &self,
        config: &ReloadConfig,
        generation: Generation,
        start_daemon: bool,
    ) -> ReloadResult<ReloadReport> {
        let mut report = ReloadReport::default();

        if let Some(top) = config.top_unit() {
            let previously_active = self.active_units().await?;

            for unit in config.units() {
                let id = unit.generated_id(generation);
                self.step(
                    ReloadStep::Loading { id: id.clone() },
                    Command::vcl_load(&id, unit.dest_path()),
                )
                .await?;

                if !unit.is_top() {
                    self.step(
                        ReloadStep::Labelling {
                            label: unit.name().to_string(),
                            id: id.clone(),
                        },
                        Command::vcl_label(unit.name(), &id),
                    )
                    .await?;
                }
            }

            let top_id = top.generated_id(generation);
            self.step(
                ReloadStep::Activating { id: top_id.clone() },
                Command::vcl_use(&top_id),
            )
            .await?;
            tracing::info!(vcl = %top_id, "Activated VCL");
            report.activated = Some(top_id);

            for name in previously_active {
                match self.channel.request(Command::vcl_discard(&name)).await {
                    Ok(_) => {
                        tracing::debug!(vcl = %name, "Discarded superseded VCL");
                        report.discarded.push(name);
                    }
                    Err(e) => {
                        tracing::warn!(vcl = %name, error = %e, "Failed to discard the old VCL");
                        metrics::record_vcl_discard_failure();
                        report.discard_failures.push(name);
                    }
                }
            }
        }

        for (name, value) in config.parameters() {
            self.step(
                ReloadStep::SettingParameter { name: name.clone() },
                Command::param_set(name, value),
            )
            .await?;
            report.parameters_set += 1;
        }

        if start_daemon {
            match self.channel.request(Command::start()).await {
                Ok(_) => tracing::info!("Daemon child started"),
                Err(e) if is_already_running(&e) => {
                    tracing::info!("Daemon child already running");
                }
                Err(source) => {
                    return Err(ReloadError::Step {
                        step: ReloadStep::Starting,
                        source,
                    })
                }
            }
            report.started = true;
        }

        Ok(report)
    }

    async fn step(&self, step: ReloadStep, command: Command) -> ReloadResult<Response> {
        self.channel
            .request(command)
            .await
            .map_err(|source| ReloadError::Step { step, source })
    }

    /// Names of the units the daemon currently reports as active.
    async fn active_units(&self) -> ReloadResult<Vec<String>> {
        let response = self
            .step(ReloadStep::ListingActive, Command::vcl_list_json())
            .await?;

        let entries = match response.json() {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(ReloadError::Step {
                    step: ReloadStep::ListingActive,
                    source: AdminError::UnexpectedBody(format!(
                        "expected a JSON array, got {:?}",
                        response.text()
                    )),
                })
            }
        };

        Ok(entries
            .iter()
            .skip(VCL_LIST_PREAMBLE)
            .filter_map(|entry| serde_json::from_value::<VclListEntry>(entry.clone()).ok())
            .filter(|entry| entry.status == "active")
            .map(|entry| entry.name)
            .collect())
    }
}

/// `start` refused because the child is already up (status 300).
fn is_already_running(err: &AdminError) -> bool {
    matches!(
        err,
        AdminError::Command { status: STATUS_CANT, message } if message.contains("in state running")
    )
}
