//! The production reload cycle: write artifacts, then sequence the daemon.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::admin::{AdminClient, AdminClientConfig};
use crate::reload::artifacts::ArtifactWriter;
use crate::reload::error::ReloadResult;
use crate::reload::sequencer::{ReloadReport, ReloadSequencer};
use crate::reload::types::{Generation, ReloadConfig};

/// One attempt at bringing the daemon in line with a configuration.
pub trait ReloadCycle: Send + Sync + 'static {
    fn run(&self, config: &ReloadConfig) -> impl Future<Output = ReloadResult<()>> + Send;
}

/// Reload through a long-lived admin client.
pub struct VarnishReload<W> {
    client: Arc<AdminClient>,
    writer: W,
    start_pending: AtomicBool,
}

impl<W: ArtifactWriter> VarnishReload<W> {
    pub fn new(client: Arc<AdminClient>, writer: W) -> Self {
        Self {
            client,
            writer,
            start_pending: AtomicBool::new(true),
        }
    }
}

impl<W: ArtifactWriter + 'static> ReloadCycle for VarnishReload<W> {
    async fn run(&self, config: &ReloadConfig) -> ReloadResult<()> {
        self.writer.write(config).await?;

        let start = config.start_daemon() && self.start_pending.load(Ordering::Acquire);
        let generation = Generation::next();
        let report = ReloadSequencer::new(self.client.as_ref())
            .run(config, generation, start)
            .await?;
        if report.started {
            self.start_pending.store(false, Ordering::Release);
        }

        tracing::info!(
            generation = generation.as_u64(),
            activated = report.activated.as_deref().unwrap_or("-"),
            discarded = report.discarded.len(),
            parameters = report.parameters_set,
            "Daemon reloaded"
        );
        Ok(())
    }
}

/// Open a client, reload once, close the client.
pub async fn reload_once<W: ArtifactWriter>(
    admin: AdminClientConfig,
    config: &ReloadConfig,
    writer: &W,
) -> ReloadResult<ReloadReport> {
    writer.write(config).await?;

    let client = AdminClient::connect(admin);
    let result = ReloadSequencer::new(&client)
        .run(config, Generation::next(), config.start_daemon())
        .await;
    client.close();
    result
}
