//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the admin client and reload coordinator from a loaded config
//! - Issue the initial reload
//! - Start the config watcher
//! - Serve signals until shutdown
//!
//! # Design Decisions
//! - Fail fast: an unusable config or watcher is fatal at startup
//! - The initial reload is triggered before the watcher starts; a change
//!   that slipped in between is caught by comparing modification times
//! - The admin client is shared by every cycle and closed last

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::admin::AdminClient;
use crate::config::loader::ConfigError;
use crate::config::schema::SidecarConfig;
use crate::config::watcher::{modified_at, refresh, ConfigWatcher};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{ControlSignal, Signals};
use crate::reload::{CopyArtifacts, HotReloadCoordinator, ReloadTrigger, VarnishReload};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("signal handlers: {0}")]
    Signals(#[from] std::io::Error),
}

/// A running sidecar.
pub struct Sidecar {
    config_path: PathBuf,
    coordinator: HotReloadCoordinator,
    reload_loop: JoinHandle<()>,
    client: Arc<AdminClient>,
    _watcher: Option<RecommendedWatcher>,
}

impl Sidecar {
    /// Start every subsystem for `config`, loaded from `config_path` at `loaded_at`.
    pub fn start(
        config_path: &Path,
        config: &SidecarConfig,
        loaded_at: Option<SystemTime>,
    ) -> Result<Self, StartupError> {
        let reload_config = config.reload_config().map_err(ConfigError::from)?;

        let client = Arc::new(AdminClient::connect(config.admin.client_config()));
        let cycle = VarnishReload::new(Arc::clone(&client), CopyArtifacts);
        let (coordinator, reload_loop) =
            HotReloadCoordinator::spawn(cycle, config.reload.retry_delay());

        coordinator.trigger(reload_config, ReloadTrigger::Startup);

        let watcher = if config.watch.enabled {
            let watcher =
                ConfigWatcher::new(config_path, config.watch.debounce()).run(coordinator.clone());
            match watcher {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    coordinator.stop();
                    client.close();
                    return Err(e.into());
                }
            }
        } else {
            tracing::info!("Config watching disabled");
            None
        };

        if loaded_at.is_some() && modified_at(config_path) != loaded_at {
            tracing::info!(path = %config_path.display(), "Config changed while starting");
            refresh(config_path, &coordinator, ReloadTrigger::ChangeAfterLoad);
        }

        tracing::info!(admin = %client.address(), "Sidecar started");

        Ok(Self {
            config_path: config_path.to_path_buf(),
            coordinator,
            reload_loop,
            client,
            _watcher: watcher,
        })
    }

    pub fn coordinator(&self) -> &HotReloadCoordinator {
        &self.coordinator
    }

    /// Serve signals until asked to stop, then shut down.
    pub async fn run(self, mut signals: Signals) {
        loop {
            match signals.recv().await {
                ControlSignal::Refresh => {
                    refresh(&self.config_path, &self.coordinator, ReloadTrigger::Signal);
                }
                ControlSignal::Shutdown => break,
            }
        }
        self.shutdown(Shutdown::default()).await;
    }

    /// Stop the watcher and coordinator, then close the admin client.
    pub async fn shutdown(self, shutdown: Shutdown) {
        let Sidecar {
            coordinator,
            reload_loop,
            client,
            _watcher: watcher,
            ..
        } = self;

        drop(watcher);
        shutdown.run(&coordinator, reload_loop).await;
        client.close();
        tracing::info!("Shutdown complete");
    }
}
