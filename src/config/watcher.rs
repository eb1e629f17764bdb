//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, load_reload_config};
use crate::reload::{HotReloadCoordinator, ReloadTrigger};

/// Content digest of the config file and the VCL sources it names.
type Fingerprint = [u8; 32];

/// A watcher that monitors the configuration file's directory for changes.
///
/// The whole directory is watched so that mounted config maps, which swap
/// a symlink instead of writing the file, are noticed too. A settled burst
/// of events only reloads when the config file or one of its VCL sources
/// changed content, so rendered artifacts written into the same directory
/// do not trigger another cycle.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: &Path, debounce: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            debounce,
        }
    }

    /// Start watching and feed `coordinator` with every settled change.
    ///
    /// The returned watcher must be kept alive. The debounce task ends when
    /// the coordinator is stopped.
    pub fn run(self, coordinator: HotReloadCoordinator) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = watch_dir(&self.path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), dir = %dir.display(), "Config watcher started");

        let baseline = fingerprint(&self.path);
        tokio::spawn(debounce(self.path, self.debounce, baseline, rx, coordinator));
        Ok(watcher)
    }
}

async fn debounce(
    path: PathBuf,
    quiet: Duration,
    mut last: Option<Fingerprint>,
    mut events: mpsc::UnboundedReceiver<()>,
    coordinator: HotReloadCoordinator,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                if event.is_none() {
                    break;
                }
            }
            _ = coordinator.stopped() => break,
        }

        // Wait until the directory has been quiet for `quiet`.
        loop {
            tokio::select! {
                event = events.recv() => {
                    if event.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(quiet) => break,
            }
        }

        let current = fingerprint(&path);
        if current.is_some() && current == last {
            tracing::debug!(path = %path.display(), "Config and sources unchanged, skipping reload");
            continue;
        }
        last = current;

        tracing::info!(path = %path.display(), "Config file change detected, reloading...");
        refresh(&path, &coordinator, ReloadTrigger::File);
    }
    tracing::debug!("Config watcher stopped");
}

/// Digest of the config file bytes plus, when it parses, each VCL source.
///
/// `None` when the config file cannot be read.
fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let content = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&content);

    if let Ok(config) = load_config(path) {
        for unit in &config.vcl {
            hasher.update(unit.src.as_os_str().as_encoded_bytes());
            if let Ok(source) = std::fs::read(&unit.src) {
                hasher.update(&source);
            }
        }
    }

    Some(hasher.finalize().into())
}

/// Reload the file and hand the result to `coordinator`.
///
/// A file that fails to load or validate is logged and the current
/// configuration is kept. Returns whether a reload was triggered.
pub fn refresh(path: &Path, coordinator: &HotReloadCoordinator, trigger: ReloadTrigger) -> bool {
    match load_reload_config(path) {
        Ok((_, config)) => {
            coordinator.trigger(config, trigger);
            true
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                trigger = %trigger,
                error = %e,
                "Failed to reload config. Keeping current configuration."
            );
            false
        }
    }
}

/// Modification time used to notice a change between load and watch start.
pub fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
