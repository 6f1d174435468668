//! Configuration file watcher for hot-reload support.
//!
//! When the config file changes, the new adapter list is parsed off the
//! watcher thread and handed to the main loop, which reopens its
//! adapter set. A file that fails to parse is ignored and the running
//! configuration stays in effect.

use super::AppConfig;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watches one config file and yields each successfully parsed reload.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path: PathBuf = config_path.into();
        let (tx, rx) = mpsc::channel(4);

        // notify callbacks run on their own OS thread; capture the
        // runtime handle so reload parsing can happen on the runtime.
        let runtime = tokio::runtime::Handle::current();
        let watched = config_path.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        error!("config watch error: {e}");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                debug!("config file changed: {:?}", event.paths);

                let path = watched.clone();
                let tx = tx.clone();
                runtime.spawn(async move {
                    // Give the editor a moment to finish writing.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    match AppConfig::load(&path).await {
                        Ok(config) => {
                            info!("configuration reloaded");
                            let _ = tx.send(config).await;
                        }
                        Err(e) => {
                            warn!("config reload failed, keeping current config: {e:#}");
                        }
                    }
                });
            })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path.display()))?;
        info!("watching {} for changes", config_path.display());

        Ok(ConfigWatcher { _watcher: watcher, rx })
    }

    /// Next reloaded config, or `None` once the watcher is gone.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reload_delivers_the_new_adapter_list() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.yaml");

        AppConfig {
            adapters: vec![AdapterConfig::new("COM3", "Living Room")],
        }
        .save(&path)
        .await?;

        let mut watcher = ConfigWatcher::new(&path)?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        AppConfig {
            adapters: vec![AdapterConfig::new("COM4", "Bedroom")],
        }
        .save(&path)
        .await?;

        let reloaded =
            tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;
        if let Some(config) = reloaded {
            assert_eq!(config.adapters[0].com_port, "COM4");
            assert_eq!(config.adapters[0].name, "Bedroom");
        }
        Ok(())
    }
}
