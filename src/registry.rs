//! Registry of open adapter sessions.
//!
//! The registry owns detection, population from config, action-time
//! resolution, restart, and shutdown. It is handed to whoever needs
//! adapters (poll wiring, dispatch, console); nothing reads a global.

use crate::adapter::Adapter;
use crate::backend::{BackendError, CecBackend};
use crate::config::AdapterConfig;
use crate::error::CecError;
use crate::events::EventSink;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

pub struct AdapterRegistry {
    backend: Arc<dyn CecBackend>,
    sink: Arc<dyn EventSink>,
    adapters: RwLock<Vec<Arc<Adapter>>>,
}

impl AdapterRegistry {
    pub fn new(backend: Arc<dyn CecBackend>, sink: Arc<dyn EventSink>) -> Self {
        AdapterRegistry {
            backend,
            sink,
            adapters: RwLock::new(Vec::new()),
        }
    }

    /// Detect available adapters and open every configured one whose
    /// port was found. Individual failures are logged and skipped;
    /// ending up with zero open adapters is fatal.
    pub async fn open_all(&self, configs: &[AdapterConfig]) -> Result<usize, CecError> {
        let available: Option<HashSet<String>> = match self.backend.detect_adapters().await {
            Ok(detected) => Some(detected.into_iter().map(|a| a.port).collect()),
            // A backend that cannot enumerate still supports opening a
            // configured port directly.
            Err(BackendError::Unsupported(op)) => {
                debug!("adapter detection unavailable ({op}), opening configured ports directly");
                None
            }
            Err(e) => return Err(CecError::backend("detect adapters")(e)),
        };

        let mut opened = Vec::new();
        for config in configs {
            if let Some(available) = &available {
                if !available.contains(&config.com_port) {
                    let err = CecError::AdapterNotFound {
                        port: config.com_port.clone(),
                    };
                    error!("CEC error: {err}");
                    continue;
                }
            }
            match Adapter::open(self.backend.as_ref(), config, Arc::clone(&self.sink)).await {
                Ok(adapter) => opened.push(Arc::new(adapter)),
                Err(e) => {
                    error!("CEC error: {e}");
                    continue;
                }
            }
        }

        if opened.is_empty() {
            error!("CEC error: no CEC adapters found");
            return Err(CecError::NoAdapters);
        }

        let count = opened.len();
        let mut adapters = self.adapters.write().await;
        adapters.extend(opened);
        info!("{count} CEC adapter(s) open");
        Ok(count)
    }

    /// Resolve an adapter from an action's (COM port, name) pair:
    /// a match on both wins, then COM port alone, then name alone.
    pub async fn find(
        &self,
        com_port: Option<&str>,
        name: Option<&str>,
    ) -> Option<Arc<Adapter>> {
        if com_port.is_none() && name.is_none() {
            return None;
        }
        let adapters = self.adapters.read().await;
        let by_both = adapters.iter().find(|a| {
            com_port == Some(a.com_port()) && name == Some(a.name())
        });
        let by_port = || adapters.iter().find(|a| com_port == Some(a.com_port()));
        let by_name = || adapters.iter().find(|a| name == Some(a.name()));
        by_both.or_else(by_port).or_else(by_name).cloned()
    }

    /// Close an adapter and reopen it with the configuration it was
    /// started with. The old session's poll task is fully joined before
    /// the new session begins polling.
    pub async fn restart(
        &self,
        com_port: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), CecError> {
        let adapter = self.find(com_port, name).await.ok_or_else(|| {
            CecError::NoMatchingAdapter {
                wanted: wanted_label(com_port, name),
            }
        })?;
        let config = adapter.config().clone();

        adapter.close().await;
        let replacement =
            Adapter::open(self.backend.as_ref(), &config, Arc::clone(&self.sink)).await?;

        let mut adapters = self.adapters.write().await;
        if let Some(slot) = adapters
            .iter_mut()
            .find(|a| a.com_port() == config.com_port)
        {
            *slot = Arc::new(replacement);
        } else {
            adapters.push(Arc::new(replacement));
        }
        info!("CEC: adapter on {} restarted", config.com_port);
        Ok(())
    }

    /// Close every open adapter.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Adapter>> = self.adapters.write().await.drain(..).collect();
        for adapter in drained {
            adapter.close().await;
        }
    }

    /// Replace the adapter set with a freshly loaded configuration
    /// (config hot-reload).
    pub async fn apply_config(&self, configs: &[AdapterConfig]) -> Result<usize, CecError> {
        self.close_all().await;
        self.open_all(configs).await
    }

    pub async fn list(&self) -> Vec<Arc<Adapter>> {
        self.adapters.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.adapters.read().await.is_empty()
    }
}

fn wanted_label(com_port: Option<&str>, name: Option<&str>) -> String {
    format!(
        "{} on {}",
        name.unwrap_or("<any>"),
        com_port.unwrap_or("<any>")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{AudioState, MockCecBackend};
    use crate::events::CollectingSink;

    fn config(port: &str, name: &str) -> AdapterConfig {
        let mut config = AdapterConfig::new(port, name);
        config.poll_interval_ms = 5;
        config
    }

    fn registry_over(backend: &Arc<MockCecBackend>) -> AdapterRegistry {
        AdapterRegistry::new(
            Arc::clone(backend) as Arc<dyn CecBackend>,
            Arc::new(CollectingSink::new()),
        )
    }

    #[tokio::test]
    async fn open_all_skips_undetected_ports() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");
        let registry = registry_over(&backend);

        let opened = registry
            .open_all(&[config("COM3", "Living Room"), config("COM9", "Ghost")])
            .await
            .unwrap();
        assert_eq!(opened, 1);
        assert!(registry.find(Some("COM3"), None).await.is_some());
        assert!(registry.find(Some("COM9"), None).await.is_none());
        registry.close_all().await;
    }

    #[tokio::test]
    async fn zero_open_adapters_is_fatal() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");
        backend.set_open_failure("COM3", true);
        let registry = registry_over(&backend);

        let result = registry.open_all(&[config("COM3", "Living Room")]).await;
        assert!(matches!(result, Err(CecError::NoAdapters)));
    }

    #[tokio::test]
    async fn find_prefers_exact_match_then_port_then_name() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");
        backend.add_adapter("COM4");
        let registry = registry_over(&backend);
        registry
            .open_all(&[config("COM3", "Living Room"), config("COM4", "Bedroom")])
            .await
            .unwrap();

        let exact = registry.find(Some("COM4"), Some("Bedroom")).await.unwrap();
        assert_eq!(exact.name(), "Bedroom");

        // Conflicting pair: the COM port wins.
        let conflicted = registry
            .find(Some("COM3"), Some("Bedroom"))
            .await
            .unwrap();
        assert_eq!(conflicted.com_port(), "COM3");
        assert_eq!(conflicted.name(), "Living Room");

        let by_name = registry.find(None, Some("Bedroom")).await.unwrap();
        assert_eq!(by_name.com_port(), "COM4");

        assert!(registry.find(None, None).await.is_none());
        assert!(registry.find(Some("COM9"), Some("Ghost")).await.is_none());
        registry.close_all().await;
    }

    #[tokio::test]
    async fn restart_reuses_config_and_orders_sessions() {
        let backend = MockCecBackend::new();
        let bus = backend.add_adapter("COM3");
        bus.lock().audio = Some(AudioState {
            volume: 30,
            mute: false,
        });
        let registry = registry_over(&backend);

        let mut original = config("COM3", "Living Room");
        original.hdmi_port = 2;
        original.use_avr = true;
        registry.open_all(&[original.clone()]).await.unwrap();

        // Let the first session poll a few times.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        registry.restart(Some("COM3"), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let replacement = registry.find(Some("COM3"), None).await.unwrap();
        assert_eq!(replacement.config(), &original);

        registry.close_all().await;

        // Every generation-1 call sits strictly before close#1, and
        // open#2 before any generation-2 call: the old poll task was
        // gone before the new session started.
        let journal = bus.lock().journal.clone();
        let close_1 = journal.iter().position(|e| e == "close#1").unwrap();
        let open_2 = journal.iter().position(|e| e == "open#2").unwrap();
        let last_gen1_status = journal.iter().rposition(|e| e == "status#1").unwrap();
        let first_gen2_status = journal.iter().position(|e| e == "status#2").unwrap();
        assert!(last_gen1_status < close_1);
        assert!(close_1 < open_2);
        assert!(open_2 < first_gen2_status);
    }

    #[tokio::test]
    async fn apply_config_swaps_the_adapter_set() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");
        backend.add_adapter("COM4");
        let registry = registry_over(&backend);

        registry.open_all(&[config("COM3", "Living Room")]).await.unwrap();
        registry
            .apply_config(&[config("COM4", "Bedroom")])
            .await
            .unwrap();

        assert!(registry.find(Some("COM3"), None).await.is_none());
        assert!(registry.find(Some("COM4"), None).await.is_some());
        assert!(backend.bus("COM3").unwrap().lock().closed);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn restart_of_an_unknown_adapter_is_a_typed_error() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");
        let registry = registry_over(&backend);
        registry.open_all(&[config("COM3", "Living Room")]).await.unwrap();

        let result = registry.restart(Some("COM9"), None).await;
        assert!(matches!(result, Err(CecError::NoMatchingAdapter { .. })));
        registry.close_all().await;
    }
}
