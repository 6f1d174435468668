//! Adapter session: one open connection to a CEC adapter, its device
//! slots, and its poll task.
//!
//! A session is created from an [`AdapterConfig`], wires the backend's
//! key callbacks into a [`KeyDebouncer`], forwards library log lines
//! into tracing, and spawns the poll loop. Closing cancels the poll
//! task, joins it with a bounded timeout, then releases the handle.

use crate::backend::{BackendCallbacks, CecBackend, CecHandle, OpenOptions};
use crate::config::AdapterConfig;
use crate::debounce::KeyDebouncer;
use crate::error::CecError;
use crate::events::EventSink;
use crate::keymap::RemoteKey;
use crate::poll::Poller;
use crate::types::{CecLogLevel, LogicalAddress, PowerState, SwitchState};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// How long a closing session waits for its poll task before abandoning
/// it. Bounds shutdown when a backend call hangs.
pub const POLL_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between the press and release of a dispatched remote key.
const KEY_TAP_DELAY: Duration = Duration::from_millis(100);

/// One open adapter session.
pub struct Adapter {
    name: String,
    com_port: String,
    config: AdapterConfig,
    handle: Arc<dyn CecHandle>,
    menu_state: Arc<RwLock<SwitchState>>,
    log_level: Arc<RwLock<Option<CecLogLevel>>>,
    poll_shutdown: watch::Sender<bool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Adapter {
    /// Open a connection on the configured port and start polling.
    /// Detection is the caller's job; this goes straight to the port.
    pub async fn open(
        backend: &dyn CecBackend,
        config: &AdapterConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Adapter, CecError> {
        let name = config.name.clone();
        let com_port = config.com_port.clone();

        let menu_state = Arc::new(RwLock::new(SwitchState::Off));
        let log_level = Arc::new(RwLock::new(config.log_level));
        let debouncer = Arc::new(Mutex::new(KeyDebouncer::new(&name, Arc::clone(&sink))));

        let callbacks = BackendCallbacks {
            on_key: Box::new({
                let debouncer = Arc::clone(&debouncer);
                move |press| debouncer.lock().handle(press)
            }),
            on_log: Box::new({
                let log_level = Arc::clone(&log_level);
                let adapter = name.clone();
                move |entry| {
                    let Some(filter) = *log_level.read() else { return };
                    if entry.level > filter {
                        return;
                    }
                    let line = format!(
                        "CEC {}: {}: [{}] {}",
                        adapter, entry.level, entry.time_ms, entry.message
                    );
                    match entry.level {
                        CecLogLevel::Error => error!("{line}"),
                        CecLogLevel::Warning => warn!("{line}"),
                        CecLogLevel::Notice => info!("{line}"),
                        CecLogLevel::Traffic => trace!("{line}"),
                        _ => debug!("{line}"),
                    }
                }
            }),
        };

        let options = OpenOptions {
            port: com_port.clone(),
            device_name: name.clone(),
            hdmi_port: config.hdmi_port,
            base_device: config.base_device(),
        };
        let handle = backend
            .open(options, callbacks)
            .await
            .map_err(|e| CecError::OpenFailed {
                port: com_port.clone(),
                reason: e.to_string(),
            })?;
        info!("CEC: connection opened on {com_port}");

        let (poll_shutdown, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(
            &name,
            Arc::clone(&handle),
            sink,
            Arc::clone(&menu_state),
        );
        let poll_task = tokio::spawn(poller.run(config.poll_interval(), shutdown_rx));

        Ok(Adapter {
            name,
            com_port,
            config: config.clone(),
            handle,
            menu_state,
            log_level,
            poll_shutdown,
            poll_task: Mutex::new(Some(poll_task)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn com_port(&self) -> &str {
        &self.com_port
    }

    /// Parameters the session was opened with; a restart reuses them.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Accessor for a device slot by user-supplied name.
    pub fn device(&self, name: &str) -> Result<Device, CecError> {
        LogicalAddress::from_device_name(name)
            .map(|address| self.device_at(address))
            .ok_or_else(|| CecError::DeviceNotFound(name.to_string()))
    }

    pub fn device_at(&self, address: LogicalAddress) -> Device {
        Device {
            handle: Arc::clone(&self.handle),
            address,
        }
    }

    /// Current audio-system volume, if reported.
    pub fn volume(&self) -> Result<Option<u8>, CecError> {
        let status = self
            .handle
            .audio_status()
            .map_err(CecError::backend("audio status"))?;
        Ok(status.volume)
    }

    pub fn volume_up(&self) -> Result<Option<u8>, CecError> {
        let status = self
            .handle
            .volume_up()
            .map_err(CecError::backend("volume up"))?;
        Ok(status.volume)
    }

    pub fn volume_down(&self) -> Result<Option<u8>, CecError> {
        let status = self
            .handle
            .volume_down()
            .map_err(CecError::backend("volume down"))?;
        Ok(status.volume)
    }

    /// Step the volume toward `target` until the audio system reports
    /// it. A target equal to the current level sends nothing. There is
    /// no upper bound on steps while feedback keeps arriving; only a
    /// missing volume report aborts the spin.
    pub fn set_volume(&self, target: u8) -> Result<u8, CecError> {
        let target = target.min(100);
        let mut status = self
            .handle
            .audio_status()
            .map_err(CecError::backend("audio status"))?;
        loop {
            let current = status.volume.ok_or_else(|| CecError::VolumeUnknown {
                adapter: self.name.clone(),
            })?;
            if current == target {
                return Ok(current);
            }
            status = if current < target {
                self.handle
                    .volume_up()
                    .map_err(CecError::backend("volume up"))?
            } else {
                self.handle
                    .volume_down()
                    .map_err(CecError::backend("volume down"))?
            };
        }
    }

    pub fn mute(&self) -> Result<SwitchState, CecError> {
        let status = self
            .handle
            .audio_status()
            .map_err(CecError::backend("audio status"))?;
        Ok(status.mute)
    }

    /// Set mute, sending a command only when the reported state differs.
    pub fn set_mute(&self, on: bool) -> Result<SwitchState, CecError> {
        let current = self.mute()?;
        if on && current != SwitchState::On {
            self.handle
                .audio_mute()
                .map_err(CecError::backend("audio mute"))?;
        } else if !on && current != SwitchState::Off {
            self.handle
                .audio_unmute()
                .map_err(CecError::backend("audio unmute"))?;
        }
        self.mute()
    }

    pub fn toggle_mute(&self) -> Result<(), CecError> {
        self.handle
            .audio_toggle_mute()
            .map_err(CecError::backend("toggle mute"))
    }

    /// Menu state as last announced by this gateway.
    pub fn menu(&self) -> SwitchState {
        *self.menu_state.read()
    }

    pub fn set_menu(&self, open: bool) -> Result<(), CecError> {
        self.handle
            .set_menu_state(open)
            .map_err(CecError::backend("set menu state"))?;
        *self.menu_state.write() = SwitchState::from(open);
        Ok(())
    }

    pub fn set_inactive_view(&self) -> Result<(), CecError> {
        self.handle
            .set_inactive_view()
            .map_err(CecError::backend("set inactive view"))
    }

    pub fn vendor(&self) -> Result<String, CecError> {
        self.handle
            .adapter_vendor()
            .map_err(CecError::backend("adapter vendor"))
    }

    pub fn transmit_command(&self, command: &str) -> Result<(), CecError> {
        self.handle
            .transmit_raw(command)
            .map_err(CecError::backend("transmit"))
    }

    pub fn log_level(&self) -> Option<CecLogLevel> {
        *self.log_level.read()
    }

    pub fn set_log_level(&self, level: Option<CecLogLevel>) {
        *self.log_level.write() = level;
    }

    /// Stop polling, join the poll task (bounded), then release the
    /// connection.
    pub async fn close(&self) {
        let _ = self.poll_shutdown.send(true);
        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(POLL_JOIN_TIMEOUT, task).await.is_err() {
                warn!(
                    adapter = %self.name,
                    "poll task did not stop within {POLL_JOIN_TIMEOUT:?}, aborting it"
                );
                abort.abort();
            }
        }
        self.handle.close();
        info!("CEC: connection closed on {}", self.com_port);
    }
}

/// Thin accessor over one logical device slot of an open adapter.
pub struct Device {
    handle: Arc<dyn CecHandle>,
    address: LogicalAddress,
}

impl Device {
    pub fn address(&self) -> LogicalAddress {
        self.address
    }

    pub fn name(&self) -> &'static str {
        self.address.display_name()
    }

    pub fn power(&self) -> Result<PowerState, CecError> {
        self.handle
            .device_power(self.address)
            .map_err(CecError::backend("get device power"))
    }

    pub fn power_on(&self) -> Result<(), CecError> {
        self.handle
            .power_on(self.address)
            .map_err(CecError::backend("power on"))
    }

    pub fn standby(&self) -> Result<(), CecError> {
        self.handle
            .standby(self.address)
            .map_err(CecError::backend("standby"))
    }

    pub fn osd_name(&self) -> Result<String, CecError> {
        self.handle
            .device_osd_name(self.address)
            .map_err(CecError::backend("get OSD name"))
    }

    /// Show a message on the device's display for `duration_ms`.
    pub fn set_osd_string(&self, duration_ms: u32, message: &str) -> Result<(), CecError> {
        self.handle
            .set_osd_string(self.address, duration_ms, message)
            .map_err(CecError::backend("set OSD string"))
    }

    pub fn menu_language(&self) -> Result<String, CecError> {
        self.handle
            .device_menu_language(self.address)
            .map_err(CecError::backend("get menu language"))
    }

    pub fn vendor(&self) -> Result<String, CecError> {
        self.handle
            .device_vendor(self.address)
            .map_err(CecError::backend("get device vendor"))
    }

    pub fn cec_version(&self) -> Result<String, CecError> {
        self.handle
            .device_cec_version(self.address)
            .map_err(CecError::backend("get CEC version"))
    }

    pub fn is_active(&self) -> Result<bool, CecError> {
        self.handle
            .is_active_device(self.address)
            .map_err(CecError::backend("is active device"))
    }

    pub fn is_active_source(&self) -> Result<bool, CecError> {
        self.handle
            .is_active_source(self.address)
            .map_err(CecError::backend("is active source"))
    }

    pub fn set_active_source(&self) -> Result<(), CecError> {
        self.handle
            .set_active_source(self.address)
            .map_err(CecError::backend("set active source"))
    }

    /// Tap a remote key on this device: press, short dwell, release.
    pub async fn send_key(&self, key: RemoteKey) -> Result<(), CecError> {
        key.send_press(self.handle.as_ref(), self.address)
            .map_err(CecError::backend("send key press"))?;
        tokio::time::sleep(KEY_TAP_DELAY).await;
        key.send_release(self.handle.as_ref(), self.address)
            .map_err(CecError::backend("send key release"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{AudioState, MockCecBackend, MockDevice};
    use crate::events::{CollectingSink, EventKind};
    use crate::keymap::{self, KeyCode};

    fn test_config() -> AdapterConfig {
        let mut config = AdapterConfig::new("COM3", "Living Room");
        // Slow polling so tests control every snapshot themselves.
        config.poll_interval_ms = 60_000;
        config
    }

    async fn open_adapter() -> (Arc<MockCecBackend>, Adapter, Arc<CollectingSink>) {
        let backend = MockCecBackend::new();
        let bus = backend.add_adapter("COM3");
        {
            let mut bus = bus.lock();
            bus.audio = Some(AudioState {
                volume: 30,
                mute: false,
            });
            bus.devices.insert(LogicalAddress::Tv, MockDevice::named("TV"));
        }
        let sink = Arc::new(CollectingSink::new());
        let adapter = Adapter::open(
            backend.as_ref(),
            &test_config(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        )
        .await
        .unwrap();
        (backend, adapter, sink)
    }

    #[tokio::test]
    async fn set_volume_at_target_sends_no_commands() {
        let (backend, adapter, _sink) = open_adapter().await;
        assert_eq!(adapter.set_volume(30).unwrap(), 30);
        assert_eq!(backend.bus("COM3").unwrap().lock().volume_commands, 0);
        adapter.close().await;
    }

    #[tokio::test]
    async fn set_volume_spins_until_feedback_matches() {
        let (backend, adapter, _sink) = open_adapter().await;
        assert_eq!(adapter.set_volume(34).unwrap(), 34);
        assert_eq!(backend.bus("COM3").unwrap().lock().volume_commands, 4);
        assert_eq!(adapter.set_volume(31).unwrap(), 31);
        assert_eq!(backend.bus("COM3").unwrap().lock().volume_commands, 7);
        adapter.close().await;
    }

    #[tokio::test]
    async fn set_volume_without_feedback_is_an_error() {
        let (backend, adapter, _sink) = open_adapter().await;
        backend.bus("COM3").unwrap().lock().audio = None;
        assert!(matches!(
            adapter.set_volume(40),
            Err(CecError::VolumeUnknown { .. })
        ));
        assert_eq!(backend.bus("COM3").unwrap().lock().volume_commands, 0);
        adapter.close().await;
    }

    #[tokio::test]
    async fn set_mute_only_sends_on_state_change() {
        let (_backend, adapter, _sink) = open_adapter().await;
        assert_eq!(adapter.set_mute(true).unwrap(), SwitchState::On);
        // Already muted: second call is a no-op but still reports state.
        assert_eq!(adapter.set_mute(true).unwrap(), SwitchState::On);
        assert_eq!(adapter.set_mute(false).unwrap(), SwitchState::Off);
        adapter.close().await;
    }

    #[tokio::test]
    async fn key_callbacks_flow_through_the_debouncer() {
        let (backend, adapter, sink) = open_adapter().await;

        backend.fire_key("COM3", KeyCode::VolumeUp, Duration::ZERO);
        backend.fire_key("COM3", KeyCode::VolumeUp, Duration::from_millis(300));

        let events = sink.take();
        // The poll task may have contributed initial state events;
        // filter down to key events.
        let keys: Vec<_> = events
            .into_iter()
            .filter(|e| e.name.starts_with("KeyPressed."))
            .collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].kind, EventKind::EnduringStart);
        assert_eq!(keys[0].full_name(), "Living Room.KeyPressed.Volume Up");
        assert_eq!(keys[1].kind, EventKind::EnduringEnd);
        adapter.close().await;
    }

    #[tokio::test]
    async fn send_key_taps_press_then_release() {
        let (backend, adapter, _sink) = open_adapter().await;
        let device = adapter.device("TV").unwrap();
        let key = keymap::lookup("Play").unwrap();
        device.send_key(key).await.unwrap();

        let bus = backend.bus("COM3").unwrap();
        let bus = bus.lock();
        assert_eq!(bus.keypresses, vec![(LogicalAddress::Tv, KeyCode::Play)]);
        assert_eq!(bus.key_releases, vec![LogicalAddress::Tv]);
        drop(bus);
        adapter.close().await;
    }

    #[tokio::test]
    async fn close_joins_the_poll_task_and_releases_the_handle() {
        let (backend, adapter, _sink) = open_adapter().await;
        adapter.close().await;

        let bus = backend.bus("COM3").unwrap();
        let journal = bus.lock().journal.clone();
        assert!(bus.lock().closed);
        assert_eq!(journal.last().map(String::as_str), Some("close#1"));
    }

    #[tokio::test]
    async fn unknown_device_names_are_rejected() {
        let (_backend, adapter, _sink) = open_adapter().await;
        assert!(matches!(
            adapter.device("Projector"),
            Err(CecError::DeviceNotFound(_))
        ));
        assert!(adapter.device("playback device 1").is_ok());
        adapter.close().await;
    }

    #[tokio::test]
    async fn menu_state_is_tracked_locally() {
        let (backend, adapter, _sink) = open_adapter().await;
        assert_eq!(adapter.menu(), SwitchState::Off);
        adapter.set_menu(true).unwrap();
        assert_eq!(adapter.menu(), SwitchState::On);
        assert_eq!(backend.bus("COM3").unwrap().lock().menu_open, Some(true));
        adapter.close().await;
    }
}
