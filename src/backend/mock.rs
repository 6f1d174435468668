//! In-process CEC bus used by tests and by `--simulate`.
//!
//! The mock keeps the authoritative bus state in [`MockBus`]; handles
//! read and mutate it through the same [`CecHandle`] surface the real
//! library implements. Tests script state changes directly on the bus
//! and assert on the journal of calls.

use super::{
    AdapterInfo, BackendCallbacks, BackendError, CecBackend, CecHandle, KeyPress, LogEntry,
    OpenOptions, PULSE_EIGHT_PRODUCT_ID, PULSE_EIGHT_VENDOR_ID,
};
use crate::keymap::KeyCode;
use crate::types::{AudioStatus, CecLogLevel, LogicalAddress, PowerState, SwitchState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Port name of the adapter provided by [`MockCecBackend::simulated`].
pub const SIMULATED_PORT: &str = "sim0";

/// Audio system state on the mock bus. `None` on the bus means no audio
/// system is answering at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioState {
    pub volume: u8,
    pub mute: bool,
}

/// One device on the mock bus. Devices absent from the bus map do not
/// answer queries.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub power: PowerState,
    pub active: bool,
    pub source: bool,
    pub osd_name: String,
    pub menu_language: String,
    pub vendor: String,
    pub cec_version: String,
    /// When false every query for this device fails, as if the device
    /// stopped acknowledging.
    pub reachable: bool,
}

impl MockDevice {
    pub fn named(osd_name: &str) -> Self {
        MockDevice {
            power: PowerState::Standby,
            active: false,
            source: false,
            osd_name: osd_name.to_string(),
            menu_language: "eng".to_string(),
            vendor: "Pulse-Eight".to_string(),
            cec_version: "1.4".to_string(),
            reachable: true,
        }
    }
}

/// Authoritative state of one simulated bus, shared between the backend,
/// its handles, and the test (or simulation task) scripting it.
#[derive(Default)]
pub struct MockBus {
    pub audio: Option<AudioState>,
    pub devices: HashMap<LogicalAddress, MockDevice>,
    pub menu_open: Option<bool>,
    /// Count of volume up/down commands sent to the audio system.
    pub volume_commands: u32,
    /// Key presses sent out on the bus (not incoming callbacks).
    pub keypresses: Vec<(LogicalAddress, KeyCode)>,
    pub key_releases: Vec<LogicalAddress>,
    pub osd_strings: Vec<(LogicalAddress, u32, String)>,
    pub raw_commands: Vec<String>,
    /// Ordered journal of lifecycle calls ("open#1", "status#1",
    /// "close#1", ...) for session ordering assertions.
    pub journal: Vec<String>,
    pub closed: bool,
    generation: u32,
}

impl MockBus {
    fn status(&self) -> AudioStatus {
        match self.audio {
            Some(audio) => AudioStatus {
                volume: Some(audio.volume),
                mute: SwitchState::from(audio.mute),
            },
            None => AudioStatus::unknown(),
        }
    }

    fn device(&self, address: LogicalAddress) -> Result<&MockDevice, BackendError> {
        self.devices
            .get(&address)
            .filter(|d| d.reachable)
            .ok_or(BackendError::NoResponse)
    }
}

/// Scriptable backend serving any number of mock adapters.
#[derive(Default)]
pub struct MockCecBackend {
    adapters: Mutex<Vec<AdapterInfo>>,
    buses: Mutex<HashMap<String, Arc<Mutex<MockBus>>>>,
    callbacks: Mutex<HashMap<String, Arc<BackendCallbacks>>>,
    fail_open: Mutex<HashSet<String>>,
}

impl MockCecBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an adapter and return its bus for scripting.
    pub fn add_adapter(&self, port: &str) -> Arc<Mutex<MockBus>> {
        self.adapters.lock().push(AdapterInfo {
            port: port.to_string(),
            vendor_id: PULSE_EIGHT_VENDOR_ID,
            product_id: PULSE_EIGHT_PRODUCT_ID,
        });
        let bus = Arc::new(Mutex::new(MockBus::default()));
        self.buses.lock().insert(port.to_string(), bus.clone());
        bus
    }

    pub fn bus(&self, port: &str) -> Option<Arc<Mutex<MockBus>>> {
        self.buses.lock().get(port).cloned()
    }

    /// Make the next open on `port` fail, as a broken adapter would.
    pub fn set_open_failure(&self, port: &str, fail: bool) {
        if fail {
            self.fail_open.lock().insert(port.to_string());
        } else {
            self.fail_open.lock().remove(port);
        }
    }

    /// Deliver a raw key callback, as the adapter firmware would.
    pub fn fire_key(&self, port: &str, code: KeyCode, duration: Duration) {
        let callbacks = self.callbacks.lock().get(port).cloned();
        if let Some(callbacks) = callbacks {
            (callbacks.on_key)(KeyPress { code, duration });
        }
    }

    /// Deliver a library log line.
    pub fn fire_log(&self, port: &str, level: CecLogLevel, message: &str) {
        let callbacks = self.callbacks.lock().get(port).cloned();
        if let Some(callbacks) = callbacks {
            (callbacks.on_log)(LogEntry {
                level,
                time_ms: 0,
                message: message.to_string(),
            });
        }
    }

    /// Backend with one pre-populated adapter on [`SIMULATED_PORT`]:
    /// a TV, an AVR, and a playback device, all answering.
    pub fn simulated() -> Arc<Self> {
        let backend = Self::new();
        let bus = backend.add_adapter(SIMULATED_PORT);
        {
            let mut bus = bus.lock();
            bus.audio = Some(AudioState {
                volume: 30,
                mute: false,
            });
            let mut tv = MockDevice::named("TV");
            tv.power = PowerState::On;
            tv.active = true;
            bus.devices.insert(LogicalAddress::Tv, tv);
            let mut avr = MockDevice::named("AV Receiver");
            avr.power = PowerState::On;
            avr.vendor = "Onkyo".to_string();
            bus.devices.insert(LogicalAddress::AudioSystem, avr);
            let mut player = MockDevice::named("Player");
            player.source = true;
            player.active = true;
            bus.devices.insert(LogicalAddress::PlaybackDevice1, player);
        }
        backend
    }

    /// Drive the simulated bus: volume drift, mute flips, power cycles,
    /// and the occasional remote key, so the event pipeline has
    /// something to show without hardware.
    pub fn spawn_simulation(self: &Arc<Self>, port: &str) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(self);
        let port = port.to_string();
        tokio::spawn(async move {
            let mut step: u32 = 0;
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let Some(bus) = backend.bus(&port) else { break };
                step = step.wrapping_add(1);
                match step % 4 {
                    0 => {
                        let mut bus = bus.lock();
                        if let Some(audio) = bus.audio.as_mut() {
                            audio.volume = if audio.volume >= 45 { 25 } else { audio.volume + 1 };
                        }
                    }
                    1 => {
                        let mut bus = bus.lock();
                        if let Some(audio) = bus.audio.as_mut() {
                            audio.mute = !audio.mute;
                        }
                    }
                    2 => {
                        let mut bus = bus.lock();
                        if let Some(player) = bus.devices.get_mut(&LogicalAddress::PlaybackDevice1)
                        {
                            player.power = match player.power {
                                PowerState::On => PowerState::Standby,
                                _ => PowerState::On,
                            };
                        }
                    }
                    _ => {
                        backend.fire_key(&port, KeyCode::Select, Duration::ZERO);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        backend.fire_key(&port, KeyCode::Select, Duration::from_millis(300));
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CecBackend for MockCecBackend {
    async fn detect_adapters(&self) -> Result<Vec<AdapterInfo>, BackendError> {
        Ok(self.adapters.lock().clone())
    }

    async fn open(
        &self,
        options: OpenOptions,
        callbacks: BackendCallbacks,
    ) -> Result<Arc<dyn CecHandle>, BackendError> {
        if self.fail_open.lock().contains(&options.port) {
            return Err(BackendError::Open(format!(
                "adapter on {} refused the connection",
                options.port
            )));
        }
        let bus = self
            .bus(&options.port)
            .ok_or_else(|| BackendError::Open(format!("no adapter on {}", options.port)))?;
        self.callbacks
            .lock()
            .insert(options.port.clone(), Arc::new(callbacks));

        let generation = {
            let mut bus = bus.lock();
            bus.generation += 1;
            bus.closed = false;
            let generation = bus.generation;
            bus.journal.push(format!("open#{generation}"));
            generation
        };
        debug!(port = %options.port, generation, "mock adapter opened");
        Ok(Arc::new(MockHandle { bus, generation }))
    }
}

/// Handle over one mock bus. Every audio status read is journalled so
/// tests can interleave session lifecycle with poll activity.
pub struct MockHandle {
    bus: Arc<Mutex<MockBus>>,
    generation: u32,
}

impl CecHandle for MockHandle {
    fn audio_status(&self) -> Result<AudioStatus, BackendError> {
        let mut bus = self.bus.lock();
        let generation = self.generation;
        bus.journal.push(format!("status#{generation}"));
        Ok(bus.status())
    }

    fn volume_up(&self) -> Result<AudioStatus, BackendError> {
        let mut bus = self.bus.lock();
        bus.volume_commands += 1;
        if let Some(audio) = bus.audio.as_mut() {
            audio.volume = (audio.volume + 1).min(100);
        }
        Ok(bus.status())
    }

    fn volume_down(&self) -> Result<AudioStatus, BackendError> {
        let mut bus = self.bus.lock();
        bus.volume_commands += 1;
        if let Some(audio) = bus.audio.as_mut() {
            audio.volume = audio.volume.saturating_sub(1);
        }
        Ok(bus.status())
    }

    fn audio_mute(&self) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        if let Some(audio) = bus.audio.as_mut() {
            audio.mute = true;
        }
        Ok(())
    }

    fn audio_unmute(&self) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        if let Some(audio) = bus.audio.as_mut() {
            audio.mute = false;
        }
        Ok(())
    }

    fn audio_toggle_mute(&self) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        if let Some(audio) = bus.audio.as_mut() {
            audio.mute = !audio.mute;
        }
        Ok(())
    }

    fn device_power(&self, address: LogicalAddress) -> Result<PowerState, BackendError> {
        Ok(self.bus.lock().device(address)?.power)
    }

    fn device_osd_name(&self, address: LogicalAddress) -> Result<String, BackendError> {
        Ok(self.bus.lock().device(address)?.osd_name.clone())
    }

    fn device_menu_language(&self, address: LogicalAddress) -> Result<String, BackendError> {
        Ok(self.bus.lock().device(address)?.menu_language.clone())
    }

    fn device_vendor(&self, address: LogicalAddress) -> Result<String, BackendError> {
        Ok(self.bus.lock().device(address)?.vendor.clone())
    }

    fn device_cec_version(&self, address: LogicalAddress) -> Result<String, BackendError> {
        Ok(self.bus.lock().device(address)?.cec_version.clone())
    }

    fn is_active_device(&self, address: LogicalAddress) -> Result<bool, BackendError> {
        Ok(self.bus.lock().device(address)?.active)
    }

    fn is_active_source(&self, address: LogicalAddress) -> Result<bool, BackendError> {
        Ok(self.bus.lock().device(address)?.source)
    }

    fn power_on(&self, address: LogicalAddress) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        match bus.devices.get_mut(&address) {
            Some(device) if device.reachable => {
                device.power = PowerState::On;
                Ok(())
            }
            _ => Err(BackendError::NoResponse),
        }
    }

    fn standby(&self, address: LogicalAddress) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        match bus.devices.get_mut(&address) {
            Some(device) if device.reachable => {
                device.power = PowerState::Standby;
                Ok(())
            }
            _ => Err(BackendError::NoResponse),
        }
    }

    fn set_active_source(&self, address: LogicalAddress) -> Result<(), BackendError> {
        let mut bus = self.bus.lock();
        for (other, device) in bus.devices.iter_mut() {
            device.source = *other == address;
        }
        Ok(())
    }

    fn send_keypress(&self, address: LogicalAddress, key: KeyCode) -> Result<(), BackendError> {
        self.bus.lock().keypresses.push((address, key));
        Ok(())
    }

    fn send_key_release(&self, address: LogicalAddress) -> Result<(), BackendError> {
        self.bus.lock().key_releases.push(address);
        Ok(())
    }

    fn set_osd_string(
        &self,
        address: LogicalAddress,
        duration_ms: u32,
        message: &str,
    ) -> Result<(), BackendError> {
        self.bus
            .lock()
            .osd_strings
            .push((address, duration_ms, message.to_string()));
        Ok(())
    }

    fn set_menu_state(&self, open: bool) -> Result<(), BackendError> {
        self.bus.lock().menu_open = Some(open);
        Ok(())
    }

    fn set_inactive_view(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn transmit_raw(&self, command: &str) -> Result<(), BackendError> {
        self.bus.lock().raw_commands.push(command.to_string());
        Ok(())
    }

    fn adapter_vendor(&self) -> Result<String, BackendError> {
        Ok("Pulse-Eight".to_string())
    }

    fn close(&self) {
        let mut bus = self.bus.lock();
        bus.closed = true;
        let generation = self.generation;
        bus.journal.push(format!("close#{generation}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(port: &str) -> OpenOptions {
        OpenOptions {
            port: port.to_string(),
            device_name: "cec-gw".to_string(),
            hdmi_port: 1,
            base_device: LogicalAddress::Tv,
        }
    }

    #[tokio::test]
    async fn open_requires_a_registered_adapter() {
        let backend = MockCecBackend::new();
        backend.add_adapter("COM3");

        assert!(backend
            .open(options("COM3"), BackendCallbacks::noop())
            .await
            .is_ok());
        assert!(backend
            .open(options("COM9"), BackendCallbacks::noop())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_devices_do_not_answer() {
        let backend = MockCecBackend::new();
        let bus = backend.add_adapter("COM3");
        {
            let mut bus = bus.lock();
            let mut tv = MockDevice::named("TV");
            tv.reachable = false;
            bus.devices.insert(LogicalAddress::Tv, tv);
        }
        let handle = backend
            .open(options("COM3"), BackendCallbacks::noop())
            .await
            .unwrap();
        assert!(handle.device_power(LogicalAddress::Tv).is_err());
        assert!(handle.device_power(LogicalAddress::Tuner1).is_err());
    }

    #[tokio::test]
    async fn journal_tracks_session_generations() {
        let backend = MockCecBackend::new();
        let bus = backend.add_adapter("COM3");
        let first = backend
            .open(options("COM3"), BackendCallbacks::noop())
            .await
            .unwrap();
        first.audio_status().unwrap();
        first.close();
        let second = backend
            .open(options("COM3"), BackendCallbacks::noop())
            .await
            .unwrap();
        second.audio_status().unwrap();

        let journal = bus.lock().journal.clone();
        assert_eq!(
            journal,
            vec!["open#1", "status#1", "close#1", "open#2", "status#2"]
        );
    }
}
