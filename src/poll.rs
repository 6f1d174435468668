//! Background state polling.
//!
//! Each adapter owns one poll task: take a snapshot of bus state, diff
//! it against the previous one, emit one event per changed field. A
//! device that stops answering degrades to unknown values; the loop
//! never aborts over a single read failure.

use crate::backend::CecHandle;
use crate::events::{Event, EventSink};
use crate::types::{AudioStatus, LogicalAddress, PowerState, SwitchState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tracing::debug;

/// Cached per-device state, all fields tri-state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub active: SwitchState,
    pub source: SwitchState,
    pub power: PowerState,
    pub menu_language: Option<String>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        DeviceSnapshot {
            active: SwitchState::Unknown,
            source: SwitchState::Unknown,
            power: PowerState::Unknown,
            menu_language: None,
        }
    }
}

/// One full sample of adapter-wide and per-device state. Devices are
/// ordered by logical address.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSnapshot {
    pub volume: Option<u8>,
    pub mute: SwitchState,
    pub menu: SwitchState,
    pub devices: Vec<DeviceSnapshot>,
}

/// Samples one adapter's state and emits change events.
pub struct Poller {
    adapter_name: String,
    handle: Arc<dyn CecHandle>,
    sink: Arc<dyn EventSink>,
    /// Menu state is tracked locally: the bus has no query for it, the
    /// gateway only knows what it last announced.
    menu_state: Arc<RwLock<SwitchState>>,
}

impl Poller {
    pub fn new(
        adapter_name: impl Into<String>,
        handle: Arc<dyn CecHandle>,
        sink: Arc<dyn EventSink>,
        menu_state: Arc<RwLock<SwitchState>>,
    ) -> Self {
        Poller {
            adapter_name: adapter_name.into(),
            handle,
            sink,
            menu_state,
        }
    }

    /// Read everything once. Failed reads become unknown values.
    pub fn take_snapshot(&self) -> AdapterSnapshot {
        let AudioStatus { volume, mute } = self
            .handle
            .audio_status()
            .unwrap_or_else(|_| AudioStatus::unknown());

        let devices = LogicalAddress::iter()
            .map(|address| DeviceSnapshot {
                active: self
                    .handle
                    .is_active_device(address)
                    .map(SwitchState::from)
                    .unwrap_or(SwitchState::Unknown),
                source: self
                    .handle
                    .is_active_source(address)
                    .map(SwitchState::from)
                    .unwrap_or(SwitchState::Unknown),
                power: self
                    .handle
                    .device_power(address)
                    .unwrap_or(PowerState::Unknown),
                menu_language: self.handle.device_menu_language(address).ok(),
            })
            .collect();

        AdapterSnapshot {
            volume,
            mute,
            menu: *self.menu_state.read(),
            devices,
        }
    }

    /// Emit one event per field that changed between two snapshots.
    /// Transitions into an unknown value stay silent, except for power,
    /// which reports them as Disconnected/Connected.
    pub fn diff_and_emit(&self, previous: &AdapterSnapshot, next: &AdapterSnapshot) {
        if previous.volume != next.volume {
            if let Some(volume) = next.volume {
                self.emit(format!("Volume.{volume}"));
            }
        }

        if previous.mute != next.mute && next.mute.is_known() {
            self.emit(format!("Mute.{}", next.mute));
        }

        if previous.menu != next.menu && next.menu.is_known() {
            let state = if next.menu == SwitchState::On {
                "Opened"
            } else {
                "Closed"
            };
            self.emit(format!("Menu.{state}"));
        }

        for (address, (old, new)) in
            LogicalAddress::iter().zip(previous.devices.iter().zip(next.devices.iter()))
        {
            let device = address.display_name();

            if old.active != new.active && new.active.is_known() {
                let state = if new.active == SwitchState::On {
                    "Active"
                } else {
                    "Inactive"
                };
                self.emit(format!("{device}.{state}"));
            }

            if old.source != new.source && new.source == SwitchState::On {
                self.emit(format!("Source.{device}"));
            }

            if old.power != new.power {
                if old.power == PowerState::Unknown {
                    self.emit(format!("{device}.Connected"));
                }
                match new.power {
                    PowerState::Unknown => self.emit(format!("{device}.Disconnected")),
                    PowerState::On => self.emit(format!("{device}.Power.On")),
                    PowerState::Standby => self.emit(format!("{device}.Power.Off")),
                }
            }

            if old.menu_language != new.menu_language {
                if let Some(language) = &new.menu_language {
                    self.emit(format!("{device}.MenuLanguage.{language}"));
                }
            }
        }
    }

    fn emit(&self, name: String) {
        self.sink.emit(Event::discrete(&self.adapter_name, name));
    }

    /// Poll until `shutdown` flips to true. The in-flight iteration
    /// always finishes; the caller bounds the join.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut previous = self.take_snapshot();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let next = self.take_snapshot();
                    self.diff_and_emit(&previous, &next);
                    previous = next;
                }
            }
        }
        debug!(adapter = %self.adapter_name, "poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{AudioState, MockCecBackend, MockDevice};
    use crate::backend::{BackendCallbacks, CecBackend, OpenOptions};
    use crate::events::CollectingSink;

    async fn poller_on_mock(
        setup: impl FnOnce(&mut crate::backend::mock::MockBus),
    ) -> (Arc<MockCecBackend>, Poller, Arc<CollectingSink>) {
        let backend = MockCecBackend::new();
        let bus = backend.add_adapter("COM3");
        setup(&mut bus.lock());
        let handle = backend
            .open(
                OpenOptions {
                    port: "COM3".to_string(),
                    device_name: "cec-gw".to_string(),
                    hdmi_port: 1,
                    base_device: LogicalAddress::Tv,
                },
                BackendCallbacks::noop(),
            )
            .await
            .unwrap();
        let sink = Arc::new(CollectingSink::new());
        let poller = Poller::new(
            "Living Room",
            handle,
            Arc::clone(&sink) as Arc<dyn EventSink>,
            Arc::new(RwLock::new(SwitchState::Off)),
        );
        (backend, poller, sink)
    }

    #[tokio::test]
    async fn volume_change_emits_one_event_with_the_final_value() {
        let (backend, poller, sink) = poller_on_mock(|bus| {
            bus.audio = Some(AudioState {
                volume: 10,
                mute: false,
            });
        })
        .await;

        let before = poller.take_snapshot();
        // Volume moves 10 -> 12 between two polls; only 12 is observed.
        backend.bus("COM3").unwrap().lock().audio = Some(AudioState {
            volume: 12,
            mute: false,
        });
        let after = poller.take_snapshot();
        poller.diff_and_emit(&before, &after);

        assert_eq!(sink.names(), vec!["Living Room.Volume.12"]);
    }

    #[tokio::test]
    async fn unchanged_state_is_silent() {
        let (_backend, poller, sink) = poller_on_mock(|bus| {
            bus.audio = Some(AudioState {
                volume: 25,
                mute: true,
            });
            bus.devices.insert(LogicalAddress::Tv, MockDevice::named("TV"));
        })
        .await;

        let before = poller.take_snapshot();
        let after = poller.take_snapshot();
        poller.diff_and_emit(&before, &after);

        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn power_read_failure_degrades_to_unknown_then_recovers() {
        let (backend, poller, sink) = poller_on_mock(|bus| {
            let mut tv = MockDevice::named("TV");
            tv.power = PowerState::On;
            bus.devices.insert(LogicalAddress::Tv, tv);
        })
        .await;
        let bus = backend.bus("COM3").unwrap();

        let healthy = poller.take_snapshot();
        assert_eq!(healthy.devices[0].power, PowerState::On);

        // One failed read: cache goes unknown, Disconnected fires.
        bus.lock().devices.get_mut(&LogicalAddress::Tv).unwrap().reachable = false;
        let degraded = poller.take_snapshot();
        assert_eq!(degraded.devices[0].power, PowerState::Unknown);
        poller.diff_and_emit(&healthy, &degraded);
        let names = sink.take().into_iter().map(|e| e.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["TV.Disconnected"]);

        // Still failing: unknown -> unknown stays silent.
        let still_degraded = poller.take_snapshot();
        poller.diff_and_emit(&degraded, &still_degraded);
        assert!(sink.is_empty());

        // Read succeeds again: every field resurfaces, power with a
        // Connected marker plus the fresh value.
        bus.lock().devices.get_mut(&LogicalAddress::Tv).unwrap().reachable = true;
        let recovered = poller.take_snapshot();
        poller.diff_and_emit(&still_degraded, &recovered);
        let names = sink.take().into_iter().map(|e| e.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "TV.Inactive",
                "TV.Connected",
                "TV.Power.On",
                "TV.MenuLanguage.eng",
            ]
        );
    }

    #[tokio::test]
    async fn mute_menu_source_and_language_changes_are_reported() {
        let (backend, poller, sink) = poller_on_mock(|bus| {
            bus.audio = Some(AudioState {
                volume: 30,
                mute: false,
            });
            bus.devices.insert(LogicalAddress::Tv, MockDevice::named("TV"));
            bus.devices
                .insert(LogicalAddress::PlaybackDevice1, MockDevice::named("Player"));
        })
        .await;
        let bus = backend.bus("COM3").unwrap();

        let before = poller.take_snapshot();
        {
            let mut bus = bus.lock();
            bus.audio = Some(AudioState {
                volume: 30,
                mute: true,
            });
            let player = bus.devices.get_mut(&LogicalAddress::PlaybackDevice1).unwrap();
            player.source = true;
            player.active = true;
            bus.devices.get_mut(&LogicalAddress::Tv).unwrap().menu_language =
                "ger".to_string();
        }
        let after = poller.take_snapshot();
        poller.diff_and_emit(&before, &after);

        let names = sink.take().into_iter().map(|e| e.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "Mute.On",
                "TV.MenuLanguage.ger",
                "Playback Device 1.Active",
                "Source.Playback Device 1",
            ]
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_finishes_in_flight_iteration() {
        let (_backend, poller, _sink) = poller_on_mock(|bus| {
            bus.audio = Some(AudioState {
                volume: 10,
                mute: false,
            });
        })
        .await;

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(Duration::from_millis(5), rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poll task must stop promptly")
            .unwrap();
    }
}
