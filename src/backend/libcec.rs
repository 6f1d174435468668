//! Real backend over the libCEC binding (`cec-rs`).
//!
//! Targets cec-rs 12.x / libCEC 6. The binding does not expose adapter
//! enumeration, so detection reports Unsupported and the registry opens
//! configured ports directly.

use super::{
    AdapterInfo, BackendCallbacks, BackendError, CecBackend, CecHandle, KeyPress, LogEntry,
    OpenOptions,
};
use crate::keymap::KeyCode;
use crate::types::{AudioStatus, CecLogLevel, LogicalAddress, PowerState};
use async_trait::async_trait;
use cec_rs::{
    CecCommand, CecConnection, CecConnectionCfgBuilder, CecDatapacket, CecDeviceType,
    CecDeviceTypeVec, CecKeypress, CecLogMessage, CecLogicalAddress, CecPowerStatus,
    CecUserControlCode,
};
use std::sync::Arc;
use tracing::debug;

/// Stateless factory; each open call creates an independent libCEC
/// connection.
#[derive(Default)]
pub struct LibCecBackend;

impl LibCecBackend {
    pub fn new() -> Self {
        LibCecBackend
    }
}

#[async_trait]
impl CecBackend for LibCecBackend {
    async fn detect_adapters(&self) -> Result<Vec<AdapterInfo>, BackendError> {
        Err(BackendError::Unsupported("adapter enumeration"))
    }

    async fn open(
        &self,
        options: OpenOptions,
        callbacks: BackendCallbacks,
    ) -> Result<Arc<dyn CecHandle>, BackendError> {
        let on_key = callbacks.on_key;
        let on_log = callbacks.on_log;

        let cfg = CecConnectionCfgBuilder::default()
            .port(options.port.clone())
            .device_name(options.device_name.clone())
            .device_types(CecDeviceTypeVec::new(CecDeviceType::RecordingDevice))
            .activate_source(false)
            .hdmi_port(options.hdmi_port)
            .base_device(to_cec_address(options.base_device))
            .key_press_callback(Box::new(move |keypress: CecKeypress| {
                let raw = keypress.keycode as u32;
                match u8::try_from(raw).ok().and_then(KeyCode::from_code) {
                    Some(code) => on_key(KeyPress {
                        code,
                        duration: keypress.duration,
                    }),
                    None => debug!("ignoring unmapped control code {raw:#x}"),
                }
            }))
            .log_message_callback(Box::new(move |log: CecLogMessage| {
                on_log(LogEntry {
                    level: from_cec_log_level(log.level),
                    time_ms: log.time.as_millis() as i64,
                    message: log.message,
                });
            }))
            .build()
            .map_err(|e| BackendError::Open(e.to_string()))?;

        let connection = cfg.open().map_err(|e| BackendError::Open(format!("{e:?}")))?;
        Ok(Arc::new(LibCecHandle { connection }))
    }
}

struct LibCecHandle {
    connection: CecConnection,
}

impl CecHandle for LibCecHandle {
    fn audio_status(&self) -> Result<AudioStatus, BackendError> {
        let raw = self
            .connection
            .audio_get_status()
            .map_err(|e| BackendError::Other(format!("{e:?}")))?;
        Ok(AudioStatus::from_raw(raw))
    }

    fn volume_up(&self) -> Result<AudioStatus, BackendError> {
        self.connection
            .volume_up(true)
            .map_err(|e| BackendError::Other(format!("{e:?}")))?;
        self.audio_status()
    }

    fn volume_down(&self) -> Result<AudioStatus, BackendError> {
        self.connection
            .volume_down(true)
            .map_err(|e| BackendError::Other(format!("{e:?}")))?;
        self.audio_status()
    }

    fn audio_mute(&self) -> Result<(), BackendError> {
        self.connection
            .audio_mute()
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn audio_unmute(&self) -> Result<(), BackendError> {
        self.connection
            .audio_unmute()
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn audio_toggle_mute(&self) -> Result<(), BackendError> {
        self.connection
            .audio_toggle_mute()
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn device_power(&self, address: LogicalAddress) -> Result<PowerState, BackendError> {
        let status = self
            .connection
            .get_device_power_status(to_cec_address(address));
        Ok(from_cec_power(status))
    }

    fn device_osd_name(&self, address: LogicalAddress) -> Result<String, BackendError> {
        let name = self.connection.get_device_osd_name(to_cec_address(address));
        let name = name.to_string();
        if name.is_empty() {
            Err(BackendError::NoResponse)
        } else {
            Ok(name)
        }
    }

    fn device_menu_language(&self, address: LogicalAddress) -> Result<String, BackendError> {
        let language = self
            .connection
            .get_device_menu_language(to_cec_address(address));
        let language = language.to_string();
        if language.is_empty() {
            Err(BackendError::NoResponse)
        } else {
            Ok(language)
        }
    }

    fn device_vendor(&self, address: LogicalAddress) -> Result<String, BackendError> {
        let id = self.connection.get_device_vendor_id(to_cec_address(address));
        Ok(vendor_name(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{id:06x}")))
    }

    fn device_cec_version(&self, address: LogicalAddress) -> Result<String, BackendError> {
        let version = self
            .connection
            .get_device_cec_version(to_cec_address(address));
        Ok(format!("{version:?}"))
    }

    fn is_active_device(&self, address: LogicalAddress) -> Result<bool, BackendError> {
        Ok(self.connection.is_active_device(to_cec_address(address)))
    }

    fn is_active_source(&self, address: LogicalAddress) -> Result<bool, BackendError> {
        Ok(self.connection.is_active_source(to_cec_address(address)))
    }

    fn power_on(&self, address: LogicalAddress) -> Result<(), BackendError> {
        self.connection
            .send_power_on_devices(to_cec_address(address))
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn standby(&self, address: LogicalAddress) -> Result<(), BackendError> {
        self.connection
            .send_standby_devices(to_cec_address(address))
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn set_active_source(&self, address: LogicalAddress) -> Result<(), BackendError> {
        self.connection
            .set_active_source(to_cec_device_type(address))
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn send_keypress(&self, address: LogicalAddress, key: KeyCode) -> Result<(), BackendError> {
        let code = CecUserControlCode::try_from(key.code() as u32)
            .map_err(|_| BackendError::Unsupported("control code"))?;
        self.connection
            .send_keypress(to_cec_address(address), code, true)
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn send_key_release(&self, address: LogicalAddress) -> Result<(), BackendError> {
        self.connection
            .send_key_release(to_cec_address(address), true)
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn set_osd_string(
        &self,
        address: LogicalAddress,
        duration_ms: u32,
        message: &str,
    ) -> Result<(), BackendError> {
        self.connection
            .set_osd_string(to_cec_address(address), duration_ms.into(), message)
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn set_menu_state(&self, open: bool) -> Result<(), BackendError> {
        self.connection
            .set_menu_state(open)
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn set_inactive_view(&self) -> Result<(), BackendError> {
        self.connection
            .set_inactive_view()
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn transmit_raw(&self, command: &str) -> Result<(), BackendError> {
        let command = parse_command(command)?;
        self.connection
            .transmit(command)
            .map_err(|e| BackendError::Other(format!("{e:?}")))
    }

    fn adapter_vendor(&self) -> Result<String, BackendError> {
        // Pulse-Eight is the only vendor libCEC serial adapters ship from.
        Ok("Pulse-Eight".to_string())
    }

    fn close(&self) {
        // CecConnection closes the libCEC handle on drop; the Arc kept
        // by the adapter is the last owner at this point.
    }
}

/// Parse `SS:OO[:PP...]` hex notation into a CEC command.
fn parse_command(text: &str) -> Result<CecCommand, BackendError> {
    let bytes: Vec<u8> = text
        .split(':')
        .map(|part| u8::from_str_radix(part.trim(), 16))
        .collect::<Result<_, _>>()
        .map_err(|_| BackendError::Other(format!("invalid command string '{text}'")))?;
    if bytes.len() < 2 {
        return Err(BackendError::Other(format!(
            "command '{text}' needs at least address and opcode bytes"
        )));
    }

    let initiator = CecLogicalAddress::try_from((bytes[0] >> 4) as i32)
        .map_err(|_| BackendError::Other("invalid initiator address".to_string()))?;
    let destination = CecLogicalAddress::try_from((bytes[0] & 0x0F) as i32)
        .map_err(|_| BackendError::Other("invalid destination address".to_string()))?;
    let opcode = cec_rs::CecOpcode::try_from(bytes[1] as u32)
        .map_err(|_| BackendError::Other("invalid opcode".to_string()))?;

    Ok(CecCommand {
        initiator,
        destination,
        ack: false,
        eom: true,
        opcode,
        parameters: CecDatapacket(bytes[2..].iter().copied().collect()),
        opcode_set: true,
        transmit_timeout: std::time::Duration::from_millis(1000),
    })
}

fn to_cec_address(address: LogicalAddress) -> CecLogicalAddress {
    match address {
        LogicalAddress::Tv => CecLogicalAddress::Tv,
        LogicalAddress::RecordingDevice1 => CecLogicalAddress::Recordingdevice1,
        LogicalAddress::RecordingDevice2 => CecLogicalAddress::Recordingdevice2,
        LogicalAddress::Tuner1 => CecLogicalAddress::Tuner1,
        LogicalAddress::PlaybackDevice1 => CecLogicalAddress::Playbackdevice1,
        LogicalAddress::AudioSystem => CecLogicalAddress::Audiosystem,
        LogicalAddress::Tuner2 => CecLogicalAddress::Tuner2,
        LogicalAddress::Tuner3 => CecLogicalAddress::Tuner3,
        LogicalAddress::PlaybackDevice2 => CecLogicalAddress::Playbackdevice2,
        LogicalAddress::RecordingDevice3 => CecLogicalAddress::Recordingdevice3,
        LogicalAddress::Tuner4 => CecLogicalAddress::Tuner4,
        LogicalAddress::PlaybackDevice3 => CecLogicalAddress::Playbackdevice3,
        LogicalAddress::Reserved1 => CecLogicalAddress::Reserved1,
        LogicalAddress::Reserved2 => CecLogicalAddress::Reserved2,
        LogicalAddress::FreeUse => CecLogicalAddress::Freeuse,
        LogicalAddress::Broadcast => CecLogicalAddress::Broadcast,
    }
}

/// libCEC announces the active source by device type, not address.
fn to_cec_device_type(address: LogicalAddress) -> CecDeviceType {
    match address {
        LogicalAddress::Tv => CecDeviceType::Tv,
        LogicalAddress::AudioSystem => CecDeviceType::AudioSystem,
        LogicalAddress::Tuner1
        | LogicalAddress::Tuner2
        | LogicalAddress::Tuner3
        | LogicalAddress::Tuner4 => CecDeviceType::Tuner,
        LogicalAddress::PlaybackDevice1
        | LogicalAddress::PlaybackDevice2
        | LogicalAddress::PlaybackDevice3 => CecDeviceType::PlaybackDevice,
        _ => CecDeviceType::RecordingDevice,
    }
}

fn from_cec_power(status: CecPowerStatus) -> PowerState {
    match status {
        CecPowerStatus::On | CecPowerStatus::InTransitionStandbyToOn => PowerState::On,
        CecPowerStatus::Standby | CecPowerStatus::InTransitionOnToStandby => PowerState::Standby,
        _ => PowerState::Unknown,
    }
}

fn from_cec_log_level(level: cec_rs::CecLogLevel) -> CecLogLevel {
    match level {
        cec_rs::CecLogLevel::Error => CecLogLevel::Error,
        cec_rs::CecLogLevel::Warning => CecLogLevel::Warning,
        cec_rs::CecLogLevel::Notice => CecLogLevel::Notice,
        cec_rs::CecLogLevel::Traffic => CecLogLevel::Traffic,
        cec_rs::CecLogLevel::Debug => CecLogLevel::Debug,
        cec_rs::CecLogLevel::All => CecLogLevel::All,
    }
}

/// Vendor ids libCEC knows, for vendor string conversion.
fn vendor_name(id: u32) -> Option<&'static str> {
    Some(match id {
        0x000039 | 0x000F12 => "Toshiba",
        0x0000F0 => "Samsung",
        0x0005CD => "Denon",
        0x000678 => "Marantz",
        0x000982 => "Loewe",
        0x0009B0 => "Onkyo",
        0x000CB8 => "Medion",
        0x000CE7 => "Toshiba",
        0x001582 => "Pulse-Eight",
        0x0020C7 => "Akai",
        0x002467 => "AOC",
        0x008045 => "Panasonic",
        0x00903E => "Philips",
        0x009053 => "Daewoo",
        0x00A0DE => "Yamaha",
        0x00D0D5 => "Grundig",
        0x00E036 => "Pioneer",
        0x00E091 => "LG",
        0x08001F | 0x534850 => "Sharp",
        0x080046 => "Sony",
        0x18C086 => "Broadcom",
        0x534849 => "Vizio",
        0x6B746D => "Vizio",
        0x8065E9 => "Benq",
        0x9C645E => "Harman Kardon",
        _ => return None,
    })
}
