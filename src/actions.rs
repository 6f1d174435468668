//! Action and query dispatch.
//!
//! An [`ActionRequest`] carries the (COM port, adapter name) pair the
//! user configured plus one [`Action`]. Dispatch resolves the adapter,
//! then the device where one is named, invokes a single operation, and
//! returns the result as a JSON value. Resolution failures come back as
//! typed errors for the caller to print; nothing panics.

use crate::adapter::Adapter;
use crate::error::CecError;
use crate::keymap;
use crate::registry::AdapterRegistry;
use crate::types::LogicalAddress;
use serde_json::{json, Value};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::debug;

/// Every operation the gateway exposes to automation.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Volume
    GetVolume,
    SetVolume { volume: u8 },
    VolumeUp,
    VolumeDown,
    // Mute
    GetMute,
    MuteOn,
    MuteOff,
    ToggleMute,
    // Power
    GetDevicePower { device: String },
    PowerOnDevice { device: String },
    StandbyDevice { device: String },
    PowerOnAll,
    StandbyAll,
    // Device queries
    GetDeviceVendor { device: String },
    GetDeviceMenuLanguage { device: String },
    GetDeviceOsdName { device: String },
    GetDeviceCecVersion { device: String },
    IsActiveSource { device: String },
    IsDeviceActive { device: String },
    // Control
    SetDeviceActiveSource { device: String },
    SendRemoteKey { device: String, key: String },
    SetOsdString { device: String, message: String, duration_ms: u32 },
    SetMenu { open: bool },
    SetInactiveView,
    RawCommand { command: String },
    RestartAdapter,
}

/// One action bound to its configured adapter selector.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub com_port: Option<String>,
    pub adapter: Option<String>,
    pub action: Action,
}

/// Resolve and execute one request against the registry.
pub async fn dispatch(
    registry: &AdapterRegistry,
    request: ActionRequest,
) -> Result<Value, CecError> {
    let com_port = request.com_port.as_deref();
    let name = request.adapter.as_deref();
    debug!(?request.action, com_port, adapter = name, "dispatching action");

    // Restart swaps registry entries, so it goes through the registry
    // rather than a resolved adapter.
    if request.action == Action::RestartAdapter {
        registry.restart(com_port, name).await?;
        return Ok(Value::Null);
    }

    let adapter = registry
        .find(com_port, name)
        .await
        .ok_or_else(|| CecError::NoMatchingAdapter {
            wanted: format!("{} on {}", name.unwrap_or("<any>"), com_port.unwrap_or("<any>")),
        })?;

    execute(&adapter, request.action).await
}

async fn execute(adapter: &Arc<Adapter>, action: Action) -> Result<Value, CecError> {
    match action {
        Action::GetVolume => Ok(volume_value(adapter.volume()?)),
        Action::SetVolume { volume } => Ok(json!(adapter.set_volume(volume)?)),
        Action::VolumeUp => Ok(volume_value(adapter.volume_up()?)),
        Action::VolumeDown => Ok(volume_value(adapter.volume_down()?)),

        Action::GetMute => Ok(json!(adapter.mute()?.to_string())),
        Action::MuteOn => Ok(json!(adapter.set_mute(true)?.to_string())),
        Action::MuteOff => Ok(json!(adapter.set_mute(false)?.to_string())),
        Action::ToggleMute => {
            adapter.toggle_mute()?;
            Ok(Value::Null)
        }

        Action::GetDevicePower { device } => {
            Ok(json!(adapter.device(&device)?.power()?.to_string()))
        }
        Action::PowerOnDevice { device } => {
            let device = adapter.device(&device)?;
            device.power_on()?;
            Ok(json!(device.power()?.to_string()))
        }
        Action::StandbyDevice { device } => {
            let device = adapter.device(&device)?;
            device.standby()?;
            Ok(json!(device.power()?.to_string()))
        }
        Action::PowerOnAll => {
            for_all_devices(adapter, "power on", |device| device.power_on());
            Ok(Value::Null)
        }
        Action::StandbyAll => {
            for_all_devices(adapter, "standby", |device| device.standby());
            Ok(Value::Null)
        }

        Action::GetDeviceVendor { device } => Ok(json!(adapter.device(&device)?.vendor()?)),
        Action::GetDeviceMenuLanguage { device } => {
            Ok(json!(adapter.device(&device)?.menu_language()?))
        }
        Action::GetDeviceOsdName { device } => Ok(json!(adapter.device(&device)?.osd_name()?)),
        Action::GetDeviceCecVersion { device } => {
            Ok(json!(adapter.device(&device)?.cec_version()?))
        }
        Action::IsActiveSource { device } => {
            Ok(json!(adapter.device(&device)?.is_active_source()?))
        }
        Action::IsDeviceActive { device } => Ok(json!(adapter.device(&device)?.is_active()?)),

        Action::SetDeviceActiveSource { device } => {
            let device = adapter.device(&device)?;
            device.set_active_source()?;
            Ok(json!(device.is_active_source()?))
        }
        Action::SendRemoteKey { device, key } => {
            let remote = keymap::lookup(&key).ok_or_else(|| CecError::KeyNotFound(key))?;
            adapter.device(&device)?.send_key(remote).await?;
            Ok(Value::Null)
        }
        Action::SetOsdString {
            device,
            message,
            duration_ms,
        } => {
            adapter.device(&device)?.set_osd_string(duration_ms, &message)?;
            Ok(Value::Null)
        }
        Action::SetMenu { open } => {
            adapter.set_menu(open)?;
            Ok(Value::Null)
        }
        Action::SetInactiveView => {
            adapter.set_inactive_view()?;
            Ok(Value::Null)
        }
        Action::RawCommand { command } => {
            adapter.transmit_command(&command)?;
            Ok(Value::Null)
        }
        Action::RestartAdapter => unreachable!("handled by dispatch"),
    }
}

/// Run one command against every device slot; devices that do not
/// answer are skipped, as during polling.
fn for_all_devices(
    adapter: &Adapter,
    what: &str,
    op: impl Fn(&crate::adapter::Device) -> Result<(), CecError>,
) {
    for address in LogicalAddress::iter() {
        let device = adapter.device_at(address);
        if let Err(e) = op(&device) {
            debug!(device = device.name(), "{what} skipped: {e}");
        }
    }
}

fn volume_value(volume: Option<u8>) -> Value {
    match volume {
        Some(volume) => json!(volume),
        None => Value::Null,
    }
}
