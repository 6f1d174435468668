//! The seam between the gateway and the native CEC stack.
//!
//! [`CecBackend`] covers adapter discovery and opening; [`CecHandle`] is
//! one open connection. The real implementation ([`libcec::LibCecBackend`],
//! behind the `libcec` feature) wraps the vendor library; [`mock`]
//! provides a scriptable in-process bus for tests and `--simulate`.
//!
//! Handle operations are synchronous: the vendor library blocks on the
//! bus, and the original integration calls it the same way. Callers own
//! the decision of which task blocks. No lock is taken around handle
//! calls; the backend must be reentrant per handle.

use crate::keymap::KeyCode;
use crate::types::{AudioStatus, CecLogLevel, LogicalAddress, PowerState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "libcec")]
pub mod libcec;
pub mod mock;

/// USB vendor id of Pulse-Eight adapters.
pub const PULSE_EIGHT_VENDOR_ID: u16 = 0x2548;
/// USB product id of the Pulse-Eight USB-CEC adapter.
pub const PULSE_EIGHT_PRODUCT_ID: u16 = 0x1002;

/// A CEC adapter found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// COM port / device path the adapter answers on.
    pub port: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Connection parameters for [`CecBackend::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub port: String,
    /// OSD name the gateway announces for itself on the bus.
    pub device_name: String,
    /// HDMI input the adapter is plugged into on the base device.
    pub hdmi_port: u8,
    /// Device the adapter is physically connected to (TV, or the AVR
    /// when the adapter hangs off a receiver).
    pub base_device: LogicalAddress,
}

/// A raw key callback from the adapter: control code plus how long the
/// key had been down when the message fired (zero while held).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub code: KeyCode,
    pub duration: Duration,
}

/// A log line from the native library.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: CecLogLevel,
    /// Milliseconds since the library initialised.
    pub time_ms: i64,
    pub message: String,
}

/// Callbacks wired into a connection at open time. They are invoked on
/// backend threads and must not block.
pub struct BackendCallbacks {
    pub on_key: Box<dyn Fn(KeyPress) + Send + Sync>,
    pub on_log: Box<dyn Fn(LogEntry) + Send + Sync>,
}

impl BackendCallbacks {
    /// Callbacks that drop everything; handy for probe connections.
    pub fn noop() -> Self {
        BackendCallbacks {
            on_key: Box::new(|_| {}),
            on_log: Box::new(|_| {}),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Open(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("device did not respond")]
    NoResponse,
    #[error("{0}")]
    Other(String),
}

/// Adapter discovery and session opening.
#[async_trait]
pub trait CecBackend: Send + Sync {
    /// Enumerate CEC adapters reachable from this host.
    async fn detect_adapters(&self) -> Result<Vec<AdapterInfo>, BackendError>;

    /// Open a connection on `options.port` and wire up callbacks.
    async fn open(
        &self,
        options: OpenOptions,
        callbacks: BackendCallbacks,
    ) -> Result<Arc<dyn CecHandle>, BackendError>;
}

/// One open adapter connection. All bus operations of the gateway go
/// through this trait.
pub trait CecHandle: Send + Sync {
    // Audio system (adapter-wide).
    fn audio_status(&self) -> Result<AudioStatus, BackendError>;
    fn volume_up(&self) -> Result<AudioStatus, BackendError>;
    fn volume_down(&self) -> Result<AudioStatus, BackendError>;
    fn audio_mute(&self) -> Result<(), BackendError>;
    fn audio_unmute(&self) -> Result<(), BackendError>;
    fn audio_toggle_mute(&self) -> Result<(), BackendError>;

    // Per-device queries.
    fn device_power(&self, address: LogicalAddress) -> Result<PowerState, BackendError>;
    fn device_osd_name(&self, address: LogicalAddress) -> Result<String, BackendError>;
    fn device_menu_language(&self, address: LogicalAddress) -> Result<String, BackendError>;
    fn device_vendor(&self, address: LogicalAddress) -> Result<String, BackendError>;
    fn device_cec_version(&self, address: LogicalAddress) -> Result<String, BackendError>;
    fn is_active_device(&self, address: LogicalAddress) -> Result<bool, BackendError>;
    fn is_active_source(&self, address: LogicalAddress) -> Result<bool, BackendError>;

    // Per-device commands.
    fn power_on(&self, address: LogicalAddress) -> Result<(), BackendError>;
    fn standby(&self, address: LogicalAddress) -> Result<(), BackendError>;
    fn set_active_source(&self, address: LogicalAddress) -> Result<(), BackendError>;
    fn send_keypress(&self, address: LogicalAddress, key: KeyCode) -> Result<(), BackendError>;
    fn send_key_release(&self, address: LogicalAddress) -> Result<(), BackendError>;
    fn set_osd_string(
        &self,
        address: LogicalAddress,
        duration_ms: u32,
        message: &str,
    ) -> Result<(), BackendError>;

    // Adapter-wide commands.
    fn set_menu_state(&self, open: bool) -> Result<(), BackendError>;
    fn set_inactive_view(&self) -> Result<(), BackendError>;
    /// Transmit a raw command in `SS:OO[:PP...]` hex notation
    /// (source/destination nibbles, opcode, parameters).
    fn transmit_raw(&self, command: &str) -> Result<(), BackendError>;
    fn adapter_vendor(&self) -> Result<String, BackendError>;

    /// Release the connection. Further calls may fail.
    fn close(&self);
}
