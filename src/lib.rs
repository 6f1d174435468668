//! cec-gw - HDMI-CEC control gateway
//!
//! Bridges Pulse-Eight CEC adapters into home-automation tooling: every
//! device state change becomes a named event, remote keys become
//! debounced press/hold events, and macro actions (volume, power,
//! source, remote keys, raw commands) dispatch against named adapters.
//!
//! The native library sits behind [`backend::CecBackend`]; build with
//! `--features libcec` for hardware support, or use the mock backend
//! (`--simulate` in the binary) everywhere else.

pub mod actions;
pub mod adapter;
pub mod backend;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod keymap;
pub mod poll;
pub mod registry;
pub mod types;

pub use actions::{dispatch, Action, ActionRequest};
pub use adapter::{Adapter, Device};
pub use config::{AdapterConfig, AppConfig};
pub use error::CecError;
pub use events::{Event, EventKind, EventSink};
pub use registry::AdapterRegistry;
pub use types::{AudioStatus, CecLogLevel, LogicalAddress, PowerState, SwitchState};
