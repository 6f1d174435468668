//! Gateway error taxonomy.
//!
//! Adapter detection/open failures decide whether the gateway starts at
//! all; everything else is a per-request diagnostic. Per-field read
//! failures during polling never surface here - the poll loop degrades
//! the cached value to unknown instead.

use crate::backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CecError {
    /// Detection found adapters, but none of the configured ones opened.
    #[error("no CEC adapters found")]
    NoAdapters,

    /// A configured COM port was not among the detected adapters.
    #[error("adapter on {port} is not found")]
    AdapterNotFound { port: String },

    /// The native library refused the connection.
    #[error("connection failed on {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// An action's (COM port, name) pair resolved to no live adapter.
    #[error("adapter {wanted} not found")]
    NoMatchingAdapter { wanted: String },

    /// A device name did not resolve to a logical address.
    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    /// A remote key name is not in the key table.
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// Volume feedback stopped reporting while a set-volume spin was
    /// converging; the spin aborts rather than run forever blind.
    #[error("volume level on {adapter} is not being reported")]
    VolumeUnknown { adapter: String },

    /// A backend operation failed on a live connection.
    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },
}

impl CecError {
    /// Attach the failing operation name to a backend error.
    pub(crate) fn backend(op: &'static str) -> impl FnOnce(BackendError) -> CecError {
        move |source| CecError::Backend { op, source }
    }
}
