//! Core CEC value types: logical addresses, tri-state device state, audio status.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// The 16 logical device slots on a CEC bus.
///
/// Discriminants are the wire addresses. Address 5 is the audio system,
/// displayed as "AVR" to match how receivers are labelled in configs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum LogicalAddress {
    #[strum(serialize = "TV")]
    Tv = 0,
    #[strum(serialize = "Recording Device 1")]
    RecordingDevice1 = 1,
    #[strum(serialize = "Recording Device 2")]
    RecordingDevice2 = 2,
    #[strum(serialize = "Tuner 1")]
    Tuner1 = 3,
    #[strum(serialize = "Playback Device 1")]
    PlaybackDevice1 = 4,
    #[strum(serialize = "AVR")]
    AudioSystem = 5,
    #[strum(serialize = "Tuner 2")]
    Tuner2 = 6,
    #[strum(serialize = "Tuner 3")]
    Tuner3 = 7,
    #[strum(serialize = "Playback Device 2")]
    PlaybackDevice2 = 8,
    #[strum(serialize = "Recording Device 3")]
    RecordingDevice3 = 9,
    #[strum(serialize = "Tuner 4")]
    Tuner4 = 10,
    #[strum(serialize = "Playback Device 3")]
    PlaybackDevice3 = 11,
    #[strum(serialize = "Reserved 1")]
    Reserved1 = 12,
    #[strum(serialize = "Reserved 2")]
    Reserved2 = 13,
    #[strum(serialize = "Free Use")]
    FreeUse = 14,
    #[strum(serialize = "Broadcast")]
    Broadcast = 15,
}

/// Lookup table from normalized device names to addresses, built once.
static NAME_TO_ADDRESS: Lazy<HashMap<String, LogicalAddress>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for address in LogicalAddress::iter() {
        map.insert(normalize_name(&address.to_string()), address);
    }
    // Receivers show up under either label.
    map.insert(normalize_name("Audio System"), LogicalAddress::AudioSystem);
    map
});

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl LogicalAddress {
    /// Stable display name ("TV", "Playback Device 1", ...).
    pub fn display_name(self) -> &'static str {
        self.into()
    }

    /// Resolve a user-supplied device name, ignoring case and whitespace.
    pub fn from_device_name(name: &str) -> Option<Self> {
        NAME_TO_ADDRESS.get(&normalize_name(name)).copied()
    }

    /// Wire address (0-15).
    pub fn address(self) -> u8 {
        self as u8
    }
}

/// Device power, as reported over the bus. Transitional states collapse to
/// the state being entered, matching how libCEC reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PowerState {
    On,
    Standby,
    Unknown,
}

impl PowerState {
    pub fn is_known(self) -> bool {
        self != PowerState::Unknown
    }
}

/// Tri-state switch value for mute, menu, and active/source flags.
///
/// An explicit Unknown keeps a failed read from being mistaken for Off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SwitchState {
    On,
    Off,
    Unknown,
}

impl SwitchState {
    pub fn is_known(self) -> bool {
        self != SwitchState::Unknown
    }
}

impl From<bool> for SwitchState {
    fn from(value: bool) -> Self {
        if value {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

/// Mute bit of the CEC audio status byte.
pub const AUDIO_MUTE_MASK: u8 = 0x80;
/// Volume bits of the CEC audio status byte.
pub const AUDIO_VOLUME_MASK: u8 = 0x7F;
/// Volume value meaning "not reported".
pub const AUDIO_VOLUME_UNKNOWN: u8 = 0x7F;

/// Decoded audio-system status: volume level (0-100) and mute flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStatus {
    pub volume: Option<u8>,
    pub mute: SwitchState,
}

impl AudioStatus {
    /// Decode the raw CEC audio status byte. 0xFF means the audio system
    /// did not report at all.
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0xFF {
            return AudioStatus {
                volume: None,
                mute: SwitchState::Unknown,
            };
        }
        let volume = raw & AUDIO_VOLUME_MASK;
        AudioStatus {
            volume: (volume != AUDIO_VOLUME_UNKNOWN).then_some(volume.min(100)),
            mute: SwitchState::from(raw & AUDIO_MUTE_MASK != 0),
        }
    }

    pub fn unknown() -> Self {
        AudioStatus {
            volume: None,
            mute: SwitchState::Unknown,
        }
    }
}

/// libCEC log levels, ordered so that `level <= filter` selects messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CecLogLevel {
    #[strum(serialize = "ERROR")]
    Error = 1,
    #[strum(serialize = "WARNING")]
    Warning = 2,
    #[strum(serialize = "NOTICE")]
    Notice = 4,
    #[strum(serialize = "TRAFFIC")]
    Traffic = 8,
    #[strum(serialize = "DEBUG")]
    Debug = 16,
    #[strum(serialize = "ALL")]
    All = 31,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_resolution_is_forgiving() {
        assert_eq!(LogicalAddress::from_device_name("TV"), Some(LogicalAddress::Tv));
        assert_eq!(LogicalAddress::from_device_name("tv"), Some(LogicalAddress::Tv));
        assert_eq!(
            LogicalAddress::from_device_name("playback device 1"),
            Some(LogicalAddress::PlaybackDevice1)
        );
        assert_eq!(
            LogicalAddress::from_device_name("PlaybackDevice1"),
            Some(LogicalAddress::PlaybackDevice1)
        );
        assert_eq!(
            LogicalAddress::from_device_name("avr"),
            Some(LogicalAddress::AudioSystem)
        );
        assert_eq!(
            LogicalAddress::from_device_name("Audio System"),
            Some(LogicalAddress::AudioSystem)
        );
        assert_eq!(LogicalAddress::from_device_name("Projector"), None);
    }

    #[test]
    fn every_address_resolves_by_its_own_display_name() {
        for address in LogicalAddress::iter() {
            assert_eq!(
                LogicalAddress::from_device_name(address.display_name()),
                Some(address)
            );
        }
    }

    #[test]
    fn audio_status_decoding() {
        assert_eq!(
            AudioStatus::from_raw(0x1E),
            AudioStatus {
                volume: Some(30),
                mute: SwitchState::Off
            }
        );
        assert_eq!(
            AudioStatus::from_raw(0x9E),
            AudioStatus {
                volume: Some(30),
                mute: SwitchState::On
            }
        );
        // Volume bits all set: level not reported, mute still valid.
        assert_eq!(
            AudioStatus::from_raw(0x7F),
            AudioStatus {
                volume: None,
                mute: SwitchState::Off
            }
        );
        // Entirely unreported status.
        assert_eq!(AudioStatus::from_raw(0xFF), AudioStatus::unknown());
    }

    #[test]
    fn log_levels_order_matches_filtering() {
        assert!(CecLogLevel::Error < CecLogLevel::Warning);
        assert!(CecLogLevel::Debug <= CecLogLevel::All);
        assert!(CecLogLevel::Traffic > CecLogLevel::Notice);
    }
}
