//! CEC user-control-code table and the remote-key capability used by
//! key actions.
//!
//! Key dispatch goes through a fixed table: a name resolves to a
//! [`RemoteKey`] that knows how to send its press and release. Nothing is
//! looked up dynamically on the device.

use crate::backend::{BackendError, CecHandle};
use crate::types::LogicalAddress;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// CEC user control codes (CEC spec table 27, plus the vendor extras
/// libCEC knows about). Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum KeyCode {
    #[strum(serialize = "Select")]
    Select = 0x00,
    #[strum(serialize = "Up")]
    Up = 0x01,
    #[strum(serialize = "Down")]
    Down = 0x02,
    #[strum(serialize = "Left")]
    Left = 0x03,
    #[strum(serialize = "Right")]
    Right = 0x04,
    #[strum(serialize = "Right Up")]
    RightUp = 0x05,
    #[strum(serialize = "Right Down")]
    RightDown = 0x06,
    #[strum(serialize = "Left Up")]
    LeftUp = 0x07,
    #[strum(serialize = "Left Down")]
    LeftDown = 0x08,
    #[strum(serialize = "Root Menu")]
    RootMenu = 0x09,
    #[strum(serialize = "Setup Menu")]
    SetupMenu = 0x0A,
    #[strum(serialize = "Contents Menu")]
    ContentsMenu = 0x0B,
    #[strum(serialize = "Favorite Menu")]
    FavoriteMenu = 0x0C,
    #[strum(serialize = "Exit")]
    Exit = 0x0D,
    #[strum(serialize = "Top Menu")]
    TopMenu = 0x10,
    #[strum(serialize = "DVD Menu")]
    DvdMenu = 0x11,
    #[strum(serialize = "Number Entry Mode")]
    NumberEntryMode = 0x1D,
    #[strum(serialize = "11")]
    Number11 = 0x1E,
    #[strum(serialize = "12")]
    Number12 = 0x1F,
    #[strum(serialize = "0")]
    Number0 = 0x20,
    #[strum(serialize = "1")]
    Number1 = 0x21,
    #[strum(serialize = "2")]
    Number2 = 0x22,
    #[strum(serialize = "3")]
    Number3 = 0x23,
    #[strum(serialize = "4")]
    Number4 = 0x24,
    #[strum(serialize = "5")]
    Number5 = 0x25,
    #[strum(serialize = "6")]
    Number6 = 0x26,
    #[strum(serialize = "7")]
    Number7 = 0x27,
    #[strum(serialize = "8")]
    Number8 = 0x28,
    #[strum(serialize = "9")]
    Number9 = 0x29,
    #[strum(serialize = "Dot")]
    Dot = 0x2A,
    #[strum(serialize = "Enter")]
    Enter = 0x2B,
    #[strum(serialize = "Clear")]
    Clear = 0x2C,
    #[strum(serialize = "Next Favorite")]
    NextFavorite = 0x2F,
    #[strum(serialize = "Channel Up")]
    ChannelUp = 0x30,
    #[strum(serialize = "Channel Down")]
    ChannelDown = 0x31,
    #[strum(serialize = "Previous Channel")]
    PreviousChannel = 0x32,
    #[strum(serialize = "Sound Select")]
    SoundSelect = 0x33,
    #[strum(serialize = "Input Select")]
    InputSelect = 0x34,
    #[strum(serialize = "Display Information")]
    DisplayInformation = 0x35,
    #[strum(serialize = "Help")]
    Help = 0x36,
    #[strum(serialize = "Page Up")]
    PageUp = 0x37,
    #[strum(serialize = "Page Down")]
    PageDown = 0x38,
    #[strum(serialize = "Power")]
    Power = 0x40,
    #[strum(serialize = "Volume Up")]
    VolumeUp = 0x41,
    #[strum(serialize = "Volume Down")]
    VolumeDown = 0x42,
    #[strum(serialize = "Mute")]
    Mute = 0x43,
    #[strum(serialize = "Play")]
    Play = 0x44,
    #[strum(serialize = "Stop")]
    Stop = 0x45,
    #[strum(serialize = "Pause")]
    Pause = 0x46,
    #[strum(serialize = "Record")]
    Record = 0x47,
    #[strum(serialize = "Rewind")]
    Rewind = 0x48,
    #[strum(serialize = "Fast Forward")]
    FastForward = 0x49,
    #[strum(serialize = "Eject")]
    Eject = 0x4A,
    #[strum(serialize = "Forward")]
    Forward = 0x4B,
    #[strum(serialize = "Backward")]
    Backward = 0x4C,
    #[strum(serialize = "Stop Record")]
    StopRecord = 0x4D,
    #[strum(serialize = "Pause Record")]
    PauseRecord = 0x4E,
    #[strum(serialize = "Angle")]
    Angle = 0x50,
    #[strum(serialize = "Sub Picture")]
    SubPicture = 0x51,
    #[strum(serialize = "Video On Demand")]
    VideoOnDemand = 0x52,
    #[strum(serialize = "Electronic Program Guide")]
    ElectronicProgramGuide = 0x53,
    #[strum(serialize = "Timer Programming")]
    TimerProgramming = 0x54,
    #[strum(serialize = "Initial Configuration")]
    InitialConfiguration = 0x55,
    #[strum(serialize = "Select Broadcast Type")]
    SelectBroadcastType = 0x56,
    #[strum(serialize = "Select Sound Presentation")]
    SelectSoundPresentation = 0x57,
    #[strum(serialize = "Play Function")]
    PlayFunction = 0x60,
    #[strum(serialize = "Pause Play Function")]
    PausePlayFunction = 0x61,
    #[strum(serialize = "Record Function")]
    RecordFunction = 0x62,
    #[strum(serialize = "Pause Record Function")]
    PauseRecordFunction = 0x63,
    #[strum(serialize = "Stop Function")]
    StopFunction = 0x64,
    #[strum(serialize = "Mute Function")]
    MuteFunction = 0x65,
    #[strum(serialize = "Restore Volume Function")]
    RestoreVolumeFunction = 0x66,
    #[strum(serialize = "Tune Function")]
    TuneFunction = 0x67,
    #[strum(serialize = "Select Media Function")]
    SelectMediaFunction = 0x68,
    #[strum(serialize = "Select AV Input Function")]
    SelectAvInputFunction = 0x69,
    #[strum(serialize = "Select Audio Input Function")]
    SelectAudioInputFunction = 0x6A,
    #[strum(serialize = "Power Toggle Function")]
    PowerToggleFunction = 0x6B,
    #[strum(serialize = "Power Off Function")]
    PowerOffFunction = 0x6C,
    #[strum(serialize = "Power On Function")]
    PowerOnFunction = 0x6D,
    #[strum(serialize = "F1 (Blue)")]
    F1Blue = 0x71,
    #[strum(serialize = "F2 (Red)")]
    F2Red = 0x72,
    #[strum(serialize = "F3 (Green)")]
    F3Green = 0x73,
    #[strum(serialize = "F4 (Yellow)")]
    F4Yellow = 0x74,
    #[strum(serialize = "F5")]
    F5 = 0x75,
    #[strum(serialize = "Data")]
    Data = 0x76,
    #[strum(serialize = "Return (Samsung)")]
    SamsungReturn = 0x91,
    #[strum(serialize = "Channels List (Samsung)")]
    SamsungChannelsList = 0x96,
}

impl KeyCode {
    /// Wire value of the control code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw control code from a key callback.
    pub fn from_code(code: u8) -> Option<Self> {
        KeyCode::try_from(code).ok()
    }
}

/// A single key capability: knows how to press and release one control
/// code on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteKey {
    pub code: KeyCode,
}

impl RemoteKey {
    pub fn new(code: KeyCode) -> Self {
        RemoteKey { code }
    }

    pub fn send_press(
        &self,
        handle: &dyn CecHandle,
        address: LogicalAddress,
    ) -> Result<(), BackendError> {
        handle.send_keypress(address, self.code)
    }

    pub fn send_release(
        &self,
        handle: &dyn CecHandle,
        address: LogicalAddress,
    ) -> Result<(), BackendError> {
        handle.send_key_release(address)
    }
}

/// Resolve a key by display name, ignoring case and treating `_` as a
/// space ("volume_up" and "Volume Up" both resolve).
pub fn lookup(name: &str) -> Option<RemoteKey> {
    let wanted = normalize(name);
    KeyCode::iter()
        .find(|code| normalize(&code.to_string()) == wanted)
        .map(RemoteKey::new)
}

/// All key names, sorted, for console help output.
pub fn key_names() -> Vec<String> {
    let mut names: Vec<String> = KeyCode::iter().map(|code| code.to_string()).collect();
    names.sort();
    names
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == '_' { ' ' } else { c.to_ascii_lowercase() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_every_table_entry() {
        for code in KeyCode::iter() {
            let key = lookup(&code.to_string()).expect("key name must resolve");
            assert_eq!(key.code, code);
        }
    }

    #[test]
    fn lookup_is_case_and_underscore_insensitive() {
        assert_eq!(lookup("volume up").map(|k| k.code), Some(KeyCode::VolumeUp));
        assert_eq!(lookup("VOLUME_UP").map(|k| k.code), Some(KeyCode::VolumeUp));
        assert_eq!(lookup("f1 (blue)").map(|k| k.code), Some(KeyCode::F1Blue));
        assert!(lookup("warp drive").is_none());
    }

    #[test]
    fn codes_round_trip_through_the_wire_value() {
        for code in KeyCode::iter() {
            assert_eq!(KeyCode::from_code(code.code()), Some(code));
        }
        assert_eq!(KeyCode::from_code(0xFF), None);
    }
}
