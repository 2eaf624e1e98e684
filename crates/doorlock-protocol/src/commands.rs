//! Door Lock cluster command definitions

use crate::types::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Client-to-server commands of the Door Lock cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoorLockCommand {
    LockDoor = 0x00,
    UnlockDoor = 0x01,
    Toggle = 0x02,
    UnlockWithTimeout = 0x03,
    SetPinCode = 0x05,
    GetPinCode = 0x06,
    ClearPinCode = 0x07,
    ClearAllPinCodes = 0x08,
    SetUserStatus = 0x09,
    GetUserStatus = 0x0A,
    ClearRfidCode = 0x18,
    ClearAllRfidCodes = 0x19,
}

impl DoorLockCommand {
    pub const ALL: [DoorLockCommand; 12] = [
        Self::LockDoor,
        Self::UnlockDoor,
        Self::Toggle,
        Self::UnlockWithTimeout,
        Self::SetPinCode,
        Self::GetPinCode,
        Self::ClearPinCode,
        Self::ClearAllPinCodes,
        Self::SetUserStatus,
        Self::GetUserStatus,
        Self::ClearRfidCode,
        Self::ClearAllRfidCodes,
    ];

    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::LockDoor),
            0x01 => Some(Self::UnlockDoor),
            0x02 => Some(Self::Toggle),
            0x03 => Some(Self::UnlockWithTimeout),
            0x05 => Some(Self::SetPinCode),
            0x06 => Some(Self::GetPinCode),
            0x07 => Some(Self::ClearPinCode),
            0x08 => Some(Self::ClearAllPinCodes),
            0x09 => Some(Self::SetUserStatus),
            0x0A => Some(Self::GetUserStatus),
            0x18 => Some(Self::ClearRfidCode),
            0x19 => Some(Self::ClearAllRfidCodes),
            _ => None,
        }
    }

    /// Command id on the wire
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Name of the command as the host service layer knows it
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LockDoor => "lock_door",
            Self::UnlockDoor => "unlock_door",
            Self::Toggle => "toggle",
            Self::UnlockWithTimeout => "unlock_with_timeout",
            Self::SetPinCode => "set_pin_code",
            Self::GetPinCode => "get_pin_code",
            Self::ClearPinCode => "clear_pin_code",
            Self::ClearAllPinCodes => "clear_all_pin_codes",
            Self::SetUserStatus => "set_user_status",
            Self::GetUserStatus => "get_user_status",
            Self::ClearRfidCode => "clear_rfid_code",
            Self::ClearAllRfidCodes => "clear_all_rfid_codes",
        }
    }
}

impl TryFrom<u8> for DoorLockCommand {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| ProtocolError::InvalidValue {
            attribute: "command",
            value: format!("{value:#04x}"),
            reason: "not a Door Lock client command",
        })
    }
}

impl fmt::Display for DoorLockCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.id())
    }
}

/// Accepts a command name, `lock` / `unlock`, a decimal id or a `0x` hex id
impl FromStr for DoorLockCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "lock" => return Ok(Self::LockDoor),
            "unlock" => return Ok(Self::UnlockDoor),
            _ => {}
        }
        if let Some(command) = Self::ALL.into_iter().find(|c| c.name() == s) {
            return Ok(command);
        }

        let id = match s.strip_prefix("0x") {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse::<u8>(),
        };
        match id {
            Ok(id) => Self::try_from(id),
            Err(_) => Err(ProtocolError::InvalidValue {
                attribute: "command",
                value: s,
                reason: "expected a command name or id",
            }),
        }
    }
}
