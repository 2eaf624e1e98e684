//! Lock attributes, their symbolic state keys and value decoding
//!
//! Every attribute value arriving from the host, whether read on demand or
//! pushed as a report, goes through [`Attribute::decode`]. Out of range
//! values are rejected with [`ProtocolError::InvalidValue`] and never reach
//! the state store.

use crate::channel::Purpose;
use crate::cluster::{door_lock_attrs, id, power_attrs};
use crate::types::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Battery percentage below which the lock reports a low battery
pub const BATTERY_LOW_THRESHOLD: i64 = 15;

/// Attributes the lock exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    LockState,
    LockType,
    ActuatorEnabled,
    DoorState,
    AutoRelockTime,
    SoundVolume,
    OperationEvent,
    Diagnostics,
    BatteryVoltage,
    BatteryPercentage,
}

impl Attribute {
    pub const ALL: [Attribute; 10] = [
        Attribute::LockState,
        Attribute::LockType,
        Attribute::ActuatorEnabled,
        Attribute::DoorState,
        Attribute::AutoRelockTime,
        Attribute::SoundVolume,
        Attribute::OperationEvent,
        Attribute::Diagnostics,
        Attribute::BatteryVoltage,
        Attribute::BatteryPercentage,
    ];

    /// Look up an attribute by its cluster and attribute id
    #[must_use]
    pub fn from_ids(cluster_id: u16, attribute_id: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.cluster_id() == cluster_id && a.attribute_id() == attribute_id)
    }

    #[must_use]
    pub const fn cluster_id(self) -> u16 {
        match self {
            Self::BatteryVoltage | Self::BatteryPercentage => id::POWER_CONFIG,
            _ => id::DOOR_LOCK,
        }
    }

    #[must_use]
    pub const fn attribute_id(self) -> u16 {
        match self {
            Self::LockState => door_lock_attrs::LOCK_STATE,
            Self::LockType => door_lock_attrs::LOCK_TYPE,
            Self::ActuatorEnabled => door_lock_attrs::ACTUATOR_ENABLED,
            Self::DoorState => door_lock_attrs::DOOR_STATE,
            Self::AutoRelockTime => door_lock_attrs::AUTO_RELOCK_TIME,
            Self::SoundVolume => door_lock_attrs::SOUND_VOLUME,
            Self::OperationEvent => door_lock_attrs::OPERATION_EVENT,
            Self::Diagnostics => door_lock_attrs::DIAGNOSTICS,
            Self::BatteryVoltage => power_attrs::BATTERY_VOLTAGE,
            Self::BatteryPercentage => power_attrs::BATTERY_PERCENTAGE_REMAINING,
        }
    }

    /// Purpose used to read this attribute
    #[must_use]
    pub const fn read_purpose(self) -> Purpose {
        match self.cluster_id() {
            id::POWER_CONFIG => Purpose::PowerAttribute,
            _ => Purpose::LockAttribute,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LockState => "lock_state",
            Self::LockType => "lock_type",
            Self::ActuatorEnabled => "actuator_enabled",
            Self::DoorState => "door_state",
            Self::AutoRelockTime => "auto_relock_time",
            Self::SoundVolume => "sound_volume",
            Self::OperationEvent => "operation_event",
            Self::Diagnostics => "diagnostics",
            Self::BatteryVoltage => "battery_voltage",
            Self::BatteryPercentage => "battery",
        }
    }

    /// Validate and decode a raw value into state entries.
    ///
    /// Packed attributes fan out into several entries; the battery
    /// percentage also derives `battery_low`.
    pub fn decode(self, raw: &Value) -> Result<Vec<(StateKey, StateValue)>, ProtocolError> {
        let name = self.name();
        let value = raw_integer(name, raw)?;

        let entries = match self {
            Self::LockState => {
                let state = LockState::try_from(value)?;
                vec![(StateKey::LockState, StateValue::Int(state as i64))]
            }
            Self::LockType => {
                let lock_type = in_range(name, value, 0, 0xFF)?;
                vec![(StateKey::LockType, StateValue::Int(lock_type))]
            }
            Self::ActuatorEnabled => {
                let enabled = in_range(name, value, 0, 1)? == 1;
                vec![(StateKey::ActuatorEnabled, StateValue::Bool(enabled))]
            }
            Self::DoorState => {
                let state = DoorState::try_from(value)?;
                vec![(StateKey::DoorState, StateValue::Int(state as i64))]
            }
            Self::AutoRelockTime => {
                let secs = in_range(name, value, 0, i64::from(u32::MAX))?;
                vec![(StateKey::AutoRelockTime, StateValue::Int(secs))]
            }
            Self::SoundVolume => {
                let volume = SoundVolume::try_from(value)?;
                vec![(StateKey::SoundVolume, StateValue::Int(volume as i64))]
            }
            Self::OperationEvent => {
                let packed = in_range(name, value, 0, i64::from(u32::MAX))?;
                let event = OperationEvent::from_raw(packed as u32);
                vec![
                    (StateKey::LastUser, StateValue::Int(i64::from(event.user_id))),
                    (
                        StateKey::LastAction,
                        StateValue::Text(event.action_label().to_string()),
                    ),
                    (
                        StateKey::LastMethod,
                        StateValue::Text(event.method_label().to_string()),
                    ),
                ]
            }
            Self::Diagnostics => {
                let packed = in_range(name, value, 0, i64::from(u32::MAX))?;
                let info = DiagnosticInfo::from_raw(packed as u32);
                vec![
                    (
                        StateKey::NetworkAddress,
                        StateValue::Int(i64::from(info.parent_nwk)),
                    ),
                    (StateKey::Rssi, StateValue::Int(i64::from(info.rssi))),
                    (StateKey::RssiDbm, StateValue::Int(i64::from(info.rssi_dbm))),
                ]
            }
            Self::BatteryVoltage => {
                let raw_voltage = in_range(name, value, 0, i64::from(u16::MAX))?;
                // ZCL reports 100 mV units; some firmware sends millivolts
                let volts = if raw_voltage > 100 {
                    raw_voltage as f64 / 1000.0
                } else {
                    raw_voltage as f64 / 10.0
                };
                vec![(StateKey::BatteryVoltage, StateValue::Float(volts))]
            }
            Self::BatteryPercentage => {
                let percent = in_range(name, value, 0, 100)?;
                vec![
                    (StateKey::Battery, StateValue::Int(percent)),
                    (
                        StateKey::BatteryLow,
                        StateValue::Bool(percent < BATTERY_LOW_THRESHOLD),
                    ),
                ]
            }
        };
        Ok(entries)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interpret a host supplied value as an integer
fn raw_integer(attribute: &'static str, raw: &Value) -> Result<i64, ProtocolError> {
    let unexpected = || ProtocolError::UnexpectedType {
        attribute,
        value: raw.to_string(),
    };

    match raw {
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(v)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Err(unexpected())
                }
            } else {
                Err(unexpected())
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16),
                None => s.parse::<i64>(),
            };
            parsed.map_err(|_| unexpected())
        }
        _ => Err(unexpected()),
    }
}

fn in_range(attribute: &'static str, value: i64, min: i64, max: i64) -> Result<i64, ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidValue {
            attribute,
            value: value.to_string(),
            reason: "out of range",
        })
    }
}

/// Lock state as reported by attribute 0x0000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockState {
    Unlocked = 0,
    Locked = 1,
    Error = 2,
}

impl TryFrom<i64> for LockState {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Unlocked),
            1 => Ok(Self::Locked),
            2 => Ok(Self::Error),
            _ => Err(ProtocolError::InvalidValue {
                attribute: "lock_state",
                value: value.to_string(),
                reason: "expected 0 (unlocked), 1 (locked) or 2 (error)",
            }),
        }
    }
}

/// Door state as reported by attribute 0x0003
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DoorState {
    Open = 0,
    Closed = 1,
    Error = 2,
    Jammed = 3,
    ForcedOpen = 4,
}

impl TryFrom<i64> for DoorState {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            2 => Ok(Self::Error),
            3 => Ok(Self::Jammed),
            4 => Ok(Self::ForcedOpen),
            _ => Err(ProtocolError::InvalidValue {
                attribute: "door_state",
                value: value.to_string(),
                reason: "unknown door state",
            }),
        }
    }
}

/// Sound volume configuration (attribute 0x0024)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SoundVolume {
    Off = 0,
    Low = 1,
    Normal = 2,
}

impl TryFrom<i64> for SoundVolume {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Low),
            2 => Ok(Self::Normal),
            _ => Err(ProtocolError::InvalidValue {
                attribute: "sound_volume",
                value: value.to_string(),
                reason: "expected 0 (off), 1 (low) or 2 (normal)",
            }),
        }
    }
}

impl FromStr for SoundVolume {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "low" | "1" => Ok(Self::Low),
            "normal" | "2" => Ok(Self::Normal),
            _ => Err(ProtocolError::InvalidValue {
                attribute: "sound_volume",
                value: s.to_string(),
                reason: "expected off, low or normal",
            }),
        }
    }
}

/// Decoded diagnostic attribute (0x0103).
///
/// The 32-bit value is laid out little-endian: bytes 0-1 hold the parent
/// NWK address, byte 2 the raw RSSI and byte 3 the signed RSSI in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub parent_nwk: u16,
    pub rssi: u8,
    pub rssi_dbm: i8,
}

impl DiagnosticInfo {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        let bytes = raw.to_le_bytes();
        Self {
            parent_nwk: u16::from_le_bytes([bytes[0], bytes[1]]),
            rssi: bytes[2],
            rssi_dbm: i8::from_le_bytes([bytes[3]]),
        }
    }
}

/// Decoded operation event report (0x0100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub user_id: u16,
    pub action: u8,
    pub method: u8,
}

impl OperationEvent {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            user_id: (raw & 0xFFFF) as u16,
            action: ((raw >> 16) & 0xFF) as u8,
            method: ((raw >> 24) & 0xFF) as u8,
        }
    }

    #[must_use]
    pub fn action_label(&self) -> &'static str {
        match self.action {
            1 => "locked",
            2 => "unlocked",
            _ => "unknown",
        }
    }

    #[must_use]
    pub fn method_label(&self) -> &'static str {
        match self.method {
            0 => "key",
            1 => "button",
            2 => "keypad",
            3 => "fingerprint",
            4 => "rfid",
            5 => "other",
            _ => "unknown",
        }
    }
}

/// Symbolic keys of the device state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    LockState,
    LockType,
    ActuatorEnabled,
    DoorState,
    AutoRelockTime,
    SoundVolume,
    LastUser,
    LastAction,
    LastMethod,
    NetworkAddress,
    Rssi,
    RssiDbm,
    Battery,
    BatteryLow,
    BatteryVoltage,
}

impl StateKey {
    pub const ALL: [StateKey; 15] = [
        StateKey::LockState,
        StateKey::LockType,
        StateKey::ActuatorEnabled,
        StateKey::DoorState,
        StateKey::AutoRelockTime,
        StateKey::SoundVolume,
        StateKey::LastUser,
        StateKey::LastAction,
        StateKey::LastMethod,
        StateKey::NetworkAddress,
        StateKey::Rssi,
        StateKey::RssiDbm,
        StateKey::Battery,
        StateKey::BatteryLow,
        StateKey::BatteryVoltage,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LockState => "lock_state",
            Self::LockType => "lock_type",
            Self::ActuatorEnabled => "actuator_enabled",
            Self::DoorState => "door_state",
            Self::AutoRelockTime => "auto_relock_time",
            Self::SoundVolume => "sound_volume",
            Self::LastUser => "last_user",
            Self::LastAction => "last_action",
            Self::LastMethod => "last_method",
            Self::NetworkAddress => "network_address",
            Self::Rssi => "rssi",
            Self::RssiDbm => "rssi_dbm",
            Self::Battery => "battery",
            Self::BatteryLow => "battery_low",
            Self::BatteryVoltage => "battery_voltage",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidValue {
                attribute: "state_key",
                value: s.to_string(),
                reason: "unknown state key",
            })
    }
}

/// A last-known attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}
