//! Door Lock cluster protocol vocabulary
//!
//! This crate describes how a Zigbee door lock (Nordic ZBT-1 / Safe4 module)
//! is addressed and what its attributes mean. It performs no I/O: address
//! normalization, channel and service naming, attribute validation and the
//! descriptors handed to a host transport all live here.

pub mod address;
pub mod attribute;
pub mod channel;
pub mod cluster;
pub mod commands;
pub mod descriptor;
pub mod types;

pub use address::DeviceAddress;
pub use attribute::{
    Attribute, DiagnosticInfo, DoorState, LockState, OperationEvent, SoundVolume, StateKey,
    StateValue,
};
pub use channel::{Channel, Purpose, ServiceId};
pub use commands::DoorLockCommand;
pub use descriptor::{AttributeDescriptor, CommandDescriptor, WriteDescriptor};
pub use types::ProtocolError;
