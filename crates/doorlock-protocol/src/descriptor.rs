//! Descriptors handed to the host transport
//!
//! These mirror the payload of the host's cluster services so that a
//! transport can forward them without reshaping.

use crate::address::DeviceAddress;
use crate::channel::Channel;
use crate::commands::DoorLockCommand;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server side (input) cluster
pub const CLUSTER_TYPE_IN: &str = "in";
/// Commands are client-to-server
pub const COMMAND_TYPE_SERVER: &str = "server";

/// A cluster command invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub ieee: DeviceAddress,
    pub endpoint_id: u8,
    pub cluster_id: u16,
    pub cluster_type: String,
    pub command: u8,
    pub command_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl CommandDescriptor {
    #[must_use]
    pub fn new(
        address: DeviceAddress,
        channel: &Channel,
        command: DoorLockCommand,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            ieee: address,
            endpoint_id: channel.endpoint,
            cluster_id: channel.cluster_id,
            cluster_type: CLUSTER_TYPE_IN.to_string(),
            command: command.id(),
            command_type: COMMAND_TYPE_SERVER.to_string(),
            params,
        }
    }
}

/// A cluster attribute read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub ieee: DeviceAddress,
    pub endpoint_id: u8,
    pub cluster_id: u16,
    pub cluster_type: String,
    pub attribute: u16,
}

impl AttributeDescriptor {
    #[must_use]
    pub fn new(address: DeviceAddress, channel: &Channel, attribute: u16) -> Self {
        Self {
            ieee: address,
            endpoint_id: channel.endpoint,
            cluster_id: channel.cluster_id,
            cluster_type: CLUSTER_TYPE_IN.to_string(),
            attribute,
        }
    }
}

/// A cluster attribute write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDescriptor {
    pub ieee: DeviceAddress,
    pub endpoint_id: u8,
    pub cluster_id: u16,
    pub cluster_type: String,
    pub attribute: u16,
    pub value: Value,
}

impl WriteDescriptor {
    #[must_use]
    pub fn new(address: DeviceAddress, channel: &Channel, attribute: u16, value: Value) -> Self {
        Self {
            ieee: address,
            endpoint_id: channel.endpoint,
            cluster_id: channel.cluster_id,
            cluster_type: CLUSTER_TYPE_IN.to_string(),
            attribute,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ServiceId, ISSUE_COMMAND};
    use crate::cluster::id;
    use serde_json::json;

    #[test]
    fn test_command_payload_shape() {
        let address = DeviceAddress::normalize("AABBCCDDEEFF0011").unwrap();
        let channel = Channel::new(11, id::DOOR_LOCK, ServiceId::new("zha", ISSUE_COMMAND));
        let mut params = Map::new();
        params.insert("user_id".into(), json!(3));

        let desc = CommandDescriptor::new(address, &channel, DoorLockCommand::ClearPinCode, params);
        assert_eq!(
            serde_json::to_value(&desc).unwrap(),
            json!({
                "ieee": "aa:bb:cc:dd:ee:ff:00:11",
                "endpoint_id": 11,
                "cluster_id": 257,
                "cluster_type": "in",
                "command": 7,
                "command_type": "server",
                "params": {"user_id": 3}
            })
        );
    }

    #[test]
    fn test_write_payload_carries_value() {
        let address = DeviceAddress::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        let service = ServiceId::new("zigbee", "set_zigbee_cluster_attribute");
        let channel = Channel::new(1, id::DOOR_LOCK, service);
        let desc = WriteDescriptor::new(address, &channel, 0x0024, json!(2));
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["attribute"], 0x24);
        assert_eq!(value["value"], 2);
        assert_eq!(value["endpoint_id"], 1);
    }
}
