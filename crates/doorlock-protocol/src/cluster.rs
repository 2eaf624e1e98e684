//! ZCL (Zigbee Cluster Library) definitions used by the lock

/// ZDO endpoint, never addressed for cluster traffic
pub const ZDO_ENDPOINT: u8 = 0;

/// Door Lock endpoint on the Nordic ZBT-1 / Safe4 module
pub const ZBT1_ENDPOINT: u8 = 11;

/// Endpoints tried after the device's primary endpoint, in order
pub const FALLBACK_ENDPOINTS: [u8; 5] = [ZBT1_ENDPOINT, 1, 242, 2, 3];

/// Cluster IDs
pub mod id {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const DOOR_LOCK: u16 = 0x0101;
}

/// Door Lock cluster attributes
pub mod door_lock_attrs {
    pub const LOCK_STATE: u16 = 0x0000;
    pub const LOCK_TYPE: u16 = 0x0001;
    pub const ACTUATOR_ENABLED: u16 = 0x0002;
    pub const DOOR_STATE: u16 = 0x0003;
    pub const AUTO_RELOCK_TIME: u16 = 0x0023;
    pub const SOUND_VOLUME: u16 = 0x0024;
    /// Manufacturer specific: packed user / action / method of the last operation
    pub const OPERATION_EVENT: u16 = 0x0100;
    /// Manufacturer specific: packed parent NWK address and signal strength
    pub const DIAGNOSTICS: u16 = 0x0103;
}

/// Power Configuration cluster attributes
pub mod power_attrs {
    pub const BATTERY_VOLTAGE: u16 = 0x0020;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
}
