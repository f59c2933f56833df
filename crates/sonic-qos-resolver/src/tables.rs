//! Table, key and field name constants

// CONFIG_DB tables
pub const CFG_DEVICE_METADATA_TABLE: &str = "DEVICE_METADATA";
pub const CFG_BUFFER_PG_TABLE: &str = "BUFFER_PG";
pub const CFG_BUFFER_QUEUE_TABLE: &str = "BUFFER_QUEUE";
pub const CFG_BUFFER_PROFILE_TABLE: &str = "BUFFER_PROFILE";
pub const CFG_BUFFER_POOL_TABLE: &str = "BUFFER_POOL";
pub const CFG_QUEUE_TABLE: &str = "QUEUE";
pub const CFG_SCHEDULER_TABLE: &str = "SCHEDULER";
pub const CFG_CABLE_LENGTH_TABLE: &str = "CABLE_LENGTH";
pub const CFG_SYSTEM_DEFAULTS_TABLE: &str = "SYSTEM_DEFAULTS";
pub const CFG_DEVICE_NEIGHBOR_TABLE: &str = "DEVICE_NEIGHBOR";
pub const CFG_DEVICE_NEIGHBOR_METADATA_TABLE: &str = "DEVICE_NEIGHBOR_METADATA";
pub const CFG_DSCP_TO_TC_MAP_TABLE: &str = "DSCP_TO_TC_MAP";

// APPL_DB tables
pub const APP_BUFFER_PG_TABLE: &str = "BUFFER_PG_TABLE";
pub const APP_BUFFER_QUEUE_TABLE: &str = "BUFFER_QUEUE_TABLE";
pub const APP_BUFFER_PROFILE_TABLE: &str = "BUFFER_PROFILE_TABLE";
pub const APP_BUFFER_POOL_TABLE: &str = "BUFFER_POOL_TABLE";
pub const APP_BUFFER_PORT_INGRESS_PROFILE_LIST_TABLE: &str =
    "BUFFER_PORT_INGRESS_PROFILE_LIST_TABLE";
pub const APP_BUFFER_PORT_EGRESS_PROFILE_LIST_TABLE: &str = "BUFFER_PORT_EGRESS_PROFILE_LIST_TABLE";

// COUNTERS_DB / ASIC_DB hashes
pub const COUNTERS_BUFFER_POOL_NAME_MAP: &str = "COUNTERS_BUFFER_POOL_NAME_MAP";
pub const ASIC_VIDTORID: &str = "VIDTORID";

/// Special keys
pub const LOCALHOST_KEY: &str = "localhost";
pub const CABLE_LENGTH_KEY: &str = "AZURE";
pub const TUNNEL_QOS_REMAP_KEY: &str = "tunnel_qos_remap";
pub const INGRESS_LOSSLESS_POOL: &str = "ingress_lossless_pool";
/// DSCP to TC map bound to uplinks when up and down links are mapped apart.
pub const UPLINK_DSCP_TO_TC_MAP_KEY: &str = "AZURE_UPLINK";

/// DEVICE_METADATA fields
pub mod metadata_fields {
    pub const BUFFER_MODEL: &str = "buffer_model";
    pub const TYPE: &str = "type";
    pub const SUBTYPE: &str = "subtype";
}

/// BUFFER_PROFILE table fields
pub mod buffer_profile_fields {
    pub const POOL: &str = "pool";
    pub const XON: &str = "xon";
    pub const XOFF: &str = "xoff";
    pub const SIZE: &str = "size";
    pub const DYNAMIC_TH: &str = "dynamic_th";
    pub const STATIC_TH: &str = "static_th";
}

/// BUFFER_PG / BUFFER_QUEUE table fields
pub mod buffer_binding_fields {
    pub const PROFILE: &str = "profile";
}

/// BUFFER_PORT_*_PROFILE_LIST table fields
pub mod profile_list_fields {
    pub const PROFILE_LIST: &str = "profile_list";
}

/// BUFFER_POOL table fields
pub mod buffer_pool_fields {
    pub const SIZE: &str = "size";
    pub const XOFF: &str = "xoff";
}

/// QUEUE / SCHEDULER table fields
pub mod scheduler_fields {
    pub const SCHEDULER: &str = "scheduler";
    pub const WEIGHT: &str = "weight";
}

/// Neighbor table fields
pub mod neighbor_fields {
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const STATUS: &str = "status";
}
