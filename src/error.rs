//! Error types for every component (§7).
//!
//! Nothing in the core is fatal at runtime except a missing `table` config key at module init
//! (§7). Every other error kind here is logged by the caller and the offending event or entry is
//! dropped without corrupting state.

use crate::types::{DeviceKey, Ipv4Addr, MacAddr, SwitchId};
use thiserror::Error;

/// Errors raised by the Topology Store (C1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A link referenced a switch id this store has never seen. Per §7 (`TopologyInconsistent`)
    /// this is not fatal: the caller buffers nothing special, it simply does not route over this
    /// switch until a matching `switch-added` event arrives.
    #[error("link references unknown switch {0}")]
    UnknownSwitch(SwitchId),
    /// A host event referenced a device key this store has never seen (only possible on removal).
    #[error("unknown host device key {0:?}")]
    UnknownHost(DeviceKey),
}

/// Errors raised while parsing the VIP registry configuration grammar (C4, §4.4, §7 `ConfigInvalid`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The `table` configuration key was absent. Per §7 this is the one fatal startup condition.
    #[error("required `table` configuration key is missing")]
    MissingTable,
    /// The `table` key for the LB table and the SPS table resolved to the same id; §4.6 requires
    /// them to differ.
    #[error("lb table id and sps table id must differ, both were {0}")]
    TableCollision(u8),
    /// A single `VIP_entry` in the `instances` grammar did not parse. The entry is skipped and the
    /// registry continues with whatever else parsed (§4.4, §7).
    #[error("malformed VIP entry {0:?}: {1}")]
    MalformedEntry(String, &'static str),
    /// The `table` configuration value was present but not a valid table id.
    #[error("invalid `table` configuration value {0:?}")]
    InvalidTable(String),
}

/// Errors raised resolving a backend's MAC address via the device service (§4.5, §7 `ResolutionMiss`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device service returned no MAC for the given backend IP. The SYN is dropped; the
    /// client will retransmit, giving another chance once the device is learned (§4.7).
    #[error("no MAC known for backend {0}")]
    ResolutionMiss(Ipv4Addr),
}

/// Errors raised while decoding a packet-in's Ethernet frame (§7 `ProtocolViolation`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The frame bytes could not be parsed as a well-formed Ethernet/ARP/IPv4/TCP frame.
    #[error("malformed packet-in frame: {0}")]
    Malformed(String),
}

/// Errors raised sending a flow-mod or packet-out to a switch (§7 `SwitchUnavailable`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwitchServiceError {
    /// The target switch is not currently connected. The operation is dropped; the installed
    /// shadow is left untouched so the next sweep retries (§4.7).
    #[error("switch {0} is not connected")]
    NotConnected(SwitchId),
    /// The device service has no record matching the given MAC (used by printer/debug tooling).
    #[error("no device record for MAC {0}")]
    UnknownDevice(MacAddr),
}

/// Umbrella error type for the dispatcher (C7) and any external caller that wants a single type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Propagated from the Topology Store.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    /// Propagated from configuration parsing.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Propagated from backend MAC resolution.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    /// Propagated from packet-in decoding.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    /// Propagated from a switch-mod/packet-out send.
    #[error("switch service error: {0}")]
    SwitchService(#[from] SwitchServiceError),
}
