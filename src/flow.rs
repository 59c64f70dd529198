//! The switch-facing data model and the external services the core consumes (§6).
//!
//! These traits are the seam between the core and the host framework's OpenFlow transport,
//! device-discovery service, and link-discovery service. The core never talks to a wire protocol
//! directly; it only ever issues `FlowEntry`/`PacketOut` values through a `SwitchService`, and
//! queries a `DeviceService` for MAC resolution.

use crate::error::SwitchServiceError;
use crate::types::{DeviceKey, Ipv4Addr, MacAddr, PortNo, SwitchId, TableId};

/// EtherType for IPv4.
pub const ETH_TYPE_IPV4: u16 = 0x0800;
/// EtherType for ARP.
pub const ETH_TYPE_ARP: u16 = 0x0806;
/// IP protocol number for TCP.
pub const IP_PROTO_TCP: u8 = 6;

/// A single OpenFlow-style match. Every field is optional; `None` means "don't care".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FlowMatch {
    /// EtherType to match (e.g. `0x0800` for IPv4, `0x0806` for ARP). `None` means any.
    pub eth_type: Option<u16>,
    /// Match on ARP target protocol address.
    pub arp_tpa: Option<Ipv4Addr>,
    /// Match on IPv4 destination.
    pub ipv4_dst: Option<Ipv4Addr>,
    /// Match on IPv4 source.
    pub ipv4_src: Option<Ipv4Addr>,
    /// Match on IP protocol number (6 = TCP).
    pub ip_proto: Option<u8>,
    /// Match on TCP destination port.
    pub tcp_dst: Option<u16>,
    /// Match on TCP source port.
    pub tcp_src: Option<u16>,
}

impl FlowMatch {
    /// Empty match: matches every packet. Used for the table-miss default entry (§4.6).
    pub fn any() -> Self {
        Self::default()
    }
}

/// A single action in a flow entry's action list, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Forward the packet out the given port.
    Output(PortNo),
    /// Send the packet to the controller.
    ToController,
    /// Rewrite the Ethernet source address.
    SetEthSrc(MacAddr),
    /// Rewrite the Ethernet destination address.
    SetEthDst(MacAddr),
    /// Rewrite the IPv4 source address.
    SetIpv4Src(Ipv4Addr),
    /// Rewrite the IPv4 destination address.
    SetIpv4Dst(Ipv4Addr),
    /// Resubmit to another table (the LB -> SPS coupling, §4.5/§4.6).
    GotoTable(TableId),
}

/// A flow-mod request as the core builds it (§3 `FlowEntry`, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    /// Destination table id.
    pub table: TableId,
    /// Match priority; higher wins (§3/§4).
    pub priority: u16,
    /// The match clause.
    pub flow_match: FlowMatch,
    /// Actions applied in order.
    pub actions: Vec<Action>,
    /// Idle timeout in seconds, 0 = none.
    pub idle_timeout: u16,
    /// Hard timeout in seconds, 0 = none.
    pub hard_timeout: u16,
}

impl FlowEntry {
    /// Convenience constructor for an entry with no timeouts (SPS entries, §4.3).
    pub fn permanent(table: TableId, priority: u16, flow_match: FlowMatch, actions: Vec<Action>) -> Self {
        Self { table, priority, flow_match, actions, idle_timeout: 0, hard_timeout: 0 }
    }
}

/// A raw packet-out: the payload bytes and the port to emit them on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// Output port.
    pub port: PortNo,
    /// Raw Ethernet frame bytes.
    pub bytes: Vec<u8>,
}

/// The switch-facing surface the core needs from the host framework (§6 "Switch service").
///
/// Implementations are expected to be thread-safe black boxes (§5): the core never blocks on
/// network I/O through this trait beyond a synchronous, transport-buffered send.
pub trait SwitchService {
    /// Whether the given switch currently has an active control connection.
    fn is_connected(&self, switch: SwitchId) -> bool;

    /// Install (or idempotently replace) a flow entry on a switch.
    fn install_flow(&mut self, switch: SwitchId, entry: FlowEntry) -> Result<(), SwitchServiceError>;

    /// Remove any entry matching the given table/match on a switch. Matching entries that do not
    /// exist is not an error (§4.3 "idempotent replace").
    fn remove_flow(&mut self, switch: SwitchId, table: TableId, flow_match: FlowMatch) -> Result<(), SwitchServiceError>;

    /// Send a raw packet out a switch port (§4.5 ARP reply / stray-TCP RST).
    fn packet_out(&mut self, switch: SwitchId, packet: PacketOut) -> Result<(), SwitchServiceError>;
}

/// A device record as returned by the device-discovery service (§6 "Device service").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord {
    /// The device's MAC address.
    pub mac: MacAddr,
    /// The device's IPv4 address, if known.
    pub ipv4: Option<Ipv4Addr>,
}

/// The device-discovery surface the core needs (§6 "Device service"), used by C5 to resolve a
/// backend's MAC address from its IP.
pub trait DeviceService {
    /// Find a device by IPv4 address. Returns `None` if no device with that address is known yet.
    fn find_by_ipv4(&self, ipv4: Ipv4Addr) -> Option<DeviceRecord>;
}

/// The device key type re-exported for callers that only need §6's host framework surface.
pub type HostDeviceKey = DeviceKey;
