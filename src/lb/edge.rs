//! LB Edge Handler (C5, §4.5).
//!
//! Reacts to packet-in messages delivered by the VIP catch rules installed by C6: ARP requests
//! for a VIP, TCP SYNs opening a new flow to a VIP, and stray non-SYN TCP segments that arrive
//! after a flow's rewrite rules have already expired.
//!
//! The TCP header is decoded with `etherparse::TcpHeaderSlice`, the same crate the host
//! framework's packet-capture tooling uses for transport-layer parsing (DESIGN.md). Ethernet, ARP
//! and IPv4 have no support in this version of `etherparse` beyond raw slicing, so their headers
//! are parsed by hand, as is every synthesized reply/RST frame (`etherparse` has no packet-builder
//! in this version either).

use super::registry::{LbRegistry, VipInstance};
use super::{IDLE_TIMEOUT_SECS, PRIORITY_FLOW};
use crate::error::PacketError;
use crate::flow::{Action, DeviceService, FlowEntry, FlowMatch, PacketOut, SwitchService, ETH_TYPE_ARP, ETH_TYPE_IPV4, IP_PROTO_TCP};
use crate::types::{Ipv4Addr, MacAddr, PortNo, SwitchId, TableId};
use crate::RoutingOracle;
use etherparse::TcpHeaderSlice;
use log::{debug, warn};
use std::convert::TryInto;

const ARP_OPCODE_REQUEST: u16 = 1;
const ARP_OPCODE_REPLY: u16 = 2;
const ARP_HTYPE_ETHERNET: u16 = 1;
const TCP_FLAG_RST: u8 = 0x04;

/// C5: turns packet-ins matched by the LB table into ARP replies, SYN dispatch, or stray RSTs.
#[derive(Debug, Clone, Copy)]
pub struct LbEdgeHandler {
    lb_table: TableId,
}

impl LbEdgeHandler {
    /// Build a handler that installs its rewrite rules into the given LB table id.
    pub fn new(lb_table: TableId) -> Self {
        Self { lb_table }
    }

    /// Handle one packet-in. `bytes` is the raw Ethernet frame as received from the switch.
    pub fn handle_packet_in(
        &self,
        switch: SwitchId,
        in_port: PortNo,
        bytes: &[u8],
        registry: &LbRegistry,
        devices: &dyn DeviceService,
        oracle: &dyn RoutingOracle,
        switches: &mut dyn SwitchService,
    ) -> Result<(), PacketError> {
        if bytes.len() < 14 {
            return Err(PacketError::Malformed("frame shorter than an Ethernet header".into()));
        }
        let eth_src = MacAddr::new(bytes[6..12].try_into().unwrap());
        let eth_type = u16::from_be_bytes([bytes[12], bytes[13]]);

        match eth_type {
            ETH_TYPE_ARP => self.handle_arp(switch, in_port, &bytes[14..], registry, switches),
            ETH_TYPE_IPV4 => self.handle_ipv4(switch, in_port, bytes, eth_src, registry, devices, oracle, switches),
            _ => Ok(()),
        }
    }

    fn handle_arp(
        &self,
        switch: SwitchId,
        in_port: PortNo,
        payload: &[u8],
        registry: &LbRegistry,
        switches: &mut dyn SwitchService,
    ) -> Result<(), PacketError> {
        let arp = ArpPacket::parse(payload)?;
        if arp.opcode != ARP_OPCODE_REQUEST {
            return Ok(());
        }
        let vip = match registry.get(arp.tpa) {
            Some(v) => v,
            None => return Ok(()),
        };
        let reply = build_arp_reply(vip.vmac, vip.vip, arp.sha, arp.spa);
        if let Err(e) = switches.packet_out(switch, PacketOut { port: in_port, bytes: reply }) {
            warn!("SwitchUnavailable sending VIP ARP reply on {}: {}", switch, e);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_ipv4(
        &self,
        switch: SwitchId,
        in_port: PortNo,
        bytes: &[u8],
        eth_src: MacAddr,
        registry: &LbRegistry,
        devices: &dyn DeviceService,
        oracle: &dyn RoutingOracle,
        switches: &mut dyn SwitchService,
    ) -> Result<(), PacketError> {
        if bytes.len() < 14 + 20 {
            return Err(PacketError::Malformed("frame shorter than an Ethernet+IPv4 header".into()));
        }
        let ip_header = &bytes[14..];
        if ip_header[0] >> 4 != 4 {
            return Ok(()); // not IPv4 (shouldn't happen given the EtherType check, but be safe)
        }
        let ihl = ((ip_header[0] & 0x0f) as usize) * 4;
        if ip_header.len() < ihl {
            return Err(PacketError::Malformed("IPv4 header length exceeds frame".into()));
        }
        let src_ip = Ipv4Addr(u32::from_be_bytes(ip_header[12..16].try_into().unwrap()));
        let dst_ip = Ipv4Addr(u32::from_be_bytes(ip_header[16..20].try_into().unwrap()));

        let vip = match registry.get(dst_ip) {
            Some(v) => v,
            None => return Ok(()),
        };

        if ip_header[9] != IP_PROTO_TCP {
            return Ok(());
        }

        let tcp_segment = &ip_header[ihl..];
        let tcp = TcpHeaderSlice::from_slice(tcp_segment).map_err(|e| PacketError::Malformed(e.to_string()))?;

        if tcp.syn() {
            self.handle_syn(switch, vip, src_ip, tcp.source_port(), tcp.destination_port(), devices, oracle, switches);
        } else {
            let payload_len = (tcp_segment.len() - tcp.data_offset() as usize * 4) as u32;
            // §6: sequence number = received ack number, 0 if absent — the ack-number field only
            // carries meaning when the ACK control bit is set.
            let seq = if tcp.ack() { tcp.acknowledgment_number() } else { 0 };
            let ack = tcp.sequence_number().wrapping_add(payload_len);
            let rst = build_tcp_rst(
                vip.vmac,
                eth_src,
                vip.vip,
                src_ip,
                tcp.destination_port(),
                tcp.source_port(),
                seq,
                ack,
            );
            if let Err(e) = switches.packet_out(switch, PacketOut { port: in_port, bytes: rst }) {
                warn!("SwitchUnavailable sending stray-TCP RST on {}: {}", switch, e);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_syn(
        &self,
        switch: SwitchId,
        vip: &VipInstance,
        client_ip: Ipv4Addr,
        client_port: u16,
        vip_port: u16,
        devices: &dyn DeviceService,
        oracle: &dyn RoutingOracle,
        switches: &mut dyn SwitchService,
    ) {
        let backend_ip = match vip.next_backend() {
            Some(ip) => ip,
            None => {
                warn!("ConfigInvalid: VIP {} has no configured backends", vip.vip);
                return;
            }
        };
        let backend = match devices.find_by_ipv4(backend_ip) {
            Some(d) => d,
            None => {
                debug!("ResolutionMiss: no MAC known yet for backend {}", backend_ip);
                return;
            }
        };
        let sps_table = oracle.sps_table();

        let inbound = FlowEntry {
            table: self.lb_table,
            priority: PRIORITY_FLOW,
            flow_match: FlowMatch {
                eth_type: Some(ETH_TYPE_IPV4),
                ip_proto: Some(IP_PROTO_TCP),
                ipv4_src: Some(client_ip),
                tcp_src: Some(client_port),
                ipv4_dst: Some(vip.vip),
                tcp_dst: Some(vip_port),
                ..FlowMatch::any()
            },
            actions: vec![Action::SetEthDst(backend.mac), Action::SetIpv4Dst(backend_ip), Action::GotoTable(sps_table)],
            idle_timeout: IDLE_TIMEOUT_SECS,
            hard_timeout: 0,
        };
        let outbound = FlowEntry {
            table: self.lb_table,
            priority: PRIORITY_FLOW,
            flow_match: FlowMatch {
                eth_type: Some(ETH_TYPE_IPV4),
                ip_proto: Some(IP_PROTO_TCP),
                ipv4_src: Some(backend_ip),
                tcp_src: Some(vip_port),
                ipv4_dst: Some(client_ip),
                tcp_dst: Some(client_port),
                ..FlowMatch::any()
            },
            actions: vec![Action::SetEthSrc(vip.vmac), Action::SetIpv4Src(vip.vip), Action::GotoTable(sps_table)],
            idle_timeout: IDLE_TIMEOUT_SECS,
            hard_timeout: 0,
        };

        for entry in [inbound, outbound] {
            if let Err(e) = switches.install_flow(switch, entry) {
                warn!("SwitchUnavailable installing LB rewrite rule on {}: {}", switch, e);
            }
        }
    }
}

struct ArpPacket {
    opcode: u16,
    sha: MacAddr,
    spa: Ipv4Addr,
    tha: MacAddr,
    tpa: Ipv4Addr,
}

impl ArpPacket {
    fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < 28 {
            return Err(PacketError::Malformed("ARP payload shorter than 28 bytes".into()));
        }
        let htype = u16::from_be_bytes([payload[0], payload[1]]);
        let ptype = u16::from_be_bytes([payload[2], payload[3]]);
        let hlen = payload[4];
        let plen = payload[5];
        if htype != ARP_HTYPE_ETHERNET || ptype != ETH_TYPE_IPV4 || hlen != 6 || plen != 4 {
            return Err(PacketError::Malformed("unsupported ARP hardware/protocol parameters".into()));
        }
        let opcode = u16::from_be_bytes([payload[6], payload[7]]);
        let sha = MacAddr::new(payload[8..14].try_into().unwrap());
        let spa = Ipv4Addr(u32::from_be_bytes(payload[14..18].try_into().unwrap()));
        let tha = MacAddr::new(payload[18..24].try_into().unwrap());
        let tpa = Ipv4Addr(u32::from_be_bytes(payload[24..28].try_into().unwrap()));
        Ok(ArpPacket { opcode, sha, spa, tha, tpa })
    }
}

fn eth_header(dst: MacAddr, src: MacAddr, ethertype: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&dst.octets());
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&ethertype.to_be_bytes());
}

/// Build the ARP reply described in §4.5: opcode=REPLY, sender_hw/proto=vmac/vip,
/// target_hw/proto=the requester's, Ethernet src=vmac, dst=requester.
fn build_arp_reply(vmac: MacAddr, vip: Ipv4Addr, requester_mac: MacAddr, requester_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(42);
    eth_header(requester_mac, vmac, ETH_TYPE_ARP, &mut buf);
    buf.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    buf.extend_from_slice(&ETH_TYPE_IPV4.to_be_bytes());
    buf.push(6);
    buf.push(4);
    buf.extend_from_slice(&ARP_OPCODE_REPLY.to_be_bytes());
    buf.extend_from_slice(&vmac.octets());
    buf.extend_from_slice(&vip.octets());
    buf.extend_from_slice(&requester_mac.octets());
    buf.extend_from_slice(&requester_ip.octets());
    buf
}

fn checksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build the stray-TCP RST described in §4.5/§6: L2 src=vmac dst=original src; L3 src=vip
/// dst=client_ip; L4 RST with the source/destination ports swapped; zero payload, window, and
/// options; TTL=64, DSCP=0 (§6 "Wire behavior").
#[allow(clippy::too_many_arguments)]
fn build_tcp_rst(
    vmac: MacAddr,
    client_mac: MacAddr,
    vip: Ipv4Addr,
    client_ip: Ipv4Addr,
    rst_src_port: u16,
    rst_dst_port: u16,
    seq: u32,
    ack: u32,
) -> Vec<u8> {
    const TTL: u8 = 64;

    let mut tcp = [0u8; 20];
    tcp[0..2].copy_from_slice(&rst_src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&rst_dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[8..12].copy_from_slice(&ack.to_be_bytes());
    tcp[12] = 5 << 4; // data offset: 5 words, no options
    tcp[13] = TCP_FLAG_RST;
    tcp[14..16].copy_from_slice(&0u16.to_be_bytes()); // window
    tcp[16..18].copy_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    tcp[18..20].copy_from_slice(&0u16.to_be_bytes()); // urgent pointer

    let mut pseudo = Vec::with_capacity(12 + tcp.len());
    pseudo.extend_from_slice(&vip.octets());
    pseudo.extend_from_slice(&client_ip.octets());
    pseudo.push(0);
    pseudo.push(IP_PROTO_TCP);
    pseudo.extend_from_slice(&(tcp.len() as u16).to_be_bytes());
    pseudo.extend_from_slice(&tcp);
    let tcp_checksum = checksum16(&pseudo);
    tcp[16..18].copy_from_slice(&tcp_checksum.to_be_bytes());

    let total_len = 20u16 + tcp.len() as u16;
    let mut ip = [0u8; 20];
    ip[0] = 0x45; // version 4, IHL 5 words
    ip[1] = 0; // DSCP=0, ECN=0
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[4..6].copy_from_slice(&0u16.to_be_bytes()); // identification
    ip[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    ip[8] = TTL;
    ip[9] = IP_PROTO_TCP;
    ip[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    ip[12..16].copy_from_slice(&vip.octets());
    ip[16..20].copy_from_slice(&client_ip.octets());
    let ip_checksum = checksum16(&ip);
    ip[10..12].copy_from_slice(&ip_checksum.to_be_bytes());

    let mut buf = Vec::with_capacity(14 + ip.len() + tcp.len());
    eth_header(client_mac, vmac, ETH_TYPE_IPV4, &mut buf);
    buf.extend_from_slice(&ip);
    buf.extend_from_slice(&tcp);
    buf
}
