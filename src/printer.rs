//! Human-readable dumps of routes and flow entries, for debug logging and test failure output.

use crate::flow::{Action, FlowEntry, FlowMatch};
use crate::routes::HostRouteInstaller;
use crate::spf::RouteTable;
use std::fmt::Write as _;

/// One line per `(src, dst, out_port)` triple in the route table, sorted for stable output.
pub fn format_route_table(routes: &RouteTable) -> String {
    let mut rows: Vec<_> = routes.iter().collect();
    rows.sort_by_key(|(src, dst, _)| (*src, *dst));
    let mut out = String::new();
    for (src, dst, next_hop) in rows {
        let _ = writeln!(out, "{} -> {} via port {}", src, dst, next_hop.out_port);
    }
    out
}

/// One line per installed SPS route in the Host-Route Installer's shadow, sorted for stable
/// output.
pub fn format_installed_routes(installer: &HostRouteInstaller) -> String {
    let mut rows: Vec<_> = installer.installed_entries().collect();
    rows.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    let mut out = String::new();
    for (switch, device_key, ipv4, out_port) in rows {
        let _ = writeln!(out, "{}: {} ({}) -> out {}", switch, device_key, ipv4, out_port);
    }
    out
}

/// One line describing a flow entry's match and actions, for logs and test assertions.
pub fn format_flow_entry(entry: &FlowEntry) -> String {
    format!(
        "table={} priority={} match={{{}}} actions=[{}] idle={} hard={}",
        entry.table,
        entry.priority,
        format_match(&entry.flow_match),
        entry.actions.iter().map(format_action).collect::<Vec<_>>().join(", "),
        entry.idle_timeout,
        entry.hard_timeout,
    )
}

fn format_match(m: &FlowMatch) -> String {
    let mut parts = Vec::new();
    if let Some(v) = m.eth_type {
        parts.push(format!("eth_type=0x{:04x}", v));
    }
    if let Some(v) = m.arp_tpa {
        parts.push(format!("arp_tpa={}", v));
    }
    if let Some(v) = m.ipv4_dst {
        parts.push(format!("ipv4_dst={}", v));
    }
    if let Some(v) = m.ipv4_src {
        parts.push(format!("ipv4_src={}", v));
    }
    if let Some(v) = m.ip_proto {
        parts.push(format!("ip_proto={}", v));
    }
    if let Some(v) = m.tcp_dst {
        parts.push(format!("tcp_dst={}", v));
    }
    if let Some(v) = m.tcp_src {
        parts.push(format!("tcp_src={}", v));
    }
    parts.join(", ")
}

fn format_action(action: &Action) -> String {
    match action {
        Action::Output(port) => format!("output({})", port),
        Action::ToController => "to_controller".to_string(),
        Action::SetEthSrc(mac) => format!("set_eth_src({})", mac),
        Action::SetEthDst(mac) => format!("set_eth_dst({})", mac),
        Action::SetIpv4Src(ip) => format!("set_ipv4_src({})", ip),
        Action::SetIpv4Dst(ip) => format!("set_ipv4_dst({})", ip),
        Action::GotoTable(table) => format!("goto_table({})", table),
    }
}
