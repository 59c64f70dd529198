//! Host-Route Installer (C3, §4.3).
//!
//! Derives per-host SPS flow entries from a [`crate::spf::RouteTable`] and pushes only the deltas
//! to switches, tracked against a local "installed" shadow keyed by `(switch, device_key)`. Writes
//! are stamped with the topology epoch they were computed from so a late-arriving stale
//! recomputation can never clobber a newer one (§5).

use crate::flow::{Action, FlowEntry, FlowMatch, SwitchService, ETH_TYPE_IPV4};
use crate::spf::RouteTable;
use crate::topology::{HostRouteInfo, TopologySnapshot};
use crate::types::{DeviceKey, Epoch, Ipv4Addr, PortNo, SwitchId, TableId};
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InstalledRoute {
    ipv4: Ipv4Addr,
    out_port: PortNo,
    epoch: Epoch,
}

fn ipv4_match(ipv4: Ipv4Addr) -> FlowMatch {
    FlowMatch { eth_type: Some(ETH_TYPE_IPV4), ipv4_dst: Some(ipv4), ..FlowMatch::any() }
}

/// Where `h` should be routed from, for every connected switch (§4.3): the terminal rule at its
/// attachment switch, plus a next-hop rule at every other connected switch that has one.
fn desired_entries(info: &HostRouteInfo, snapshot: &TopologySnapshot, routes: &RouteTable) -> Vec<(SwitchId, PortNo)> {
    let mut out = Vec::new();
    if snapshot.is_connected(info.attached.switch) {
        out.push((info.attached.switch, info.attached.port));
    }
    for s in snapshot.connected_switch_ids() {
        if s == info.attached.switch {
            continue;
        }
        if let Some(nh) = routes.next_hop(s, info.attached.switch) {
            out.push((s, nh.out_port));
        }
    }
    out
}

/// C3: owns the SPS table's installed-entry shadow and issues only the necessary deltas.
#[derive(Debug)]
pub struct HostRouteInstaller {
    table: TableId,
    priority: u16,
    installed: HashMap<(SwitchId, DeviceKey), InstalledRoute>,
}

impl HostRouteInstaller {
    /// Create an installer targeting the given SPS table id, at priority `P_default` (§3 I5/I6).
    pub fn new(table: TableId, priority: u16) -> Self {
        Self { table, priority, installed: HashMap::new() }
    }

    /// Full reconciliation pass (§4.3 "sweep"): recompute the desired entry set for every
    /// routable host from `snapshot`/`routes`, and push only the deltas against the shadow.
    /// Called whenever `ChangeSet::TopoChanged` is observed (§4.7).
    pub fn sweep(
        &mut self,
        snapshot: &TopologySnapshot,
        routes: &RouteTable,
        epoch: Epoch,
        switches: &mut dyn SwitchService,
    ) {
        let mut desired: HashMap<(SwitchId, DeviceKey), (Ipv4Addr, PortNo)> = HashMap::new();
        for host in snapshot.hosts() {
            if let Some(info) = host.route_info() {
                for (switch, port) in desired_entries(&info, snapshot, routes) {
                    desired.insert((switch, host.device_key.clone()), (info.ipv4, port));
                }
            }
        }

        for (&(switch, ref device_key), &(ipv4, port)) in desired.iter() {
            self.apply_entry(switches, switch, device_key, ipv4, port, epoch);
        }

        let stale: Vec<(SwitchId, DeviceKey)> =
            self.installed.keys().filter(|k| !desired.contains_key(*k)).cloned().collect();
        for (switch, device_key) in stale {
            let ipv4 = self.installed[&(switch, device_key.clone())].ipv4;
            self.withdraw_entry(switches, switch, &device_key, ipv4);
        }
    }

    /// Targeted reconciliation for a single host (§4.7 `HOST_CHANGED(h)`), using the
    /// already-computed route table rather than triggering a full C2 recomputation. `new` is the
    /// host's routable projection after the change; `None` covers both removal and a transition to
    /// unroutable. This also handles an IP change (remove-old-then-add-new, DESIGN.md): any shadow
    /// entry for `device_key` whose recorded IP no longer matches the new desired IP is withdrawn.
    pub fn update_host(
        &mut self,
        device_key: &str,
        new: Option<HostRouteInfo>,
        snapshot: &TopologySnapshot,
        routes: &RouteTable,
        epoch: Epoch,
        switches: &mut dyn SwitchService,
    ) {
        let desired: HashMap<SwitchId, (Ipv4Addr, PortNo)> = match new {
            Some(info) => desired_entries(&info, snapshot, routes)
                .into_iter()
                .map(|(switch, port)| (switch, (info.ipv4, port)))
                .collect(),
            None => HashMap::new(),
        };

        for (&switch, &(ipv4, port)) in desired.iter() {
            self.apply_entry(switches, switch, device_key, ipv4, port, epoch);
        }

        let stale: Vec<SwitchId> = self
            .installed
            .iter()
            .filter(|(k, v)| k.1 == device_key && desired.get(&k.0).map(|(ip, _)| *ip) != Some(v.ipv4))
            .map(|(k, _)| k.0)
            .collect();
        for switch in stale {
            let ipv4 = self.installed[&(switch, device_key.to_string())].ipv4;
            self.withdraw_entry(switches, switch, device_key, ipv4);
        }
    }

    /// Entries currently believed installed, for tests and the printer.
    pub fn installed_entries(&self) -> impl Iterator<Item = (SwitchId, &str, Ipv4Addr, PortNo)> + '_ {
        self.installed.iter().map(|((switch, dk), r)| (*switch, dk.as_str(), r.ipv4, r.out_port))
    }

    fn apply_entry(
        &mut self,
        switches: &mut dyn SwitchService,
        switch: SwitchId,
        device_key: &str,
        ipv4: Ipv4Addr,
        out_port: PortNo,
        epoch: Epoch,
    ) {
        let key = (switch, device_key.to_string());
        if let Some(existing) = self.installed.get(&key) {
            if existing.ipv4 == ipv4 && existing.out_port == out_port {
                return;
            }
            if existing.epoch > epoch {
                return;
            }
        }
        let entry = FlowEntry::permanent(self.table, self.priority, ipv4_match(ipv4), vec![Action::Output(out_port)]);
        match switches.install_flow(switch, entry) {
            Ok(()) => {
                self.installed.insert(key, InstalledRoute { ipv4, out_port, epoch });
            }
            Err(e) => warn!("SwitchUnavailable: failed to install SPS route on {}: {}", switch, e),
        }
    }

    fn withdraw_entry(&mut self, switches: &mut dyn SwitchService, switch: SwitchId, device_key: &str, ipv4: Ipv4Addr) {
        let key = (switch, device_key.to_string());
        match switches.remove_flow(switch, self.table, ipv4_match(ipv4)) {
            Ok(()) => {
                self.installed.remove(&key);
            }
            Err(e) => warn!("SwitchUnavailable: failed to remove SPS route on {}: {}", switch, e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::SwitchServiceError;
    use crate::flow::PacketOut;
    use crate::topology::TopologyStore;
    use crate::types::{AttachmentPoint, MacAddr};

    #[derive(Default)]
    struct FakeSwitches {
        connected: std::collections::HashSet<SwitchId>,
        installed: Vec<(SwitchId, FlowEntry)>,
        removed: Vec<(SwitchId, TableId, FlowMatch)>,
    }

    impl FakeSwitches {
        fn all_connected(ids: &[SwitchId]) -> Self {
            Self { connected: ids.iter().copied().collect(), ..Default::default() }
        }
    }

    impl SwitchService for FakeSwitches {
        fn is_connected(&self, switch: SwitchId) -> bool {
            self.connected.contains(&switch)
        }
        fn install_flow(&mut self, switch: SwitchId, entry: FlowEntry) -> Result<(), SwitchServiceError> {
            if !self.is_connected(switch) {
                return Err(SwitchServiceError::NotConnected(switch));
            }
            self.installed.push((switch, entry));
            Ok(())
        }
        fn remove_flow(&mut self, switch: SwitchId, table: TableId, flow_match: FlowMatch) -> Result<(), SwitchServiceError> {
            if !self.is_connected(switch) {
                return Err(SwitchServiceError::NotConnected(switch));
            }
            self.removed.push((switch, table, flow_match));
            Ok(())
        }
        fn packet_out(&mut self, switch: SwitchId, _packet: PacketOut) -> Result<(), SwitchServiceError> {
            if !self.is_connected(switch) {
                return Err(SwitchServiceError::NotConnected(switch));
            }
            Ok(())
        }
    }

    fn sid(n: u64) -> SwitchId {
        SwitchId(n)
    }
    fn port(n: u16) -> PortNo {
        PortNo(n)
    }

    fn linear_topology_with_hosts() -> TopologyStore {
        let mut t = TopologyStore::new();
        t.apply_switch(sid(1), true);
        t.apply_switch(sid(2), true);
        t.apply_switch(sid(3), true);
        t.apply_link(sid(1), port(2), sid(2), port(1), true);
        t.apply_link(sid(2), port(2), sid(3), port(1), true);
        let mac1 = MacAddr::new([1, 1, 1, 1, 1, 1]);
        let mac3 = MacAddr::new([3, 3, 3, 3, 3, 3]);
        t.apply_host(
            "h1".into(),
            mac1,
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            Some(AttachmentPoint { switch: sid(1), port: port(1) }),
            true,
        );
        t.apply_host(
            "h3".into(),
            mac3,
            Some(Ipv4Addr::new(10, 0, 0, 3)),
            Some(AttachmentPoint { switch: sid(3), port: port(2) }),
            true,
        );
        t
    }

    #[test]
    fn sweep_installs_terminal_and_transit_rules() {
        let t = linear_topology_with_hosts();
        let snap = t.snapshot();
        let routes = crate::spf::compute(&snap);
        let mut installer = HostRouteInstaller::new(0, 0);
        let mut switches = FakeSwitches::all_connected(&[sid(1), sid(2), sid(3)]);
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);

        let h3_ip = Ipv4Addr::new(10, 0, 0, 3);
        assert!(installer.installed_entries().any(|(s, dk, ip, p)| s == sid(1) && dk == "h3" && ip == h3_ip && p == port(2)));
        assert!(installer.installed_entries().any(|(s, dk, ip, p)| s == sid(2) && dk == "h3" && ip == h3_ip && p == port(2)));
        assert!(installer.installed_entries().any(|(s, dk, ip, p)| s == sid(3) && dk == "h3" && ip == h3_ip && p == port(2)));
    }

    #[test]
    fn sweep_is_idempotent_no_op_on_unchanged_entries() {
        let t = linear_topology_with_hosts();
        let snap = t.snapshot();
        let routes = crate::spf::compute(&snap);
        let mut installer = HostRouteInstaller::new(0, 0);
        let mut switches = FakeSwitches::all_connected(&[sid(1), sid(2), sid(3)]);
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);
        let installed_after_first = switches.installed.len();
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);
        assert_eq!(switches.installed.len(), installed_after_first);
    }

    #[test]
    fn link_break_withdraws_unreachable_entries() {
        let mut t = linear_topology_with_hosts();
        let mut installer = HostRouteInstaller::new(0, 0);
        let mut switches = FakeSwitches::all_connected(&[sid(1), sid(2), sid(3)]);
        let snap = t.snapshot();
        let routes = crate::spf::compute(&snap);
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);

        t.apply_link(sid(2), port(2), sid(3), port(1), false);
        let snap2 = t.snapshot();
        let routes2 = crate::spf::compute(&snap2);
        installer.sweep(&snap2, &routes2, t.epoch(), &mut switches);

        let h3_ip = Ipv4Addr::new(10, 0, 0, 3);
        assert!(!installer.installed_entries().any(|(s, _, ip, _)| s == sid(1) && ip == h3_ip));
        assert!(!installer.installed_entries().any(|(s, _, ip, _)| s == sid(2) && ip == h3_ip));
    }

    #[test]
    fn unreachable_switch_leaves_shadow_for_retry() {
        let t = linear_topology_with_hosts();
        let snap = t.snapshot();
        let routes = crate::spf::compute(&snap);
        let mut installer = HostRouteInstaller::new(0, 0);
        // s2 is not connected on this switch service: the entries meant for it fail and are not
        // recorded in the shadow, so the next sweep retries them.
        let mut switches = FakeSwitches::all_connected(&[sid(1), sid(3)]);
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);
        assert!(!installer.installed_entries().any(|(s, _, _, _)| s == sid(2)));
    }

    #[test]
    fn ip_change_withdraws_old_and_installs_new() {
        let mut t = linear_topology_with_hosts();
        let mut installer = HostRouteInstaller::new(0, 0);
        let mut switches = FakeSwitches::all_connected(&[sid(1), sid(2), sid(3)]);
        let snap = t.snapshot();
        let routes = crate::spf::compute(&snap);
        installer.sweep(&snap, &routes, t.epoch(), &mut switches);

        let mac1 = MacAddr::new([1, 1, 1, 1, 1, 1]);
        let new_ip = Ipv4Addr::new(10, 0, 0, 9);
        let cs = t.apply_host(
            "h1".into(),
            mac1,
            Some(new_ip),
            Some(AttachmentPoint { switch: sid(1), port: port(1) }),
            true,
        );
        let snap2 = t.snapshot();
        if let crate::topology::ChangeSet::HostChanged { device_key, new, .. } = cs {
            installer.update_host(&device_key, new, &snap2, &routes, t.epoch(), &mut switches);
        } else {
            panic!("expected HostChanged");
        }

        let old_ip = Ipv4Addr::new(10, 0, 0, 1);
        assert!(!installer.installed_entries().any(|(_, dk, ip, _)| dk == "h1" && ip == old_ip));
        assert!(installer.installed_entries().any(|(s, dk, ip, _)| s == sid(1) && dk == "h1" && ip == new_ip));
    }
}
