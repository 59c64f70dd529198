//! Topology Store (C1, §4.1).
//!
//! Holds switches, links and hosts, and applies deltas from the event stream. Every mutation
//! returns a [`ChangeSet`] telling the caller what downstream recomputation is needed. All reads
//! elsewhere in the crate go through a [`TopologySnapshot`] obtained via [`TopologyStore::snapshot`].

use crate::types::{AttachmentPoint, DeviceKey, Epoch, Ipv4Addr, MacAddr, PortNo, SwitchId};
use log::debug;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::HashMap;
use std::sync::Arc;

/// A switch known to the store (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// The switch's id.
    pub id: SwitchId,
    /// Whether the switch currently has an active control connection.
    pub connected: bool,
}

/// An undirected link, as observed (§3). Stored internally as two directed half-links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// One endpoint.
    pub a: SwitchId,
    /// Port on `a`.
    pub a_port: PortNo,
    /// The other endpoint.
    pub b: SwitchId,
    /// Port on `b`.
    pub b_port: PortNo,
}

/// A host known to the store (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Opaque key assigned by the device framework.
    pub device_key: DeviceKey,
    /// The host's MAC address.
    pub mac: MacAddr,
    /// The host's IPv4 address, if known.
    pub ipv4: Option<Ipv4Addr>,
    /// Where the host is attached, if known.
    pub attached: Option<AttachmentPoint>,
}

impl Host {
    /// A host is routable iff it has both an IPv4 address and a known attachment point (§3).
    pub fn route_info(&self) -> Option<HostRouteInfo> {
        match (self.ipv4, self.attached) {
            (Some(ipv4), Some(attached)) => Some(HostRouteInfo { ipv4, attached }),
            _ => None,
        }
    }
}

/// The routable projection of a [`Host`]: present only when the host is routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRouteInfo {
    /// The host's IPv4 address.
    pub ipv4: Ipv4Addr,
    /// Where the host is attached.
    pub attached: AttachmentPoint,
}

/// What downstream recomputation a mutation requires (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    /// Nothing changed; no recomputation needed.
    None,
    /// The topology graph changed: re-run the shortest-path engine (C2) and sweep (C3).
    TopoChanged,
    /// A single host's routable state changed: C3 should reconcile only this host, given its
    /// previous and new routable projection (handles the IP-change open question, DESIGN.md).
    HostChanged {
        /// Which host changed.
        device_key: DeviceKey,
        /// The host's routable projection before this mutation, if it was routable.
        old: Option<HostRouteInfo>,
        /// The host's routable projection after this mutation, if it is now routable.
        new: Option<HostRouteInfo>,
    },
}

fn normalize_pair(x: SwitchId, y: SwitchId) -> (SwitchId, SwitchId) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// The mutable topology store (C1).
#[derive(Debug, Clone)]
pub struct TopologyStore {
    graph: DiGraphMap<SwitchId, PortNo>,
    switches: HashMap<SwitchId, Switch>,
    links: HashMap<(SwitchId, SwitchId), Link>,
    hosts: HashMap<DeviceKey, Host>,
    epoch: Epoch,
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyStore {
    /// Create an empty topology store.
    pub fn new() -> Self {
        Self {
            graph: DiGraphMap::new(),
            switches: HashMap::new(),
            links: HashMap::new(),
            hosts: HashMap::new(),
            epoch: Epoch::default(),
        }
    }

    /// Current topology epoch (§5, GLOSSARY).
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Apply a switch-added (`up = true`) or switch-removed (`up = false`) event (§4.1).
    pub fn apply_switch(&mut self, id: SwitchId, up: bool) -> ChangeSet {
        if up {
            if self.switches.contains_key(&id) {
                return ChangeSet::None;
            }
            self.graph.add_node(id);
            self.switches.insert(id, Switch { id, connected: true });
            self.epoch = self.epoch.next();
            ChangeSet::TopoChanged
        } else {
            if self.switches.remove(&id).is_none() {
                return ChangeSet::None;
            }
            self.graph.remove_node(id);
            self.links.retain(|_, l| l.a != id && l.b != id);
            self.epoch = self.epoch.next();
            ChangeSet::TopoChanged
        }
    }

    /// Apply a link-up or link-down event (§4.1). Idempotent: re-applying an identical up event,
    /// or a down event for a link that is already absent, is a no-op.
    ///
    /// If either endpoint switch is not yet known, the link is still recorded and the graph edges
    /// are still added (buffered); the shortest-path engine simply will not route through a switch
    /// it has not seen a `switch-added` for, so the link becomes usable once the switch appears
    /// (§7 `TopologyInconsistent`).
    pub fn apply_link(&mut self, x: SwitchId, xp: PortNo, y: SwitchId, yp: PortNo, up: bool) -> ChangeSet {
        let (a, b) = normalize_pair(x, y);
        let (a_port, b_port) = if a == x { (xp, yp) } else { (yp, xp) };
        let key = (a, b);

        if up {
            let new_link = Link { a, a_port, b, b_port };
            if self.links.get(&key) == Some(&new_link) {
                return ChangeSet::None;
            }
            if !self.switches.contains_key(&a) {
                debug!("buffering link to unknown switch {}", a);
            }
            if !self.switches.contains_key(&b) {
                debug!("buffering link to unknown switch {}", b);
            }
            self.graph.add_node(a);
            self.graph.add_node(b);
            self.graph.add_edge(a, b, a_port);
            self.graph.add_edge(b, a, b_port);
            self.links.insert(key, new_link);
            self.epoch = self.epoch.next();
            ChangeSet::TopoChanged
        } else {
            if self.links.remove(&key).is_none() {
                return ChangeSet::None;
            }
            self.graph.remove_edge(a, b);
            self.graph.remove_edge(b, a);
            self.epoch = self.epoch.next();
            ChangeSet::TopoChanged
        }
    }

    /// Apply a host add/update/remove event (§4.1). `present = false` removes the host.
    pub fn apply_host(
        &mut self,
        device_key: DeviceKey,
        mac: MacAddr,
        ipv4: Option<Ipv4Addr>,
        attached: Option<AttachmentPoint>,
        present: bool,
    ) -> ChangeSet {
        let old = self.hosts.get(&device_key).and_then(Host::route_info);

        if !present {
            self.hosts.remove(&device_key);
            return match old {
                Some(_) => {
                    self.epoch = self.epoch.next();
                    ChangeSet::HostChanged { device_key, old, new: None }
                }
                None => ChangeSet::None,
            };
        }

        let host = Host { device_key: device_key.clone(), mac, ipv4, attached };
        let new = host.route_info();
        self.hosts.insert(device_key.clone(), host);

        if old == new {
            ChangeSet::None
        } else {
            self.epoch = self.epoch.next();
            ChangeSet::HostChanged { device_key, old, new }
        }
    }

    /// Take a read-only, structurally-shared snapshot for C2/C3 to compute against.
    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot(Arc::new(SnapshotData {
            graph: self.graph.clone(),
            switches: self.switches.clone(),
            hosts: self.hosts.clone(),
            epoch: self.epoch,
        }))
    }

    /// Look up a host by device key.
    pub fn host(&self, device_key: &str) -> Option<&Host> {
        self.hosts.get(device_key)
    }

    /// Iterate over all known hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }
}

#[derive(Debug)]
struct SnapshotData {
    graph: DiGraphMap<SwitchId, PortNo>,
    switches: HashMap<SwitchId, Switch>,
    hosts: HashMap<DeviceKey, Host>,
    epoch: Epoch,
}

/// An immutable, structurally-shared view of the topology at one instant (§4.1, §5).
#[derive(Debug, Clone)]
pub struct TopologySnapshot(Arc<SnapshotData>);

impl TopologySnapshot {
    /// The epoch this snapshot was taken at.
    pub fn epoch(&self) -> Epoch {
        self.0.epoch
    }

    /// Whether a switch is currently connected.
    pub fn is_connected(&self, switch: SwitchId) -> bool {
        self.0.switches.get(&switch).map(|s| s.connected).unwrap_or(false)
    }

    /// All connected switch ids, sorted ascending for deterministic iteration (I2).
    pub fn connected_switch_ids(&self) -> Vec<SwitchId> {
        let mut ids: Vec<SwitchId> = self.0.switches.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Outgoing neighbors of a connected switch, with the port used to reach each, sorted by
    /// `(neighbor id, port)` for deterministic tie-breaking (I2).
    pub fn neighbors_with_port(&self, switch: SwitchId) -> Vec<(SwitchId, PortNo)> {
        let mut out: Vec<(SwitchId, PortNo)> = self
            .0
            .graph
            .neighbors_directed(switch, Direction::Outgoing)
            .filter(|n| self.is_connected(*n))
            .map(|n| (n, *self.0.graph.edge_weight(switch, n).unwrap()))
            .collect();
        out.sort();
        out
    }

    /// Incoming neighbors of a connected switch, with the port each uses to reach it.
    pub fn predecessors_with_port(&self, switch: SwitchId) -> Vec<(SwitchId, PortNo)> {
        let mut out: Vec<(SwitchId, PortNo)> = self
            .0
            .graph
            .neighbors_directed(switch, Direction::Incoming)
            .filter(|n| self.is_connected(*n))
            .map(|n| (n, *self.0.graph.edge_weight(n, switch).unwrap()))
            .collect();
        out.sort();
        out
    }

    /// All hosts known at this snapshot.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.0.hosts.values()
    }

    /// Look up a single host by device key.
    pub fn host(&self, device_key: &str) -> Option<&Host> {
        self.0.hosts.get(device_key)
    }
}
