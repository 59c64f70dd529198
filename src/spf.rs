//! Shortest-Path Engine (C2, §4.2).
//!
//! Computes, for every connected switch, the next hop toward every other connected switch, using
//! unit-weight BFS (link weight is always 1 hop, §4.2 Non-goals exclude weighted/ECMP routing,
//! DESIGN.md Open Question 2). Ties are broken deterministically (I2): shortest distance first,
//! then ascending neighbor switch id, then ascending port.

use crate::topology::TopologySnapshot;
use crate::types::{NextHop, SwitchId};
use std::collections::{HashMap, VecDeque};

/// Next-hop table: `(src, dst) -> NextHop`. Only pairs with `src != dst` and a path between them
/// are present (I1: unreachable pairs simply have no entry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    next_hop: HashMap<(SwitchId, SwitchId), NextHop>,
}

impl RouteTable {
    /// Look up the next hop at `src` toward `dst`, if one exists.
    pub fn next_hop(&self, src: SwitchId, dst: SwitchId) -> Option<NextHop> {
        self.next_hop.get(&(src, dst)).copied()
    }

    /// Iterate over every `(src, dst, next_hop)` triple in the table.
    pub fn iter(&self) -> impl Iterator<Item = (SwitchId, SwitchId, NextHop)> + '_ {
        self.next_hop.iter().map(|(&(src, dst), &nh)| (src, dst, nh))
    }

    fn insert(&mut self, src: SwitchId, dst: SwitchId, nh: NextHop) {
        self.next_hop.insert((src, dst), nh);
    }
}

/// Recompute the full shortest-path table from a topology snapshot (§4.2).
///
/// Runs one BFS per connected switch as root. For each root, BFS gives the hop-distance to every
/// reachable switch; the next hop to use at the root is then the neighbor (of the root) that lies
/// on a shortest path, chosen by the I2 tie-break among all root-neighbors tied for the minimum
/// distance-to-target.
pub fn compute(snapshot: &TopologySnapshot) -> RouteTable {
    let mut table = RouteTable::default();
    for root in snapshot.connected_switch_ids() {
        compute_from_root(snapshot, root, &mut table);
    }
    table
}

fn compute_from_root(snapshot: &TopologySnapshot, root: SwitchId, table: &mut RouteTable) {
    // Distances from root to every reachable switch via plain BFS.
    let mut dist: HashMap<SwitchId, u32> = HashMap::new();
    dist.insert(root, 0);
    let mut queue: VecDeque<SwitchId> = VecDeque::new();
    queue.push_back(root);
    while let Some(u) = queue.pop_front() {
        let du = dist[&u];
        for (v, _port) in snapshot.neighbors_with_port(u) {
            if !dist.contains_key(&v) {
                dist.insert(v, du + 1);
                queue.push_back(v);
            }
        }
    }

    // The root's own first hops, sorted by the I2 tie-break: (neighbor id, port) ascending.
    let first_hops = snapshot.neighbors_with_port(root);

    for (dst, &d) in dist.iter() {
        if *dst == root || d == 0 {
            continue;
        }
        // Among the root's direct neighbors, find those that sit on a shortest path to dst: a
        // neighbor n is on a shortest path iff dist[n] + 1 == dist[dst]. Among those candidates,
        // the tie-break (I2) picks the smallest (neighbor id, port) pair; `first_hops` is already
        // sorted that way, so the first candidate found is the winner.
        let winner = first_hops.iter().find(|(n, _port)| dist.get(n).copied().map(|dn| dn + 1) == Some(d));
        if let Some(&(_n, port)) = winner {
            table.insert(root, *dst, NextHop { out_port: port });
        }
    }
}
