//! Event Dispatcher (C7, §4.7).
//!
//! A single logical event queue that serializes every inbound switch/link/host/packet-in event
//! and drives C1 through C6. Computation errors are logged and drop only the offending event;
//! flow-install failures are logged and leave the installed shadow untouched so the next sweep
//! retries (§7). Nothing here is fatal at runtime.

use crate::error::PacketError;
use crate::flow::{DeviceService, SwitchService};
use crate::lb::{FlowPipelineManager, LbEdgeHandler, LbRegistry};
use crate::routes::HostRouteInstaller;
use crate::spf::{self, RouteTable};
use crate::topology::{ChangeSet, TopologyStore};
use crate::types::{AttachmentPoint, DeviceKey, Ipv4Addr, MacAddr, PortNo, SwitchId};
use crate::RoutingOracle;
use log::debug;

/// One inbound event the host framework may deliver (§2 data flow, §4.7).
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A switch established (or lost) its control connection.
    SwitchUp { switch: SwitchId },
    /// A switch's control connection was torn down.
    SwitchDown { switch: SwitchId },
    /// A link between two switch ports came up.
    LinkUp { a: SwitchId, a_port: PortNo, b: SwitchId, b_port: PortNo },
    /// A link between two switch ports went down.
    LinkDown { a: SwitchId, a_port: PortNo, b: SwitchId, b_port: PortNo },
    /// A host was added or updated (including an attachment or IPv4 address change).
    HostUpdated { device_key: DeviceKey, mac: MacAddr, ipv4: Option<Ipv4Addr>, attached: Option<AttachmentPoint> },
    /// A host was removed.
    HostRemoved { device_key: DeviceKey },
    /// A packet arrived at the controller via a VIP catch rule.
    PacketIn { switch: SwitchId, in_port: PortNo, bytes: Vec<u8> },
}

/// C7: owns C1/C2/C3's live state and routes packet-ins to C5.
pub struct Dispatcher<S, D> {
    topology: TopologyStore,
    routes: RouteTable,
    installer: HostRouteInstaller,
    registry: LbRegistry,
    pipeline: FlowPipelineManager,
    edge: LbEdgeHandler,
    switches: S,
    devices: D,
}

impl<S, D> Dispatcher<S, D>
where
    S: SwitchService,
    D: DeviceService,
{
    /// Build a dispatcher. `sps_priority` is `P_default` (§3 I3/I4/I5), the priority every SPS
    /// entry is installed at.
    pub fn new(
        registry: LbRegistry,
        pipeline: FlowPipelineManager,
        edge: LbEdgeHandler,
        sps_priority: u16,
        switches: S,
        devices: D,
    ) -> Self {
        Self {
            topology: TopologyStore::new(),
            routes: RouteTable::default(),
            installer: HostRouteInstaller::new(pipeline.sps_table(), sps_priority),
            registry,
            pipeline,
            edge,
            switches,
            devices,
        }
    }

    /// Apply one event (§4.7): mutate C1, then drive whichever of C2/C3/C5 the resulting
    /// `ChangeSet` (or event kind) calls for.
    pub fn dispatch(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::SwitchUp { switch } => {
                let cs = self.topology.apply_switch(switch, true);
                self.pipeline.bring_up_switch(switch, &self.registry, &mut self.switches);
                self.on_change(cs);
            }
            CoreEvent::SwitchDown { switch } => {
                let cs = self.topology.apply_switch(switch, false);
                self.on_change(cs);
            }
            CoreEvent::LinkUp { a, a_port, b, b_port } => {
                let cs = self.topology.apply_link(a, a_port, b, b_port, true);
                self.on_change(cs);
            }
            CoreEvent::LinkDown { a, a_port, b, b_port } => {
                let cs = self.topology.apply_link(a, a_port, b, b_port, false);
                self.on_change(cs);
            }
            CoreEvent::HostUpdated { device_key, mac, ipv4, attached } => {
                let cs = self.topology.apply_host(device_key, mac, ipv4, attached, true);
                self.on_change(cs);
            }
            CoreEvent::HostRemoved { device_key } => {
                // mac/ipv4/attached are irrelevant on removal; apply_host only needs the key.
                let cs = self.topology.apply_host(device_key, MacAddr::new([0; 6]), None, None, false);
                self.on_change(cs);
            }
            CoreEvent::PacketIn { switch, in_port, bytes } => {
                if let Err(e) = self.edge.handle_packet_in(
                    switch,
                    in_port,
                    &bytes,
                    &self.registry,
                    &self.devices,
                    &self.pipeline,
                    &mut self.switches,
                ) {
                    self.log_packet_error(switch, e);
                }
            }
        }
    }

    fn on_change(&mut self, change: ChangeSet) {
        match change {
            ChangeSet::None => {}
            ChangeSet::TopoChanged => {
                let snapshot = self.topology.snapshot();
                self.routes = spf::compute(&snapshot);
                self.installer.sweep(&snapshot, &self.routes, snapshot.epoch(), &mut self.switches);
            }
            ChangeSet::HostChanged { device_key, new, .. } => {
                let snapshot = self.topology.snapshot();
                self.installer.update_host(&device_key, new, &snapshot, &self.routes, snapshot.epoch(), &mut self.switches);
            }
        }
    }

    fn log_packet_error(&self, switch: SwitchId, e: PacketError) {
        debug!("ProtocolViolation: dropping packet-in from {}: {}", switch, e);
    }

    /// Read-only access to the current route table, for the printer and tests.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Read-only access to the current installed-entry shadow, for the printer and tests.
    pub fn installer(&self) -> &HostRouteInstaller {
        &self.installer
    }
}
