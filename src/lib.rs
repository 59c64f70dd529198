//! Control-plane core for a switch-fabric application providing two coupled services:
//!
//! - **Shortest-path switching (SPS):** per-host forwarding rules kept current as the topology
//!   changes (C1-C3).
//! - **Virtual-IP load balancing (LB):** VIP ARP resolution, TCP-SYN dispatch to a backend pool,
//!   and symmetric rewrite rules so the remainder of a flow bypasses the controller (C4-C6).
//!
//! [`dispatcher::Dispatcher`] (C7) is the single entry point: feed it [`dispatcher::CoreEvent`]s
//! as the host framework reports switch/link/host changes and packet-ins, and it drives
//! everything else. The core never talks to a wire transport directly; see [`flow::SwitchService`]
//! and [`flow::DeviceService`] for the seams it expects the host framework to provide.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod lb;
pub mod printer;
pub mod routes;
pub mod spf;
pub mod topology;
pub mod types;

use crate::types::TableId;

/// The SPS table id, exposed so the LB edge handler can emit `goto T_sps` and so callers layering
/// further tables above this pipeline know where SPS forwarding lives (§6).
pub trait RoutingOracle {
    /// The flow-table id that holds SPS entries (`T_sps`).
    fn sps_table(&self) -> TableId;
}

pub use config::ModuleConfig;
pub use dispatcher::{CoreEvent, Dispatcher};
pub use error::CoreError;
pub use lb::{FlowPipelineManager, LbEdgeHandler, LbRegistry, VipInstance};
pub use routes::HostRouteInstaller;
pub use spf::RouteTable;
pub use topology::{ChangeSet, TopologyStore};
