//! Flow Pipeline Manager (C6, §4.6).
//!
//! Owns the bring-up of the two-table pipeline on every newly connected switch: the VIP
//! ARP/IPv4-catch rules and the table-miss default that hands unmatched traffic to the SPS table.
//! `T_lb` and `T_sps` are distinct, fixed table ids supplied at construction (§6 `table` config).

use super::registry::LbRegistry;
use super::{PRIORITY_DEFAULT, PRIORITY_VIP};
use crate::flow::{Action, FlowEntry, FlowMatch, SwitchService, ETH_TYPE_ARP, ETH_TYPE_IPV4};
use crate::types::{SwitchId, TableId};
use crate::RoutingOracle;
use log::warn;

/// C6: installs the LB-table scaffolding (VIP catch rules + SPS default) on each switch.
#[derive(Debug, Clone, Copy)]
pub struct FlowPipelineManager {
    lb_table: TableId,
    sps_table: TableId,
}

impl FlowPipelineManager {
    /// Build a manager for the given (distinct) LB and SPS table ids (§6, §7 `ConfigInvalid` if
    /// equal — callers are expected to have validated this via `ModuleConfig::load`).
    pub fn new(lb_table: TableId, sps_table: TableId) -> Self {
        Self { lb_table, sps_table }
    }

    /// The LB table id (`T_lb`).
    pub fn lb_table(&self) -> TableId {
        self.lb_table
    }

    /// Bring up the LB table scaffolding on a newly connected switch (§4.6). For each VIP:
    /// priority `P_vip` ARP-catch and IPv4-catch rules to the controller; then a priority
    /// `P_default` table-miss default that resubmits to `T_sps`.
    pub fn bring_up_switch(&self, switch: SwitchId, registry: &LbRegistry, switches: &mut dyn SwitchService) {
        for vip in registry.vips() {
            let arp_catch = FlowEntry::permanent(
                self.lb_table,
                PRIORITY_VIP,
                FlowMatch { eth_type: Some(ETH_TYPE_ARP), arp_tpa: Some(vip.vip), ..FlowMatch::any() },
                vec![Action::ToController],
            );
            if let Err(e) = switches.install_flow(switch, arp_catch) {
                warn!("SwitchUnavailable installing VIP ARP-catch on {}: {}", switch, e);
            }

            let ip_catch = FlowEntry::permanent(
                self.lb_table,
                PRIORITY_VIP,
                FlowMatch { eth_type: Some(ETH_TYPE_IPV4), ipv4_dst: Some(vip.vip), ..FlowMatch::any() },
                vec![Action::ToController],
            );
            if let Err(e) = switches.install_flow(switch, ip_catch) {
                warn!("SwitchUnavailable installing VIP IPv4-catch on {}: {}", switch, e);
            }
        }

        let default_entry = FlowEntry::permanent(
            self.lb_table,
            PRIORITY_DEFAULT,
            FlowMatch::any(),
            vec![Action::GotoTable(self.sps_table)],
        );
        if let Err(e) = switches.install_flow(switch, default_entry) {
            warn!("SwitchUnavailable installing table-miss default on {}: {}", switch, e);
        }
    }
}

impl RoutingOracle for FlowPipelineManager {
    fn sps_table(&self) -> TableId {
        self.sps_table
    }
}
