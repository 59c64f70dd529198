//! Configuration loading (§6 "Configuration keys", SPEC_FULL.md §B).
//!
//! The core takes no dependency on any particular config-file format: every key is read through
//! an `impl Fn(&str) -> Option<String>`, so the host framework's real config map, a `HashMap`, or
//! a test fixture all work identically. The only fatal startup condition in the whole core is a
//! missing `table` key (§7); a malformed `instances` entry is logged and skipped per-entry (§4.4).

use crate::error::ConfigError;
use crate::lb::{FlowPipelineManager, LbRegistry};
use crate::types::TableId;

/// A single module's `table` configuration, read independently for the LB module and the SPS
/// module (§6: "LB reads its own `table`; SPS reads its own").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleConfig {
    /// The flow-table id this module was configured with.
    pub table: TableId,
}

impl ModuleConfig {
    /// Load a module's `table` key from `get`. Missing is fatal (§7); present-but-unparseable is
    /// reported as `ConfigError::InvalidTable`.
    pub fn load(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = get("table").ok_or(ConfigError::MissingTable)?;
        let table = raw.trim().parse::<TableId>().map_err(|_| ConfigError::InvalidTable(raw))?;
        Ok(Self { table })
    }
}

/// Load both modules' `table` keys and build the Flow Pipeline Manager (C6). Fails if either
/// `table` key is missing/unparseable, or if they resolve to the same id (§4.6: `T_lb` and `T_sps`
/// must be distinct).
pub fn load_pipeline(
    lb_table_source: impl Fn(&str) -> Option<String>,
    sps_table_source: impl Fn(&str) -> Option<String>,
) -> Result<FlowPipelineManager, ConfigError> {
    let lb = ModuleConfig::load(lb_table_source)?;
    let sps = ModuleConfig::load(sps_table_source)?;
    if lb.table == sps.table {
        return Err(ConfigError::TableCollision(lb.table));
    }
    Ok(FlowPipelineManager::new(lb.table, sps.table))
}

/// Load the `instances` key and parse it into an LB Instance Registry (§4.4). Malformed entries
/// are reported but never prevent the rest of the registry from loading.
pub fn load_registry(get: impl Fn(&str) -> Option<String>) -> (LbRegistry, Vec<ConfigError>) {
    match get("instances") {
        Some(raw) => LbRegistry::parse(&raw),
        None => (LbRegistry::default(), Vec::new()),
    }
}
