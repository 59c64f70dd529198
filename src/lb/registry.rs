//! LB Instance Registry (C4, §4.4).
//!
//! Parsed once from the `instances` configuration string. Read-mostly: the map from VIP to
//! `VipInstance` never changes after construction, and only a `VipInstance`'s round-robin cursor
//! mutates, under its own lock (§5).

use crate::error::ConfigError;
use crate::types::{Ipv4Addr, MacAddr};
use std::collections::HashMap;
use std::sync::Mutex;

/// A single load-balanced endpoint: a virtual IP/MAC pair fronting an ordered backend pool (§3).
#[derive(Debug)]
pub struct VipInstance {
    /// The virtual IP address clients connect to.
    pub vip: Ipv4Addr,
    /// The virtual MAC address advertised for `vip`.
    pub vmac: MacAddr,
    backends: Vec<Ipv4Addr>,
    cursor: Mutex<usize>,
}

impl VipInstance {
    fn new(vip: Ipv4Addr, vmac: MacAddr, backends: Vec<Ipv4Addr>) -> Self {
        Self { vip, vmac, backends, cursor: Mutex::new(0) }
    }

    /// The configured backend pool, in the order they were declared.
    pub fn backends(&self) -> &[Ipv4Addr] {
        &self.backends
    }

    /// Pick the next backend, strictly round-robin (§3, P3): returns `backends[cursor]`, then
    /// advances `cursor := (cursor + 1) mod len(backends)`. Selection is per-VIP, not per-client.
    /// Returns `None` if the pool is empty (cannot happen for a successfully parsed entry, but a
    /// registry built by hand for tests could construct one).
    pub fn next_backend(&self) -> Option<Ipv4Addr> {
        if self.backends.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().expect("VipInstance cursor lock poisoned");
        let chosen = self.backends[*cursor];
        *cursor = (*cursor + 1) % self.backends.len();
        Some(chosen)
    }
}

/// The parsed set of VIP instances (C4).
#[derive(Debug, Default)]
pub struct LbRegistry {
    instances: HashMap<Ipv4Addr, VipInstance>,
}

impl LbRegistry {
    /// Parse the `instances` configuration string (§4.4 grammar):
    /// `VIP_entry (";" VIP_entry)*` where `VIP_entry := IPv4 SP MAC SP IPv4 ("," IPv4)*`.
    ///
    /// Malformed entries are skipped and reported alongside the (possibly partial) registry; they
    /// never abort parsing of the remaining entries (§7 `ConfigInvalid`).
    pub fn parse(instances: &str) -> (Self, Vec<ConfigError>) {
        let mut registry = LbRegistry::default();
        let mut errors = Vec::new();
        for raw in instances.split(';') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match parse_entry(raw) {
                Ok(instance) => {
                    registry.instances.insert(instance.vip, instance);
                }
                Err(reason) => errors.push(ConfigError::MalformedEntry(raw.to_string(), reason)),
            }
        }
        (registry, errors)
    }

    /// Build a registry directly from already-constructed instances (test/embedding use).
    pub fn from_instances(instances: Vec<VipInstance>) -> Self {
        Self { instances: instances.into_iter().map(|i| (i.vip, i)).collect() }
    }

    /// Look up the VIP instance for a given virtual IP.
    pub fn get(&self, vip: Ipv4Addr) -> Option<&VipInstance> {
        self.instances.get(&vip)
    }

    /// Iterate all configured VIP instances.
    pub fn vips(&self) -> impl Iterator<Item = &VipInstance> {
        self.instances.values()
    }
}

fn parse_entry(raw: &str) -> Result<VipInstance, &'static str> {
    let mut parts = raw.split_whitespace();
    let vip = Ipv4Addr::parse(parts.next().ok_or("missing VIP address")?).ok_or("invalid VIP address")?;
    let vmac = MacAddr::parse(parts.next().ok_or("missing virtual MAC")?).ok_or("invalid virtual MAC")?;
    let backend_list = parts.next().ok_or("missing backend list")?;
    if parts.next().is_some() {
        return Err("unexpected trailing tokens after backend list");
    }
    let mut backends = Vec::new();
    for token in backend_list.split(',') {
        backends.push(Ipv4Addr::parse(token).ok_or("invalid backend address")?);
    }
    if backends.is_empty() {
        return Err("backend list is empty");
    }
    Ok(VipInstance::new(vip, vmac, backends))
}

#[cfg(test)]
mod test {
    use super::*;

    fn vip_ip() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 100)
    }

    #[test]
    fn parses_single_entry() {
        let (registry, errors) = LbRegistry::parse("10.0.0.100 02:00:00:00:00:64 10.0.0.1,10.0.0.2");
        assert!(errors.is_empty());
        let inst = registry.get(vip_ip()).expect("vip present");
        assert_eq!(inst.vmac, MacAddr::parse("02:00:00:00:00:64").unwrap());
        assert_eq!(inst.backends(), &[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
    }

    #[test]
    fn parses_multiple_entries_separated_by_semicolons() {
        let (registry, errors) =
            LbRegistry::parse("10.0.0.100 02:00:00:00:00:64 10.0.0.1;10.0.0.101 02:00:00:00:00:65 10.0.0.2");
        assert!(errors.is_empty());
        assert!(registry.get(vip_ip()).is_some());
        assert!(registry.get(Ipv4Addr::new(10, 0, 0, 101)).is_some());
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let (registry, errors) =
            LbRegistry::parse("not-an-entry;10.0.0.100 02:00:00:00:00:64 10.0.0.1");
        assert_eq!(errors.len(), 1);
        assert!(registry.get(vip_ip()).is_some());
    }

    #[test]
    fn round_robin_cycles_through_backends() {
        let (registry, _) = LbRegistry::parse("10.0.0.100 02:00:00:00:00:64 10.0.0.1,10.0.0.2,10.0.0.3");
        let inst = registry.get(vip_ip()).unwrap();
        let picks: Vec<Ipv4Addr> = (0..7).map(|_| inst.next_backend().unwrap()).collect();
        assert_eq!(
            picks,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
                Ipv4Addr::new(10, 0, 0, 1),
            ]
        );
    }
}
