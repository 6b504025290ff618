//! Network preparation for VMware-style providers: suggest /24 guest
//! networks that cover the addresses seen on hosts, or grow around VM seed
//! addresses, without overlapping networks that already exist.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::Serialize;
use tracing::debug;

use crate::engine::Engine;
use crate::error::Result;
use crate::query::ResourceQuery;

pub const NET_MASK: u8 = 24;

// ─── Range Pool ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub start: u32,
    pub end: u32,
    /// Owning network id; empty for ranges claimed by a suggestion.
    pub id: String,
}

/// Non-overlapping address ranges keyed by first address.
#[derive(Debug, Clone, Default)]
pub struct IpRangePool {
    ranges: BTreeMap<u32, PoolEntry>,
}

impl IpRangePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, start: Ipv4Addr, end: Ipv4Addr, id: &str) {
        let (start, end) = (u32::from(start), u32::from(end));
        let (start, end) = (start.min(end), start.max(end));
        self.ranges.insert(
            start,
            PoolEntry {
                start,
                end,
                id: id.to_string(),
            },
        );
    }

    /// The range containing `ip`, if any.
    pub fn get(&self, ip: Ipv4Addr) -> Option<&PoolEntry> {
        let ip = u32::from(ip);
        self.ranges
            .range(..=ip)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| ip <= entry.end)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.get(ip).is_some()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Seed a pool from the `network` records in the store.
pub async fn pool_from_store(engine: &Engine) -> Result<IpRangePool> {
    let query = ResourceQuery::new(engine.spec("network")?);
    let mut pool = IpRangePool::new();
    for network in engine.store.fetch(&query).await? {
        let start = network.attr_str("guest_ip_start").and_then(|s| s.parse().ok());
        let end = network.attr_str("guest_ip_end").and_then(|s| s.parse().ok());
        match (start, end) {
            (Some(start), Some(end)) => pool.insert(start, end, &network.id),
            _ => debug!(network = %network.id, "Skipping network without an ip range"),
        }
    }
    Ok(pool)
}

// ─── Suggestions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetConf {
    pub guest_ip_start: String,
    pub guest_ip_end: String,
    pub guest_ip_mask: u8,
    pub guest_gateway: String,
}

pub struct NetPrep {
    pool: IpRangePool,
    /// Addresses used by something other than the hosts being covered.
    occupied: BTreeSet<u32>,
    gateway_last_octet: u8,
}

impl NetPrep {
    pub fn new(pool: IpRangePool, gateway_last_octet: u8) -> Self {
        Self {
            pool,
            occupied: BTreeSet::new(),
            gateway_last_octet,
        }
    }

    pub fn occupy(&mut self, ip: Ipv4Addr) {
        self.occupied.insert(u32::from(ip));
    }

    pub fn pool(&self) -> &IpRangePool {
        &self.pool
    }

    fn conf(&self, start: u32, end: u32) -> NetConf {
        let net = start & 0xFFFF_FF00;
        NetConf {
            guest_ip_start: Ipv4Addr::from(start).to_string(),
            guest_ip_end: Ipv4Addr::from(end).to_string(),
            guest_ip_mask: NET_MASK,
            guest_gateway: Ipv4Addr::from(net + u32::from(self.gateway_last_octet)).to_string(),
        }
    }

    /// Suggest one network per run of consecutive host addresses inside the
    /// same /24. The range is exactly the run. Addresses an existing range
    /// already covers are left out.
    pub fn suggest_hosts(&mut self, ips: &[Ipv4Addr]) -> Vec<NetConf> {
        let wanted: Vec<u32> = ips
            .iter()
            .map(|ip| u32::from(*ip))
            .filter(|ip| !self.pool.contains(Ipv4Addr::from(*ip)))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();

        let mut runs: Vec<(u32, u32)> = Vec::new();
        for ip in wanted {
            match runs.last_mut() {
                Some((start, end)) if *end + 1 == ip && (*start & 0xFFFF_FF00) == (ip & 0xFFFF_FF00) => *end = ip,
                _ => runs.push((ip, ip)),
            }
        }

        runs.into_iter()
            .map(|(start, end)| {
                let conf = self.conf(start, end);
                debug!(start = %conf.guest_ip_start, end = %conf.guest_ip_end, "Suggested host network");
                self.pool.insert(Ipv4Addr::from(start), Ipv4Addr::from(end), "");
                conf
            })
            .collect()
    }

    /// Suggest networks covering `ips`. Each uncovered address grows into
    /// the widest run inside its /24 that stops short of existing ranges and
    /// occupied addresses; other requested addresses are absorbed by the run.
    /// Suggested ranges join the pool so later calls do not overlap them.
    pub fn suggest(&mut self, ips: &[Ipv4Addr]) -> Vec<NetConf> {
        let wanted: BTreeSet<u32> = ips.iter().map(|ip| u32::from(*ip)).collect();
        let mut out = Vec::new();
        for &ip in &wanted {
            if self.pool.contains(Ipv4Addr::from(ip)) {
                continue;
            }
            let net = ip & 0xFFFF_FF00;
            let (low, high) = (net + 1, net + 254);

            let blocked = |addr: u32| {
                self.pool.contains(Ipv4Addr::from(addr))
                    || (self.occupied.contains(&addr) && !wanted.contains(&addr))
            };
            let mut start = ip;
            while start > low && !blocked(start - 1) {
                start -= 1;
            }
            let mut end = ip;
            while end < high && !blocked(end + 1) {
                end += 1;
            }

            let conf = self.conf(start, end);
            debug!(start = %conf.guest_ip_start, end = %conf.guest_ip_end, "Suggested network");
            self.pool.insert(Ipv4Addr::from(start), Ipv4Addr::from(end), "");
            out.push(conf);
        }
        out
    }
}
