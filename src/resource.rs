//! Simulated resources: host CPUs, network links and disks.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityId;
use crate::config::SimulationConfig;
use crate::platform::{Platform, ResourceSpec};
use crate::solver::{ConstraintSpec, SharingPolicy};

/// Identifier of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a host (its CPU resource).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub(crate) ResourceId);

/// Identifier of a network link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub(crate) ResourceId);

/// Identifier of a disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiskId(pub(crate) ResourceId);

impl HostId {
    /// Returns the underlying resource id.
    pub fn resource(self) -> ResourceId {
        self.0
    }
}

impl LinkId {
    /// Returns the underlying resource id.
    pub fn resource(self) -> ResourceId {
        self.0
    }
}

impl DiskId {
    /// Returns the underlying resource id.
    pub fn resource(self) -> ResourceId {
        self.0
    }
}

impl From<HostId> for ResourceId {
    fn from(id: HostId) -> Self {
        id.0
    }
}

impl From<LinkId> for ResourceId {
    fn from(id: LinkId) -> Self {
        id.0
    }
}

impl From<DiskId> for ResourceId {
    fn from(id: DiskId) -> Self {
        id.0
    }
}

/// Kind of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// CPU of a host, capacity in flops per second per core.
    Cpu,
    /// Network link, capacity in bytes per second.
    Link,
    /// Disk, capacity in bytes per second.
    Disk,
}

/// On/off state of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource accepts and serves claims.
    On,
    /// Resource is turned off: all its claims failed and new ones are refused.
    Off,
}

/// Requested change of a resource, applied by the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ResourceChange {
    TurnOn,
    TurnOff,
    Scale(f64),
}

#[derive(Clone, Debug)]
pub(crate) enum ResourceDetail {
    Cpu { cores: u32 },
    Link { latency: f64 },
    Disk { host: HostId },
}

/// Slot indices of disk constraints.
pub(crate) const DISK_GLOBAL: usize = 0;
pub(crate) const DISK_READ: usize = 1;
pub(crate) const DISK_WRITE: usize = 2;

/// A capacity of a resource as seen by the solver.
#[derive(Clone, Debug)]
pub(crate) struct Constraint {
    pub nominal: f64,
    pub policy: SharingPolicy,
    pub concurrency_limit: Option<usize>,
    pub usage: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub detail: ResourceDetail,
    /// Nominal capacity: speed of one core, link bandwidth or disk read bandwidth.
    pub capacity: f64,
    pub scale: f64,
    pub state: ResourceState,
    pub constraints: Vec<Constraint>,
    /// Attached activities in claim order.
    pub claims: BTreeMap<u64, ActivityId>,
}

impl Resource {
    pub fn is_on(&self) -> bool {
        self.state == ResourceState::On
    }

    /// Current capacity of a constraint, zero when the resource is off.
    pub fn effective_bound(&self, slot: usize) -> f64 {
        if self.is_on() {
            self.constraints[slot].nominal * self.scale
        } else {
            0.
        }
    }

    pub fn constraint_spec(&self, slot: usize) -> ConstraintSpec {
        let constraint = &self.constraints[slot];
        ConstraintSpec {
            bound: self.effective_bound(slot),
            policy: constraint.policy,
            concurrency_limit: constraint.concurrency_limit,
        }
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            state: self.state,
            capacity: self.capacity,
            scale: self.scale,
            usage: self.constraints.first().map_or(0., |c| c.usage),
            claims: self.claims.len(),
            cores: match self.detail {
                ResourceDetail::Cpu { cores } => Some(cores),
                _ => None,
            },
            host: match self.detail {
                ResourceDetail::Disk { host } => Some(host),
                _ => None,
            },
        }
    }
}

/// Snapshot of a resource state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceInfo {
    /// Resource id.
    pub id: ResourceId,
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// On/off state.
    pub state: ResourceState,
    /// Nominal capacity (per core for CPUs, read bandwidth for disks).
    pub capacity: f64,
    /// Current capacity multiplier.
    pub scale: f64,
    /// Capacity currently consumed by the activities (all cores for CPUs, total bandwidth for disks).
    pub usage: f64,
    /// Number of activities currently attached.
    pub claims: usize,
    /// Number of cores of a host.
    pub cores: Option<u32>,
    /// Host to which a disk is attached.
    pub host: Option<HostId>,
}

/// Links crossed by a communication and the total latency.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Route {
    pub links: Vec<LinkId>,
    pub latency: f64,
}

/// Immutable topology plus the mutable state of every resource.
pub(crate) struct ResourceTable {
    pub resources: Vec<Resource>,
    routes: FxHashMap<(HostId, HostId), Vec<LinkId>>,
    pub loopback: LinkId,
    names: FxHashMap<String, ResourceId>,
}

impl ResourceTable {
    pub fn from_platform(platform: Platform, config: &SimulationConfig) -> Self {
        let (specs, routes) = platform.into_parts();
        let mut resources = Vec::with_capacity(specs.len() + 1);
        let mut names = FxHashMap::default();
        for (i, (name, spec)) in specs.into_iter().enumerate() {
            let id = ResourceId(i as u32);
            names.insert(name.clone(), id);
            resources.push(Self::build_resource(id, name, spec, config));
        }

        let loopback = LinkId(ResourceId(resources.len() as u32));
        let mut loopback_resource = Self::build_resource(
            loopback.0,
            "__loopback__".to_string(),
            ResourceSpec::Link(
                crate::platform::LinkSpec::new(config.network.loopback_bandwidth, config.network.loopback_latency)
                    .with_policy(SharingPolicy::FatPipe),
            ),
            config,
        );
        loopback_resource.constraints[0].concurrency_limit = None;
        resources.push(loopback_resource);

        Self {
            resources,
            routes,
            loopback,
            names,
        }
    }

    fn build_resource(id: ResourceId, name: String, spec: ResourceSpec, config: &SimulationConfig) -> Resource {
        let constraint = |nominal: f64, policy: SharingPolicy, limit: Option<usize>| Constraint {
            nominal,
            policy,
            concurrency_limit: limit.or(config.concurrency_limit),
            usage: 0.,
        };
        let (kind, detail, capacity, constraints) = match spec {
            ResourceSpec::Host(host) => (
                ResourceKind::Cpu,
                ResourceDetail::Cpu { cores: host.cores },
                host.speed,
                vec![constraint(
                    host.speed * host.cores as f64,
                    SharingPolicy::Shared,
                    host.concurrency_limit,
                )],
            ),
            ResourceSpec::Link(link) => (
                ResourceKind::Link,
                ResourceDetail::Link { latency: link.latency },
                link.bandwidth,
                vec![constraint(link.bandwidth, link.policy, link.concurrency_limit)],
            ),
            ResourceSpec::Disk(host, disk) => (
                ResourceKind::Disk,
                ResourceDetail::Disk { host },
                disk.read_bandwidth,
                vec![
                    constraint(
                        disk.read_bandwidth.max(disk.write_bandwidth),
                        SharingPolicy::Shared,
                        disk.concurrency_limit,
                    ),
                    constraint(disk.read_bandwidth, SharingPolicy::Shared, None),
                    constraint(disk.write_bandwidth, SharingPolicy::Shared, None),
                ],
            ),
        };
        Resource {
            id,
            name,
            kind,
            detail,
            capacity,
            scale: 1.,
            state: ResourceState::On,
            constraints,
            claims: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.index())
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id.index())
    }

    pub fn name(&self, id: ResourceId) -> &str {
        self.get(id).map_or("?", |r| r.name.as_str())
    }

    pub fn lookup(&self, name: &str) -> Option<ResourceId> {
        self.names.get(name).copied()
    }

    pub fn is_on(&self, id: ResourceId) -> bool {
        self.get(id).is_some_and(Resource::is_on)
    }

    pub fn is_host(&self, id: HostId) -> bool {
        self.get(id.0).is_some_and(|r| r.kind == ResourceKind::Cpu)
    }

    pub fn is_disk(&self, id: DiskId) -> bool {
        self.get(id.0).is_some_and(|r| r.kind == ResourceKind::Disk)
    }

    pub fn hosts(&self) -> impl Iterator<Item = HostId> + '_ {
        self.resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Cpu)
            .map(|r| HostId(r.id))
    }

    /// Current speed of a single core of the host.
    pub fn core_speed(&self, host: HostId) -> f64 {
        self.get(host.0).map_or(0., |r| if r.is_on() { r.capacity * r.scale } else { 0. })
    }

    pub fn link_latency(&self, link: LinkId) -> f64 {
        match self.get(link.0).map(|r| &r.detail) {
            Some(ResourceDetail::Link { latency }) => *latency,
            _ => 0.,
        }
    }

    pub fn link_bandwidth(&self, link: LinkId) -> f64 {
        self.get(link.0).map_or(0., |r| r.capacity * r.scale)
    }

    /// Returns the route between two hosts. Without an explicit route, a host reaches itself via the loopback link.
    pub fn route(&self, src: HostId, dst: HostId) -> Option<Route> {
        let links = match self.routes.get(&(src, dst)) {
            Some(links) => links.clone(),
            None if src == dst => vec![self.loopback],
            None => return None,
        };
        let latency = links.iter().map(|&link| self.link_latency(link)).sum();
        Some(Route { links, latency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DiskSpec, HostSpec, LinkSpec};

    #[test]
    fn table_is_built_from_platform() {
        let mut platform = Platform::new();
        let h1 = platform.add_host("h1", HostSpec::new(1e9).with_cores(4)).unwrap();
        let h2 = platform.add_host("h2", HostSpec::new(2e9)).unwrap();
        let link = platform.add_link("l", LinkSpec::new(1e8, 1e-3)).unwrap();
        let disk = platform.add_disk("d", h1, DiskSpec::new(2e8, 1e8)).unwrap();
        platform.add_route(h1, h2, &[link], true).unwrap();

        let table = ResourceTable::from_platform(platform, &SimulationConfig::default());
        assert_eq!(table.resources[h1.0.index()].effective_bound(0), 4e9);
        assert_eq!(table.core_speed(h2), 2e9);
        assert_eq!(table.resources[h1.0.index()].info().cores, Some(4));
        assert_eq!(table.resources[disk.0.index()].info().host, Some(h1));
        assert_eq!(table.resources[link.0.index()].info().cores, None);
        assert_eq!(table.resources[disk.0.index()].effective_bound(DISK_GLOBAL), 2e8);
        assert_eq!(table.resources[disk.0.index()].effective_bound(DISK_WRITE), 1e8);
        assert_eq!(table.lookup("l"), Some(link.0));

        let route = table.route(h2, h1).unwrap();
        assert_eq!(route.links, vec![link]);
        assert_eq!(route.latency, 1e-3);
        let local = table.route(h1, h1).unwrap();
        assert_eq!(local.links, vec![table.loopback]);
    }

    #[test]
    fn off_resource_has_no_capacity() {
        let mut platform = Platform::new();
        let host = platform.add_host("h", HostSpec::new(10.)).unwrap();
        let mut table = ResourceTable::from_platform(platform, &SimulationConfig::default());
        let resource = table.get_mut(host.0).unwrap();
        resource.state = ResourceState::Off;
        assert_eq!(resource.effective_bound(0), 0.);
        assert_eq!(table.core_speed(host), 0.);
    }
}
