//! Platform description: hosts, links, disks, routes and profiles.
//!
//! The platform is built in code before the simulation starts and is consumed by [`Simulation`](crate::Simulation)
//! as an immutable topology. Routes are explicit lists of links, there is no routing algorithm.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::profile::{Profile, ProfileTarget};
use crate::resource::{DiskId, HostId, LinkId, ResourceId};
use crate::solver::SharingPolicy;

/// Description of a host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Speed of one core in flops per second.
    pub speed: f64,
    /// Number of cores.
    pub cores: u32,
    /// Maximum number of activities computing on the host simultaneously.
    pub concurrency_limit: Option<usize>,
}

impl HostSpec {
    /// Creates single-core host with the given speed.
    pub fn new(speed: f64) -> Self {
        Self {
            speed,
            cores: 1,
            concurrency_limit: None,
        }
    }

    /// Sets the number of cores.
    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    /// Sets the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

/// Description of a network link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Bandwidth in bytes per second.
    pub bandwidth: f64,
    /// Latency in seconds.
    pub latency: f64,
    /// Sharing policy.
    pub policy: SharingPolicy,
    /// Maximum number of communications crossing the link simultaneously.
    pub concurrency_limit: Option<usize>,
}

impl LinkSpec {
    /// Creates shared link.
    pub fn new(bandwidth: f64, latency: f64) -> Self {
        Self {
            bandwidth,
            latency,
            policy: SharingPolicy::Shared,
            concurrency_limit: None,
        }
    }

    /// Sets the sharing policy.
    pub fn with_policy(mut self, policy: SharingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

/// Description of a disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Read bandwidth in bytes per second.
    pub read_bandwidth: f64,
    /// Write bandwidth in bytes per second.
    pub write_bandwidth: f64,
    /// Maximum number of I/O operations served simultaneously.
    pub concurrency_limit: Option<usize>,
}

impl DiskSpec {
    /// Creates disk with the given bandwidths.
    pub fn new(read_bandwidth: f64, write_bandwidth: f64) -> Self {
        Self {
            read_bandwidth,
            write_bandwidth,
            concurrency_limit: None,
        }
    }

    /// Sets the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ResourceSpec {
    Host(HostSpec),
    Link(LinkSpec),
    Disk(HostId, DiskSpec),
}

/// A profile attached to a resource.
#[derive(Clone, Debug)]
pub(crate) struct AttachedProfile {
    pub resource: ResourceId,
    pub target: ProfileTarget,
    pub profile: Profile,
}

/// Platform description.
#[derive(Clone, Debug, Default)]
pub struct Platform {
    resources: Vec<(String, ResourceSpec)>,
    names: FxHashMap<String, ResourceId>,
    routes: FxHashMap<(HostId, HostId), Vec<LinkId>>,
    profiles: Vec<AttachedProfile>,
}

impl Platform {
    /// Creates empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_resource(&mut self, name: &str, spec: ResourceSpec) -> Result<ResourceId, PlatformError> {
        if self.names.contains_key(name) {
            return Err(PlatformError::DuplicateName(name.to_string()));
        }
        let id = ResourceId(self.resources.len() as u32);
        self.names.insert(name.to_string(), id);
        self.resources.push((name.to_string(), spec));
        Ok(id)
    }

    fn check_positive(name: &str, what: &'static str, value: f64) -> Result<(), PlatformError> {
        if value.is_finite() && value > 0. {
            Ok(())
        } else {
            Err(PlatformError::InvalidCapacity {
                name: name.to_string(),
                what,
                value,
            })
        }
    }

    /// Adds host.
    pub fn add_host(&mut self, name: &str, spec: HostSpec) -> Result<HostId, PlatformError> {
        Self::check_positive(name, "speed", spec.speed)?;
        Self::check_positive(name, "cores", spec.cores as f64)?;
        self.add_resource(name, ResourceSpec::Host(spec)).map(HostId)
    }

    /// Adds link.
    pub fn add_link(&mut self, name: &str, spec: LinkSpec) -> Result<LinkId, PlatformError> {
        Self::check_positive(name, "bandwidth", spec.bandwidth)?;
        if !(spec.latency.is_finite() && spec.latency >= 0.) {
            return Err(PlatformError::InvalidCapacity {
                name: name.to_string(),
                what: "latency",
                value: spec.latency,
            });
        }
        self.add_resource(name, ResourceSpec::Link(spec)).map(LinkId)
    }

    /// Adds disk attached to the host.
    pub fn add_disk(&mut self, name: &str, host: HostId, spec: DiskSpec) -> Result<DiskId, PlatformError> {
        self.check_host(host)?;
        Self::check_positive(name, "read bandwidth", spec.read_bandwidth)?;
        Self::check_positive(name, "write bandwidth", spec.write_bandwidth)?;
        self.add_resource(name, ResourceSpec::Disk(host, spec)).map(DiskId)
    }

    /// Declares the links crossed by communications from `src` to `dst`, and back if `symmetric`.
    ///
    /// A route from a host to itself overrides the loopback link.
    pub fn add_route(&mut self, src: HostId, dst: HostId, links: &[LinkId], symmetric: bool) -> Result<(), PlatformError> {
        self.check_host(src)?;
        self.check_host(dst)?;
        for &link in links {
            match self.resources.get(link.0.index()) {
                Some((_, ResourceSpec::Link(_))) => {}
                _ => return Err(PlatformError::UnknownResource(format!("link {:?}", link))),
            }
        }
        self.routes.insert((src, dst), links.to_vec());
        if symmetric {
            let mut reversed = links.to_vec();
            reversed.reverse();
            self.routes.insert((dst, src), reversed);
        }
        Ok(())
    }

    /// Attaches a profile to a resource.
    pub fn add_profile<R: Into<ResourceId>>(
        &mut self,
        resource: R,
        target: ProfileTarget,
        profile: Profile,
    ) -> Result<(), PlatformError> {
        let resource = resource.into();
        if resource.index() >= self.resources.len() {
            return Err(PlatformError::UnknownResource(format!("{:?}", resource)));
        }
        if target == ProfileTarget::Scale && profile.points().iter().any(|&(_, value)| value <= 0.) {
            return Err(PlatformError::InvalidProfile(
                "scale values must be positive, use a state profile to turn resources off".to_string(),
            ));
        }
        self.profiles.push(AttachedProfile {
            resource,
            target,
            profile,
        });
        Ok(())
    }

    fn check_host(&self, host: HostId) -> Result<(), PlatformError> {
        match self.resources.get(host.0.index()) {
            Some((_, ResourceSpec::Host(_))) => Ok(()),
            _ => Err(PlatformError::UnknownResource(format!("host {:?}", host))),
        }
    }

    /// Returns resource id by name.
    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.names.get(name).copied()
    }

    /// Returns host id by name.
    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        let id = self.resource_by_name(name)?;
        matches!(self.resources[id.index()].1, ResourceSpec::Host(_)).then_some(HostId(id))
    }

    /// Returns link id by name.
    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        let id = self.resource_by_name(name)?;
        matches!(self.resources[id.index()].1, ResourceSpec::Link(_)).then_some(LinkId(id))
    }

    /// Returns disk id by name.
    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        let id = self.resource_by_name(name)?;
        matches!(self.resources[id.index()].1, ResourceSpec::Disk(..)).then_some(DiskId(id))
    }

    pub(crate) fn profiles(&self) -> &[AttachedProfile] {
        &self.profiles
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn into_parts(self) -> (Vec<(String, ResourceSpec)>, FxHashMap<(HostId, HostId), Vec<LinkId>>) {
        (self.resources, self.routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_must_be_unique() {
        let mut platform = Platform::new();
        platform.add_host("a", HostSpec::new(1.)).unwrap();
        assert_eq!(
            platform.add_link("a", LinkSpec::new(1., 0.)),
            Err(PlatformError::DuplicateName("a".to_string()))
        );
    }

    #[test]
    fn capacities_are_validated() {
        let mut platform = Platform::new();
        assert!(platform.add_host("h", HostSpec::new(0.)).is_err());
        assert!(platform.add_host("h", HostSpec::new(1.).with_cores(0)).is_err());
        assert!(platform.add_link("l", LinkSpec::new(1., -1.)).is_err());
        assert!(platform.add_link("l", LinkSpec::new(f64::INFINITY, 0.)).is_err());
    }

    #[test]
    fn routes_need_hosts_and_links() {
        let mut platform = Platform::new();
        let h1 = platform.add_host("h1", HostSpec::new(1.)).unwrap();
        let h2 = platform.add_host("h2", HostSpec::new(1.)).unwrap();
        let l1 = platform.add_link("l1", LinkSpec::new(1., 0.)).unwrap();
        let l2 = platform.add_link("l2", LinkSpec::new(1., 0.)).unwrap();
        assert!(platform.add_route(h1, h2, &[LinkId(h2.0)], false).is_err());
        assert!(platform.add_route(HostId(l1.0), h2, &[l1], false).is_err());
        platform.add_route(h1, h2, &[l1, l2], true).unwrap();

        let (_, routes) = platform.into_parts();
        assert_eq!(routes[&(h1, h2)], vec![l1, l2]);
        assert_eq!(routes[&(h2, h1)], vec![l2, l1]);
    }

    #[test]
    fn lookup_by_name_checks_kind() {
        let mut platform = Platform::new();
        let host = platform.add_host("h", HostSpec::new(1.)).unwrap();
        let disk = platform.add_disk("d", host, DiskSpec::new(1., 1.)).unwrap();
        assert_eq!(platform.host_by_name("h"), Some(host));
        assert_eq!(platform.disk_by_name("d"), Some(disk));
        assert_eq!(platform.link_by_name("h"), None);
        assert_eq!(platform.host_by_name("x"), None);
    }

    #[test]
    fn scale_profiles_must_be_positive() {
        let mut platform = Platform::new();
        let host = platform.add_host("h", HostSpec::new(1.)).unwrap();
        let off = Profile::new(vec![(1., 0.)]).unwrap();
        assert!(platform.add_profile(host, ProfileTarget::Scale, off.clone()).is_err());
        platform.add_profile(host, ProfileTarget::State, off).unwrap();
        assert_eq!(platform.profiles().len(), 1);
    }
}
