#![allow(dead_code)]

use simflow::{HostId, HostSpec, LinkId, LinkSpec, Platform};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-6 * expected.abs().max(1.),
        "expected {expected}, got {actual}"
    );
}

pub fn one_host(speed: f64) -> (Platform, HostId) {
    let mut platform = Platform::new();
    let host = platform.add_host("host", HostSpec::new(speed)).unwrap();
    (platform, host)
}

pub struct TwoHosts {
    pub platform: Platform,
    pub h1: HostId,
    pub h2: HostId,
    pub link: LinkId,
}

/// Two hosts connected by a single link.
pub fn two_hosts(speed1: f64, speed2: f64, bandwidth: f64, latency: f64) -> TwoHosts {
    two_hosts_with_link(speed1, speed2, LinkSpec::new(bandwidth, latency))
}

pub fn two_hosts_with_link(speed1: f64, speed2: f64, link: LinkSpec) -> TwoHosts {
    let mut platform = Platform::new();
    let h1 = platform.add_host("h1", HostSpec::new(speed1)).unwrap();
    let h2 = platform.add_host("h2", HostSpec::new(speed2)).unwrap();
    let link = platform.add_link("link", link).unwrap();
    platform.add_route(h1, h2, &[link], true).unwrap();
    TwoHosts {
        platform,
        h1,
        h2,
        link,
    }
}
