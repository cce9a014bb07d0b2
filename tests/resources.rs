mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{assert_close, init_logger, one_host, two_hosts};
use simflow::{
    ActivityState, ConfigError, DiskSpec, FailureCause, HostSpec, Notification, Platform, PrecisionConfig, Profile,
    ProfileTarget, ResourceState, SimError, Simulation, SimulationConfig,
};

#[test]
fn scale_profile_changes_speed_over_time() {
    init_logger();
    let mut platform = Platform::new();
    let host = platform.add_host("host", HostSpec::new(100.)).unwrap();
    platform
        .add_profile(host, ProfileTarget::Scale, Profile::new(vec![(1., 0.5), (2., 1.)]).unwrap())
        .unwrap();
    let mut sim = Simulation::new(123, platform);
    let exec = sim.exec_init(Some(host), 250.);
    exec.start().unwrap();

    sim.step_until_time(1.5);
    assert_close(exec.rate(), 50.);
    assert_close(sim.resource_info(host).unwrap().scale, 0.5);
    sim.step_until_no_events();
    assert_close(exec.info().finish_time.unwrap(), 3.);
}

#[test]
fn periodic_scale_profile_repeats() {
    let mut platform = Platform::new();
    let h1 = platform.add_host("h1", HostSpec::new(1.)).unwrap();
    let h2 = platform.add_host("h2", HostSpec::new(1.)).unwrap();
    let link = platform.add_link("link", simflow::LinkSpec::new(1e6, 0.)).unwrap();
    platform.add_route(h1, h2, &[link], true).unwrap();
    platform
        .add_profile(
            link,
            ProfileTarget::Scale,
            Profile::periodic(vec![(0., 1.), (1., 0.5)], 2.).unwrap(),
        )
        .unwrap();
    let mut sim = Simulation::new(123, platform);
    let comm = sim.comm_init(Some(h1), Some(h2), 3e6);
    comm.start().unwrap();
    assert!(sim.step_until_time(3.5));
    assert_close(comm.rate(), 5e5);
    // only the periodic profile remains once the transfer is done
    sim.step_until_no_events();
    assert_close(comm.info().finish_time.unwrap(), 4.);
    assert_close(sim.time(), 4.);
}

#[test]
fn periodic_profile_does_not_outlive_the_actors() {
    let mut platform = Platform::new();
    let host = platform.add_host("host", HostSpec::new(100.)).unwrap();
    platform
        .add_profile(
            host,
            ProfileTarget::Scale,
            Profile::periodic(vec![(0., 1.), (1., 0.5)], 2.).unwrap(),
        )
        .unwrap();
    let mut sim = Simulation::new(123, platform);
    let worker = sim
        .spawn_actor("worker", host, |ctx| async move { ctx.execute(150.).await })
        .unwrap();
    sim.step_until_no_events();

    // 100 flops in the first second, the remaining 50 at half speed
    let info = sim.actor_info(worker).unwrap();
    assert_close(info.end_time.unwrap(), 2.);
    assert_close(sim.time(), 2.);
    assert!(!sim.step());
}

#[test]
fn state_profile_fails_activities_and_notifies() {
    let mut platform = Platform::new();
    let host = platform.add_host("host", HostSpec::new(10.)).unwrap();
    platform
        .add_profile(host, ProfileTarget::State, Profile::new(vec![(2., 0.), (4., 1.)]).unwrap())
        .unwrap();
    let mut sim = Simulation::new(123, platform);
    let changes = Rc::new(RefCell::new(Vec::new()));
    let changes_clone = changes.clone();
    sim.on_notification(move |notification| {
        if let Notification::ResourceStateChanged { time, name, state, .. } = notification {
            changes_clone.borrow_mut().push((*time, name.clone(), *state));
        }
    });
    let exec = sim.exec_init(Some(host), 100.);
    exec.start().unwrap();
    sim.step_until_no_events();

    assert_eq!(exec.state(), ActivityState::Failed);
    assert_close(exec.remaining_ratio(), 0.8);
    assert_eq!(
        *changes.borrow(),
        vec![
            (2., "host".to_string(), ResourceState::Off),
            (4., "host".to_string(), ResourceState::On),
        ]
    );
    assert_eq!(sim.resource_info(host).unwrap().state, ResourceState::On);
}

#[test]
fn activity_started_on_off_host_fails() {
    let (platform, host) = one_host(100.);
    let mut sim = Simulation::new(123, platform);
    let notified = Rc::new(Cell::new(0));
    let notified_clone = notified.clone();
    sim.on_notification(move |notification| {
        if matches!(notification, Notification::ResourceStateChanged { .. }) {
            notified_clone.set(notified_clone.get() + 1);
        }
    });
    sim.turn_off(host);
    sim.turn_off(host);
    let exec = sim.exec_init(Some(host), 100.);
    exec.start().unwrap();
    sim.step_until_no_events();

    assert_eq!(notified.get(), 1);
    assert_eq!(exec.state(), ActivityState::Failed);
    assert_eq!(
        exec.info().failure,
        Some(FailureCause::HostOff {
            host: "host".to_string()
        })
    );
    assert_eq!(exec.info().finish_time, Some(0.));
}

#[test]
fn invalid_changes_are_rejected() {
    let (platform, host) = one_host(100.);
    let mut sim = Simulation::new(123, platform);
    assert!(matches!(sim.set_resource_scale(host, 0.), Err(SimError::InvalidArgument(_))));
    assert!(matches!(sim.set_resource_scale(host, f64::NAN), Err(SimError::InvalidArgument(_))));
    assert!(sim.schedule_resource_scale(host, 1., -1.).is_err());

    let exec = sim.exec_init(Some(host), 100.);
    exec.start().unwrap();
    sim.step_until_time(1.);
    assert!(sim.schedule_resource_state(host, 0.5, false).is_err());
    assert!(sim.schedule_resource_state(host, 1., false).is_ok());
}

#[test]
fn scaling_during_execution_keeps_progress() {
    let (platform, host) = one_host(100.);
    let mut sim = Simulation::new(123, platform);
    let exec = sim.exec_init(Some(host), 300.);
    exec.start().unwrap();
    sim.step_until_time(1.);
    sim.set_resource_scale(host, 2.).unwrap();
    sim.step_until_no_events();
    assert_close(exec.info().finish_time.unwrap(), 2.);
}

#[test]
fn link_failure_reaches_the_sender() {
    init_logger();
    let hosts = two_hosts(1., 1., 1e6, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let outcome = Rc::new(RefCell::new(None));
    let outcome_clone = outcome.clone();
    let dst = hosts.h2;
    sim.spawn_actor("sender", hosts.h1, move |ctx| async move {
        let result = ctx.communicate(dst, 1e7).await;
        *outcome_clone.borrow_mut() = Some(result.clone());
        assert!(result.as_ref().is_err_and(|err| err.is_resource_failure()));
        Ok(())
    })
    .unwrap();
    sim.schedule_resource_state(hosts.link, 1., false).unwrap();
    sim.step_until_no_events();

    assert!(matches!(*outcome.borrow(), Some(Err(SimError::NetworkFailure { .. }))));
    assert_eq!(sim.time(), 1.);
}

#[test]
fn disk_failure_reaches_the_reader() {
    let mut platform = Platform::new();
    let host = platform.add_host("host", HostSpec::new(1.)).unwrap();
    let disk = platform.add_disk("disk", host, DiskSpec::new(100., 100.)).unwrap();
    let mut sim = Simulation::new(123, platform);
    let outcome = Rc::new(RefCell::new(None));
    let outcome_clone = outcome.clone();
    sim.spawn_actor("reader", host, move |ctx| async move {
        let disk = ctx.disk_by_name("disk").unwrap();
        let result = ctx.read(disk, 1000.).await;
        *outcome_clone.borrow_mut() = Some((ctx.time(), result));
        Ok(())
    })
    .unwrap();
    sim.schedule_resource_state(disk, 2., false).unwrap();
    sim.step_until_no_events();

    assert_eq!(
        *outcome.borrow(),
        Some((
            2.,
            Err(SimError::StorageFailure {
                disk: "disk".to_string()
            })
        ))
    );
}

#[test]
fn host_failure_kills_actors_and_restarts_restartable_ones() {
    init_logger();
    let (platform, host) = one_host(100.);
    let mut sim = Simulation::new(123, platform);
    let starts = Rc::new(RefCell::new(Vec::new()));
    let starts_clone = starts.clone();
    sim.spawn_restartable_actor("service", host, move |ctx| {
        let starts = starts_clone.clone();
        async move {
            starts.borrow_mut().push(ctx.time());
            ctx.execute(500.).await
        }
    })
    .unwrap();
    let plain = sim
        .spawn_actor("plain", host, |ctx| async move { ctx.sleep_for(100.).await })
        .unwrap();
    sim.schedule_resource_state(host, 2., false).unwrap();
    sim.schedule_resource_state(host, 8., true).unwrap();
    sim.step_until_no_events();

    assert_eq!(*starts.borrow(), vec![0., 8.]);
    let plain_info = sim.actor_info(plain).unwrap();
    assert!(plain_info.failed);
    assert_eq!(plain_info.end_time, Some(2.));

    let services: Vec<_> = sim
        .actors()
        .into_iter()
        .filter(|actor| actor.name == "service")
        .collect();
    assert_eq!(services.len(), 2);
    assert!(services[0].failed);
    assert_eq!(services[0].end_time, Some(2.));
    assert!(!services[1].failed);
    assert_close(services[1].end_time.unwrap(), 13.);
    assert_close(sim.time(), 13.);
}

#[test]
fn resource_lookup_by_name() {
    let hosts = two_hosts(1., 2., 3., 0.);
    let sim = Simulation::new(123, hosts.platform);
    assert_eq!(sim.host_by_name("h2"), Some(hosts.h2));
    assert_eq!(sim.link_by_name("link"), Some(hosts.link));
    assert_eq!(sim.host_by_name("link"), None);
    assert_eq!(sim.hosts(), vec![hosts.h1, hosts.h2]);
    let info = sim.resource_info(hosts.h2).unwrap();
    assert_eq!(info.capacity, 2.);
    assert_eq!(info.claims, 0);
    assert_eq!(info.cores, Some(1));
    assert_eq!(sim.resource_info(hosts.link).unwrap().cores, None);
}

#[test]
fn duplicate_names_and_bad_capacities_are_rejected() {
    let mut platform = Platform::new();
    platform.add_host("host", HostSpec::new(1.)).unwrap();
    assert!(platform.add_host("host", HostSpec::new(1.)).is_err());
    assert!(platform.add_host("zero", HostSpec::new(0.)).is_err());
    assert!(platform.add_link("slow", simflow::LinkSpec::new(-1., 0.)).is_err());
    assert!(Profile::new(vec![(2., 1.), (1., 1.)]).is_err());
    assert!(Profile::periodic(vec![(0., 1.), (3., 1.)], 2.).is_err());
}

#[test]
fn invalid_configuration_is_rejected() {
    let (platform, _) = one_host(1.);
    let config = SimulationConfig {
        precision: PrecisionConfig {
            timing: -1.,
            ..PrecisionConfig::default()
        },
        ..SimulationConfig::default()
    };
    let result = Simulation::with_config(123, platform, config);
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            name: "precision.timing",
            ..
        })
    ));
}

#[test]
fn network_factors_change_transfer_time() {
    let hosts = two_hosts(1., 1., 1e6, 0.1);
    let config = SimulationConfig::default().with_network(simflow::NetworkConfig {
        latency_factor: 2.,
        bandwidth_factor: 0.5,
        ..simflow::NetworkConfig::default()
    });
    let mut sim = Simulation::with_config(123, hosts.platform, config).unwrap();
    let comm = sim.comm_init(Some(hosts.h1), Some(hosts.h2), 1e6);
    comm.start().unwrap();
    sim.step_until_no_events();
    assert_close(comm.info().finish_time.unwrap(), 0.2 + 2.);
}

#[test]
fn tcp_window_bounds_long_latency_flows() {
    let hosts = two_hosts(1., 1., 1e9, 0.5);
    let config = SimulationConfig::default().with_network(simflow::NetworkConfig {
        tcp_gamma: 1e6,
        ..simflow::NetworkConfig::default()
    });
    let mut sim = Simulation::with_config(123, hosts.platform, config).unwrap();
    let comm = sim.comm_init(Some(hosts.h1), Some(hosts.h2), 1e6);
    comm.start().unwrap();
    sim.step_until_time(1.);
    assert_close(comm.rate(), 1e6);
    sim.step_until_no_events();
    assert_close(comm.info().finish_time.unwrap(), 1.5);
}
