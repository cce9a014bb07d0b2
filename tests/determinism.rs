mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::init_logger;
use simflow::{HostSpec, LinkSpec, Notification, Platform, Simulation, SimulationStats};

/// Random workload: workers fetch tasks of random size and report back to a master.
fn run(seed: u64) -> (Vec<String>, SimulationStats) {
    let mut platform = Platform::new();
    let master = platform.add_host("master", HostSpec::new(1e9)).unwrap();
    let backbone = platform.add_link("backbone", LinkSpec::new(1e8, 1e-3)).unwrap();
    let mut workers = Vec::new();
    for i in 0..4 {
        let host = platform
            .add_host(&format!("worker-{i}"), HostSpec::new(1e9 * (i + 1) as f64))
            .unwrap();
        let link = platform
            .add_link(&format!("link-{i}"), LinkSpec::new(5e7, 1e-4))
            .unwrap();
        platform.add_route(master, host, &[backbone, link], true).unwrap();
        workers.push(host);
    }

    let mut sim = Simulation::new(seed, platform);
    let log = Rc::new(RefCell::new(Vec::new()));
    let notifications = log.clone();
    sim.on_notification(move |notification| {
        if let Notification::ActivityCompleted { time, activity } = notification {
            notifications
                .borrow_mut()
                .push(format!("{:.9} {} {:?}", time, activity.name, activity.state));
        }
    });
    for (i, &host) in workers.iter().enumerate() {
        sim.spawn_actor(&format!("worker-{i}"), host, move |ctx| async move {
            for _ in 0..5 {
                let input = ctx.gen_range(1e6..1e7);
                ctx.comm_between(master, ctx.host(), input).wait().await?;
                let flops = ctx.gen_range(1e9..5e9);
                ctx.execute(flops).await?;
                ctx.communicate(master, 1e5).await?;
            }
            Ok(())
        })
        .unwrap();
    }
    sim.step_until_no_events();
    let stats = sim.stats();
    let log = log.borrow().clone();
    (log, stats)
}

#[test]
fn same_seed_gives_identical_runs() {
    init_logger();
    let (log1, stats1) = run(42);
    let (log2, stats2) = run(42);
    assert_eq!(log1.len(), 4 * 5 * 3);
    assert_eq!(log1, log2);
    assert_eq!(stats1, stats2);
    assert_eq!(stats1.actors_terminated, 4);
}

#[test]
fn different_seeds_give_different_runs() {
    let (log1, _) = run(1);
    let (log2, _) = run(2);
    assert_ne!(log1, log2);
}
