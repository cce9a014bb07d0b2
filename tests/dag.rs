mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{assert_close, init_logger, two_hosts};
use simflow::{ActivityState, FailureCause, HostSpec, Notification, Platform, SimError, Simulation, VetoReason};

#[test]
fn chain_runs_in_dependency_order_whatever_the_start_order() {
    init_logger();
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.).with_name("parent");
    let comm = sim.comm_init(Some(hosts.h1), Some(hosts.h2), 1e7).with_name("comm");
    let child = sim.exec_init(Some(hosts.h2), 100.).with_name("child");
    parent.add_successor(&comm).unwrap();
    comm.add_successor(&child).unwrap();

    assert!(matches!(
        child.start(),
        Err(SimError::Vetoed {
            reason: VetoReason::UnsolvedDependencies,
            ..
        })
    ));
    assert!(comm.start().is_err());
    parent.start().unwrap();
    assert_eq!(child.state(), ActivityState::Init);

    sim.step_until_time(1.5);
    assert_eq!(parent.state(), ActivityState::Finished);
    assert_eq!(comm.state(), ActivityState::Running);
    assert_eq!(child.state(), ActivityState::Init);

    sim.step_until_no_events();
    assert_close(parent.info().finish_time.unwrap(), 1.);
    assert_close(comm.info().finish_time.unwrap(), 2.);
    assert_close(child.info().finish_time.unwrap(), 3.);
    assert_close(child.info().ready_time.unwrap(), 2.);
}

#[test]
fn veto_callback_binds_the_ready_activity() {
    init_logger();
    let hosts = two_hosts(100., 50., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.);
    let child = sim.exec_init(None, 100.);
    parent.add_successor(&child).unwrap();

    let reasons = Rc::new(RefCell::new(Vec::new()));
    let reasons_clone = reasons.clone();
    let target = hosts.h2;
    let handle = child.clone();
    child.on_veto(move |_, reason| {
        reasons_clone.borrow_mut().push(reason);
        if reason == VetoReason::NotAssigned {
            handle.set_host(target).unwrap();
        }
    });
    child.start().unwrap_err();
    parent.start().unwrap();
    sim.step_until_no_events();

    assert_eq!(
        *reasons.borrow(),
        vec![VetoReason::UnsolvedDependencies, VetoReason::NotAssigned]
    );
    assert_eq!(child.state(), ActivityState::Finished);
    assert_close(child.info().finish_time.unwrap(), 3.);
}

#[test]
fn vetoes_are_notified() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    sim.on_notification(move |notification| {
        if let Notification::ActivityVetoed { activity, reason, time } = notification {
            seen_clone.borrow_mut().push((activity.name.clone(), *reason, *time));
        }
    });
    let unbound = sim.exec_init(None, 10.).with_name("unbound");
    unbound.start().unwrap_err();
    sim.step();
    assert_eq!(
        *seen.borrow(),
        vec![("unbound".to_string(), VetoReason::NotAssigned, 0.)]
    );
}

#[test]
fn communication_endpoints_follow_the_surrounding_executions() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.);
    let comm = sim.comm_init(None, None, 1e7);
    let child = sim.exec_init(None, 100.);
    parent.add_successor(&comm).unwrap();
    comm.add_successor(&child).unwrap();
    assert!(!comm.is_assigned());

    child.set_host(hosts.h2).unwrap();
    for activity in [&child, &comm, &parent] {
        let _ = activity.start();
    }
    sim.step_until_no_events();
    assert!(comm.is_assigned());
    assert_close(comm.info().finish_time.unwrap(), 2.);
    assert_close(child.info().finish_time.unwrap(), 3.);
}

#[test]
fn failure_propagates_to_all_descendants() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.).with_name("parent");
    let child = sim.exec_init(Some(hosts.h2), 100.).with_name("child");
    let grandchild = sim.exec_init(Some(hosts.h2), 100.).with_name("grandchild");
    parent.add_successor(&child).unwrap();
    child.add_successor(&grandchild).unwrap();
    parent.start().unwrap();
    child.start().unwrap_err();
    sim.schedule_resource_state(hosts.h1, 0.5, false).unwrap();
    sim.step_until_no_events();

    assert_eq!(parent.state(), ActivityState::Failed);
    assert_eq!(
        child.info().failure,
        Some(FailureCause::Dependency {
            predecessor: "parent".to_string()
        })
    );
    assert_eq!(
        grandchild.info().failure,
        Some(FailureCause::Dependency {
            predecessor: "child".to_string()
        })
    );
    assert_eq!(grandchild.info().finish_time, Some(0.5));
}

#[test]
fn canceled_predecessor_fails_successor() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.);
    let child = sim.exec_init(Some(hosts.h1), 100.);
    parent.add_successor(&child).unwrap();
    parent.cancel();
    sim.step_until_no_events();
    assert_eq!(parent.state(), ActivityState::Canceled);
    assert_eq!(child.state(), ActivityState::Failed);
}

#[test]
fn cycles_are_rejected() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let sim = Simulation::new(123, hosts.platform);
    let a = sim.exec_init(Some(hosts.h1), 1.);
    let b = sim.exec_init(Some(hosts.h1), 1.);
    let c = sim.exec_init(Some(hosts.h1), 1.);
    a.add_successor(&b).unwrap();
    b.add_successor(&c).unwrap();
    assert!(matches!(c.add_successor(&a), Err(SimError::DependencyCycle { .. })));
    assert!(matches!(a.add_successor(&a), Err(SimError::DependencyCycle { .. })));
    // adding the same edge twice is a no-op
    a.add_successor(&b).unwrap();
}

#[test]
fn started_activity_cannot_gain_predecessors() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let sim = Simulation::new(123, hosts.platform);
    let a = sim.exec_init(Some(hosts.h1), 1.);
    let b = sim.exec_init(Some(hosts.h1), 1.);
    b.start().unwrap();
    assert!(matches!(a.add_successor(&b), Err(SimError::InvalidState { .. })));
}

#[test]
fn finished_predecessor_adds_no_dependency() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let a = sim.exec_init(Some(hosts.h1), 100.);
    a.start().unwrap();
    sim.step_until_no_events();
    let b = sim.exec_init(Some(hosts.h1), 100.);
    a.add_successor(&b).unwrap();
    assert!(b.dependencies_solved());
    b.start().unwrap();
}

#[test]
fn removing_last_dependency_starts_the_successor() {
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let a = sim.exec_init(Some(hosts.h1), 100.);
    let b = sim.exec_init(Some(hosts.h1), 100.);
    a.add_successor(&b).unwrap();
    b.start().unwrap_err();
    a.start().unwrap();
    a.remove_successor(&b).unwrap();
    assert_eq!(b.state(), ActivityState::Scheduled);
    assert!(a.remove_successor(&b).is_err());

    sim.step_until_no_events();
    assert_close(a.info().finish_time.unwrap(), 2.);
    assert_close(b.info().finish_time.unwrap(), 2.);
}

#[test]
fn actor_waiting_on_vetoed_activity_resumes_when_it_completes() {
    init_logger();
    let hosts = two_hosts(100., 100., 1e7, 0.);
    let mut sim = Simulation::new(123, hosts.platform);
    let parent = sim.exec_init(Some(hosts.h1), 100.);
    let child = sim.exec_init(Some(hosts.h2), 200.);
    parent.add_successor(&child).unwrap();

    let finished_at = Rc::new(RefCell::new(None));
    let finished_clone = finished_at.clone();
    let waited = child.clone();
    sim.spawn_actor("waiter", hosts.h2, move |ctx| async move {
        waited.wait().await?;
        *finished_clone.borrow_mut() = Some(ctx.time());
        Ok(())
    })
    .unwrap();
    parent.start().unwrap();
    sim.step_until_no_events();
    assert_eq!(*finished_at.borrow(), Some(3.));
}

#[test]
fn ready_communication_without_route_fails_its_waiters() {
    let mut platform = Platform::new();
    let h1 = platform.add_host("h1", HostSpec::new(100.)).unwrap();
    let h2 = platform.add_host("h2", HostSpec::new(100.)).unwrap();
    let mut sim = Simulation::new(123, platform);
    let parent = sim.exec_init(Some(h1), 100.).with_name("parent");
    let comm = sim.comm_init(None, Some(h2), 1e6).with_name("comm");
    let child = sim.exec_init(Some(h2), 100.).with_name("child");
    parent.add_successor(&comm).unwrap();
    comm.add_successor(&child).unwrap();

    let outcome = Rc::new(RefCell::new(None));
    let outcome_clone = outcome.clone();
    let waited = comm.clone();
    sim.spawn_actor("receiver", h2, move |ctx| async move {
        let result = waited.wait().await;
        *outcome_clone.borrow_mut() = Some((ctx.time(), result));
        Ok(())
    })
    .unwrap();
    comm.start().unwrap_err();
    parent.start().unwrap();
    sim.step_until_no_events();

    let outcome = outcome.borrow().clone().unwrap();
    assert_close(outcome.0, 1.);
    assert!(matches!(outcome.1, Err(SimError::InvalidBinding(_))));
    assert_eq!(comm.state(), ActivityState::Failed);
    assert!(matches!(comm.info().failure, Some(FailureCause::Binding { .. })));
    assert_eq!(
        child.info().failure,
        Some(FailureCause::Dependency {
            predecessor: "comm".to_string()
        })
    );
    assert!(sim.blocked_actors().is_empty());
}
