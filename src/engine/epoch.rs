use log::{debug, trace};

use crate::activity::{ActivityId, ActivityKind, ActivityRecord, ActivityState, IoOp};
use crate::error::SimError;
use crate::event::{Timer, TimerAction};
use crate::resource::{ResourceChange, ResourceId, DISK_GLOBAL, DISK_READ, DISK_WRITE};
use crate::solver::{self, Element, SharingProblem, VariableSpec};
use crate::state::SimulationState;

use super::TARGET;

/// Resources claimed by an activity.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Binding {
    pub resources: Vec<ResourceId>,
    pub latency: f64,
}

impl Binding {
    fn add(&mut self, resource: ResourceId) {
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
    }
}

fn min_bound(bound: Option<f64>, value: f64) -> Option<f64> {
    Some(bound.map_or(value, |bound| bound.min(value)))
}

impl SimulationState {
    /// Resolves the resources of an assigned activity.
    pub(crate) fn binding(&self, kind: &ActivityKind) -> Result<Binding, SimError> {
        let latency_factor = self.config.network.latency_factor;
        let mut binding = Binding::default();
        match kind {
            ActivityKind::Exec(exec) => {
                for &host in &exec.hosts {
                    if !self.resources.is_host(host) {
                        return Err(SimError::InvalidBinding(format!("{:?} is not a host", host)));
                    }
                    binding.add(host.resource());
                }
                for (i, row) in exec.bytes.iter().flatten().enumerate() {
                    for (j, &bytes) in row.iter().enumerate() {
                        if bytes <= 0. {
                            continue;
                        }
                        let (src, dst) = (exec.hosts[i], exec.hosts[j]);
                        let route = self.resources.route(src, dst).ok_or_else(|| {
                            SimError::InvalidBinding(format!(
                                "no route from {} to {}",
                                self.resources.name(src.resource()),
                                self.resources.name(dst.resource())
                            ))
                        })?;
                        for link in route.links {
                            binding.add(link.resource());
                        }
                        binding.latency = binding.latency.max(route.latency * latency_factor);
                    }
                }
            }
            ActivityKind::Comm(comm) => {
                let (Some(src), Some(dst)) = (comm.src, comm.dst) else {
                    return Err(SimError::InvalidBinding("communication endpoints are not set".to_string()));
                };
                if !self.resources.is_host(src) || !self.resources.is_host(dst) {
                    return Err(SimError::InvalidBinding("communication endpoints must be hosts".to_string()));
                }
                let route = self.resources.route(src, dst).ok_or_else(|| {
                    SimError::InvalidBinding(format!(
                        "no route from {} to {}",
                        self.resources.name(src.resource()),
                        self.resources.name(dst.resource())
                    ))
                })?;
                binding.add(src.resource());
                binding.add(dst.resource());
                for link in route.links {
                    binding.add(link.resource());
                }
                binding.latency = route.latency * latency_factor;
            }
            ActivityKind::Io(io) => match io.disk {
                Some(disk) if self.resources.is_disk(disk) => binding.add(disk.resource()),
                _ => return Err(SimError::InvalidBinding("I/O is not bound to a disk".to_string())),
            },
            ActivityKind::Sleep(sleep) => binding.add(sleep.host.resource()),
        }
        Ok(binding)
    }

    /// Attaches the activity to its resources, or fails it if one of them is off.
    pub(crate) fn attach(&mut self, id: ActivityId) {
        let Some(record) = self.activities.get(id) else {
            return;
        };
        if record.is_attached() || !matches!(record.state, ActivityState::Scheduled | ActivityState::Suspended) {
            return;
        }
        let binding = match self.binding(&record.kind) {
            Ok(binding) => binding,
            Err(err) => panic!("activity {} was started with an invalid binding: {err}", record.name),
        };
        if let Some(&off) = binding.resources.iter().find(|&&r| !self.resources.is_on(r)) {
            let cause = self.failure_cause(off);
            debug!(target: TARGET, "[{:.3}] {} cannot start, {} is off", self.time(), record.name, self.resources.name(off));
            self.fail_activity(id, cause);
            return;
        }

        let claim_seq = self.next_claim_seq;
        self.next_claim_seq += 1;
        self.active.insert(claim_seq, id);
        for &resource in &binding.resources {
            if let Some(resource) = self.resources.get_mut(resource) {
                resource.claims.insert(claim_seq, id);
            }
        }
        let now = self.time();
        let Some(record) = self.activities.get_mut(id) else {
            return;
        };
        record.claim_seq = Some(claim_seq);
        record.latency = if record.cost > 0. { binding.latency } else { 0. };
        record.resources = binding.resources;
        record.start_time.get_or_insert(now);
        if record.state == ActivityState::Scheduled {
            record.state = ActivityState::Running;
        }
        trace!(target: TARGET, "[{:.3}] {} attached with claim {}", now, record.name, claim_seq);
        self.dirty = true;
    }

    /// Removes the claims of the activity from its resources.
    pub(crate) fn detach(&mut self, id: ActivityId) {
        let Some(record) = self.activities.get_mut(id) else {
            return;
        };
        let Some(claim_seq) = record.claim_seq.take() else {
            return;
        };
        record.rate = 0.;
        record.staged = false;
        let resources = std::mem::take(&mut record.resources);
        for resource in resources {
            if let Some(resource) = self.resources.get_mut(resource) {
                resource.claims.remove(&claim_seq);
            }
        }
        self.active.remove(&claim_seq);
        self.dirty = true;
    }

    fn variable(&self, record: &ActivityRecord, base: &[usize]) -> VariableSpec {
        let network = &self.config.network;
        let mut penalty = 1. / record.priority;
        let mut bound = record.user_bound;
        let mut elements = Vec::new();
        match &record.kind {
            ActivityKind::Exec(exec) if !exec.is_parallel() => {
                let host = exec.hosts[0];
                elements.push(Element {
                    constraint: base[host.resource().index()],
                    consumption: 1.,
                });
                bound = min_bound(bound, self.resources.core_speed(host) * exec.threads as f64);
            }
            ActivityKind::Exec(exec) => {
                for (i, &host) in exec.hosts.iter().enumerate() {
                    let flops = exec.flops[i];
                    if flops > 0. {
                        elements.push(Element {
                            constraint: base[host.resource().index()],
                            consumption: flops,
                        });
                        bound = min_bound(bound, self.resources.core_speed(host) / flops);
                    }
                }
                for (i, row) in exec.bytes.iter().flatten().enumerate() {
                    for (j, &bytes) in row.iter().enumerate() {
                        if bytes <= 0. {
                            continue;
                        }
                        let route = self.resources.route(exec.hosts[i], exec.hosts[j]);
                        for link in route.iter().flat_map(|route| route.links.iter()) {
                            elements.push(Element {
                                constraint: base[link.resource().index()],
                                consumption: bytes / network.bandwidth_factor,
                            });
                        }
                    }
                }
            }
            ActivityKind::Comm(comm) => {
                if let Some(route) = comm.src.zip(comm.dst).and_then(|(src, dst)| self.resources.route(src, dst)) {
                    let latency = route.latency * network.latency_factor;
                    for &link in &route.links {
                        elements.push(Element {
                            constraint: base[link.resource().index()],
                            consumption: 1. / network.bandwidth_factor,
                        });
                    }
                    if network.weight_s > 0. {
                        let weight: f64 = route
                            .links
                            .iter()
                            .map(|&link| network.weight_s / self.resources.link_bandwidth(link))
                            .sum();
                        penalty *= latency + weight;
                    }
                    if network.tcp_gamma > 0. && latency > 0. {
                        bound = min_bound(bound, network.tcp_gamma / (2. * latency));
                    }
                }
            }
            ActivityKind::Io(io) => {
                if let Some(disk) = io.disk {
                    let base = base[disk.resource().index()];
                    let slot = match io.op {
                        IoOp::Read => DISK_READ,
                        IoOp::Write => DISK_WRITE,
                    };
                    elements.push(Element {
                        constraint: base + DISK_GLOBAL,
                        consumption: 1.,
                    });
                    elements.push(Element {
                        constraint: base + slot,
                        consumption: 1.,
                    });
                }
            }
            ActivityKind::Sleep(_) => {}
        }
        if record.state == ActivityState::Suspended || record.latency > 0. {
            penalty = 0.;
        }
        VariableSpec {
            penalty,
            bound,
            elements,
        }
    }

    /// Recomputes the rates of all attached activities.
    pub(crate) fn solve(&mut self) {
        let mut problem = SharingProblem::new(self.config.precision.maxmin);
        let mut base = Vec::with_capacity(self.resources.resources.len());
        for resource in &self.resources.resources {
            base.push(problem.constraints.len());
            for slot in 0..resource.constraints.len() {
                problem.add_constraint(resource.constraint_spec(slot));
            }
        }

        let mut variables = Vec::with_capacity(self.active.len());
        let mut sleeps = Vec::new();
        for &id in self.active.values() {
            let Some(record) = self.activities.get(id) else {
                continue;
            };
            if let ActivityKind::Sleep(_) = record.kind {
                sleeps.push(id);
            } else {
                problem.add_variable(self.variable(record, &base));
                variables.push(id);
            }
        }

        let allocation = solver::solve(&problem);
        if self.config.verify_allocations {
            if let Err(err) = allocation.check(&problem) {
                panic!("max-min solver produced an invalid allocation: {err}");
            }
        }

        for (r, resource) in self.resources.resources.iter_mut().enumerate() {
            for (slot, constraint) in resource.constraints.iter_mut().enumerate() {
                constraint.usage = allocation.usage[base[r] + slot];
            }
        }
        for (i, id) in variables.into_iter().enumerate() {
            if let Some(record) = self.activities.get_mut(id) {
                record.rate = allocation.rates[i];
                record.staged = allocation.staged[i];
            }
        }
        for id in sleeps {
            if let Some(record) = self.activities.get_mut(id) {
                record.rate = if record.state == ActivityState::Suspended { 0. } else { 1. };
            }
        }
        self.dirty = false;
        self.stats.solves += 1;
        trace!(
            target: TARGET,
            "[{:.3}] solved sharing of {} activities over {} constraints",
            self.time(),
            problem.variables.len(),
            problem.constraints.len()
        );
    }

    fn work_tolerance(&self, record: &ActivityRecord) -> f64 {
        self.config.precision.work * record.cost.max(1.)
    }

    fn is_done(&self, record: &ActivityRecord) -> bool {
        if record.latency > 0. || record.state == ActivityState::Suspended {
            return false;
        }
        record.remaining <= self.work_tolerance(record)
            || (record.rate > 0. && record.remaining / record.rate <= self.config.precision.timing)
    }

    fn time_to_event(&self, record: &ActivityRecord) -> f64 {
        if record.state == ActivityState::Suspended {
            f64::INFINITY
        } else if record.latency > 0. {
            record.latency
        } else if self.is_done(record) {
            0.
        } else if record.rate > 0. {
            record.remaining / record.rate
        } else {
            f64::INFINITY
        }
    }

    /// Attaches newly started activities, recomputes the rates if needed and returns the delay until the next event.
    pub(crate) fn next_event_delay(&mut self) -> Option<f64> {
        let scheduled = std::mem::take(&mut self.to_attach);
        for id in scheduled {
            self.attach(id);
        }
        if self.dirty {
            self.solve();
        }

        let mut delay = f64::INFINITY;
        for &id in self.active.values() {
            if let Some(record) = self.activities.get(id) {
                delay = delay.min(self.time_to_event(record));
            }
        }
        if delay.is_infinite() && !self.timers.has_foreground() && self.actors.restarts.is_empty() {
            return None;
        }
        if let Some(time) = self.timers.next_time() {
            delay = delay.min((time - self.time()).max(0.));
        }
        delay.is_finite().then_some(delay)
    }

    /// Advances the clock by `delay`, progresses all running activities and processes the events due at the new time.
    ///
    /// # Panics
    ///
    /// Panics if the remaining amount of an activity becomes significantly negative.
    pub(crate) fn advance_by(&mut self, delay: f64) {
        let time = self.time() + delay;
        self.set_time(time);

        let timing = self.config.precision.timing;
        let work = self.config.precision.work;
        for &id in self.active.values() {
            let Some(record) = self.activities.get_mut(id) else {
                continue;
            };
            if record.state == ActivityState::Suspended {
                continue;
            }
            if record.latency > 0. {
                record.latency -= delay;
                if record.latency <= timing {
                    record.latency = 0.;
                    self.dirty = true;
                }
                continue;
            }
            if record.rate.is_infinite() {
                record.remaining = 0.;
            } else {
                record.remaining -= record.rate * delay;
            }
            if record.remaining < -work * record.cost.max(1.) {
                panic!(
                    "remaining amount of {} became negative: {}",
                    record.name, record.remaining
                );
            }
            record.remaining = record.remaining.max(0.);
        }

        let mut completed = Vec::new();
        for &id in self.active.values() {
            if let Some(record) = self.activities.get(id) {
                if self.is_done(record) {
                    completed.push((record.seq, id));
                }
            }
        }
        completed.sort_unstable();
        for (_, id) in completed {
            self.finish_activity(id);
        }

        while let Some(timer) = self.timers.pop_due(time + timing) {
            self.fire(timer);
        }
        self.stats.steps += 1;
    }

    fn fire(&mut self, timer: Timer) {
        self.stats.timers_fired += 1;
        match timer.action {
            TimerAction::Wake { fired, waker } => {
                fired.set(true);
                waker.wake();
            }
            TimerAction::Resource { resource, change } => self.change_resource(resource, change),
            TimerAction::Profile(cursor) => {
                let attached = &self.profiles[cursor.profile];
                let resource = attached.resource;
                let target = attached.target;
                if let Some((_, value)) = attached.profile.point_at(&cursor) {
                    let change = match target {
                        crate::profile::ProfileTarget::State if value > 0. => ResourceChange::TurnOn,
                        crate::profile::ProfileTarget::State => ResourceChange::TurnOff,
                        crate::profile::ProfileTarget::Scale => ResourceChange::Scale(value),
                    };
                    self.change_resource(resource, change);
                }
                if let Some(next) = self.profiles[cursor.profile].profile.next_cursor(&cursor) {
                    self.schedule_profile_point(next);
                }
            }
            TimerAction::KillActor(pid) => {
                if let Some(actor) = self.actors.get_mut(pid) {
                    actor.kill_timer = None;
                }
                self.kill_actor(pid);
            }
        }
    }
}
