//! Simulation configuration and execution.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace, warn};
use rand::distributions::uniform::{SampleRange, SampleUniform};

use crate::activity::{Activity, ActivityId, ActivityInfo, ActivityKind, IoOp};
use crate::actor::{ActorId, ActorInfo, Executor, ReadyQueue};
use crate::config::SimulationConfig;
use crate::context;
use crate::context::ActorContext;
use crate::error::{ConfigError, SimError};
use crate::handler::{Notification, NotificationHandler};
use crate::platform::Platform;
use crate::resource::{DiskId, HostId, LinkId, ResourceChange, ResourceId, ResourceInfo, ResourceKind};
use crate::state::{OutboxItem, SimulationState, SimulationStats};

type Handlers = Vec<Rc<RefCell<dyn NotificationHandler>>>;

/// Runs the callbacks and notifications queued by the engine. Returns true if something was processed.
fn dispatch(state: &Rc<RefCell<SimulationState>>, handlers: &Handlers) -> bool {
    let mut processed = false;
    loop {
        let item = state.borrow_mut().outbox.items.pop_front();
        let Some(item) = item else {
            return processed;
        };
        processed = true;
        match item {
            OutboxItem::Callback(callback) => callback(),
            OutboxItem::Notification(notification) => {
                trace!(
                    target: "simflow::notification",
                    "{}",
                    serde_json::to_string(&notification).unwrap_or_default()
                );
                for handler in handlers {
                    handler.borrow_mut().on(&notification);
                }
            }
        }
    }
}

/// Represents a simulation, provides methods for its configuration and execution.
///
/// The simulation is built from a [`Platform`] describing the resources. Actors are spawned on its hosts and the
/// simulation is then driven with the stepping methods, typically [`step_until_no_events`](Self::step_until_no_events).
pub struct Simulation {
    state: Rc<RefCell<SimulationState>>,
    executor: Executor,
    handlers: Handlers,
}

impl Simulation {
    /// Creates a new simulation with the default configuration and the specified random seed.
    pub fn new(seed: u64, platform: Platform) -> Self {
        Self::build(seed, platform, SimulationConfig::default())
    }

    /// Creates a new simulation with the given configuration.
    pub fn with_config(seed: u64, platform: Platform, config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(seed, platform, config))
    }

    fn build(seed: u64, platform: Platform, config: SimulationConfig) -> Self {
        let ready = Arc::new(ReadyQueue::default());
        let state = SimulationState::new(seed, platform, config, ready.clone());
        debug!(
            target: "simflow::engine",
            "simulation created with {} resources",
            state.resources.resources.len()
        );
        Self {
            state: Rc::new(RefCell::new(state)),
            executor: Executor::new(ready),
            handlers: Vec::new(),
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.state.borrow().time()
    }

    /// Returns the configuration of the simulation.
    pub fn config(&self) -> SimulationConfig {
        self.state.borrow().config.clone()
    }

    /// Returns a random float in the range _[0, 1)_ using the simulation-wide random number generator.
    pub fn rand(&mut self) -> f64 {
        self.state.borrow_mut().rand()
    }

    /// Returns a random number in the specified range using the simulation-wide random number generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.state.borrow_mut().gen_range(range)
    }

    /// Returns the counters collected so far.
    pub fn stats(&self) -> SimulationStats {
        self.state.borrow().stats.clone()
    }

    // Platform --------------------------------------------------------------------------------------------------------

    fn lookup_kind(&self, name: &str, kind: ResourceKind) -> Option<ResourceId> {
        let state = self.state.borrow();
        state
            .resources
            .lookup(name)
            .filter(|&id| state.resources.get(id).is_some_and(|r| r.kind == kind))
    }

    /// Returns the host with the given name.
    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.lookup_kind(name, ResourceKind::Cpu).map(HostId)
    }

    /// Returns the link with the given name.
    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.lookup_kind(name, ResourceKind::Link).map(LinkId)
    }

    /// Returns the disk with the given name.
    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        self.lookup_kind(name, ResourceKind::Disk).map(DiskId)
    }

    /// Returns all hosts in declaration order.
    pub fn hosts(&self) -> Vec<HostId> {
        self.state.borrow().resources.hosts().collect()
    }

    /// Returns the snapshot of a resource.
    pub fn resource_info(&self, resource: impl Into<ResourceId>) -> Option<ResourceInfo> {
        self.state.borrow().resources.get(resource.into()).map(|r| r.info())
    }

    /// Turns a resource on. Auto-restart actors of a host are re-created.
    pub fn turn_on(&mut self, resource: impl Into<ResourceId>) {
        self.state.borrow_mut().change_resource(resource.into(), ResourceChange::TurnOn);
    }

    /// Turns a resource off: the activities using it fail and the actors located on a host are killed.
    pub fn turn_off(&mut self, resource: impl Into<ResourceId>) {
        self.state.borrow_mut().change_resource(resource.into(), ResourceChange::TurnOff);
    }

    /// Scales the capacity of a resource.
    pub fn set_resource_scale(&mut self, resource: impl Into<ResourceId>, scale: f64) -> Result<(), SimError> {
        self.state.borrow_mut().set_scale(resource.into(), scale)
    }

    /// Schedules turning a resource on or off at the given time.
    pub fn schedule_resource_state(&mut self, resource: impl Into<ResourceId>, time: f64, on: bool) -> Result<(), SimError> {
        let change = if on {
            ResourceChange::TurnOn
        } else {
            ResourceChange::TurnOff
        };
        self.state
            .borrow_mut()
            .schedule_resource_change(resource.into(), time, change)
    }

    /// Schedules a capacity change of a resource at the given time.
    pub fn schedule_resource_scale(
        &mut self,
        resource: impl Into<ResourceId>,
        time: f64,
        scale: f64,
    ) -> Result<(), SimError> {
        if !(scale.is_finite() && scale > 0.) {
            return Err(SimError::InvalidArgument(format!("scale must be positive, got {scale}")));
        }
        self.state
            .borrow_mut()
            .schedule_resource_change(resource.into(), time, ResourceChange::Scale(scale))
    }

    // Actors ----------------------------------------------------------------------------------------------------------

    /// Spawns an actor on the given host. Actors start running at the next step.
    ///
    /// ```rust
    /// use simflow::{HostSpec, Platform, Simulation};
    ///
    /// let mut platform = Platform::new();
    /// let host = platform.add_host("host", HostSpec::new(100.)).unwrap();
    /// let mut sim = Simulation::new(123, platform);
    /// sim.spawn_actor("worker", host, |ctx| async move {
    ///     ctx.execute(200.).await?;
    ///     ctx.sleep_for(1.).await
    /// })
    /// .unwrap();
    /// sim.step_until_no_events();
    /// assert_eq!(sim.time(), 3.);
    /// ```
    pub fn spawn_actor<F, Fut>(&mut self, name: &str, host: HostId, f: F) -> Result<ActorId, SimError>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = Result<(), SimError>> + 'static,
    {
        context::spawn_actor(&self.state, name, host, f)
    }

    /// Spawns an actor which is re-created each time its host is turned back on after a failure.
    pub fn spawn_restartable_actor<F, Fut>(&mut self, name: &str, host: HostId, f: F) -> Result<ActorId, SimError>
    where
        F: Fn(ActorContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), SimError>> + 'static,
    {
        context::spawn_restartable_actor(&self.state, name, host, f)
    }

    /// Returns the snapshot of an actor.
    pub fn actor_info(&self, pid: ActorId) -> Option<ActorInfo> {
        self.state.borrow().actors.get(pid).map(|actor| actor.info())
    }

    /// Returns the snapshots of all actors, dead ones included, in pid order.
    pub fn actors(&self) -> Vec<ActorInfo> {
        self.state.borrow().actors.iter().map(|actor| actor.info()).collect()
    }

    /// Kills an actor. Killing a dead actor does nothing.
    pub fn kill_actor(&mut self, pid: ActorId) {
        self.state.borrow_mut().kill_actor(pid);
    }

    /// Suspends an actor and freezes its activities.
    pub fn suspend_actor(&mut self, pid: ActorId) -> Result<(), SimError> {
        self.state.borrow_mut().suspend_actor(pid)
    }

    /// Resumes a suspended actor.
    pub fn resume_actor(&mut self, pid: ActorId) -> Result<(), SimError> {
        self.state.borrow_mut().resume_actor(pid)
    }

    /// Moves an actor to another host. Activities already created keep their binding.
    pub fn migrate_actor(&mut self, pid: ActorId, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_actor_host(pid, host)
    }

    /// Returns the living actors. Called once the simulation has no more events, these actors are blocked forever.
    pub fn blocked_actors(&self) -> Vec<ActorInfo> {
        self.state
            .borrow()
            .actors
            .alive()
            .map(|actor| actor.info())
            .collect()
    }

    // Activities ------------------------------------------------------------------------------------------------------

    fn create(&self, kind: ActivityKind) -> Activity {
        Activity::create(&self.state, kind, None)
    }

    /// Creates an execution of `flops` on the host. Passing no host creates an unassigned execution.
    pub fn exec_init(&self, host: Option<HostId>, flops: f64) -> Activity {
        self.create(ActivityKind::exec(host.into_iter().collect(), vec![flops], None))
    }

    /// Creates a parallel task. See [`ActorContext::parallel_exec_init`].
    pub fn parallel_exec_init(&self, hosts: &[HostId], flops: Vec<f64>, bytes: Option<Vec<Vec<f64>>>) -> Activity {
        self.create(ActivityKind::exec(hosts.to_vec(), flops, bytes))
    }

    /// Creates a communication. Missing endpoints can be set later or filled by the surrounding executions of a DAG.
    pub fn comm_init(&self, src: Option<HostId>, dst: Option<HostId>, bytes: f64) -> Activity {
        self.create(ActivityKind::comm(src, dst, bytes))
    }

    /// Creates a disk operation.
    pub fn io_init(&self, disk: Option<DiskId>, op: IoOp, bytes: f64) -> Activity {
        self.create(ActivityKind::io(disk, op, bytes))
    }

    /// Returns the snapshot of an activity, as long as it is referenced or not terminated.
    pub fn activity_info(&self, id: ActivityId) -> Option<ActivityInfo> {
        self.state.borrow().activities.get(id).map(|record| record.info())
    }

    // Notifications ---------------------------------------------------------------------------------------------------

    /// Registers a handler receiving all notifications.
    pub fn add_handler(&mut self, handler: Rc<RefCell<dyn NotificationHandler>>) {
        self.handlers.push(handler);
    }

    /// Registers a closure receiving all notifications.
    pub fn on_notification(&mut self, f: impl FnMut(&Notification) + 'static) {
        self.handlers.push(Rc::new(RefCell::new(f)));
    }

    // Execution -------------------------------------------------------------------------------------------------------

    fn run_actors(&mut self) -> bool {
        let Self {
            state,
            executor,
            handlers,
        } = self;
        let (state, handlers) = (&*state, &*handlers);
        executor.run(state, || dispatch(state, handlers))
    }

    fn has_pending_work(&self) -> bool {
        let state = self.state.borrow();
        let outbox = &state.outbox;
        !state.ready.is_empty()
            || !state.to_attach.is_empty()
            || !outbox.items.is_empty()
            || !outbox.spawned.is_empty()
            || !outbox.reaped.is_empty()
            || !outbox.restarts.is_empty()
    }

    /// Runs the actors until all of them are blocked and returns the delay until the next event.
    fn settle(&mut self) -> Option<f64> {
        loop {
            self.run_actors();
            let delay = self.state.borrow_mut().next_event_delay();
            if !self.has_pending_work() {
                return delay;
            }
        }
    }

    fn advance(&mut self, delay: f64) {
        self.state.borrow_mut().advance_by(delay);
        self.run_actors();
        self.state.borrow_mut().reap_activities();
    }

    /// Performs a single step through the simulation.
    ///
    /// Runs the actors ready at the current time, then advances the clock to the next event, processes all events
    /// happening at this instant and resumes the actors waiting for them. Returns `true` if the step was performed,
    /// or `false` if there were no more events to process.
    pub fn step(&mut self) -> bool {
        match self.settle() {
            Some(delay) => {
                self.advance(delay);
                true
            }
            None => false,
        }
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps through the simulation until there are no pending events left.
    ///
    /// Actors still alive at this point wait for something that will never happen, they are reported with a warning.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
        let blocked = self.blocked_actors();
        if !blocked.is_empty() {
            let names: Vec<&str> = blocked.iter().map(|actor| actor.name.as_str()).collect();
            warn!(
                target: "simflow::engine",
                "[{:.3}] no more events, {} actors are blocked forever: {}",
                self.time(),
                blocked.len(),
                names.join(", ")
            );
        }
    }

    /// Steps through the simulation with duration limit.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        let end_time = self.time() + duration;
        self.step_until_time(end_time)
    }

    /// Steps through the simulation until the specified time. The clock is set to `time` on return, activities
    /// progressing until then.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        loop {
            let delay = self.settle();
            let now = self.time();
            match delay {
                Some(delay) if now + delay <= time => self.advance(delay),
                Some(_) => {
                    if time > now {
                        self.advance(time - now);
                    }
                    return true;
                }
                None => {
                    if time > now {
                        self.advance(time - now);
                    }
                    return false;
                }
            }
        }
    }
}
