//! Actor-side interface of the simulation.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::FutureExt;
use rand::distributions::uniform::{SampleRange, SampleUniform};

use crate::activity::{Activity, ActivityKind, IoOp};
use crate::actor::{ActorFactory, ActorId, ActorInfo, ActorState};
use crate::error::SimError;
use crate::event::{TimerAction, TimerId};
use crate::resource::{DiskId, HostId, ResourceChange, ResourceId};
use crate::state::SimulationState;

/// Registers an actor and hands its future over to the executor.
pub(crate) fn spawn_actor<F, Fut>(
    state: &Rc<RefCell<SimulationState>>,
    name: &str,
    host: HostId,
    f: F,
) -> Result<ActorId, SimError>
where
    F: FnOnce(ActorContext) -> Fut,
    Fut: Future<Output = Result<(), SimError>> + 'static,
{
    let pid = state.borrow_mut().register_actor(name, host, false, None)?;
    let future = f(ActorContext::new(pid, name.to_string(), state.clone())).boxed_local();
    state.borrow_mut().outbox.spawned.push((pid, future));
    Ok(pid)
}

/// Same as [`spawn_actor`] but keeps the actor function to re-create the actor after a host restart.
pub(crate) fn spawn_restartable_actor<F, Fut>(
    state: &Rc<RefCell<SimulationState>>,
    name: &str,
    host: HostId,
    f: F,
) -> Result<ActorId, SimError>
where
    F: Fn(ActorContext) -> Fut + 'static,
    Fut: Future<Output = Result<(), SimError>> + 'static,
{
    let factory: ActorFactory = Rc::new(move |ctx| f(ctx).boxed_local());
    let pid = state
        .borrow_mut()
        .register_actor(name, host, false, Some(factory.clone()))?;
    let future = factory(ActorContext::new(pid, name.to_string(), state.clone()));
    state.borrow_mut().outbox.spawned.push((pid, future));
    Ok(pid)
}

/// Interface of an actor to the simulation.
///
/// Each actor receives its own context when spawned. The context gives access to the simulation clock and random
/// number generator, creates activities located on the actor's host and exposes the blocking calls as futures.
///
/// Activities created through the context are owned by the actor: they are canceled when the actor is killed, unless
/// they are [detached](Activity::detach).
#[derive(Clone)]
pub struct ActorContext {
    pid: ActorId,
    name: String,
    state: Rc<RefCell<SimulationState>>,
}

impl ActorContext {
    pub(crate) fn new(pid: ActorId, name: String, state: Rc<RefCell<SimulationState>>) -> Self {
        Self { pid, name, state }
    }

    /// Returns the pid of the actor.
    pub fn pid(&self) -> ActorId {
        self.pid
    }

    /// Returns the name of the actor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the host on which the actor is currently located.
    pub fn host(&self) -> HostId {
        self.state
            .borrow()
            .actors
            .get(self.pid)
            .map(|actor| actor.host)
            .unwrap_or_else(|| panic!("actor {} has no record", self.pid))
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.state.borrow().time()
    }

    /// Returns a random float in the range _[0, 1)_ using the simulation-wide random number generator.
    pub fn rand(&self) -> f64 {
        self.state.borrow_mut().rand()
    }

    /// Returns a random number in the specified range using the simulation-wide random number generator.
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.state.borrow_mut().gen_range(range)
    }

    /// Returns the host with the given name.
    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        let state = self.state.borrow();
        state
            .resources
            .lookup(name)
            .map(HostId)
            .filter(|&host| state.resources.is_host(host))
    }

    /// Returns the disk with the given name.
    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        let state = self.state.borrow();
        state
            .resources
            .lookup(name)
            .map(DiskId)
            .filter(|&disk| state.resources.is_disk(disk))
    }

    /// Returns the snapshot of an actor.
    pub fn actor_info(&self, pid: ActorId) -> Option<ActorInfo> {
        self.state.borrow().actors.get(pid).map(|actor| actor.info())
    }

    fn create(&self, kind: ActivityKind) -> Activity {
        Activity::create(&self.state, kind, Some(self.pid))
    }

    // Activities ------------------------------------------------------------------------------------------------------

    /// Creates an execution of `flops` on the actor's host, without starting it.
    pub fn exec_init(&self, flops: f64) -> Activity {
        self.create(ActivityKind::exec(vec![self.host()], vec![flops], None))
    }

    /// Creates an execution not bound to any host yet. It can be started once [bound](Activity::set_host).
    pub fn exec_unassigned(&self, flops: f64) -> Activity {
        self.create(ActivityKind::exec(Vec::new(), vec![flops], None))
    }

    /// Creates a parallel task running `flops[i]` on `hosts[i]` and transferring `bytes[i][j]` from `hosts[i]` to
    /// `hosts[j]`. Pass empty `hosts` to create an unassigned task.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions of `hosts`, `flops` and `bytes` do not match.
    pub fn parallel_exec_init(&self, hosts: &[HostId], flops: Vec<f64>, bytes: Option<Vec<Vec<f64>>>) -> Activity {
        self.create(ActivityKind::exec(hosts.to_vec(), flops, bytes))
    }

    /// Creates a communication of `bytes` from the actor's host to `dst`, without starting it.
    pub fn comm_init(&self, dst: HostId, bytes: f64) -> Activity {
        self.create(ActivityKind::comm(Some(self.host()), Some(dst), bytes))
    }

    /// Creates a communication between two arbitrary hosts.
    pub fn comm_between(&self, src: HostId, dst: HostId, bytes: f64) -> Activity {
        self.create(ActivityKind::comm(Some(src), Some(dst), bytes))
    }

    /// Creates a communication with unset endpoints, typically filled by the surrounding executions of a DAG.
    pub fn comm_unassigned(&self, bytes: f64) -> Activity {
        self.create(ActivityKind::comm(None, None, bytes))
    }

    /// Creates a disk operation, without starting it.
    pub fn io_init(&self, disk: DiskId, op: IoOp, bytes: f64) -> Activity {
        self.create(ActivityKind::io(Some(disk), op, bytes))
    }

    // Blocking calls --------------------------------------------------------------------------------------------------

    /// Executes `flops` on the actor's host.
    pub async fn execute(&self, flops: f64) -> Result<(), SimError> {
        self.exec_init(flops).wait().await
    }

    /// Sends `bytes` from the actor's host to `dst`.
    pub async fn communicate(&self, dst: HostId, bytes: f64) -> Result<(), SimError> {
        self.comm_init(dst, bytes).wait().await
    }

    /// Reads `bytes` from the disk.
    pub async fn read(&self, disk: DiskId, bytes: f64) -> Result<(), SimError> {
        self.io_init(disk, IoOp::Read, bytes).wait().await
    }

    /// Writes `bytes` to the disk.
    pub async fn write(&self, disk: DiskId, bytes: f64) -> Result<(), SimError> {
        self.io_init(disk, IoOp::Write, bytes).wait().await
    }

    /// Sleeps for the given duration.
    ///
    /// The sleep is frozen while the actor is suspended and fails with [`SimError::HostFailure`] if the host is
    /// turned off.
    pub async fn sleep_for(&self, duration: f64) -> Result<(), SimError> {
        assert!(duration >= 0., "sleep duration must be non-negative, got {duration}");
        self.create(ActivityKind::sleep(self.host(), duration)).wait().await
    }

    /// Sleeps until the given time. Returns immediately if the time is in the past.
    pub async fn sleep_until(&self, time: f64) -> Result<(), SimError> {
        let duration = (time - self.time()).max(0.);
        self.sleep_for(duration).await
    }

    /// Suspends the actor until another actor or the simulation driver resumes it.
    pub fn suspend(&self) -> SuspendSelf {
        SuspendSelf {
            ctx: self.clone(),
            suspended: false,
        }
    }

    /// Terminates the actor as if it was killed. The returned future never completes.
    pub fn exit(&self) -> Exit {
        Exit { ctx: self.clone() }
    }

    /// Waits until the actor `pid` terminates, or until `timeout` expires.
    pub fn join(&self, pid: ActorId, timeout: Option<f64>) -> JoinActor {
        let deadline = timeout.map(|timeout| self.time() + timeout.max(0.));
        JoinActor {
            state: self.state.clone(),
            joiner: self.pid,
            pid,
            deadline,
            timer: None,
        }
    }

    // Actor management ------------------------------------------------------------------------------------------------

    /// Spawns a new actor on the given host. It first runs after the current actor blocks.
    pub fn spawn_actor<F, Fut>(&self, name: &str, host: HostId, f: F) -> Result<ActorId, SimError>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = Result<(), SimError>> + 'static,
    {
        spawn_actor(&self.state, name, host, f)
    }

    /// Spawns an actor which is re-created from scratch each time its host is turned back on after a failure.
    pub fn spawn_restartable_actor<F, Fut>(&self, name: &str, host: HostId, f: F) -> Result<ActorId, SimError>
    where
        F: Fn(ActorContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), SimError>> + 'static,
    {
        spawn_restartable_actor(&self.state, name, host, f)
    }

    /// Kills an actor. Killing the current actor takes effect at its next blocking call.
    pub fn kill(&self, pid: ActorId) {
        self.state.borrow_mut().kill_actor(pid)
    }

    /// Suspends another actor.
    pub fn suspend_actor(&self, pid: ActorId) -> Result<(), SimError> {
        self.state.borrow_mut().suspend_actor(pid)
    }

    /// Resumes a suspended actor.
    pub fn resume_actor(&self, pid: ActorId) -> Result<(), SimError> {
        self.state.borrow_mut().resume_actor(pid)
    }

    /// Moves the current actor to another host. Activities already created keep their binding.
    pub fn set_host(&self, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_actor_host(self.pid, host)
    }

    /// Moves another actor to another host.
    pub fn migrate_actor(&self, pid: ActorId, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_actor_host(pid, host)
    }

    /// Marks the actor as a daemon: it is killed when the last non-daemon actor terminates.
    pub fn daemonize(&self) {
        if let Err(err) = self.state.borrow_mut().daemonize(self.pid) {
            log::warn!(target: "simflow::actor", "cannot daemonize {}: {}", self.name, err);
        }
    }

    /// Kills the actor at the given time.
    pub fn set_kill_time(&self, time: f64) -> Result<(), SimError> {
        self.state.borrow_mut().set_kill_time(self.pid, time)
    }

    /// Registers a callback run when the actor terminates. The argument tells whether the actor was killed or failed.
    ///
    /// Callbacks run in the reverse order of their registration and cannot block.
    pub fn on_exit(&self, callback: impl FnOnce(bool) + 'static) {
        if let Err(err) = self.state.borrow_mut().add_on_exit(self.pid, Box::new(callback)) {
            log::warn!(target: "simflow::actor", "cannot register exit callback of {}: {}", self.name, err);
        }
    }

    // Resources -------------------------------------------------------------------------------------------------------

    /// Turns a resource on.
    pub fn turn_on(&self, resource: impl Into<ResourceId>) {
        self.state.borrow_mut().change_resource(resource.into(), ResourceChange::TurnOn)
    }

    /// Turns a resource off, failing the activities using it.
    pub fn turn_off(&self, resource: impl Into<ResourceId>) {
        self.state.borrow_mut().change_resource(resource.into(), ResourceChange::TurnOff)
    }

    /// Scales the capacity of a resource.
    pub fn set_scale(&self, resource: impl Into<ResourceId>, scale: f64) -> Result<(), SimError> {
        self.state.borrow_mut().set_scale(resource.into(), scale)
    }

    /// Migrates a running execution to `dst`.
    ///
    /// The execution is suspended while `state_bytes` are transferred from its current host to `dst`, then it is
    /// bound to `dst` and resumed with its remaining amount unchanged.
    pub async fn live_migrate(&self, exec: &Activity, dst: HostId, state_bytes: f64) -> Result<(), SimError> {
        let src = self
            .state
            .borrow()
            .exec_host(exec.id())
            .ok_or_else(|| SimError::InvalidArgument(format!("{} is not a bound sequential execution", exec.name())))?;
        let started = exec.state() != crate::activity::ActivityState::Init;
        if started {
            exec.suspend()?;
        }
        let transfer = self
            .create(ActivityKind::comm(Some(src), Some(dst), state_bytes))
            .with_name(&format!("{}-migration", exec.name()));
        let transferred = transfer.wait().await;
        let migrated = transferred.and_then(|()| self.state.borrow_mut().migrate_exec(exec.id(), dst));
        if started && !exec.state().is_terminal() {
            exec.resume()?;
        }
        migrated
    }
}

/// Future returned by [`ActorContext::suspend`].
pub struct SuspendSelf {
    ctx: ActorContext,
    suspended: bool,
}

impl Future for SuspendSelf {
    type Output = Result<(), SimError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.suspended {
            // the executor polls suspended actors only after they are resumed
            return Poll::Ready(Ok(()));
        }
        this.suspended = true;
        match this.ctx.state.borrow_mut().suspend_actor(this.ctx.pid) {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

/// Future returned by [`ActorContext::exit`].
pub struct Exit {
    ctx: ActorContext,
}

impl Future for Exit {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        self.ctx.state.borrow_mut().kill_actor(self.ctx.pid);
        Poll::Pending
    }
}

/// Future returned by [`ActorContext::join`].
pub struct JoinActor {
    state: Rc<RefCell<SimulationState>>,
    joiner: ActorId,
    pid: ActorId,
    deadline: Option<f64>,
    timer: Option<(TimerId, Rc<Cell<bool>>)>,
}

impl JoinActor {
    fn cancel_timer(&mut self, state: &mut SimulationState) {
        if let Some((id, fired)) = self.timer.take() {
            if !fired.get() {
                state.timers.cancel(id);
            }
        }
    }
}

impl Future for JoinActor {
    type Output = Result<(), SimError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.pid == this.joiner {
            return Poll::Ready(Err(SimError::InvalidArgument("an actor cannot join itself".to_string())));
        }
        let rc = this.state.clone();
        let mut state = rc.borrow_mut();
        match state.actors.get(this.pid).map(|actor| actor.state) {
            None => return Poll::Ready(Err(SimError::UnknownActor(this.pid))),
            Some(ActorState::Dead) => {
                this.cancel_timer(&mut state);
                return Poll::Ready(Ok(()));
            }
            Some(_) => {}
        }
        if let Some(deadline) = this.deadline {
            match &this.timer {
                Some((_, fired)) if fired.get() => {
                    this.timer = None;
                    return Poll::Ready(Err(SimError::Timeout { deadline }));
                }
                Some(_) => {}
                None if deadline <= state.time() => return Poll::Ready(Err(SimError::Timeout { deadline })),
                None => {
                    let fired = Rc::new(Cell::new(false));
                    let timer = state.timers.push(
                        deadline,
                        TimerAction::Wake {
                            fired: fired.clone(),
                            waker: cx.waker().clone(),
                        },
                    );
                    this.timer = Some((timer, fired));
                }
            }
        }
        if let Some(actor) = state.actors.get_mut(this.pid) {
            if !actor.joiners.iter().any(|waker| waker.will_wake(cx.waker())) {
                actor.joiners.push(cx.waker().clone());
            }
        }
        Poll::Pending
    }
}

impl Drop for JoinActor {
    fn drop(&mut self) {
        if self.timer.is_some() {
            if let Ok(mut state) = self.state.clone().try_borrow_mut() {
                self.cancel_timer(&mut state);
            }
        }
    }
}
