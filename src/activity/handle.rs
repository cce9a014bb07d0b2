use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::actor::ActorId;
use crate::error::{SimError, VetoReason};
use crate::event::{payload_type_name, EventData, TimerAction, TimerId};
use crate::resource::{DiskId, HostId};
use crate::state::SimulationState;

use super::{ActivityId, ActivityInfo, ActivityKind, ActivityState};

/// Handle to an activity.
///
/// Handles are cheap to clone. The engine keeps the state of a terminated activity while at least one handle exists.
#[derive(Clone)]
pub struct Activity {
    id: ActivityId,
    state: Rc<RefCell<SimulationState>>,
    _alive: Rc<()>,
}

impl Activity {
    pub(crate) fn create(
        state: &Rc<RefCell<SimulationState>>,
        kind: ActivityKind,
        owner: Option<ActorId>,
    ) -> Self {
        let alive = Rc::new(());
        let id = state
            .borrow_mut()
            .create_activity(None, kind, owner, Rc::downgrade(&alive));
        Self {
            id,
            state: state.clone(),
            _alive: alive,
        }
    }

    /// Sets the activity name used in logs and errors.
    pub fn with_name(self, name: &str) -> Self {
        if let Some(record) = self.state.borrow_mut().activities.get_mut(self.id) {
            record.name = name.to_string();
        }
        self
    }

    /// Returns the activity id.
    pub fn id(&self) -> ActivityId {
        self.id
    }

    /// Returns the activity name.
    pub fn name(&self) -> String {
        self.read(|record| record.name.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&super::ActivityRecord) -> T) -> T {
        let state = self.state.borrow();
        let record = state
            .activities
            .get(self.id)
            .unwrap_or_else(|| panic!("activity {} is referenced by a handle but does not exist", self.id));
        f(record)
    }

    /// Returns a snapshot of the activity.
    pub fn info(&self) -> ActivityInfo {
        self.read(|record| record.info())
    }

    /// Returns the current state.
    pub fn state(&self) -> ActivityState {
        self.read(|record| record.state)
    }

    /// Returns the remaining amount of work.
    pub fn remaining(&self) -> f64 {
        self.read(|record| record.remaining)
    }

    /// Returns the remaining fraction of the work.
    pub fn remaining_ratio(&self) -> f64 {
        self.read(|record| record.remaining_ratio())
    }

    /// Returns the rate assigned at the last sharing computation.
    pub fn rate(&self) -> f64 {
        self.read(|record| record.rate)
    }

    /// Returns true if the activity is held back by a concurrency limit.
    pub fn is_staged(&self) -> bool {
        self.read(|record| record.staged)
    }

    /// Returns true if all predecessors are finished.
    pub fn dependencies_solved(&self) -> bool {
        self.state.borrow().dependencies_solved(self.id)
    }

    /// Returns true if the activity is bound to its resources.
    pub fn is_assigned(&self) -> bool {
        self.read(|record| record.kind.is_assigned())
    }

    /// Requests the start of the activity.
    ///
    /// Returns [`SimError::Vetoed`] if the activity has unfinished predecessors or is not bound to resources yet. The
    /// request is then remembered and the activity starts as soon as possible.
    pub fn start(&self) -> Result<(), SimError> {
        self.state.borrow_mut().start_activity(self.id)
    }

    /// Cancels the activity, releasing its resources immediately. Does nothing if the activity is terminated.
    pub fn cancel(&self) {
        self.state.borrow_mut().cancel_activity(self.id)
    }

    /// Freezes the activity.
    pub fn suspend(&self) -> Result<(), SimError> {
        self.state.borrow_mut().suspend_activity(self.id)
    }

    /// Resumes a suspended activity.
    pub fn resume(&self) -> Result<(), SimError> {
        self.state.borrow_mut().resume_activity(self.id)
    }

    /// Returns true if the activity is terminated. Starts it if it was not started yet.
    pub fn test(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let start = state
            .activities
            .get(self.id)
            .is_some_and(|record| record.state == ActivityState::Init && !record.start_requested);
        if start {
            let _ = state.start_activity(self.id);
        }
        state
            .activities
            .get(self.id)
            .is_some_and(|record| record.state.is_terminal())
    }

    /// Sets the sharing priority. An activity with priority 2 gets twice the share of an activity with priority 1.
    pub fn set_priority(&self, priority: f64) -> Result<(), SimError> {
        self.state.borrow_mut().set_activity_priority(self.id, priority)
    }

    /// Limits the rate of the activity.
    pub fn set_bound(&self, bound: Option<f64>) -> Result<(), SimError> {
        self.state.borrow_mut().set_activity_bound(self.id, bound)
    }

    /// Makes `other` depend on this activity.
    pub fn add_successor(&self, other: &Activity) -> Result<(), SimError> {
        self.state.borrow_mut().add_dependency(self.id, other.id)
    }

    /// Removes the dependency of `other` on this activity.
    pub fn remove_successor(&self, other: &Activity) -> Result<(), SimError> {
        self.state.borrow_mut().remove_dependency(self.id, other.id)
    }

    /// Binds a sequential execution to a host.
    pub fn set_host(&self, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_exec_hosts(self.id, &[host])
    }

    /// Binds a parallel execution to hosts, one per flops entry.
    pub fn set_hosts(&self, hosts: &[HostId]) -> Result<(), SimError> {
        self.state.borrow_mut().set_exec_hosts(self.id, hosts)
    }

    /// Sets the number of cores used by a sequential execution.
    pub fn set_threads(&self, threads: u32) -> Result<(), SimError> {
        self.state.borrow_mut().set_exec_threads(self.id, threads)
    }

    /// Sets the source host of a communication.
    pub fn set_source(&self, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_comm_endpoints(self.id, Some(host), None)
    }

    /// Sets the destination host of a communication.
    pub fn set_destination(&self, host: HostId) -> Result<(), SimError> {
        self.state.borrow_mut().set_comm_endpoints(self.id, None, Some(host))
    }

    /// Binds an I/O to a disk.
    pub fn set_disk(&self, disk: DiskId) -> Result<(), SimError> {
        self.state.borrow_mut().set_io_disk(self.id, disk)
    }

    /// Detaches the activity from its owner: it is not canceled when the owner is killed.
    pub fn detach(&self) {
        if let Some(record) = self.state.borrow_mut().activities.get_mut(self.id) {
            record.detached = true;
        }
    }

    /// Registers a callback invoked when the activity terminates (finished, failed or canceled).
    pub fn on_completion(&self, callback: impl FnOnce(&ActivityInfo) + 'static) {
        let mut state = self.state.borrow_mut();
        let Some(record) = state.activities.get_mut(self.id) else {
            return;
        };
        if record.state.is_terminal() {
            let info = record.info();
            state.defer(Box::new(move || callback(&info)));
        } else {
            record.on_completion.push(Box::new(callback));
        }
    }

    /// Registers a callback invoked each time a start of the activity is vetoed.
    pub fn on_veto(&self, callback: impl Fn(&ActivityInfo, VetoReason) + 'static) {
        if let Some(record) = self.state.borrow_mut().activities.get_mut(self.id) {
            record.on_veto.push(Rc::new(callback));
        }
    }

    /// Attaches a payload, typically the message carried by a communication.
    pub fn set_payload<T: EventData>(&self, data: T) {
        if let Some(record) = self.state.borrow_mut().activities.get_mut(self.id) {
            log::trace!(
                target: "simflow::engine",
                "{} carries {}",
                record.name,
                payload_type_name(&data)
            );
            record.payload = Some(Box::new(data));
        }
    }

    /// Takes the payload out of the activity.
    pub fn take_payload(&self) -> Option<Box<dyn EventData>> {
        self.state
            .borrow_mut()
            .activities
            .get_mut(self.id)
            .and_then(|record| record.payload.take())
    }

    /// Returns a copy of the payload if it has the requested type.
    pub fn payload<T: EventData + Clone>(&self) -> Option<T> {
        self.read(|record| {
            record
                .payload
                .as_ref()
                .and_then(|data| data.as_any().downcast_ref::<T>())
                .cloned()
        })
    }

    /// Waits for the activity to terminate, starting it if needed.
    ///
    /// Resolves to `Ok(())` if the activity finished, or to the error describing why it failed or was canceled.
    pub fn wait(&self) -> ActivityWait {
        ActivityWait::new(self.clone(), None)
    }

    /// Waits for the activity with a timeout. On timeout the activity keeps running.
    pub fn wait_for(&self, timeout: f64) -> ActivityWait {
        let deadline = self.state.borrow().time() + timeout.max(0.);
        ActivityWait::new(self.clone(), Some(deadline))
    }

    /// Waits for the activity until the given time. On timeout the activity keeps running.
    pub fn wait_until(&self, deadline: f64) -> ActivityWait {
        ActivityWait::new(self.clone(), Some(deadline))
    }
}

/// Future returned by [`Activity::wait`], [`Activity::wait_for`] and [`Activity::wait_until`].
pub struct ActivityWait {
    activity: Activity,
    deadline: Option<f64>,
    timer: Option<(TimerId, Rc<Cell<bool>>)>,
    started: bool,
}

impl ActivityWait {
    fn new(activity: Activity, deadline: Option<f64>) -> Self {
        Self {
            activity,
            deadline,
            timer: None,
            started: false,
        }
    }

    fn cancel_timer(&mut self, state: &mut SimulationState) {
        if let Some((id, fired)) = self.timer.take() {
            if !fired.get() {
                state.timers.cancel(id);
            }
        }
    }
}

impl Future for ActivityWait {
    type Output = Result<(), SimError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let rc = this.activity.state.clone();
        let mut state = rc.borrow_mut();
        let id = this.activity.id;

        if !this.started {
            this.started = true;
            let start = state
                .activities
                .get(id)
                .is_some_and(|record| record.state == ActivityState::Init && !record.start_requested);
            if start {
                match state.start_activity(id) {
                    Ok(()) | Err(SimError::Vetoed { .. }) => {}
                    Err(err) => return Poll::Ready(Err(err)),
                }
            }
        }

        if let Some(result) = state.completion_result(id) {
            this.cancel_timer(&mut state);
            return Poll::Ready(result);
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

        match state.activities.get_mut(id) {
            Some(record) => {
                record.add_waiter(cx.waker());
                Poll::Pending
            }
            None => Poll::Ready(Err(SimError::InvalidArgument(format!("activity {id} does not exist")))),
        }
    }
}

impl Drop for ActivityWait {
    fn drop(&mut self) {
        if self.timer.is_some() {
            if let Ok(mut state) = self.activity.state.clone().try_borrow_mut() {
                self.cancel_timer(&mut state);
            }
        }
    }
}
