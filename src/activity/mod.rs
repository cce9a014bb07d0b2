//! Activities: computations, communications, disk operations and sleeps.
//!
//! An activity is a time-extended piece of work bound to one or several resources. Its progress is driven by the
//! engine, which assigns it a rate computed by the max-min solver and decreases its remaining amount as simulation
//! time advances. User code manipulates activities through [`Activity`] handles.
//!
//! ```text
//! Init --start--> Scheduled --attach--> Running <--suspend/resume--> Suspended
//!                                          |
//!                                          +--> Finished | Failed | Canceled
//! ```
//!
//! A start request is vetoed while some predecessors are unfinished or while the activity is not bound to resources.
//! The request is remembered: the activity starts as soon as the missing condition is satisfied.

mod arena;
mod handle;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};
use std::task::Waker;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::error::{FailureCause, VetoReason};
use crate::event::EventData;
use crate::resource::{DiskId, HostId, ResourceId};

pub(crate) use arena::ActivityArena;
pub use handle::{Activity, ActivityWait};

/// Generation-checked identifier of an activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Display for ActivityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Lifecycle state of an activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    /// Created, not started.
    Init,
    /// Started, waiting to be attached to its resources by the engine.
    Scheduled,
    /// Consuming its resources.
    Running,
    /// Started but frozen.
    Suspended,
    /// Completed its work.
    Finished,
    /// Stopped by a resource failure or a failed predecessor.
    Failed,
    /// Stopped by the user.
    Canceled,
}

impl ActivityState {
    /// Returns true for `Finished`, `Failed` and `Canceled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }
}

/// Kind of an activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKindTag {
    /// Computation on one or several hosts.
    Exec,
    /// Data transfer between two hosts.
    Comm,
    /// Disk read or write.
    Io,
    /// Waiting on a host.
    Sleep,
}

/// Direction of a disk operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoOp {
    /// Read from disk.
    Read,
    /// Write to disk.
    Write,
}

#[derive(Clone, Debug)]
pub(crate) struct ExecSpec {
    /// Empty until assigned.
    pub hosts: Vec<HostId>,
    /// Flops per host.
    pub flops: Vec<f64>,
    /// Bytes exchanged between each pair of hosts of a parallel task.
    pub bytes: Option<Vec<Vec<f64>>>,
    pub threads: u32,
}

impl ExecSpec {
    pub fn is_parallel(&self) -> bool {
        self.flops.len() > 1 || self.bytes.is_some()
    }

    pub fn is_assigned(&self) -> bool {
        self.hosts.len() == self.flops.len()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CommSpec {
    pub src: Option<HostId>,
    pub dst: Option<HostId>,
    pub bytes: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct IoSpec {
    pub disk: Option<DiskId>,
    pub op: IoOp,
    pub bytes: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct SleepSpec {
    pub host: HostId,
    pub duration: f64,
}

#[derive(Clone, Debug)]
pub(crate) enum ActivityKind {
    Exec(ExecSpec),
    Comm(CommSpec),
    Io(IoSpec),
    Sleep(SleepSpec),
}

fn check_amount(what: &str, amount: f64) {
    assert!(
        amount.is_finite() && amount >= 0.,
        "{what} must be a non-negative finite number, got {amount}"
    );
}

impl ActivityKind {
    /// Creates a sequential (single flops entry) or parallel execution. `hosts` is empty for unassigned executions.
    pub fn exec(hosts: Vec<HostId>, flops: Vec<f64>, bytes: Option<Vec<Vec<f64>>>) -> Self {
        assert!(!flops.is_empty(), "execution needs at least one flops entry");
        assert!(
            hosts.is_empty() || hosts.len() == flops.len(),
            "execution over {} hosts has {} flops entries",
            hosts.len(),
            flops.len()
        );
        flops.iter().for_each(|&f| check_amount("flops", f));
        if let Some(bytes) = &bytes {
            assert!(
                bytes.len() == flops.len() && bytes.iter().all(|row| row.len() == flops.len()),
                "bytes matrix must be {n}x{n}",
                n = flops.len()
            );
            bytes.iter().flatten().for_each(|&b| check_amount("bytes", b));
        }
        Self::Exec(ExecSpec {
            hosts,
            flops,
            bytes,
            threads: 1,
        })
    }

    pub fn comm(src: Option<HostId>, dst: Option<HostId>, bytes: f64) -> Self {
        check_amount("bytes", bytes);
        Self::Comm(CommSpec { src, dst, bytes })
    }

    pub fn io(disk: Option<DiskId>, op: IoOp, bytes: f64) -> Self {
        check_amount("bytes", bytes);
        Self::Io(IoSpec { disk, op, bytes })
    }

    pub fn sleep(host: HostId, duration: f64) -> Self {
        check_amount("duration", duration);
        Self::Sleep(SleepSpec { host, duration })
    }

    pub fn tag(&self) -> ActivityKindTag {
        match self {
            Self::Exec(_) => ActivityKindTag::Exec,
            Self::Comm(_) => ActivityKindTag::Comm,
            Self::Io(_) => ActivityKindTag::Io,
            Self::Sleep(_) => ActivityKindTag::Sleep,
        }
    }

    /// Total amount of work. Parallel tasks progress as a ratio of the whole task.
    pub fn cost(&self) -> f64 {
        match self {
            Self::Exec(exec) if exec.is_parallel() => {
                let flops = exec.flops.iter().any(|&f| f > 0.);
                let bytes = exec.bytes.iter().flatten().flatten().any(|&b| b > 0.);
                if flops || bytes {
                    1.
                } else {
                    0.
                }
            }
            Self::Exec(exec) => exec.flops.first().copied().unwrap_or(0.),
            Self::Comm(comm) => comm.bytes,
            Self::Io(io) => io.bytes,
            Self::Sleep(sleep) => sleep.duration,
        }
    }

    pub fn is_assigned(&self) -> bool {
        match self {
            Self::Exec(exec) => exec.is_assigned(),
            Self::Comm(comm) => comm.src.is_some() && comm.dst.is_some(),
            Self::Io(io) => io.disk.is_some(),
            Self::Sleep(_) => true,
        }
    }
}

/// Snapshot of an activity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityInfo {
    /// Activity id.
    pub id: ActivityId,
    /// Activity name.
    pub name: String,
    /// Activity kind.
    pub kind: ActivityKindTag,
    /// Current state.
    pub state: ActivityState,
    /// Total amount of work (flops, bytes, seconds, or 1 for parallel tasks).
    pub amount: f64,
    /// Remaining amount of work.
    pub remaining: f64,
    /// Remaining fraction of the work in `[0, 1]`.
    pub remaining_ratio: f64,
    /// Current rate in work units per second.
    pub rate: f64,
    /// Time at which the activity was attached to its resources.
    pub start_time: Option<f64>,
    /// Time at which the activity reached a terminal state.
    pub finish_time: Option<f64>,
    /// Time at which all dependencies of the activity were solved.
    pub ready_time: Option<f64>,
    /// Failure cause for failed activities.
    pub failure: Option<FailureCause>,
}

/// Engine-side state of an activity.
pub(crate) struct ActivityRecord {
    pub id: ActivityId,
    /// Creation order, used for deterministic processing of simultaneous completions.
    pub seq: u64,
    pub name: String,
    pub kind: ActivityKind,
    pub state: ActivityState,
    pub cost: f64,
    pub remaining: f64,
    pub rate: f64,
    pub priority: f64,
    pub user_bound: Option<f64>,
    /// Remaining latency before the bandwidth phase of communications and parallel tasks.
    pub latency: f64,
    /// Key in the ordered set of attached activities.
    pub claim_seq: Option<u64>,
    /// Resources whose failure fails the activity.
    pub resources: Vec<ResourceId>,
    pub staged: bool,
    pub start_requested: bool,
    pub detached: bool,
    pub owner: Option<ActorId>,
    pub pending_deps: BTreeSet<ActivityId>,
    pub successors: Vec<ActivityId>,
    pub waiters: Vec<Waker>,
    pub on_completion: Vec<Box<dyn FnOnce(&ActivityInfo)>>,
    pub on_veto: Vec<Rc<dyn Fn(&ActivityInfo, VetoReason)>>,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
    pub ready_time: Option<f64>,
    pub failure: Option<FailureCause>,
    pub payload: Option<Box<dyn EventData>>,
    /// Alive while user handles to the activity exist.
    pub handles: Weak<()>,
}

impl ActivityRecord {
    pub fn new(id: ActivityId, seq: u64, name: String, kind: ActivityKind, handles: Weak<()>) -> Self {
        let cost = kind.cost();
        Self {
            id,
            seq,
            name,
            kind,
            state: ActivityState::Init,
            cost,
            remaining: cost,
            rate: 0.,
            priority: 1.,
            user_bound: None,
            latency: 0.,
            claim_seq: None,
            resources: Vec::new(),
            staged: false,
            start_requested: false,
            detached: false,
            owner: None,
            pending_deps: BTreeSet::new(),
            successors: Vec::new(),
            waiters: Vec::new(),
            on_completion: Vec::new(),
            on_veto: Vec::new(),
            start_time: None,
            finish_time: None,
            ready_time: None,
            failure: None,
            payload: None,
            handles,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.claim_seq.is_some()
    }

    pub fn remaining_ratio(&self) -> f64 {
        if self.cost > 0. {
            (self.remaining / self.cost).clamp(0., 1.)
        } else {
            0.
        }
    }

    pub fn info(&self) -> ActivityInfo {
        ActivityInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.tag(),
            state: self.state,
            amount: self.cost,
            remaining: self.remaining,
            remaining_ratio: self.remaining_ratio(),
            rate: self.rate,
            start_time: self.start_time,
            finish_time: self.finish_time,
            ready_time: self.ready_time,
            failure: self.failure.clone(),
        }
    }

    /// Wakes all futures waiting for the activity.
    pub fn wake_waiters(&mut self) {
        for waker in self.waiters.drain(..) {
            waker.wake();
        }
    }

    pub fn add_waiter(&mut self, waker: &Waker) {
        if !self.waiters.iter().any(|w| w.will_wake(waker)) {
            self.waiters.push(waker.clone());
        }
    }
}
