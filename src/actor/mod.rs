//! Actors: cooperatively scheduled simulated processes.
//!
//! An actor is an `async` function receiving an [`ActorContext`](crate::ActorContext). Its blocking calls (executing,
//! communicating, sleeping, joining) are futures which return control to the engine until the awaited event happens.
//! Actors woken at the same simulated instant are resumed in ascending pid order, which is the creation order.

mod executor;
mod lifecycle;

use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::task::Waker;

use futures::future::LocalBoxFuture;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityId;
use crate::context::ActorContext;
use crate::error::SimError;
use crate::event::TimerId;
use crate::resource::HostId;

pub(crate) use executor::{Executor, ReadyQueue};

/// Identifier of an actor (pid). Pids are assigned in creation order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub(crate) u32);

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    /// Running or blocked on a call.
    Running,
    /// Suspended: not resumed until explicitly resumed, its activities are frozen.
    Suspended,
    /// Terminated.
    Dead,
}

/// Snapshot of an actor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActorInfo {
    /// Actor pid.
    pub pid: ActorId,
    /// Actor name.
    pub name: String,
    /// Host on which the actor is located.
    pub host: HostId,
    /// Current state.
    pub state: ActorState,
    /// Whether the actor is a daemon.
    pub daemon: bool,
    /// Spawn time.
    pub start_time: f64,
    /// Termination time.
    pub end_time: Option<f64>,
    /// Whether the actor was killed or returned an error.
    pub failed: bool,
    /// Number of activities created by the actor and not terminated yet.
    pub active_activities: usize,
}

pub(crate) type ActorFuture = LocalBoxFuture<'static, Result<(), SimError>>;

pub(crate) type ActorFactory = Rc<dyn Fn(ActorContext) -> ActorFuture>;

/// What is needed to re-create an actor when its host is turned back on.
#[derive(Clone)]
pub(crate) struct RestartEntry {
    pub name: String,
    pub host: HostId,
    pub daemon: bool,
    pub factory: ActorFactory,
}

pub(crate) struct ActorRecord {
    pub pid: ActorId,
    pub name: String,
    pub host: HostId,
    pub state: ActorState,
    pub daemon: bool,
    pub factory: Option<ActorFactory>,
    pub on_exit: Vec<Box<dyn FnOnce(bool)>>,
    pub joiners: Vec<Waker>,
    /// Non-terminal activities created by the actor.
    pub owned: Vec<ActivityId>,
    /// Activities frozen by the suspension of the actor.
    pub frozen: Vec<ActivityId>,
    pub kill_timer: Option<TimerId>,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub failed: bool,
}

impl ActorRecord {
    pub fn is_alive(&self) -> bool {
        self.state != ActorState::Dead
    }

    pub fn info(&self) -> ActorInfo {
        ActorInfo {
            pid: self.pid,
            name: self.name.clone(),
            host: self.host,
            state: self.state,
            daemon: self.daemon,
            start_time: self.start_time,
            end_time: self.end_time,
            failed: self.failed,
            active_activities: self.owned.len(),
        }
    }
}

#[derive(Default)]
pub(crate) struct ActorTable {
    actors: Vec<ActorRecord>,
    pub restarts: FxHashMap<HostId, Vec<RestartEntry>>,
}

impl ActorTable {
    pub fn next_pid(&self) -> ActorId {
        ActorId(self.actors.len() as u32)
    }

    pub fn push(&mut self, record: ActorRecord) {
        self.actors.push(record);
    }

    pub fn get(&self, pid: ActorId) -> Option<&ActorRecord> {
        self.actors.get(pid.0 as usize)
    }

    pub fn get_mut(&mut self, pid: ActorId) -> Option<&mut ActorRecord> {
        self.actors.get_mut(pid.0 as usize)
    }

    pub fn alive(&self) -> impl Iterator<Item = &ActorRecord> {
        self.actors.iter().filter(|actor| actor.is_alive())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActorRecord> {
        self.actors.iter()
    }
}
