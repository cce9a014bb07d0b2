use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::task::{waker, ArcWake};
use log::warn;

use crate::context::ActorContext;
use crate::state::SimulationState;

use super::{ActorFuture, ActorId, ActorState};

/// Set of actors to poll, ordered by pid.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    pids: Mutex<BTreeSet<ActorId>>,
}

impl ReadyQueue {
    pub fn push(&self, pid: ActorId) {
        self.pids.lock().unwrap_or_else(|e| e.into_inner()).insert(pid);
    }

    pub fn is_empty(&self) -> bool {
        self.pids.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    fn take(&self) -> Vec<ActorId> {
        let mut pids = self.pids.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pids).into_iter().collect()
    }
}

struct ActorWaker {
    pid: ActorId,
    queue: Arc<ReadyQueue>,
}

impl ArcWake for ActorWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.push(arc_self.pid);
    }
}

struct Task {
    future: ActorFuture,
    waker: Waker,
}

/// Drives actor futures.
///
/// Actors are polled in rounds: each round polls the actors woken since the previous round in ascending pid order.
/// The rounds continue until no actor is ready, which means that every living actor waits for a simulation event.
pub(crate) struct Executor {
    tasks: BTreeMap<ActorId, Task>,
    queue: Arc<ReadyQueue>,
}

impl Executor {
    pub fn new(queue: Arc<ReadyQueue>) -> Self {
        Self {
            tasks: BTreeMap::new(),
            queue,
        }
    }

    pub fn insert(&mut self, pid: ActorId, future: ActorFuture) {
        let waker = waker(Arc::new(ActorWaker {
            pid,
            queue: self.queue.clone(),
        }));
        self.tasks.insert(pid, Task { future, waker });
    }

    /// Moves the actors spawned or restarted by the engine in, and drops the futures of dead actors.
    fn sync(&mut self, state: &Rc<RefCell<SimulationState>>) {
        let (spawned, reaped, restarts) = {
            let mut state = state.borrow_mut();
            let outbox = &mut state.outbox;
            (
                std::mem::take(&mut outbox.spawned),
                std::mem::take(&mut outbox.reaped),
                std::mem::take(&mut outbox.restarts),
            )
        };
        for (pid, future) in spawned {
            self.insert(pid, future);
        }
        // futures are dropped here, outside of the state borrow
        for pid in reaped {
            self.tasks.remove(&pid);
        }
        for entry in restarts {
            let registered =
                state
                    .borrow_mut()
                    .register_actor(&entry.name, entry.host, entry.daemon, Some(entry.factory.clone()));
            match registered {
                Ok(pid) => {
                    let ctx = ActorContext::new(pid, entry.name.clone(), state.clone());
                    self.insert(pid, (entry.factory)(ctx));
                }
                Err(err) => warn!(target: "simflow::actor", "cannot restart actor {}: {}", entry.name, err),
            }
        }
    }

    /// Polls ready actors until none is ready. The `dispatch` callback runs after each poll, outside of any borrow, and
    /// returns true if it processed something. Returns true if at least one actor was polled or one item dispatched.
    pub fn run(&mut self, state: &Rc<RefCell<SimulationState>>, mut dispatch: impl FnMut() -> bool) -> bool {
        let mut progressed = false;
        loop {
            self.sync(state);
            progressed |= dispatch();
            self.sync(state);
            let batch = self.queue.take();
            if batch.is_empty() {
                return progressed;
            }
            for pid in batch {
                let status = state.borrow().actors.get(pid).map(|actor| actor.state);
                if status != Some(ActorState::Running) {
                    // suspended actors are woken again on resume
                    continue;
                }
                let Some(task) = self.tasks.get_mut(&pid) else {
                    continue;
                };
                let mut cx = Context::from_waker(&task.waker);
                let poll = task.future.as_mut().poll(&mut cx);
                progressed = true;
                if let Poll::Ready(result) = poll {
                    self.tasks.remove(&pid);
                    state.borrow_mut().actor_returned(pid, result);
                }
                self.sync(state);
                dispatch();
            }
        }
    }
}
