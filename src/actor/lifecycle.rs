use log::{debug, warn};

use crate::activity::ActivityState;
use crate::error::SimError;
use crate::event::TimerAction;
use crate::handler::Notification;
use crate::resource::HostId;
use crate::state::SimulationState;

use super::{ActorFactory, ActorId, ActorRecord, ActorState, RestartEntry};

const TARGET: &str = "simflow::actor";

impl SimulationState {
    /// Creates the actor record and schedules the first run of the actor.
    pub(crate) fn register_actor(
        &mut self,
        name: &str,
        host: HostId,
        daemon: bool,
        factory: Option<ActorFactory>,
    ) -> Result<ActorId, SimError> {
        if !self.resources.is_host(host) {
            return Err(SimError::InvalidArgument(format!("{:?} is not a host", host)));
        }
        if !self.resources.is_on(host.resource()) {
            return Err(SimError::HostFailure {
                host: self.resources.name(host.resource()).to_string(),
            });
        }
        let pid = self.actors.next_pid();
        self.actors.push(ActorRecord {
            pid,
            name: name.to_string(),
            host,
            state: ActorState::Running,
            daemon,
            factory,
            on_exit: Vec::new(),
            joiners: Vec::new(),
            owned: Vec::new(),
            frozen: Vec::new(),
            kill_timer: None,
            start_time: self.time(),
            end_time: None,
            failed: false,
        });
        self.ready.push(pid);
        self.stats.actors_spawned += 1;
        debug!(
            target: TARGET,
            "[{:.3}] actor {} ({}) started on {}",
            self.time(),
            name,
            pid,
            self.resources.name(host.resource())
        );
        Ok(pid)
    }

    fn alive_actor(&mut self, pid: ActorId) -> Result<&mut ActorRecord, SimError> {
        self.actors
            .get_mut(pid)
            .filter(|actor| actor.is_alive())
            .ok_or(SimError::UnknownActor(pid))
    }

    /// Called when the actor function returns.
    pub(crate) fn actor_returned(&mut self, pid: ActorId, result: Result<(), SimError>) {
        let failed = match result {
            Ok(()) => false,
            Err(err) => {
                warn!(target: TARGET, "[{:.3}] actor {} returned an error: {}", self.time(), pid, err);
                true
            }
        };
        self.terminate_actor(pid, failed);
    }

    /// Kills the actor. Killing a dead actor does nothing.
    pub(crate) fn kill_actor(&mut self, pid: ActorId) {
        if self.actors.get(pid).is_some_and(|actor| actor.is_alive()) {
            debug!(target: TARGET, "[{:.3}] actor {} killed", self.time(), pid);
            self.terminate_actor(pid, true);
        }
    }

    fn terminate_actor(&mut self, pid: ActorId, failed: bool) {
        let now = self.time();
        let Some(actor) = self.actors.get_mut(pid).filter(|actor| actor.is_alive()) else {
            return;
        };
        actor.state = ActorState::Dead;
        actor.end_time = Some(now);
        actor.failed = failed;
        actor.frozen.clear();
        for waker in actor.joiners.drain(..) {
            waker.wake();
        }
        let owned = std::mem::take(&mut actor.owned);
        let on_exit = std::mem::take(&mut actor.on_exit);
        let kill_timer = actor.kill_timer.take();
        let daemon = actor.daemon;
        let name = actor.name.clone();

        if let Some(timer) = kill_timer {
            self.timers.cancel(timer);
        }
        for id in owned {
            let cancel = self
                .activities
                .get(id)
                .is_some_and(|record| !record.detached && !record.state.is_terminal());
            if cancel {
                self.cancel_activity(id);
            }
        }
        if !on_exit.is_empty() {
            self.defer(Box::new(move || {
                for callback in on_exit.into_iter().rev() {
                    callback(failed);
                }
            }));
        }
        self.outbox.reaped.push(pid);
        self.stats.actors_terminated += 1;
        self.notify(Notification::ActorTerminated {
            time: now,
            actor: pid,
            name,
            failed,
        });

        if !daemon && self.actors.alive().all(|actor| actor.daemon) {
            let daemons: Vec<ActorId> = self.actors.alive().map(|actor| actor.pid).collect();
            for daemon in daemons {
                debug!(target: TARGET, "[{:.3}] killing daemon {}", now, daemon);
                self.terminate_actor(daemon, true);
            }
        }
    }

    /// Suspends the actor and freezes its running activities.
    pub(crate) fn suspend_actor(&mut self, pid: ActorId) -> Result<(), SimError> {
        let actor = self.alive_actor(pid)?;
        if actor.state == ActorState::Suspended {
            return Ok(());
        }
        actor.state = ActorState::Suspended;
        let owned = actor.owned.clone();
        let mut frozen = Vec::new();
        for id in owned {
            let running = self.activities.get(id).is_some_and(|record| {
                !record.detached && matches!(record.state, ActivityState::Scheduled | ActivityState::Running)
            });
            if running && self.suspend_activity(id).is_ok() {
                frozen.push(id);
            }
        }
        debug!(target: TARGET, "[{:.3}] actor {} suspended", self.time(), pid);
        if let Some(actor) = self.actors.get_mut(pid) {
            actor.frozen = frozen;
        }
        Ok(())
    }

    /// Resumes the actor and the activities frozen by its suspension.
    pub(crate) fn resume_actor(&mut self, pid: ActorId) -> Result<(), SimError> {
        let actor = self.alive_actor(pid)?;
        if actor.state != ActorState::Suspended {
            return Ok(());
        }
        actor.state = ActorState::Running;
        let frozen = std::mem::take(&mut actor.frozen);
        for id in frozen {
            // the activity may have been canceled meanwhile
            let _ = self.resume_activity(id);
        }
        debug!(target: TARGET, "[{:.3}] actor {} resumed", self.time(), pid);
        self.ready.push(pid);
        Ok(())
    }

    /// Relocates the actor. Only the activities created afterwards use the new host.
    pub(crate) fn set_actor_host(&mut self, pid: ActorId, host: HostId) -> Result<(), SimError> {
        if !self.resources.is_host(host) {
            return Err(SimError::InvalidArgument(format!("{:?} is not a host", host)));
        }
        let actor = self.alive_actor(pid)?;
        actor.host = host;
        Ok(())
    }

    pub(crate) fn set_kill_time(&mut self, pid: ActorId, time: f64) -> Result<(), SimError> {
        if !(time >= self.time()) {
            return Err(SimError::InvalidArgument(format!("kill time {time} is in the past")));
        }
        let previous = self.alive_actor(pid)?.kill_timer.take();
        if let Some(timer) = previous {
            self.timers.cancel(timer);
        }
        let timer = self.timers.push(time, TimerAction::KillActor(pid));
        if let Some(actor) = self.actors.get_mut(pid) {
            actor.kill_timer = Some(timer);
        }
        Ok(())
    }

    pub(crate) fn daemonize(&mut self, pid: ActorId) -> Result<(), SimError> {
        self.alive_actor(pid)?.daemon = true;
        Ok(())
    }

    pub(crate) fn add_on_exit(&mut self, pid: ActorId, callback: Box<dyn FnOnce(bool)>) -> Result<(), SimError> {
        self.alive_actor(pid)?.on_exit.push(callback);
        Ok(())
    }

    pub(crate) fn kill_actors_on_host(&mut self, host: HostId) {
        let victims: Vec<ActorId> = self
            .actors
            .alive()
            .filter(|actor| actor.host == host)
            .map(|actor| actor.pid)
            .collect();
        for pid in victims {
            if let Some(actor) = self.actors.get(pid) {
                if let Some(factory) = actor.factory.clone() {
                    let entry = RestartEntry {
                        name: actor.name.clone(),
                        host,
                        daemon: actor.daemon,
                        factory,
                    };
                    self.actors.restarts.entry(host).or_default().push(entry);
                }
            }
            self.kill_actor(pid);
        }
    }

    /// Queues the re-creation of the auto-restart actors of the host.
    pub(crate) fn restart_actors_on_host(&mut self, host: HostId) {
        if let Some(entries) = self.actors.restarts.remove(&host) {
            debug!(target: TARGET, "[{:.3}] restarting {} actors", self.time(), entries.len());
            self.outbox.restarts.extend(entries);
        }
    }
}
