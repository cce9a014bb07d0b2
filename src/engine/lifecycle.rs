use std::rc::Weak;

use log::{debug, warn};

use crate::activity::{ActivityId, ActivityKind, ActivityState};
use crate::actor::ActorId;
use crate::error::{FailureCause, SimError, VetoReason};
use crate::handler::Notification;
use crate::resource::{DiskId, HostId};
use crate::state::SimulationState;

use super::TARGET;

impl SimulationState {
    pub(crate) fn create_activity(
        &mut self,
        name: Option<String>,
        kind: ActivityKind,
        owner: Option<ActorId>,
        handles: Weak<()>,
    ) -> ActivityId {
        let tag = format!("{:?}", kind.tag()).to_lowercase();
        let id = self.activities.insert(String::new(), kind, handles);
        if let Some(record) = self.activities.get_mut(id) {
            record.name = name.unwrap_or_else(|| format!("{}-{}", tag, record.seq));
            record.owner = owner;
        }
        if let Some(actor) = owner.and_then(|pid| self.actors.get_mut(pid)) {
            actor.owned.push(id);
        }
        self.stats.activities_created += 1;
        id
    }

    fn invalid_state(&self, id: ActivityId, operation: &'static str) -> SimError {
        match self.activities.get(id) {
            Some(record) => SimError::InvalidState {
                activity: record.name.clone(),
                state: record.state,
                operation,
            },
            None => SimError::InvalidArgument(format!("activity {id} does not exist")),
        }
    }

    /// Requests the start of an activity.
    ///
    /// The request is vetoed if the activity has unfinished predecessors or is not bound to resources. In that case the
    /// veto is reported and the request is remembered: the activity starts once the condition is satisfied.
    pub(crate) fn start_activity(&mut self, id: ActivityId) -> Result<(), SimError> {
        let Some(record) = self
            .activities
            .get_mut(id)
            .filter(|record| record.state == ActivityState::Init)
        else {
            return Err(self.invalid_state(id, "start"));
        };
        record.start_requested = true;
        let reason = if !record.pending_deps.is_empty() {
            Some(VetoReason::UnsolvedDependencies)
        } else if !record.kind.is_assigned() {
            Some(VetoReason::NotAssigned)
        } else {
            None
        };
        if let Some(reason) = reason {
            let activity = record.name.clone();
            self.report_veto(id, reason);
            return Err(SimError::Vetoed { activity, reason });
        }

        let kind = record.kind.clone();
        let binding = self.binding(&kind);
        let now = self.time();
        let Some(record) = self.activities.get_mut(id) else {
            return Err(self.invalid_state(id, "start"));
        };
        record.start_requested = false;
        binding?;
        record.state = ActivityState::Scheduled;
        debug!(target: TARGET, "[{:.3}] {} started", now, record.name);
        self.to_attach.push(id);
        Ok(())
    }

    fn report_veto(&mut self, id: ActivityId, reason: VetoReason) {
        let Some(record) = self.activities.get(id) else {
            return;
        };
        let info = record.info();
        debug!(target: TARGET, "[{:.3}] start of {} vetoed: {}", self.time(), info.name, reason);
        for callback in record.on_veto.clone() {
            let info = info.clone();
            self.defer(Box::new(move || callback(&info, reason)));
        }
        self.notify(Notification::ActivityVetoed {
            time: self.time(),
            activity: info,
            reason,
        });
    }

    /// Starts the activity if its start was requested and nothing prevents it anymore.
    pub(crate) fn try_deferred_start(&mut self, id: ActivityId) {
        let ready = self.activities.get(id).is_some_and(|record| {
            record.state == ActivityState::Init && record.start_requested && record.pending_deps.is_empty()
        });
        if !ready {
            return;
        }
        match self.start_activity(id) {
            Ok(()) | Err(SimError::Vetoed { .. }) => {}
            Err(SimError::InvalidBinding(reason)) => {
                warn!(target: TARGET, "[{:.3}] deferred start failed: {}", self.time(), reason);
                self.fail_activity(id, FailureCause::Binding { reason });
            }
            Err(err) => debug!(target: TARGET, "[{:.3}] deferred start failed: {}", self.time(), err),
        }
    }

    /// Cancels the activity. Canceling a terminal activity does nothing.
    pub(crate) fn cancel_activity(&mut self, id: ActivityId) {
        if self.activities.get(id).is_some_and(|record| !record.state.is_terminal()) {
            self.terminate(id, ActivityState::Canceled, None);
        }
    }

    pub(crate) fn finish_activity(&mut self, id: ActivityId) {
        self.terminate(id, ActivityState::Finished, None);
    }

    pub(crate) fn fail_activity(&mut self, id: ActivityId, cause: FailureCause) {
        if self.activities.get(id).is_some_and(|record| !record.state.is_terminal()) {
            self.terminate(id, ActivityState::Failed, Some(cause));
        }
    }

    /// Moves the activity to a terminal state and propagates the outcome to its successors.
    fn terminate(&mut self, id: ActivityId, state: ActivityState, cause: Option<FailureCause>) {
        let mut worklist = vec![(id, state, cause)];
        while let Some((id, state, cause)) = worklist.pop() {
            self.detach(id);
            self.to_attach.retain(|&other| other != id);
            let now = self.time();
            let Some(record) = self.activities.get_mut(id) else {
                continue;
            };
            if record.state.is_terminal() {
                continue;
            }
            record.state = state;
            record.rate = 0.;
            record.latency = 0.;
            record.start_requested = false;
            record.finish_time = Some(now);
            record.failure = cause;
            if state == ActivityState::Finished {
                record.remaining = 0.;
            }
            record.wake_waiters();
            let info = record.info();
            let callbacks = std::mem::take(&mut record.on_completion);
            if let Some(actor) = record.owner.and_then(|pid| self.actors.get_mut(pid)) {
                actor.owned.retain(|&other| other != id);
            }
            match state {
                ActivityState::Finished => self.stats.activities_finished += 1,
                ActivityState::Failed => self.stats.activities_failed += 1,
                _ => self.stats.activities_canceled += 1,
            }
            debug!(
                target: TARGET,
                "[{:.3}] {} {:?} (remaining ratio {:.3})",
                now,
                info.name,
                info.state,
                info.remaining_ratio
            );
            if !callbacks.is_empty() {
                let info = info.clone();
                self.defer(Box::new(move || {
                    for callback in callbacks {
                        callback(&info);
                    }
                }));
            }
            let name = info.name.clone();
            self.notify(Notification::ActivityCompleted {
                time: now,
                activity: info,
            });
            self.terminated.push(id);

            if state == ActivityState::Finished {
                self.release_successors(id);
            } else {
                for successor in self.take_successors(id) {
                    worklist.push((
                        successor,
                        ActivityState::Failed,
                        Some(FailureCause::Dependency {
                            predecessor: name.clone(),
                        }),
                    ));
                }
            }
        }
    }

    pub(crate) fn suspend_activity(&mut self, id: ActivityId) -> Result<(), SimError> {
        let Some(record) = self.activities.get_mut(id) else {
            return Err(self.invalid_state(id, "suspend"));
        };
        match record.state {
            ActivityState::Scheduled | ActivityState::Running => {
                record.state = ActivityState::Suspended;
                if record.is_attached() {
                    self.dirty = true;
                }
                Ok(())
            }
            ActivityState::Suspended => Ok(()),
            _ => Err(self.invalid_state(id, "suspend")),
        }
    }

    pub(crate) fn resume_activity(&mut self, id: ActivityId) -> Result<(), SimError> {
        let Some(record) = self.activities.get_mut(id) else {
            return Err(self.invalid_state(id, "resume"));
        };
        match record.state {
            ActivityState::Suspended => {
                if record.is_attached() {
                    record.state = ActivityState::Running;
                    self.dirty = true;
                } else {
                    record.state = ActivityState::Scheduled;
                }
                Ok(())
            }
            ActivityState::Scheduled | ActivityState::Running => Ok(()),
            _ => Err(self.invalid_state(id, "resume")),
        }
    }

    pub(crate) fn set_activity_priority(&mut self, id: ActivityId, priority: f64) -> Result<(), SimError> {
        if !(priority.is_finite() && priority > 0.) {
            return Err(SimError::InvalidArgument(format!("priority must be positive, got {priority}")));
        }
        let Some(record) = self.activities.get_mut(id).filter(|r| !r.state.is_terminal()) else {
            return Err(self.invalid_state(id, "set priority of"));
        };
        record.priority = priority;
        if record.is_attached() {
            self.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn set_activity_bound(&mut self, id: ActivityId, bound: Option<f64>) -> Result<(), SimError> {
        if let Some(bound) = bound {
            if !(bound > 0.) {
                return Err(SimError::InvalidArgument(format!("rate bound must be positive, got {bound}")));
            }
        }
        let Some(record) = self.activities.get_mut(id).filter(|r| !r.state.is_terminal()) else {
            return Err(self.invalid_state(id, "set bound of"));
        };
        record.user_bound = bound;
        if record.is_attached() {
            self.dirty = true;
        }
        Ok(())
    }

    /// Checks that the binding of the activity can still be changed.
    fn check_rebindable(&self, id: ActivityId) -> Result<(), SimError> {
        match self.activities.get(id).map(|r| r.state) {
            Some(ActivityState::Init) => Ok(()),
            Some(ActivityState::Scheduled) if !self.activities.get(id).is_some_and(|r| r.is_attached()) => Ok(()),
            _ => Err(self.invalid_state(id, "rebind")),
        }
    }

    /// Applies a new binding, checking it if the activity is already started.
    fn rebind(&mut self, id: ActivityId, update: impl FnOnce(&mut ActivityKind) -> Result<(), SimError>) -> Result<(), SimError> {
        self.check_rebindable(id)?;
        let Some(mut kind) = self.activities.get(id).map(|record| record.kind.clone()) else {
            return Err(self.invalid_state(id, "rebind"));
        };
        update(&mut kind)?;
        let scheduled = self.activities.get(id).is_some_and(|r| r.state == ActivityState::Scheduled);
        if scheduled {
            self.binding(&kind)?;
        }
        if let Some(record) = self.activities.get_mut(id) {
            record.kind = kind;
        }
        Ok(())
    }

    /// Binds an execution to hosts, one per flops entry.
    pub(crate) fn set_exec_hosts(&mut self, id: ActivityId, hosts: &[HostId]) -> Result<(), SimError> {
        self.rebind(id, |kind| match kind {
            ActivityKind::Exec(exec) if hosts.len() == exec.flops.len() => {
                exec.hosts = hosts.to_vec();
                Ok(())
            }
            ActivityKind::Exec(exec) => Err(SimError::InvalidArgument(format!(
                "expected {} hosts, got {}",
                exec.flops.len(),
                hosts.len()
            ))),
            _ => Err(SimError::InvalidArgument("activity is not an execution".to_string())),
        })?;
        if let [host] = hosts {
            self.propagate_destination(id, *host);
        }
        self.try_deferred_start(id);
        Ok(())
    }

    pub(crate) fn set_exec_threads(&mut self, id: ActivityId, threads: u32) -> Result<(), SimError> {
        if threads == 0 {
            return Err(SimError::InvalidArgument("thread count must be positive".to_string()));
        }
        let Some(record) = self.activities.get_mut(id).filter(|r| !r.state.is_terminal()) else {
            return Err(self.invalid_state(id, "set threads of"));
        };
        match &mut record.kind {
            ActivityKind::Exec(exec) if !exec.is_parallel() => exec.threads = threads,
            _ => return Err(SimError::InvalidArgument("threads apply to sequential executions".to_string())),
        }
        if record.is_attached() {
            self.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn set_comm_endpoints(
        &mut self,
        id: ActivityId,
        src: Option<HostId>,
        dst: Option<HostId>,
    ) -> Result<(), SimError> {
        self.rebind(id, |kind| match kind {
            ActivityKind::Comm(comm) => {
                comm.src = src.or(comm.src);
                comm.dst = dst.or(comm.dst);
                Ok(())
            }
            _ => Err(SimError::InvalidArgument("activity is not a communication".to_string())),
        })?;
        self.try_deferred_start(id);
        Ok(())
    }

    pub(crate) fn set_io_disk(&mut self, id: ActivityId, disk: DiskId) -> Result<(), SimError> {
        self.rebind(id, |kind| match kind {
            ActivityKind::Io(io) => {
                io.disk = Some(disk);
                Ok(())
            }
            _ => Err(SimError::InvalidArgument("activity is not an I/O".to_string())),
        })?;
        self.try_deferred_start(id);
        Ok(())
    }

    /// Moves a started sequential execution to another host, keeping its progress.
    pub(crate) fn migrate_exec(&mut self, id: ActivityId, host: HostId) -> Result<(), SimError> {
        let Some(record) = self.activities.get(id) else {
            return Err(self.invalid_state(id, "migrate"));
        };
        if record.state.is_terminal() {
            return Err(self.invalid_state(id, "migrate"));
        }
        let mut kind = record.kind.clone();
        match &mut kind {
            ActivityKind::Exec(exec) if !exec.is_parallel() => exec.hosts = vec![host],
            _ => return Err(SimError::InvalidArgument("only sequential executions can migrate".to_string())),
        }
        self.binding(&kind)?;
        let attached = record.is_attached();
        self.detach(id);
        if let Some(record) = self.activities.get_mut(id) {
            record.kind = kind;
        }
        if attached {
            self.attach(id);
        }
        Ok(())
    }

    pub(crate) fn exec_host(&self, id: ActivityId) -> Option<HostId> {
        match &self.activities.get(id)?.kind {
            ActivityKind::Exec(exec) if !exec.is_parallel() => exec.hosts.first().copied(),
            _ => None,
        }
    }
}
