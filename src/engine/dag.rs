use log::trace;

use crate::activity::{ActivityId, ActivityKind, ActivityState};
use crate::error::SimError;
use crate::resource::HostId;
use crate::state::SimulationState;

use super::TARGET;

impl SimulationState {
    /// Makes `successor` depend on `predecessor`.
    ///
    /// A finished predecessor adds no dependency. The successor must not be started yet.
    pub(crate) fn add_dependency(&mut self, predecessor: ActivityId, successor: ActivityId) -> Result<(), SimError> {
        let (Some(pred), Some(succ)) = (self.activities.get(predecessor), self.activities.get(successor)) else {
            return Err(SimError::InvalidArgument("unknown activity".to_string()));
        };
        if predecessor == successor || self.reaches(successor, predecessor) {
            return Err(SimError::DependencyCycle {
                from: pred.name.clone(),
                to: succ.name.clone(),
            });
        }
        if succ.state != ActivityState::Init {
            return Err(SimError::InvalidState {
                activity: succ.name.clone(),
                state: succ.state,
                operation: "add a dependency to",
            });
        }
        match pred.state {
            ActivityState::Finished => return Ok(()),
            ActivityState::Failed | ActivityState::Canceled => {
                return Err(SimError::InvalidState {
                    activity: pred.name.clone(),
                    state: pred.state,
                    operation: "add a successor to",
                })
            }
            _ => {}
        }
        if succ.pending_deps.contains(&predecessor) {
            return Ok(());
        }
        trace!(target: TARGET, "[{:.3}] dependency {} -> {}", self.time(), pred.name, succ.name);
        if let Some(pred) = self.activities.get_mut(predecessor) {
            pred.successors.push(successor);
        }
        if let Some(succ) = self.activities.get_mut(successor) {
            succ.pending_deps.insert(predecessor);
        }
        Ok(())
    }

    /// Removes the dependency, starting the successor if it was only waiting for it.
    pub(crate) fn remove_dependency(&mut self, predecessor: ActivityId, successor: ActivityId) -> Result<(), SimError> {
        let removed = self
            .activities
            .get_mut(successor)
            .is_some_and(|succ| succ.pending_deps.remove(&predecessor));
        if !removed {
            return Err(SimError::InvalidArgument("no such dependency".to_string()));
        }
        if let Some(pred) = self.activities.get_mut(predecessor) {
            pred.successors.retain(|&s| s != successor);
        }
        self.mark_if_ready(successor);
        self.try_deferred_start(successor);
        Ok(())
    }

    pub(crate) fn dependencies_solved(&self, id: ActivityId) -> bool {
        self.activities
            .get(id)
            .is_some_and(|record| record.pending_deps.is_empty())
    }

    /// Returns true if `to` is reachable from `from` along successor edges.
    fn reaches(&self, from: ActivityId, to: ActivityId) -> bool {
        let mut stack = vec![from];
        let mut visited = Vec::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if visited.contains(&id) {
                continue;
            }
            visited.push(id);
            if let Some(record) = self.activities.get(id) {
                stack.extend(record.successors.iter().copied());
            }
        }
        false
    }

    pub(crate) fn take_successors(&mut self, id: ActivityId) -> Vec<ActivityId> {
        let successors = self
            .activities
            .get_mut(id)
            .map(|record| std::mem::take(&mut record.successors))
            .unwrap_or_default();
        for &successor in &successors {
            if let Some(succ) = self.activities.get_mut(successor) {
                succ.pending_deps.remove(&id);
            }
        }
        successors
    }

    fn mark_if_ready(&mut self, id: ActivityId) {
        let now = self.time();
        if let Some(record) = self.activities.get_mut(id) {
            if record.pending_deps.is_empty() && record.ready_time.is_none() {
                record.ready_time = Some(now);
            }
        }
    }

    /// Solves the dependency of the successors on a finished activity and tries to start the ready ones.
    pub(crate) fn release_successors(&mut self, id: ActivityId) {
        let source = self.exec_host(id);
        for successor in self.take_successors(id) {
            if let Some(host) = source {
                if let Some(ActivityKind::Comm(comm)) = self.activities.get_mut(successor).map(|r| &mut r.kind) {
                    comm.src.get_or_insert(host);
                }
            }
            if self.dependencies_solved(successor) {
                self.mark_if_ready(successor);
                if let Some(record) = self.activities.get_mut(successor) {
                    if record.state == ActivityState::Init {
                        record.start_requested = true;
                    }
                }
                self.try_deferred_start(successor);
            }
        }
    }

    /// Fills the missing destination of the communications feeding an execution bound to `host`.
    pub(crate) fn propagate_destination(&mut self, id: ActivityId, host: HostId) {
        let predecessors: Vec<ActivityId> = self
            .activities
            .get(id)
            .map(|record| record.pending_deps.iter().copied().collect())
            .unwrap_or_default();
        for predecessor in predecessors {
            let filled = match self.activities.get_mut(predecessor) {
                Some(record) if record.state == ActivityState::Init => match &mut record.kind {
                    ActivityKind::Comm(comm) if comm.dst.is_none() => {
                        comm.dst = Some(host);
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if filled {
                self.try_deferred_start(predecessor);
            }
        }
    }
}
