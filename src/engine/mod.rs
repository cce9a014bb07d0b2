//! The simulation engine.
//!
//! The engine advances the clock from one event to the next. Between two events, the set of attached activities and
//! the resource capacities do not change, so every activity progresses at the constant rate computed by the max-min
//! solver at the beginning of this _epoch_. An event is either an activity completion (including the end of the
//! latency phase of a communication) or a timer (bounded waits, resource profiles, scheduled resource changes, actor
//! kill times).
//!
//! Events happening at the same instant are processed in a fixed order: first the activities completing at this
//! instant, by creation order, then the timers, by due time and then by creation order.

mod dag;
mod epoch;
mod lifecycle;
mod resources;

use crate::activity::{ActivityId, ActivityKindTag, ActivityState};
use crate::error::{FailureCause, SimError};
use crate::resource::{ResourceId, ResourceKind};
use crate::state::SimulationState;

pub(crate) const TARGET: &str = "simflow::engine";

impl SimulationState {
    /// Converts the terminal state of an activity into the result reported to its waiters.
    pub(crate) fn completion_result(&self, id: ActivityId) -> Option<Result<(), SimError>> {
        let record = self.activities.get(id)?;
        let name = record.name.clone();
        match record.state {
            ActivityState::Finished => Some(Ok(())),
            ActivityState::Canceled => Some(Err(SimError::Canceled { activity: name })),
            ActivityState::Failed => match record.failure.clone() {
                Some(cause) => Some(Err(failure_error(name, record.kind.tag(), cause))),
                None => Some(Err(SimError::Canceled { activity: name })),
            },
            _ => None,
        }
    }

    pub(crate) fn failure_cause(&self, resource: ResourceId) -> FailureCause {
        let name = self.resources.name(resource).to_string();
        match self.resources.get(resource).map(|r| r.kind) {
            Some(ResourceKind::Link) => FailureCause::LinkOff { link: name },
            Some(ResourceKind::Disk) => FailureCause::DiskOff { disk: name },
            _ => FailureCause::HostOff { host: name },
        }
    }
}

fn failure_error(activity: String, kind: ActivityKindTag, cause: FailureCause) -> SimError {
    match (kind, cause) {
        (_, FailureCause::Dependency { predecessor }) => SimError::DependencyFailed { activity, predecessor },
        (_, FailureCause::LinkOff { link }) => SimError::NetworkFailure {
            reason: format!("link {link} is off"),
        },
        (ActivityKindTag::Comm, FailureCause::HostOff { host }) => SimError::NetworkFailure {
            reason: format!("host {host} is off"),
        },
        (_, FailureCause::DiskOff { disk }) => SimError::StorageFailure { disk },
        (_, FailureCause::HostOff { host }) => SimError::HostFailure { host },
        (_, FailureCause::Binding { reason }) => SimError::InvalidBinding(reason),
    }
}
