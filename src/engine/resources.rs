use log::{debug, warn};

use crate::error::SimError;
use crate::event::TimerAction;
use crate::handler::Notification;
use crate::resource::{HostId, ResourceChange, ResourceId, ResourceKind, ResourceState};
use crate::state::SimulationState;

use super::TARGET;

impl SimulationState {
    pub(crate) fn change_resource(&mut self, id: ResourceId, change: ResourceChange) {
        match change {
            ResourceChange::TurnOn => self.turn_on(id),
            ResourceChange::TurnOff => self.turn_off(id),
            ResourceChange::Scale(scale) => {
                if let Err(err) = self.set_scale(id, scale) {
                    warn!(target: TARGET, "[{:.3}] ignored scale change: {}", self.time(), err);
                }
            }
        }
    }

    /// Turns the resource off: fails every activity claiming it and kills the actors located on a host.
    pub(crate) fn turn_off(&mut self, id: ResourceId) {
        let Some(resource) = self.resources.get_mut(id) else {
            return;
        };
        if resource.state == ResourceState::Off {
            return;
        }
        resource.state = ResourceState::Off;
        let kind = resource.kind;
        let claims: Vec<_> = resource.claims.values().copied().collect();
        debug!(
            target: TARGET,
            "[{:.3}] {} turned off, failing {} activities",
            self.time(),
            self.resources.name(id),
            claims.len()
        );
        self.dirty = true;

        let cause = self.failure_cause(id);
        for activity in claims {
            self.fail_activity(activity, cause.clone());
        }
        // started but not yet attached activities fail on attach
        if kind == ResourceKind::Cpu {
            self.kill_actors_on_host(HostId(id));
        }
        self.notify_state(id);
    }

    /// Turns the resource on, restarting the auto-restart actors of a host.
    pub(crate) fn turn_on(&mut self, id: ResourceId) {
        let Some(resource) = self.resources.get_mut(id) else {
            return;
        };
        if resource.state == ResourceState::On {
            return;
        }
        resource.state = ResourceState::On;
        let kind = resource.kind;
        debug!(target: TARGET, "[{:.3}] {} turned on", self.time(), self.resources.name(id));
        self.dirty = true;
        if kind == ResourceKind::Cpu {
            self.restart_actors_on_host(HostId(id));
        }
        self.notify_state(id);
    }

    pub(crate) fn set_scale(&mut self, id: ResourceId, scale: f64) -> Result<(), SimError> {
        if !(scale.is_finite() && scale > 0.) {
            return Err(SimError::InvalidArgument(format!("scale must be positive, got {scale}")));
        }
        let now = self.time();
        let Some(resource) = self.resources.get_mut(id) else {
            return Err(SimError::InvalidArgument(format!("unknown resource {:?}", id)));
        };
        debug!(target: TARGET, "[{:.3}] {} scaled to {}", now, resource.name, scale);
        resource.scale = scale;
        self.dirty = true;
        Ok(())
    }

    /// Schedules a resource change at the given time.
    pub(crate) fn schedule_resource_change(
        &mut self,
        id: ResourceId,
        time: f64,
        change: ResourceChange,
    ) -> Result<(), SimError> {
        if self.resources.get(id).is_none() {
            return Err(SimError::InvalidArgument(format!("unknown resource {:?}", id)));
        }
        if !(time >= self.time()) {
            return Err(SimError::InvalidArgument(format!(
                "cannot schedule a change at {time} in the past"
            )));
        }
        self.timers.push(time, TimerAction::Resource { resource: id, change });
        Ok(())
    }

    fn notify_state(&mut self, id: ResourceId) {
        let Some(resource) = self.resources.get(id) else {
            return;
        };
        let notification = Notification::ResourceStateChanged {
            time: self.time(),
            resource: id,
            name: resource.name.clone(),
            state: resource.state,
        };
        self.notify(notification);
    }
}
