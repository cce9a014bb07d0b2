//! Notifications about simulation events.

use serde::Serialize;

use crate::activity::ActivityInfo;
use crate::actor::ActorId;
use crate::error::VetoReason;
use crate::resource::{ResourceId, ResourceState};

/// Event reported to the registered [`NotificationHandler`]s.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Notification {
    /// An activity reached a terminal state.
    ActivityCompleted {
        /// Simulation time.
        time: f64,
        /// Activity snapshot taken at completion.
        activity: ActivityInfo,
    },
    /// The start of an activity was vetoed.
    ActivityVetoed {
        /// Simulation time.
        time: f64,
        /// Activity snapshot.
        activity: ActivityInfo,
        /// Why the activity cannot start yet.
        reason: VetoReason,
    },
    /// A resource was turned on or off.
    ResourceStateChanged {
        /// Simulation time.
        time: f64,
        /// Resource id.
        resource: ResourceId,
        /// Resource name.
        name: String,
        /// New state.
        state: ResourceState,
    },
    /// An actor terminated.
    ActorTerminated {
        /// Simulation time.
        time: f64,
        /// Actor pid.
        actor: ActorId,
        /// Actor name.
        name: String,
        /// Whether the actor was killed or returned an error.
        failed: bool,
    },
}

impl Notification {
    /// Returns the time at which the notification was produced.
    pub fn time(&self) -> f64 {
        match self {
            Self::ActivityCompleted { time, .. }
            | Self::ActivityVetoed { time, .. }
            | Self::ResourceStateChanged { time, .. }
            | Self::ActorTerminated { time, .. } => *time,
        }
    }
}

/// Trait for observing the simulation.
///
/// Handlers are invoked outside of the engine, so they may freely call back into the simulation through the handles
/// they captured.
pub trait NotificationHandler {
    /// Processes a notification.
    fn on(&mut self, notification: &Notification);
}

impl<F: FnMut(&Notification)> NotificationHandler for F {
    fn on(&mut self, notification: &Notification) {
        self(notification)
    }
}
