//! Error types.
//!
//! [`SimError`] is returned to actor code and to the simulation driver. Resource failures, timeouts and cancellations
//! are ordinary recoverable conditions: the actor logic is expected to match on them and react. Broken internal
//! invariants of the engine are not represented here, they abort the simulation with a panic.

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::activity::ActivityState;
use crate::actor::ActorId;

/// Errors returned by activity and actor operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Host executing the activity (or the actor itself) was turned off.
    #[error("host {host} failed")]
    HostFailure {
        /// Name of the failed host.
        host: String,
    },

    /// Communication failed because a link on its route or one of its endpoints was turned off.
    #[error("network failure: {reason}")]
    NetworkFailure {
        /// Description of the failure.
        reason: String,
    },

    /// Disk used by the I/O activity was turned off.
    #[error("disk {disk} failed")]
    StorageFailure {
        /// Name of the failed disk.
        disk: String,
    },

    /// Bounded wait expired before the awaited condition. The awaited activity keeps running.
    #[error("timeout at {deadline}")]
    Timeout {
        /// Simulation time at which the wait expired.
        deadline: f64,
    },

    /// Activity was canceled.
    #[error("activity {activity} was canceled")]
    Canceled {
        /// Name of the canceled activity.
        activity: String,
    },

    /// Activity cannot start yet.
    #[error("start of {activity} vetoed: {reason}")]
    Vetoed {
        /// Name of the vetoed activity.
        activity: String,
        /// Why the activity cannot start.
        reason: VetoReason,
    },

    /// A predecessor of the activity failed or was canceled.
    #[error("activity {activity} failed because its predecessor {predecessor} did not finish")]
    DependencyFailed {
        /// Name of the activity.
        activity: String,
        /// Name of the failed predecessor.
        predecessor: String,
    },

    /// Operation is not allowed in the current activity state.
    #[error("cannot {operation} activity {activity} in state {state:?}")]
    InvalidState {
        /// Name of the activity.
        activity: String,
        /// Current state.
        state: ActivityState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// Adding the dependency would create a cycle.
    #[error("dependency {from} -> {to} would create a cycle")]
    DependencyCycle {
        /// Name of the predecessor.
        from: String,
        /// Name of the successor.
        to: String,
    },

    /// Activity is bound to resources it cannot use (e.g. hosts without a route between them).
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// Invalid argument value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Actor does not exist or is already dead.
    #[error("unknown actor {0:?}")]
    UnknownActor(ActorId),
}

impl SimError {
    /// Returns true if the error is caused by a resource turned off.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            Self::HostFailure { .. } | Self::NetworkFailure { .. } | Self::StorageFailure { .. }
        )
    }

    /// Returns true if the error is a timeout of a bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Reason why an activity start was vetoed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VetoReason {
    /// Some predecessors are not finished yet.
    UnsolvedDependencies,
    /// Activity is not bound to resources yet.
    NotAssigned,
}

impl std::fmt::Display for VetoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsolvedDependencies => write!(f, "dependencies are not solved"),
            Self::NotAssigned => write!(f, "resources are not assigned"),
        }
    }
}

/// Why an activity ended in the `Failed` state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum FailureCause {
    /// A host used by the activity was turned off.
    HostOff {
        /// Host name.
        host: String,
    },
    /// A link used by the activity was turned off.
    LinkOff {
        /// Link name.
        link: String,
    },
    /// A disk used by the activity was turned off.
    DiskOff {
        /// Disk name.
        disk: String,
    },
    /// A predecessor failed or was canceled.
    Dependency {
        /// Predecessor name.
        predecessor: String,
    },
    /// The resources filled in when the activity became ready cannot be used together.
    Binding {
        /// Why the binding is invalid.
        reason: String,
    },
}

/// Errors reported while describing a platform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    /// Resource name is already used.
    #[error("resource name {0} is already used")]
    DuplicateName(String),
    /// Capacity must be positive and finite.
    #[error("invalid {what} of {name}: {value}")]
    InvalidCapacity {
        /// Resource name.
        name: String,
        /// Property name.
        what: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// Resource id does not belong to this platform or has a wrong kind.
    #[error("unknown resource {0}")]
    UnknownResource(String),
    /// Profile is malformed.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

/// Errors reported when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),
    /// Configuration is not valid JSON or has wrong fields.
    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),
    /// A parameter has an invalid value.
    #[error("invalid config parameter {name}: {reason}")]
    Invalid {
        /// Parameter name.
        name: &'static str,
        /// Description of the problem.
        reason: String,
    },
}
