//! SimFlow is a discrete-event simulation engine for distributed systems. It simulates computations, communications
//! and disk operations competing for the capacity of CPUs, network links and disks, without running the real system.
//!
//! ## Contents
//!
//! - [Basic Concepts](crate#basic-concepts)
//! - [Example](crate#example)
//! - [Resource Sharing](crate#resource-sharing)
//! - [Time Advancement](crate#time-advancement)
//! - [Failures](crate#failures)
//! - [Dependencies](crate#dependencies)
//!
//! ## Basic Concepts
//!
//! **Platform.** The simulated infrastructure is described by a [`Platform`]: hosts with a CPU speed and a number of
//! cores, network links with a bandwidth and a latency, disks attached to hosts, and routes listing the links crossed
//! by a communication between two hosts. The platform also carries _profiles_ turning resources on and off or
//! changing their capacity over time.
//!
//! **Activity.** An [`Activity`] is a piece of work consuming resources: an execution of some amount of flops on one
//! or several hosts, a communication of some amount of bytes between two hosts, a disk read or write, or a sleep. The
//! engine assigns each running activity a rate and decreases its remaining amount as time advances. An activity is
//! created in the `Init` state, started, and ends `Finished`, `Failed` (a resource it uses was turned off) or
//! `Canceled`.
//!
//! **Actor.** An actor is a simulated process located on a host. It is written as an `async` function receiving an
//! [`ActorContext`]. Each blocking call (executing, communicating, sleeping, waiting for an activity) is a future that
//! returns control to the engine until the awaited event happens in simulated time. Actors are scheduled
//! cooperatively on a single thread, in a deterministic order.
//!
//! **Simulation.** [`Simulation`] owns the state, spawns the actors and advances the clock. It is created with a
//! random seed: the simulation-wide random number generator is the only source of randomness, so runs with the same
//! seed are identical.
//!
//! ## Example
//!
//! ```rust
//! use simflow::{log_info, HostSpec, LinkSpec, Platform, Simulation};
//!
//! let mut platform = Platform::new();
//! let master = platform.add_host("master", HostSpec::new(1e9)).unwrap();
//! let worker = platform.add_host("worker", HostSpec::new(2e9)).unwrap();
//! let link = platform.add_link("link", LinkSpec::new(1e8, 1e-3)).unwrap();
//! platform.add_route(master, worker, &[link], true).unwrap();
//!
//! let mut sim = Simulation::new(123, platform);
//! sim.spawn_actor("master", master, move |ctx| async move {
//!     // send the input of the task, then compute the task remotely
//!     ctx.communicate(worker, 1e8).await?;
//!     let task = ctx.parallel_exec_init(&[worker], vec![4e9], None);
//!     task.wait().await?;
//!     log_info!(ctx, "task done");
//!     Ok(())
//! })
//! .unwrap();
//!
//! sim.step_until_no_events();
//! assert!((sim.time() - 3.001).abs() < 1e-9);
//! ```
//!
//! ## Resource Sharing
//!
//! Activities using the same resource share its capacity according to the max-min fairness: each activity gets an
//! equal share unless it is limited elsewhere, in which case the unused capacity goes to the others. Priorities
//! weight the shares. Communications are limited by the most loaded link of their route. The computation is performed
//! by the pure [`solver::solve`] function each time the set of running activities or the resource capacities change.
//!
//! ## Time Advancement
//!
//! Between two events the rates of all activities are constant. The engine computes the time of the next event (an
//! activity completion or a timer), advances the clock to it, progresses every running activity proportionally to its
//! rate and resumes the actors waiting for the events of this instant. Events of the same instant are processed in a
//! fixed order: activity completions by creation order, then timers by creation order. Actors are then resumed by
//! ascending pid.
//!
//! ## Failures
//!
//! Turning a resource off fails every activity using it. The actors waiting for these activities get a
//! [`SimError::HostFailure`], [`SimError::NetworkFailure`] or [`SimError::StorageFailure`] and may react. Turning a host
//! off also kills the actors located on it. A bounded wait ([`Activity::wait_for`]) that expires returns
//! [`SimError::Timeout`] and leaves the activity running.
//!
//! ## Dependencies
//!
//! Activities can be organized in a DAG with [`Activity::add_successor`]. The start of an activity is _vetoed_ while
//! some of its predecessors are not finished or while it is not bound to resources. Vetoes are reported to
//! [`Activity::on_veto`] callbacks and as [`Notification::ActivityVetoed`], which lets a DAG scheduler bind the
//! activity to resources at the moment it becomes ready. A vetoed activity starts automatically once the condition
//! is satisfied.

#![warn(missing_docs)]

pub mod activity;
mod actor;
pub mod config;
mod context;
mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod log;
pub mod platform;
pub mod profile;
pub mod resource;
pub mod simulation;
pub mod solver;
mod state;

pub use colored;

pub use activity::{Activity, ActivityId, ActivityInfo, ActivityKindTag, ActivityState, ActivityWait, IoOp};
pub use actor::{ActorId, ActorInfo, ActorState};
pub use config::{NetworkConfig, PrecisionConfig, SimulationConfig};
pub use context::{ActorContext, Exit, JoinActor, SuspendSelf};
pub use error::{ConfigError, FailureCause, PlatformError, SimError, VetoReason};
pub use event::EventData;
pub use handler::{Notification, NotificationHandler};
pub use platform::{DiskSpec, HostSpec, LinkSpec, Platform};
pub use profile::{Profile, ProfileTarget};
pub use resource::{DiskId, HostId, LinkId, ResourceId, ResourceInfo, ResourceKind, ResourceState};
pub use simulation::Simulation;
pub use solver::SharingPolicy;
pub use state::SimulationStats;
