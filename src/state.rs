use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;
use serde::Serialize;

use crate::activity::{ActivityArena, ActivityId};
use crate::actor::{ActorFuture, ActorId, ActorTable, ReadyQueue, RestartEntry};
use crate::config::SimulationConfig;
use crate::event::{TimerAction, TimerQueue};
use crate::handler::Notification;
use crate::platform::{AttachedProfile, Platform};
use crate::profile::ProfileCursor;
use crate::resource::ResourceTable;

/// Counters collected during the simulation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimulationStats {
    /// Number of engine steps which advanced the clock or processed events.
    pub steps: u64,
    /// Number of max-min solver runs.
    pub solves: u64,
    /// Number of fired timers.
    pub timers_fired: u64,
    /// Number of created activities.
    pub activities_created: u64,
    /// Number of finished activities.
    pub activities_finished: u64,
    /// Number of failed activities.
    pub activities_failed: u64,
    /// Number of canceled activities.
    pub activities_canceled: u64,
    /// Number of spawned actors.
    pub actors_spawned: u64,
    /// Number of terminated actors.
    pub actors_terminated: u64,
}

pub(crate) enum OutboxItem {
    Callback(Box<dyn FnOnce()>),
    Notification(Notification),
}

/// Work produced by the engine that must run outside of the state borrow.
#[derive(Default)]
pub(crate) struct Outbox {
    pub items: VecDeque<OutboxItem>,
    pub spawned: Vec<(ActorId, ActorFuture)>,
    pub reaped: Vec<ActorId>,
    pub restarts: Vec<RestartEntry>,
}

/// Whole mutable state of a simulation.
///
/// Only the engine advances the clock. Behavior is split into `impl` blocks in the `engine` and `actor` modules.
pub(crate) struct SimulationState {
    clock: f64,
    rand: Pcg64,
    pub config: SimulationConfig,
    pub timers: TimerQueue,
    pub activities: ActivityArena,
    pub resources: ResourceTable,
    pub profiles: Vec<AttachedProfile>,
    pub actors: ActorTable,
    /// Activities attached to their resources, by claim order.
    pub active: BTreeMap<u64, ActivityId>,
    pub to_attach: Vec<ActivityId>,
    pub next_claim_seq: u64,
    /// Set when the rates must be recomputed.
    pub dirty: bool,
    /// Terminal activities waiting to be reclaimed.
    pub terminated: Vec<ActivityId>,
    pub outbox: Outbox,
    pub stats: SimulationStats,
    pub ready: Arc<ReadyQueue>,
}

impl SimulationState {
    pub fn new(seed: u64, platform: Platform, config: SimulationConfig, ready: Arc<ReadyQueue>) -> Self {
        let profiles = platform.profiles().to_vec();
        let resources = ResourceTable::from_platform(platform, &config);
        let mut state = Self {
            clock: 0.0,
            rand: Pcg64::seed_from_u64(seed),
            config,
            timers: TimerQueue::default(),
            activities: ActivityArena::default(),
            resources,
            profiles,
            actors: ActorTable::default(),
            active: BTreeMap::new(),
            to_attach: Vec::new(),
            next_claim_seq: 0,
            dirty: false,
            terminated: Vec::new(),
            outbox: Outbox::default(),
            stats: SimulationStats::default(),
            ready,
        };
        for profile in 0..state.profiles.len() {
            state.schedule_profile_point(ProfileCursor {
                profile,
                index: 0,
                cycle: 0,
            });
        }
        state
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.clock = time;
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rand.gen_range(range)
    }

    pub fn defer(&mut self, callback: Box<dyn FnOnce()>) {
        self.outbox.items.push_back(OutboxItem::Callback(callback));
    }

    pub fn notify(&mut self, notification: Notification) {
        self.outbox.items.push_back(OutboxItem::Notification(notification));
    }

    pub fn schedule_profile_point(&mut self, cursor: ProfileCursor) {
        let profile = &self.profiles[cursor.profile].profile;
        if let Some((time, _)) = profile.point_at(&cursor) {
            let (time, action) = (time.max(self.clock), TimerAction::Profile(cursor));
            // periodic traces never end, they only matter while something else is pending
            if profile.period().is_some() {
                self.timers.push_background(time, action);
            } else {
                self.timers.push(time, action);
            }
        }
    }

    /// Reclaims terminal activities which are no longer referenced by user handles.
    pub fn reap_activities(&mut self) {
        let terminated = std::mem::take(&mut self.terminated);
        for id in terminated {
            let referenced = self
                .activities
                .get(id)
                .is_some_and(|record| record.handles.strong_count() > 0);
            if referenced {
                self.terminated.push(id);
            } else {
                self.activities.remove(id);
            }
        }
    }
}
