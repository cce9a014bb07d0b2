//! Schedules a random layered workflow on a small cluster.
//!
//! Tasks are created without hosts. A scheduler registered as notification handler binds each task to the least
//! loaded host when the engine reports that the task, or the transfer feeding it, cannot start because it is not
//! bound yet.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::info;

use simflow::{
    Activity, ActivityId, ActivityKindTag, ActivityState, HostId, HostSpec, LinkSpec, Notification,
    NotificationHandler, Platform, Simulation, VetoReason,
};

const LAYERS: usize = 5;
const WIDTH: usize = 6;

struct Scheduler {
    hosts: Vec<HostId>,
    load: Vec<usize>,
    tasks: HashMap<ActivityId, (Activity, Option<usize>)>,
    /// Transfer -> task consuming its output.
    consumers: HashMap<ActivityId, ActivityId>,
}

impl Scheduler {
    fn new(hosts: Vec<HostId>) -> Self {
        let load = vec![0; hosts.len()];
        Self {
            hosts,
            load,
            tasks: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    fn place(&mut self, task: ActivityId, time: f64) {
        let Some((activity, slot)) = self.tasks.get_mut(&task) else {
            return;
        };
        if slot.is_some() {
            return;
        }
        let (index, _) = self
            .load
            .iter()
            .enumerate()
            .min_by_key(|&(i, load)| (*load, i))
            .expect("cluster has hosts");
        *slot = Some(index);
        self.load[index] += 1;
        info!("[{:.3}] {} placed on host {}", time, activity.name(), index);
        activity.set_host(self.hosts[index]).expect("task is not started yet");
    }
}

impl NotificationHandler for Scheduler {
    fn on(&mut self, notification: &Notification) {
        match notification {
            Notification::ActivityVetoed {
                time,
                activity,
                reason: VetoReason::NotAssigned,
            } => {
                let task = match activity.kind {
                    ActivityKindTag::Comm => self.consumers.get(&activity.id).copied(),
                    _ => Some(activity.id),
                };
                if let Some(task) = task {
                    self.place(task, *time);
                }
            }
            Notification::ActivityCompleted { time, activity } => {
                if let Some((_, Some(index))) = self.tasks.get(&activity.id) {
                    self.load[*index] -= 1;
                    info!("[{:.3}] {} {:?}", time, activity.name, activity.state);
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();

    let mut platform = Platform::new();
    let mut hosts = Vec::new();
    let mut links = Vec::new();
    for i in 0..4 {
        let speed = if i < 2 { 2e9 } else { 1e9 };
        hosts.push(platform.add_host(&format!("host-{i}"), HostSpec::new(speed)).unwrap());
        links.push(platform.add_link(&format!("link-{i}"), LinkSpec::new(1.25e8, 5e-5)).unwrap());
    }
    for i in 0..hosts.len() {
        for j in i + 1..hosts.len() {
            platform.add_route(hosts[i], hosts[j], &[links[i], links[j]], true).unwrap();
        }
    }

    let mut sim = Simulation::new(42, platform);
    let scheduler = Rc::new(RefCell::new(Scheduler::new(hosts)));
    sim.add_handler(scheduler.clone());

    let mut layers: Vec<Vec<Activity>> = Vec::new();
    let mut transfers = Vec::new();
    for layer in 0..LAYERS {
        let mut tasks = Vec::new();
        for k in 0..WIDTH {
            let flops = sim.gen_range(1e9..8e9);
            let task = sim.exec_init(None, flops).with_name(&format!("task-{layer}-{k}"));
            if let Some(previous) = layers.last() {
                let parents = sim.gen_range(1..=2);
                for _ in 0..parents {
                    let parent: &Activity = &previous[sim.gen_range(0..previous.len())];
                    let bytes = sim.gen_range(1e7..2e8);
                    let transfer = sim
                        .comm_init(None, None, bytes)
                        .with_name(&format!("{}->{}", parent.name(), task.name()));
                    if parent.add_successor(&transfer).is_err() || transfer.add_successor(&task).is_err() {
                        continue;
                    }
                    scheduler.borrow_mut().consumers.insert(transfer.id(), task.id());
                    transfers.push(transfer);
                }
            }
            scheduler.borrow_mut().tasks.insert(task.id(), (task.clone(), None));
            tasks.push(task);
        }
        layers.push(tasks);
    }

    // vetoed starts are remembered, each activity runs as soon as it is ready and bound
    for activity in layers.iter().flatten().chain(transfers.iter()) {
        let _ = activity.start();
    }
    sim.step_until_no_events();

    let finished = layers
        .iter()
        .flatten()
        .filter(|task| task.state() == ActivityState::Finished)
        .count();
    println!("Finished tasks: {}/{}", finished, LAYERS * WIDTH);
    println!("Makespan: {:.3} s", sim.time());
    println!("{}", serde_json::to_string_pretty(&sim.stats()).unwrap());
}
