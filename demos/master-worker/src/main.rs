use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use env_logger::Builder;
use serde::Serialize;
use sugars::{rc, refcell};

use simflow::{log_info, log_warn, ActorContext, HostId, HostSpec, LinkSpec, Platform, SimError, Simulation};

/// Master distributes compute tasks to workers over a star network
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct Args {
    /// Number of workers
    #[clap(long, default_value_t = 8)]
    workers: usize,

    /// Number of tasks
    #[clap(long, default_value_t = 100)]
    tasks: usize,

    /// Random seed
    #[clap(long, default_value_t = 123)]
    seed: u64,

    /// Turn the first worker off at this time and back on 10 seconds later
    #[clap(long)]
    fail_at: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
struct Task {
    id: usize,
    flops: f64,
    input: f64,
    output: f64,
}

type TaskQueue = Rc<RefCell<VecDeque<Task>>>;

async fn worker(ctx: ActorContext, master: HostId, queue: TaskQueue, completed: Rc<RefCell<usize>>) -> Result<(), SimError> {
    // a task in progress goes back to the queue if the worker is killed
    let in_flight: Rc<RefCell<Option<Task>>> = rc!(refcell!(None));
    {
        let (in_flight, queue, log_ctx) = (in_flight.clone(), queue.clone(), ctx.clone());
        ctx.on_exit(move |failed| {
            if let Some(task) = in_flight.borrow_mut().take().filter(|_| failed) {
                log_warn!(log_ctx, "task {} interrupted", task.id);
                queue.borrow_mut().push_back(task);
            }
        });
    }

    loop {
        let Some(task) = queue.borrow_mut().pop_front() else {
            break;
        };
        *in_flight.borrow_mut() = Some(task.clone());
        let fetch = ctx.comm_between(master, ctx.host(), task.input);
        fetch.set_payload(task.clone());
        fetch.wait().await?;
        ctx.execute(task.flops).await?;
        ctx.communicate(master, task.output).await?;
        in_flight.borrow_mut().take();
        *completed.borrow_mut() += 1;
        log_info!(ctx, "task {} done", task.id);
    }
    Ok(())
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "{}", record.args())
        })
        .init();

    let args = Args::parse();

    let mut platform = Platform::new();
    let master = platform.add_host("master", HostSpec::new(1e9)).unwrap();
    let backbone = platform.add_link("backbone", LinkSpec::new(1.25e9, 1e-4)).unwrap();
    let mut hosts = Vec::new();
    for i in 0..args.workers {
        let speed = 1e9 * (1 + i % 4) as f64;
        let host = platform
            .add_host(&format!("host-{i}"), HostSpec::new(speed).with_cores(2))
            .unwrap();
        let link = platform
            .add_link(&format!("link-{i}"), LinkSpec::new(1.25e8, 1e-3))
            .unwrap();
        platform.add_route(master, host, &[backbone, link], true).unwrap();
        hosts.push(host);
    }

    let mut sim = Simulation::new(args.seed, platform);
    let queue: TaskQueue = rc!(refcell!(VecDeque::new()));
    for id in 0..args.tasks {
        let task = Task {
            id,
            flops: sim.gen_range(1e9..1e10),
            input: sim.gen_range(1e6..1e8),
            output: sim.gen_range(1e5..1e6),
        };
        queue.borrow_mut().push_back(task);
    }

    let completed = rc!(refcell!(0));
    for (i, &host) in hosts.iter().enumerate() {
        let queue = queue.clone();
        let completed = completed.clone();
        sim.spawn_restartable_actor(&format!("worker-{i}"), host, move |ctx| {
            worker(ctx, master, queue.clone(), completed.clone())
        })
        .unwrap();
    }
    if let (Some(time), Some(&host)) = (args.fail_at, hosts.first()) {
        sim.schedule_resource_state(host, time, false).unwrap();
        sim.schedule_resource_state(host, time + 10., true).unwrap();
    }

    let t = Instant::now();
    sim.step_until_no_events();
    let elapsed = t.elapsed().as_secs_f64();

    let stats = sim.stats();
    println!("Completed tasks: {}/{}", completed.borrow(), args.tasks);
    println!("Simulated time: {:.3} s", sim.time());
    println!("Processed {} steps and {} solver runs in {:.3} s", stats.steps, stats.solves, elapsed);
    println!(
        "Activities: {} finished, {} failed, {} canceled",
        stats.activities_finished, stats.activities_failed, stats.activities_canceled
    );
}
