//! Work Queue - FixedQueue with blocking workers
//!
//! Producers submit jobs with `push_back`; workers block in `pop_front`.
//! Shutdown queues one stop marker per worker behind the jobs, then
//! disables the queue.
//!
//! Run with `RUST_LOG=fixq=debug cargo run --example work_queue --features tracing`

use fixq::{FixedQueue, QueueConfig};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const NUM_PRODUCERS: usize = 3;
const NUM_WORKERS: usize = 4;
const JOBS_PER_PRODUCER: u64 = 100_000;

enum Job {
    Sum(u64),
    Stop,
}

fn main() -> anyhow::Result<()> {
    fixq::init_logging();

    println!("\n=== Work Queue ({} producers, {} workers) ===\n", NUM_PRODUCERS, NUM_WORKERS);

    let config = QueueConfig::new(100)?.with_spin_limit(32);
    let queue = Arc::new(FixedQueue::with_config(config)?);
    let start = Instant::now();

    let workers: Vec<_> = (0..NUM_WORKERS)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut total = 0u64;
                let mut jobs = 0u64;
                loop {
                    match queue.pop_front() {
                        Job::Sum(n) => {
                            total += n;
                            jobs += 1;
                        }
                        Job::Stop => return (jobs, total),
                    }
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..NUM_PRODUCERS)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                for n in 1..=JOBS_PER_PRODUCER {
                    if queue.push_back(Job::Sum(n)).is_err() {
                        return;
                    }
                }
            })
        })
        .collect();

    for handle in producers {
        handle.join().map_err(|_| anyhow::anyhow!("producer panicked"))?;
    }

    // Stop markers go behind every queued job
    for _ in 0..NUM_WORKERS {
        if queue.push_back(Job::Stop).is_err() {
            anyhow::bail!("queue disabled before shutdown");
        }
    }

    let mut jobs = 0;
    let mut total = 0;
    for (i, handle) in workers.into_iter().enumerate() {
        let (n, sum) = handle.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;
        println!("worker {}: {} jobs", i, n);
        jobs += n;
        total += sum;
    }

    queue.disable();
    let leftover = queue.remove_all();
    let elapsed = start.elapsed();

    let expected = NUM_PRODUCERS as u64 * JOBS_PER_PRODUCER * (JOBS_PER_PRODUCER + 1) / 2;
    println!("\njobs={} total={} leftover={} elapsed={:?}", jobs, total, leftover, elapsed);
    anyhow::ensure!(total == expected, "expected {}, got {}", expected, total);
    anyhow::ensure!(leftover == 0, "{} jobs left behind", leftover);
    anyhow::ensure!(queue.try_push_back(Job::Stop).is_err(), "disabled queue accepted a push");
    Ok(())
}
