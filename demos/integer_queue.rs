//! Integer Queue - IndexManager over a plain array
//!
//! Builds a small thread-safe queue of integers: the index manager hands out
//! slots, the caller owns the storage.

use fixq::IndexManager;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

/// Fixed-capacity thread-safe queue of integers
struct IntegerQueue {
    manager: IndexManager,
    values: Vec<AtomicI32>,
}

impl IntegerQueue {
    fn new(capacity: u32) -> fixq::Result<Self> {
        Ok(Self {
            manager: IndexManager::new(capacity)?,
            values: (0..capacity).map(|_| AtomicI32::new(0)).collect(),
        })
    }

    /// Returns `false` if the queue is full
    fn try_push_back(&self, value: i32) -> bool {
        match self.manager.reserve_push_index() {
            Ok(r) => {
                // Ordering comes from the commit, not the slot store
                self.values[r.slot()].store(value, Ordering::Relaxed);
                self.manager.commit_push_index(r);
                true
            }
            Err(_) => false,
        }
    }

    fn try_pop_front(&self) -> Option<i32> {
        let r = self.manager.reserve_pop_index()?;
        let value = self.values[r.slot()].load(Ordering::Relaxed);
        self.manager.commit_pop_index(r);
        Some(value)
    }

    fn len(&self) -> u32 {
        self.manager.len()
    }

    fn capacity(&self) -> u32 {
        self.manager.capacity()
    }
}

fn main() -> anyhow::Result<()> {
    fixq::init_logging();

    println!("\n=== Integer Queue ===\n");

    let queue = IntegerQueue::new(2)?;
    anyhow::ensure!(queue.try_push_back(1), "first push failed");
    anyhow::ensure!(queue.try_push_back(2), "second push failed");
    anyhow::ensure!(!queue.try_push_back(3), "push into a full queue succeeded");
    anyhow::ensure!(queue.len() == 2, "unexpected length {}", queue.len());
    println!("capacity={} len={}", queue.capacity(), queue.len());

    let front = queue.try_pop_front();
    anyhow::ensure!(front == Some(1), "expected 1, got {:?}", front);
    println!("popped {:?}", front);
    println!("{}", queue.manager);

    // Same queue shared between threads
    let queue = Arc::new(IntegerQueue::new(7)?);
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 1..=1000 {
                while !queue.try_push_back(i) {
                    thread::yield_now();
                }
            }
        })
    };

    let mut sum = 0i64;
    let mut received = 0;
    while received < 1000 {
        match queue.try_pop_front() {
            Some(v) => {
                sum += i64::from(v);
                received += 1;
            }
            None => thread::yield_now(),
        }
    }
    producer.join().map_err(|_| anyhow::anyhow!("producer panicked"))?;

    anyhow::ensure!(sum == 500_500, "bad sum {}", sum);
    println!("threaded sum={}", sum);
    Ok(())
}
