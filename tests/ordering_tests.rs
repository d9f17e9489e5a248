//! Concurrency tests for the index manager and fixed queue
//!
//! Producers tag every value with their id and a sequence number so the
//! consumer side can check for loss, duplication and reordering.

use fixq::{FixedQueue, IndexManager, PushError, QueueConfig};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

const PER_PRODUCER: u64 = 50_000;

fn tag(producer: u64, seq: u64) -> u64 {
    (producer << 32) | seq
}

fn untag(value: u64) -> (usize, u64) {
    ((value >> 32) as usize, value & 0xFFFF_FFFF)
}

fn thread_count() -> usize {
    num_cpus::get().clamp(2, 4)
}

/// Index manager over an external buffer of atomics
struct SlotBuffer {
    manager: IndexManager,
    slots: Vec<AtomicU64>,
}

impl SlotBuffer {
    fn new(capacity: u32) -> Self {
        Self {
            manager: IndexManager::new(capacity).unwrap(),
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn try_push(&self, value: u64) -> Result<(), PushError> {
        let r = self.manager.reserve_push_index()?;
        self.slots[r.slot()].store(value, Ordering::Relaxed);
        self.manager.commit_push_index(r);
        Ok(())
    }

    fn try_pop(&self) -> Option<u64> {
        let r = self.manager.reserve_pop_index()?;
        let value = self.slots[r.slot()].load(Ordering::Relaxed);
        self.manager.commit_pop_index(r);
        Some(value)
    }
}

#[test]
fn test_mpsc_per_producer_order() {
    let producers = thread_count() as u64;
    let buffer = Arc::new(SlotBuffer::new(13));
    let barrier = Arc::new(Barrier::new(producers as usize + 1));

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let buffer = buffer.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..PER_PRODUCER {
                    while buffer.try_push(tag(p, seq)).is_err() {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    let mut next = vec![0u64; producers as usize];
    let mut received = 0u64;
    let mut errors = 0u64;

    while received < producers * PER_PRODUCER {
        match buffer.try_pop() {
            Some(value) => {
                let (p, seq) = untag(value);
                if seq != next[p] {
                    errors += 1;
                    eprintln!("ORDERING ERROR: producer {} expected={} got={}", p, next[p], seq);
                }
                next[p] = seq + 1;
                received += 1;
            }
            None => thread::yield_now(),
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }

    println!("\n=== MPSC Ordering Test ===");
    println!("Producers: {}", producers);
    println!("Received: {}", received);
    println!("Errors: {}", errors);

    assert_eq!(errors, 0);
    assert!(buffer.manager.is_empty());
    assert_eq!(buffer.try_pop(), None);
}

#[test]
fn test_mpmc_exactly_once() {
    let threads = thread_count();
    let producers = threads as u64;
    let total = producers * PER_PRODUCER;
    let queue = Arc::new(FixedQueue::new(17).unwrap());
    let consumed = Arc::new(AtomicU64::new(0));
    let seen = Arc::new(Mutex::new(HashSet::with_capacity(total as usize)));
    let barrier = Arc::new(Barrier::new(threads * 2));

    let mut producer_handles = Vec::new();
    let mut consumer_handles = Vec::new();

    for p in 0..producers {
        let queue = queue.clone();
        let barrier = barrier.clone();
        producer_handles.push(thread::spawn(move || {
            barrier.wait();
            for seq in 0..PER_PRODUCER {
                queue.push_back(tag(p, seq)).unwrap();
            }
        }));
    }

    for _ in 0..threads {
        let queue = queue.clone();
        let consumed = consumed.clone();
        let seen = seen.clone();
        let barrier = barrier.clone();
        consumer_handles.push(thread::spawn(move || {
            barrier.wait();
            let mut local = Vec::new();
            let mut last = vec![None::<u64>; producers as usize];
            let mut order_errors = 0u64;

            while consumed.load(Ordering::Relaxed) < total {
                if let Some(value) = queue.try_pop_front() {
                    consumed.fetch_add(1, Ordering::Relaxed);
                    let (p, seq) = untag(value);
                    // One consumer sees each producer's values in push order
                    if last[p].is_some_and(|prev| prev >= seq) {
                        order_errors += 1;
                    }
                    last[p] = Some(seq);
                    local.push(value);
                } else {
                    thread::yield_now();
                }
            }

            let mut seen = seen.lock().unwrap();
            for value in local {
                assert!(seen.insert(value), "duplicate value {:#x}", value);
            }
            order_errors
        }));
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }
    let order_errors: u64 = consumer_handles.into_iter().map(|h| h.join().unwrap()).sum();

    let seen = seen.lock().unwrap();
    println!("\n=== MPMC Exactly-Once Test ===");
    println!("Threads: {} producers, {} consumers", threads, threads);
    println!("Consumed: {}", seen.len());

    assert_eq!(seen.len() as u64, total);
    assert_eq!(order_errors, 0);
    assert!(queue.is_empty());
}

#[test]
fn test_capacity_never_exceeded() {
    const CAPACITY: u32 = 5;
    let threads = thread_count();
    let manager = Arc::new(IndexManager::new(CAPACITY).unwrap());
    let occupied = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicBool::new(true));

    let mut handles = Vec::new();
    for _ in 0..threads {
        let manager = manager.clone();
        let occupied = occupied.clone();
        let max_seen = max_seen.clone();
        let running = running.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Ok(r) = manager.reserve_push_index() {
                    let now = occupied.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::Relaxed);
                    manager.commit_push_index(r);
                }
            }
        }));
    }
    for _ in 0..threads {
        let manager = manager.clone();
        let occupied = occupied.clone();
        let running = running.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Some(r) = manager.reserve_pop_index() {
                    occupied.fetch_sub(1, Ordering::SeqCst);
                    manager.commit_pop_index(r);
                }
            }
        }));
    }

    thread::sleep(Duration::from_millis(500));
    running.store(false, Ordering::SeqCst);
    for handle in handles {
        handle.join().unwrap();
    }

    println!("\n=== Capacity Bound Test ===");
    println!("Max occupied: {}", max_seen.load(Ordering::Relaxed));

    assert!(max_seen.load(Ordering::Relaxed) <= CAPACITY as usize);
    assert!(manager.len() <= CAPACITY);
}

#[test]
fn test_disable_under_contention() {
    let producers = thread_count();
    let queue = Arc::new(FixedQueue::<u64>::new(8).unwrap());
    let pushed = Arc::new(AtomicU64::new(0));
    let popped = Arc::new(AtomicU64::new(0));
    let stop_consumer = Arc::new(AtomicBool::new(false));

    let producer_handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = queue.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                // Blocks while full; only a disabled queue ends the loop.
                while queue.push_back(1).is_ok() {
                    pushed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let consumer = {
        let queue = queue.clone();
        let popped = popped.clone();
        let stop = stop_consumer.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if queue.try_pop_front().is_some() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    thread::sleep(Duration::from_millis(200));
    queue.disable();
    for handle in producer_handles {
        handle.join().unwrap();
    }
    stop_consumer.store(true, Ordering::Release);
    consumer.join().unwrap();

    assert!(!queue.is_enabled());
    assert_eq!(queue.try_push_back(7).unwrap_err().into_inner(), 7);

    let mut drained = 0;
    while queue.try_pop_front().is_some() {
        drained += 1;
    }

    println!("\n=== Disable Test ===");
    println!("Pushed: {}", pushed.load(Ordering::Relaxed));
    println!("Popped: {} + {} drained", popped.load(Ordering::Relaxed), drained);

    assert_eq!(pushed.load(Ordering::Relaxed), popped.load(Ordering::Relaxed) + drained);
    assert_eq!(queue.num_waiting_pushers(), 0);
}

#[test]
fn test_remove_all_with_concurrent_traffic() {
    let producers = thread_count();
    let queue = Arc::new(FixedQueue::<u64>::new(11).unwrap());
    let running = Arc::new(AtomicBool::new(true));
    let pushed = Arc::new(AtomicU64::new(0));
    let popped = Arc::new(AtomicU64::new(0));
    let removed = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..producers {
        let queue = queue.clone();
        let running = running.clone();
        let pushed = pushed.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if queue.try_push_back(1).is_ok() {
                    pushed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    {
        let queue = queue.clone();
        let running = running.clone();
        let popped = popped.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if queue.try_pop_front().is_some() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    {
        let queue = queue.clone();
        let running = running.clone();
        let removed = removed.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                let n = queue.remove_all();
                removed.fetch_add(n as u64, Ordering::Relaxed);
                thread::yield_now();
            }
        }));
    }

    thread::sleep(Duration::from_millis(300));
    running.store(false, Ordering::SeqCst);
    for handle in handles {
        handle.join().unwrap();
    }

    let remaining = queue.len() as u64;
    let cleared = queue.remove_all() as u64;

    println!("\n=== Concurrent remove_all Test ===");
    println!("Pushed: {}", pushed.load(Ordering::Relaxed));
    println!("Popped: {}", popped.load(Ordering::Relaxed));
    println!("Removed: {} + {} at end", removed.load(Ordering::Relaxed), cleared);

    assert_eq!(remaining, cleared);
    assert_eq!(
        pushed.load(Ordering::Relaxed),
        popped.load(Ordering::Relaxed) + removed.load(Ordering::Relaxed) + cleared
    );
    assert!(queue.is_empty());
}

#[test]
fn test_blocking_pipeline_small_capacity() {
    let threads = thread_count();
    let per_producer = 20_000u64;
    let config = QueueConfig::new(2).unwrap().with_spin_limit(4);
    let queue = Arc::new(FixedQueue::with_config(config).unwrap());
    let total = threads as u64 * per_producer;

    let producers: Vec<_> = (0..threads)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 1..=per_producer {
                    queue.push_back(i).unwrap();
                }
            })
        })
        .collect();

    // Split the pops unevenly so some consumers block for a long time.
    let consumers: Vec<_> = (0..threads)
        .map(|c| {
            let queue = queue.clone();
            let share = if c == 0 {
                total - (threads as u64 - 1) * (total / threads as u64)
            } else {
                total / threads as u64
            };
            thread::spawn(move || (0..share).map(|_| queue.pop_front()).sum::<u64>())
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    let sum: u64 = consumers.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(sum, threads as u64 * per_producer * (per_producer + 1) / 2);
    assert!(queue.is_empty());
    assert_eq!(queue.num_waiting_poppers(), 0);
}
