//! Worker pool: a bounded circular FIFO drained by a fixed set of threads.
//!
//! One mutex guards the queue plus the termination predicate; one condition
//! variable serves both producers blocked on a full queue and workers
//! blocked on an empty one, each signalling the other side after every
//! push/pop. `stop` flips the predicate, broadcasts, and joins: tasks
//! already dequeued run to completion, queued-but-undispatched tasks are
//! dropped, and no task runs after `stop` returns.

use crate::error::{MeshError, Result};
use crate::{lock_ok, wait_ok};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work: a closure plus an optional pre-run sleep
struct Task {
    run: Box<dyn FnOnce() + Send + 'static>,
    delay: Duration,
}

/// Circular buffer of tasks with capacity fixed at construction.
/// Full and empty are distinguished by the size counter, not head == tail.
struct TaskQueue {
    items: Vec<Option<Task>>,
    start: usize,
    end: usize,
    size: usize,
}

impl TaskQueue {
    fn new(capacity: usize) -> Self {
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);
        Self {
            items,
            start: 0,
            end: 0,
            size: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn is_full(&self) -> bool {
        self.size == self.items.len()
    }

    fn push(&mut self, task: Task) {
        debug_assert!(!self.is_full());
        self.items[self.end] = Some(task);
        self.end = (self.end + 1) % self.items.len();
        self.size += 1;
    }

    fn pop(&mut self) -> Option<Task> {
        if self.is_empty() {
            return None;
        }
        let task = self.items[self.start].take();
        self.start = (self.start + 1) % self.items.len();
        self.size -= 1;
        task
    }
}

struct PoolState {
    queue: TaskQueue,
    running: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Fixed set of worker threads fed from a bounded FIFO
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    max_threads: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(max_threads: usize, queue_size: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: TaskQueue::new(queue_size),
                    running: true,
                }),
                cond: Condvar::new(),
            }),
            max_threads,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads
    pub fn start(&self) {
        let mut workers = lock_ok(&self.workers);
        for _ in 0..self.max_threads {
            let shared = Arc::clone(&self.shared);
            workers.push(thread::spawn(move || worker_loop(shared)));
        }
    }

    /// Enqueue a task, blocking while the FIFO is full
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task {
            run: Box::new(task),
            delay: Duration::ZERO,
        })
    }

    /// Enqueue a task whose worker sleeps `delay` before running it
    pub fn submit_with_delay<F>(&self, task: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task {
            run: Box::new(task),
            delay,
        })
    }

    fn submit_task(&self, task: Task) -> Result<()> {
        let mut state = lock_ok(&self.shared.state);
        while state.queue.is_full() && state.running {
            state = wait_ok(&self.shared.cond, state);
        }
        if !state.running {
            return Err(MeshError::PoolStopped);
        }
        state.queue.push(task);
        drop(state);
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Stop accepting work, wake every waiter, and join all workers
    pub fn stop(&self) {
        {
            let mut state = lock_ok(&self.shared.state);
            state.running = false;
        }
        self.shared.cond.notify_all();
        let handles = std::mem::take(&mut *lock_ok(&self.workers));
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = lock_ok(&shared.state);
            while state.queue.is_empty() && state.running {
                state = wait_ok(&shared.cond, state);
            }
            if !state.running {
                return;
            }
            let task = state.queue.pop();
            // wake a producer blocked on a full queue
            shared.cond.notify_one();
            task
        };
        if let Some(task) = task {
            if !task.delay.is_zero() {
                thread::sleep(task.delay);
            }
            (task.run)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_tasks_run() {
        let pool = WorkerPool::new(4, 8);
        pool.start();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 20 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.stop();
    }

    #[test]
    fn test_submit_with_delay() {
        let pool = WorkerPool::new(1, 2);
        pool.start();

        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        let started = Instant::now();
        pool.submit_with_delay(
            move || {
                done2.store(1, Ordering::SeqCst);
            },
            Duration::from_millis(50),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while done.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(50));
        pool.stop();
    }

    #[test]
    fn test_submit_blocks_until_drained() {
        // queue of 1 with a slow worker: the second submit must wait for the
        // first task to be dequeued, then still get through
        let pool = WorkerPool::new(1, 1);
        pool.start();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        pool.stop();
    }

    #[test]
    fn test_no_task_runs_after_stop() {
        let pool = WorkerPool::new(2, 8);
        pool.start();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            // slow tasks so some are still queued when stop lands
            let _ = pool.submit(move || {
                thread::sleep(Duration::from_millis(10));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.stop();
        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_submit_after_stop_fails() {
        let pool = WorkerPool::new(1, 1);
        pool.start();
        pool.stop();
        assert!(pool.submit(|| {}).is_err());
    }
}
