//! Bounded worker pool executing future bodies.
//!
//! Tasks are enqueued as shared slots holding a one-shot job. A blocked
//! waiter may steal the job out of the slot and run it inline, so awaiting a
//! future from inside another future body can never exhaust the pool.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;

type Job = Box<dyn FnOnce() + Send>;

/// A one-shot job slot shared between the queue and the future handle.
pub(crate) struct TaskSlot {
    job: Mutex<Option<Job>>,
}

impl TaskSlot {
    pub fn new(job: Job) -> Self {
        TaskSlot {
            job: Mutex::new(Some(job)),
        }
    }

    /// Claim the job. Returns `None` if it already ran (or is running)
    /// elsewhere.
    pub fn take(&self) -> Option<Job> {
        self.job.lock().unwrap().take()
    }
}

struct Queue {
    tasks: Mutex<VecDeque<Arc<TaskSlot>>>,
    available: Condvar,
}

static POOL: OnceLock<Arc<Queue>> = OnceLock::new();

fn pool() -> &'static Arc<Queue> {
    POOL.get_or_init(|| {
        let queue = Arc::new(Queue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        });

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        for index in 0..workers {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("ralph-worker-{}", index))
                .spawn(move || worker_loop(queue))
                .expect("failed to spawn worker thread");
        }

        queue
    })
}

fn worker_loop(queue: Arc<Queue>) {
    loop {
        let slot = {
            let mut tasks = queue.tasks.lock().unwrap();
            loop {
                match tasks.pop_front() {
                    Some(slot) => break slot,
                    None => tasks = queue.available.wait(tasks).unwrap(),
                }
            }
        };
        // The job may already have been stolen by a waiter.
        if let Some(job) = slot.take() {
            job();
        }
    }
}

/// Enqueue a task slot for execution on the pool.
pub(crate) fn enqueue(slot: Arc<TaskSlot>) {
    let queue = pool();
    queue.tasks.lock().unwrap().push_back(slot);
    queue.available.notify_one();
}
