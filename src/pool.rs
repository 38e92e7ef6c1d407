//! Fixed-size worker pool.
//!
//! Workers are spawned once and consume boxed closures from a shared
//! multi-consumer channel for the life of the process. Each submitted task
//! is received by exactly one worker; no ordering guarantee is made across
//! workers. A panicking task takes down only the worker it ran on.

use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tasks: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers, each immediately blocking on the task channel.
    pub fn new(size: usize) -> io::Result<Self> {
        let (tasks, rx) = crossbeam_channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx))?;
            workers.push(handle);
        }

        Ok(Self { tasks, workers })
    }

    /// Enqueue a task for execution by exactly one worker.
    ///
    /// The channel is unbounded, so this never blocks the caller.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tasks.send(Box::new(task)).is_err() {
            // Only possible once every worker has exited.
            error!("all workers gone, dropping task");
        }
    }

    /// Number of workers the pool was created with.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(worker_id: usize, rx: Receiver<Task>) {
    debug!(worker = worker_id, "worker started");
    while let Ok(task) = rx.recv() {
        task();
    }
    debug!(worker = worker_id, "worker stopped");
}
