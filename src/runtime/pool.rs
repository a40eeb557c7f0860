//! Bounded worker pool.
//!
//! A fixed set of named threads pulls jobs off a channel. Slot accounting is
//! separate from the channel: `submit` claims a slot before sending and
//! blocks while every slot is taken, so the submitter stalls instead of
//! building a backlog. Every job's outcome goes to the one completion
//! callback given at construction.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The job panicked; carries the panic message.
    Panicked(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;
type OnDone = Arc<dyn Fn(JobOutcome) + Send + Sync + 'static>;

struct Slots {
    busy: Mutex<usize>,
    freed: Condvar,
    size: usize,
}

impl Slots {
    fn acquire(&self) {
        let mut busy = self.busy.lock();
        while *busy >= self.size {
            self.freed.wait(&mut busy);
        }
        *busy += 1;
    }

    fn release(&self) {
        let mut busy = self.busy.lock();
        *busy = busy.saturating_sub(1);
        drop(busy);
        self.freed.notify_one();
    }
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    slots: Arc<Slots>,
    on_done: OnDone,
}

impl WorkerPool {
    /// Spawn `size` worker threads. `on_done` runs on the worker after each
    /// job with that job's outcome.
    pub fn new<C>(size: usize, on_done: C) -> io::Result<Self>
    where
        C: Fn(JobOutcome) + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool size must be at least 1",
            ));
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker_loop(i, receiver))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            slots: Arc::new(Slots {
                busy: Mutex::new(0),
                freed: Condvar::new(),
                size,
            }),
            on_done: Arc::new(on_done),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.size
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        *self.slots.busy.lock()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.slots.size
    }

    /// Run `job` on a pooled thread, then the pool's completion callback
    /// with its outcome.
    ///
    /// Blocks while every slot is taken. A panic in `job` is caught and
    /// reported as [`JobOutcome::Panicked`]; the slot is released only
    /// after the callback returns.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };

        self.slots.acquire();
        let slots = Arc::clone(&self.slots);
        let on_done = Arc::clone(&self.on_done);
        let task: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(()) => JobOutcome::Completed,
                Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_done(outcome))) {
                error!(panic = %panic_message(payload.as_ref()), "Completion callback panicked");
            }
            slots.release();
        });

        if sender.send(task).is_err() {
            error!("Worker pool channel closed, job dropped");
            self.slots.release();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker loop once the queue drains.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked outside a job");
            }
        }
    }
}

fn worker_loop(index: usize, jobs: Receiver<Job>) {
    debug!(worker = index, "Worker started");
    for job in jobs.iter() {
        trace!(worker = index, "Running job");
        job();
    }
    debug!(worker = index, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
