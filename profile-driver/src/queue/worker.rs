// src/queue/worker.rs

//! System work queue: a bounded channel drained by a small worker pool.

use std::{
    io,
    sync::{Mutex, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::Level;

use super::work_item::{ResourceError, WorkItem};

/// Hands work items to a context that runs them at PASSIVE_LEVEL.
pub trait DeferredDispatch: Send + Sync {
    /// Queue `item` without blocking. On error the item has been dropped,
    /// which releases its payload and its claim on the device.
    fn submit(&self, item: WorkItem) -> Result<(), ResourceError>;
}

/// Worker pool fed through a bounded `crossbeam` channel.
///
/// Workers run at PASSIVE_LEVEL and pull items in no particular order
/// relative to each other. `submit` only ever does a `try_send`.
pub struct SystemWorkQueue {
    tx:       RwLock<Option<Sender<WorkItem>>>,
    rx:       Receiver<WorkItem>,
    capacity: usize,
    workers:  Mutex<Vec<JoinHandle<()>>>,
}

impl SystemWorkQueue {
    /// Spawn `workers` threads behind a queue holding at most `capacity`
    /// pending items. With zero workers items stay queued until shutdown.
    pub fn new(workers: usize, capacity: usize) -> io::Result<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded::<WorkItem>(capacity);

        let handles = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("bthps3-worker-{i}"))
                    .spawn(move || worker_loop(rx))
            })
            .collect::<io::Result<Vec<_>>>()?;

        profile_log!(
            Level::Debug,
            "queue",
            "Work queue started: {} worker(s), capacity {}",
            handles.len(),
            capacity
        );

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            rx,
            capacity,
            workers: Mutex::new(handles),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Stop accepting work, let workers finish the backlog, join them.
    /// Anything still queued afterwards (no workers) is cancelled.
    pub fn shutdown(&self) {
        let tx = self.tx.write().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if handle.join().is_err() {
                profile_log!(Level::Error, "queue", "Worker thread terminated abnormally");
            }
        }

        let mut leftover = 0usize;
        for item in self.rx.try_iter() {
            item.cancel();
            leftover += 1;
        }
        profile_log!(Level::Debug, "queue", "Work queue stopped ({} item(s) cancelled)", leftover);
    }
}

impl DeferredDispatch for SystemWorkQueue {
    fn submit(&self, item: WorkItem) -> Result<(), ResourceError> {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(ResourceError::QueueStopped);
        };
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ResourceError::QueueFull { capacity: self.capacity }),
            Err(TrySendError::Disconnected(_)) => Err(ResourceError::QueueStopped),
        }
    }
}

impl Drop for SystemWorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pull items until the channel is closed and empty. Panics are contained
/// by [`WorkItem::execute`].
fn worker_loop(rx: Receiver<WorkItem>) {
    for item in rx.iter() {
        item.execute();
    }
}
