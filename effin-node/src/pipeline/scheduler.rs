//! Bounded transaction queue between the source and the worker pool
//!
//! One producer, `W` consumers. `enqueue` waits while the queue is full;
//! `dequeue` waits while it is empty. Consumers share one receiver behind an
//! async mutex, so every record is handed to exactly one worker in FIFO order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use effin_common::Transaction;

/// Create a queue holding at most `capacity` transactions
pub fn transaction_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            depth: Arc::clone(&depth),
            capacity,
        },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
            depth,
        },
    )
}

/// Producer handle
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Transaction>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

/// Returned when every worker has gone away
#[derive(Debug, thiserror::Error)]
#[error("transaction queue closed")]
pub struct QueueClosed(pub Transaction);

impl QueueSender {
    /// Enqueue, waiting for space when the queue is full
    pub async fn enqueue(&self, tx: Transaction) -> Result<(), QueueClosed> {
        // Reserve first so depth never counts a record that is not queued.
        let permit = self.tx.reserve().await.map_err(|_| QueueClosed(tx.clone()))?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        permit.send(tx);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records waiting to be dequeued
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Read-only depth handle for the HTTP surface
    pub fn depth_handle(&self) -> QueueDepth {
        QueueDepth(Arc::clone(&self.depth))
    }
}

/// Consumer handle, cloned once per worker
#[derive(Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Transaction>>>,
    depth: Arc<AtomicUsize>,
}

impl QueueReceiver {
    /// Wait for the next transaction
    ///
    /// Returns `None` once the producer is gone and the queue is drained.
    pub async fn dequeue(&self) -> Option<Transaction> {
        let next = self.rx.lock().await.recv().await;
        if next.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        next
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Shared view of the queue depth
#[derive(Clone, Default)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
