//! Ordered delivery of session output to the application handler

use super::{CloseCause, EventHandler, GatewayEvent};
use chat_common::DispatchKind;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One item for the handler
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(GatewayEvent),
    Connected { resumed: bool },
    Closed(CloseCause),
}

impl Delivery {
    fn label(&self) -> &str {
        match self {
            Self::Event(event) => &event.kind,
            Self::Connected { .. } => "connected",
            Self::Closed(_) => "closed",
        }
    }
}

/// How deliveries reach the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A dedicated worker drains an ordered queue; capacity 0 is unbounded,
    /// otherwise a full queue blocks the producer
    Queued { capacity: usize },
    /// The handler runs on the read path
    Inline,
}

impl DispatchMode {
    #[must_use]
    pub fn from_config(kind: DispatchKind, capacity: usize) -> Self {
        match kind {
            DispatchKind::Queued => Self::Queued { capacity },
            DispatchKind::Inline => Self::Inline,
        }
    }
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Queued { capacity: 0 }
    }
}

enum Producer {
    Inline(Arc<dyn EventHandler>),
    Unbounded(mpsc::UnboundedSender<Delivery>),
    Bounded(mpsc::Sender<Delivery>),
}

/// Single-consumer dispatch queue.
///
/// Deliveries are handed to the handler strictly in push order and never
/// concurrently. A panicking handler is logged and the next delivery proceeds.
pub struct EventDispatchQueue {
    producer: Producer,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatchQueue {
    /// Create the queue; queued modes spawn their worker on the current runtime
    pub fn new(mode: DispatchMode, handler: Arc<dyn EventHandler>) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));

        let (producer, worker) = match mode {
            DispatchMode::Inline => (Producer::Inline(handler), None),
            DispatchMode::Queued { capacity: 0 } => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let pending = Arc::clone(&pending);
                let worker = tokio::spawn(async move {
                    while let Some(delivery) = rx.recv().await {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        deliver(handler.as_ref(), delivery).await;
                    }
                });
                (Producer::Unbounded(tx), Some(worker))
            }
            DispatchMode::Queued { capacity } => {
                let (tx, mut rx) = mpsc::channel(capacity);
                let pending = Arc::clone(&pending);
                let worker = tokio::spawn(async move {
                    while let Some(delivery) = rx.recv().await {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        deliver(handler.as_ref(), delivery).await;
                    }
                });
                (Producer::Bounded(tx), Some(worker))
            }
        };

        Self {
            producer,
            pending,
            worker: Mutex::new(worker),
        }
    }

    /// Hand over one delivery.
    ///
    /// Unbounded: returns immediately. Bounded: waits while the queue is full.
    /// Inline: returns after the handler finishes.
    pub async fn push(&self, delivery: Delivery) {
        match &self.producer {
            Producer::Inline(handler) => deliver(handler.as_ref(), delivery).await,
            Producer::Unbounded(tx) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                if tx.send(delivery).is_err() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!("Dispatch worker gone, delivery dropped");
                }
            }
            Producer::Bounded(tx) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                if tx.send(delivery).await.is_err() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!("Dispatch worker gone, delivery dropped");
                }
            }
        }
    }

    /// Deliveries queued but not yet taken by the worker
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting deliveries and wait for the worker to drain the queue
    pub async fn close(self) {
        let worker = self.worker.lock().take();
        drop(self.producer);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Dispatch worker failed");
            }
        }
    }
}

impl std::fmt::Debug for EventDispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.producer {
            Producer::Inline(_) => "inline",
            Producer::Unbounded(_) => "unbounded",
            Producer::Bounded(_) => "bounded",
        };
        f.debug_struct("EventDispatchQueue")
            .field("mode", &mode)
            .field("pending", &self.pending())
            .finish()
    }
}

async fn deliver(handler: &dyn EventHandler, delivery: Delivery) {
    let label = delivery.label().to_string();
    let call = async move {
        match delivery {
            Delivery::Event(event) => handler.on_event(event).await,
            Delivery::Connected { resumed } => handler.on_connected(resumed).await,
            Delivery::Closed(cause) => handler.on_closed(cause).await,
        }
    };

    if AssertUnwindSafe(call).catch_unwind().await.is_err() {
        tracing::error!(event = %label, "Event handler panicked");
    }
}
