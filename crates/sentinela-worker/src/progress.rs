//! Progress fan-out for stage transitions.
//!
//! Publishing never waits on observers: every subscriber owns an unbounded
//! queue, and a subscriber that went away is dropped on the next publish.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use sentinela_core::{JobStatus, ProgressEvent};

pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

struct Subscriber {
    job_filter: Option<Uuid>,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl Subscriber {
    fn wants(&self, job_id: Uuid) -> bool {
        self.job_filter.map_or(true, |id| id == job_id)
    }
}

#[derive(Clone, Default)]
pub struct ProgressChannel {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    sequence: Arc<AtomicU64>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive events for every job.
    pub fn subscribe(&self) -> ProgressReceiver {
        self.add_subscriber(None)
    }

    /// Receive events for one job only.
    pub fn subscribe_job(&self, job_id: Uuid) -> ProgressReceiver {
        self.add_subscriber(Some(job_id))
    }

    fn add_subscriber(&self, job_filter: Option<Uuid>) -> ProgressReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber { job_filter, tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Forward a stage transition to every interested subscriber.
    ///
    /// Events are sent while the subscriber list is locked, so two events
    /// for the same job reach an observer in publish order.
    pub fn publish(
        &self,
        job_id: Uuid,
        stage: JobStatus,
        percentage: u8,
        message: impl Into<String>,
    ) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if subscribers.is_empty() {
            return;
        }

        let event = ProgressEvent {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            job_id,
            stage,
            percentage,
            message: message.into(),
            emitted_at: Utc::now(),
        };

        subscribers.retain(|subscriber| {
            if !subscriber.wants(job_id) {
                return !subscriber.tx.is_closed();
            }
            subscriber.tx.send(event.clone()).is_ok()
        });
    }
}
