//! Job intake.
//!
//! The queue carries job ids only; job state lives in the orchestrator. A
//! delivery stays in flight until it is acknowledged, so a worker that dies
//! mid-job leaves its delivery behind for [`JobQueue::recover_in_flight`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// A claimed job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub job_id: Uuid,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<()>;

    /// Claim the next job without waiting. `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Put unacknowledged deliveries back in front of the queue.
    async fn recover_in_flight(&self) -> Result<usize> {
        Ok(0)
    }

    /// Signalled when work is enqueued. Queues without push notification
    /// return `None` and are polled.
    fn work_signal(&self) -> Option<Arc<Notify>> {
        None
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Delivery>,
    in_flight: HashMap<Uuid, Delivery>,
}

/// Process-local queue for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        self.lock().pending.push_back(Delivery { job_id, attempt: 1 });
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let mut state = self.lock();
        let delivery = state.pending.pop_front();
        if let Some(delivery) = delivery {
            state.in_flight.insert(delivery.job_id, delivery);
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if self.lock().in_flight.remove(&delivery.job_id).is_none() {
            tracing::debug!(job_id = %delivery.job_id, "Ack for a delivery that is not in flight");
        }
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        let recovered = {
            let mut state = self.lock();
            let mut stranded: Vec<Delivery> = state.in_flight.drain().map(|(_, d)| d).collect();
            stranded.sort_by_key(|d| d.attempt);
            let count = stranded.len();
            for delivery in stranded.into_iter().rev() {
                state.pending.push_front(Delivery {
                    job_id: delivery.job_id,
                    attempt: delivery.attempt + 1,
                });
            }
            count
        };

        if recovered > 0 {
            tracing::warn!(count = recovered, "Requeued unacknowledged deliveries");
            self.notify.notify_one();
        }
        Ok(recovered)
    }

    fn work_signal(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryJobQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        queue.enqueue(first).await.unwrap();
        queue.enqueue(second).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().job_id, first);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().job_id, second);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_in_flight() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        let delivery = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.recover_in_flight().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let queue = InMemoryJobQueue::new();
        let stranded = Uuid::new_v4();
        let waiting = Uuid::new_v4();
        queue.enqueue(stranded).await.unwrap();
        queue.enqueue(waiting).await.unwrap();
        let _lost = queue.dequeue().await.unwrap().unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);

        let redelivered = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, stranded);
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().job_id, waiting);
    }

    #[tokio::test]
    async fn test_enqueue_signals_waiters() {
        let queue = InMemoryJobQueue::new();
        let signal = queue.work_signal().unwrap();
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        // notify_one stores a permit when nobody is waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
    }
}
