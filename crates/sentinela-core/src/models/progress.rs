use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// A stage transition forwarded to progress observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonic per channel; observers use it to drop redelivered events
    pub sequence: u64,
    pub job_id: Uuid,
    pub stage: JobStatus,
    pub percentage: u8,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}
