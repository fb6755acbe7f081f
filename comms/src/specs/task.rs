use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::{DeviceId, RequestPayload, RequestType};

/// Identifier assigned to a task by the broker when it's enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A work order addressed to a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub device_id: DeviceId,
    pub consumer_id: u64,
    pub request_type: RequestType,
    pub request: RequestPayload,
}

impl TaskSubmission {
    /// Creates a new `TaskSubmission`, the request type is taken from the request itself.
    ///
    /// # Arguments
    /// * `device_id` - The device that should run the task.
    /// * `consumer_id` - The identifier of the submitting coordinator.
    /// * `request` - The work order.
    pub fn new(device_id: DeviceId, consumer_id: u64, request: RequestPayload) -> Self {
        Self {
            device_id,
            consumer_id,
            request_type: request.request_type(),
            request,
        }
    }
}

/// The broker's synchronous answer to a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReceipt {
    pub task_id: TaskId,
    /// Send timestamp in milliseconds since the Unix epoch.
    pub sent_at_ms: u64,
}

impl TaskReceipt {
    /// Creates a receipt stamped with `sent_at`.
    pub fn new(task_id: TaskId, sent_at: SystemTime) -> Self {
        let sent_at_ms = sent_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            task_id,
            sent_at_ms,
        }
    }

    /// The send timestamp as a `SystemTime`.
    pub fn sent_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.sent_at_ms)
    }
}
