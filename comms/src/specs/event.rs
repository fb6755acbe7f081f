use serde::{Deserialize, Serialize};

use super::{DeviceId, DeviceStatus, ResponsePayload, TaskId};

/// A device finished a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub task_id: TaskId,
    pub device_id: DeviceId,
    pub response: ResponsePayload,
}

/// A device's availability changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessEvent {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
}

/// Everything a subscription stream can deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Completion(CompletionEvent),
    Liveness(LivenessEvent),
}
