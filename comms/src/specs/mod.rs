mod device;
mod event;
mod payload;
mod task;
mod tensor;

pub use device::{DeviceId, DeviceStatus};
pub use event::{CompletionEvent, Event, LivenessEvent};
pub use payload::{ModelSnapshot, RequestPayload, RequestType, ResponsePayload};
pub use task::{TaskId, TaskReceipt, TaskSubmission};
pub use tensor::{ShapeErr, Tensor};
