use serde::{Deserialize, Serialize};

use super::Tensor;

/// The kind of work a round performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Train,
    Evaluate,
    Predict,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Train => "train",
            RequestType::Evaluate => "evaluate",
            RequestType::Predict => "predict",
        }
    }
}

/// A serializable topology and weights snapshot of the model being worked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// The model topology in the interchange format, opaque to the coordinator.
    pub topology: String,
    /// One tensor per layer, in layer order.
    pub weights: Vec<Tensor>,
}

/// The work order sent to a device for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    Train {
        model: ModelSnapshot,
        batch_size: usize,
        epochs: usize,
        inputs: Tensor,
        outputs: Tensor,
    },
    Evaluate {
        model: ModelSnapshot,
        batch_size: usize,
        inputs: Tensor,
        outputs: Tensor,
    },
    Predict {
        model: ModelSnapshot,
        batch_size: usize,
        inputs: Tensor,
    },
}

impl RequestPayload {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestPayload::Train { .. } => RequestType::Train,
            RequestPayload::Evaluate { .. } => RequestType::Evaluate,
            RequestPayload::Predict { .. } => RequestType::Predict,
        }
    }

    pub fn inputs(&self) -> &Tensor {
        match self {
            RequestPayload::Train { inputs, .. }
            | RequestPayload::Evaluate { inputs, .. }
            | RequestPayload::Predict { inputs, .. } => inputs,
        }
    }

    pub fn model(&self) -> &ModelSnapshot {
        match self {
            RequestPayload::Train { model, .. }
            | RequestPayload::Evaluate { model, .. }
            | RequestPayload::Predict { model, .. } => model,
        }
    }

    /// The amount of samples in this request's shard.
    pub fn samples(&self) -> usize {
        self.inputs().rows()
    }
}

/// A device's result for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Train {
        /// One tensor per layer, matching the request's layer order.
        weights: Vec<Tensor>,
        loss: Option<f32>,
    },
    Evaluate {
        loss: Option<f32>,
    },
    Predict {
        outputs: Tensor,
    },
}

impl ResponsePayload {
    pub fn request_type(&self) -> RequestType {
        match self {
            ResponsePayload::Train { .. } => RequestType::Train,
            ResponsePayload::Evaluate { .. } => RequestType::Evaluate,
            ResponsePayload::Predict { .. } => RequestType::Predict,
        }
    }

    pub fn weights(&self) -> Option<&[Tensor]> {
        match self {
            ResponsePayload::Train { weights, .. } => Some(weights),
            _ => None,
        }
    }

    pub fn loss(&self) -> Option<f32> {
        match self {
            ResponsePayload::Train { loss, .. } | ResponsePayload::Evaluate { loss } => *loss,
            ResponsePayload::Predict { .. } => None,
        }
    }

    pub fn outputs(&self) -> Option<&Tensor> {
        match self {
            ResponsePayload::Predict { outputs } => Some(outputs),
            _ => None,
        }
    }
}
