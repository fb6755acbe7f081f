use comms::specs::{ResponsePayload, TaskId, Tensor};
use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    config::EmptyRoundPolicy,
    error::{CoordinatorError, Result},
    task_store::Task,
};

/// The combined result of one round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResult {
    /// One averaged tensor per layer, empty if no device returned weights.
    pub weights: Vec<Tensor>,
    /// The sample-weighted mean loss, absent if no device reported one.
    pub loss: Option<f32>,
    /// Prediction outputs stacked in completion order, not in original sample order.
    pub outputs: Option<Tensor>,
    /// The amount of completed tasks folded into this result.
    pub completed: usize,
}

impl RoundResult {
    pub fn is_empty(&self) -> bool {
        self.completed == 0
    }
}

/// Reduces a round's completed tasks into a single `RoundResult`.
///
/// Weights are averaged per layer with an unweighted element-wise mean over every device
/// that returned that layer, however many samples each device processed. Losses are averaged
/// weighted by each task's shard size, so a loss reported for an empty shard carries no weight
/// and is left out. A round where only empty shards reported a loss has no loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    empty_policy: EmptyRoundPolicy,
}

struct Completed {
    task_id: TaskId,
    samples: usize,
    response: ResponsePayload,
}

impl Aggregator {
    pub fn new(empty_policy: EmptyRoundPolicy) -> Self {
        Self { empty_policy }
    }

    /// Folds the given tasks into a `RoundResult`, consuming them.
    ///
    /// # Arguments
    /// * `tasks` - The round's tasks in completion order, incomplete ones are ignored.
    ///
    /// # Returns
    /// The round result, or `NoResults` if nothing completed and the empty policy says so.
    pub fn reduce(&self, tasks: Vec<(TaskId, Task)>) -> Result<RoundResult> {
        let completed: Vec<_> = tasks
            .into_iter()
            .filter_map(|(task_id, task)| {
                let samples = task.request.samples();
                task.into_response().map(|response| Completed {
                    task_id,
                    samples,
                    response,
                })
            })
            .collect();

        if completed.is_empty() {
            return match self.empty_policy {
                EmptyRoundPolicy::Empty => Ok(RoundResult::default()),
                EmptyRoundPolicy::Error => Err(CoordinatorError::NoResults),
            };
        }

        let result = RoundResult {
            weights: average_weights(&completed),
            loss: weighted_loss(&completed),
            outputs: stack_outputs(&completed),
            completed: completed.len(),
        };

        debug!(
            "aggregated {} task(s) into {} layer(s), loss {:?}",
            result.completed,
            result.weights.len(),
            result.loss
        );

        Ok(result)
    }
}

fn average_weights(completed: &[Completed]) -> Vec<Tensor> {
    let layers = completed
        .iter()
        .filter_map(|c| c.response.weights())
        .map(<[Tensor]>::len)
        .max()
        .unwrap_or_default();

    (0..layers)
        .filter_map(|layer| average_layer(completed, layer))
        .collect()
}

/// The element-wise mean of every device's tensor for `layer`.
///
/// The first tensor seen fixes the layer's shape, later ones that disagree are skipped.
fn average_layer(completed: &[Completed], layer: usize) -> Option<Tensor> {
    let mut sum: Option<Tensor> = None;
    let mut count = 0usize;

    for c in completed {
        let Some(tensor) = c.response.weights().and_then(|w| w.get(layer)) else {
            continue;
        };

        if let Some(acc) = sum.as_mut() {
            if acc.shape() != tensor.shape() {
                warn!(
                    task_id = c.task_id.0;
                    "skipping layer {layer}: shape {:?} doesn't match {:?}",
                    tensor.shape(),
                    acc.shape()
                );
                continue;
            }

            acc.data_mut()
                .par_iter_mut()
                .zip(tensor.data().par_iter())
                .for_each(|(a, w)| *a += w);
        } else {
            sum = Some(tensor.clone());
        }

        count += 1;
    }

    let mut avg = sum?;
    let n = count as f32;
    avg.data_mut().par_iter_mut().for_each(|w| *w /= n);
    Some(avg)
}

fn weighted_loss(completed: &[Completed]) -> Option<f32> {
    let (weighted, samples) = completed
        .iter()
        .filter_map(|c| c.response.loss().map(|loss| (c, loss)))
        .filter_map(|(c, loss)| {
            if c.samples == 0 {
                debug!(task_id = c.task_id.0; "ignoring loss {loss} reported for an empty shard");
                return None;
            }

            Some((loss, c.samples))
        })
        .fold((0.0f64, 0usize), |(acc, total), (loss, samples)| {
            (acc + loss as f64 * samples as f64, total + samples)
        });

    (samples > 0).then(|| (weighted / samples as f64) as f32)
}

fn stack_outputs(completed: &[Completed]) -> Option<Tensor> {
    let parts: Vec<_> = completed
        .iter()
        .filter_map(|c| c.response.outputs())
        .collect();

    match Tensor::concat_rows(&parts)? {
        Ok(outputs) => Some(outputs),
        Err(e) => {
            warn!("dropping prediction outputs: {e}");
            None
        }
    }
}
