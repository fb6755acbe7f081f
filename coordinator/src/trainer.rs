use comms::specs::{ModelSnapshot, RequestPayload, Tensor};
use log::{info, warn};

use crate::{
    aggregator::RoundResult,
    channel::{DeviceDirectory, TaskChannel},
    coordinator::{Coordinator, RoundOutcome},
    error::{CoordinatorError, Result},
    partition::{self, Dataset, PartitionMode, Shard},
};

/// The in-memory model a `Trainer` drives.
pub trait ModelHandle {
    /// The topology and current weights, embedded in every request of a round.
    fn snapshot(&self) -> ModelSnapshot;

    /// Replaces the model weights with a round's averaged weights, one tensor per layer.
    fn apply_weights(&mut self, weights: Vec<Tensor>);
}

/// Per-round losses recorded by a `Trainer`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub train_loss: Vec<f32>,
    pub evaluate_loss: Vec<f32>,
}

/// Drives whole training jobs as a sequence of rounds.
///
/// Each round refreshes the devices, partitions the relevant dataset across them, runs the
/// round through the `Coordinator` and folds the result back into the model and the history.
pub struct Trainer<C, D, M>
where
    C: TaskChannel,
    D: DeviceDirectory,
    M: ModelHandle,
{
    coordinator: Coordinator<C, D>,
    model: M,
    train: Dataset,
    validation: Option<Dataset>,
    batch_size: usize,
    device_epochs: usize,
    mode: PartitionMode,
    history: History,
}

impl<C, D, M> Trainer<C, D, M>
where
    C: TaskChannel,
    D: DeviceDirectory,
    M: ModelHandle,
{
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `coordinator` - Runs the rounds.
    /// * `model` - The model being trained.
    /// * `train` - The training samples, outputs required.
    /// * `batch_size` - The batch size each device trains with.
    ///
    /// # Returns
    /// The trainer, or `InvalidInput` if the training data has no outputs or the batch size is zero.
    pub fn new(
        coordinator: Coordinator<C, D>,
        model: M,
        train: Dataset,
        batch_size: usize,
    ) -> Result<Self> {
        if train.outputs.is_none() {
            return Err(CoordinatorError::InvalidInput(
                "training data needs outputs".into(),
            ));
        }
        if batch_size == 0 {
            return Err(CoordinatorError::InvalidInput(
                "batch size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            coordinator,
            model,
            train,
            validation: None,
            batch_size,
            device_epochs: 1,
            mode: PartitionMode::Exact,
            history: History::default(),
        })
    }

    /// Evaluates on `validation` after every training round.
    pub fn with_validation(mut self, validation: Dataset) -> Result<Self> {
        if validation.outputs.is_none() {
            return Err(CoordinatorError::InvalidInput(
                "validation data needs outputs".into(),
            ));
        }

        self.validation = Some(validation);
        Ok(self)
    }

    /// The amount of local epochs each device runs per training round.
    pub fn with_device_epochs(mut self, epochs: usize) -> Self {
        self.device_epochs = epochs.max(1);
        self
    }

    /// How training data is split, evaluation and prediction always use an exact split.
    pub fn with_partition_mode(mut self, mode: PartitionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn coordinator(&self) -> &Coordinator<C, D> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut Coordinator<C, D> {
        &mut self.coordinator
    }

    /// Runs `epochs` training rounds, each followed by an evaluation round if validation
    /// data was given.
    ///
    /// # Returns
    /// The losses of this run.
    pub async fn fit(&mut self, epochs: usize) -> Result<&History> {
        self.history = History::default();

        for epoch in 1..=epochs {
            let snapshot = self.model.snapshot();
            let (batch_size, device_epochs) = (self.batch_size, self.device_epochs);

            let outcome = run_sharded(&mut self.coordinator, &self.train, self.mode, |shard| {
                let (inputs, outputs) = paired(shard)?;
                Ok(RequestPayload::Train {
                    model: snapshot.clone(),
                    batch_size,
                    epochs: device_epochs,
                    inputs,
                    outputs,
                })
            })
            .await?;

            let RoundResult { weights, loss, .. } = outcome.result;
            if !weights.is_empty() {
                self.model.apply_weights(weights);
            }
            if let Some(loss) = loss {
                self.history.train_loss.push(loss);
            }

            let validation_loss = match self.validation {
                Some(_) => self.evaluate().await?,
                None => None,
            };

            match (loss, validation_loss) {
                (Some(loss), Some(val)) => {
                    info!("epoch {epoch}/{epochs} - loss: {loss} - validation loss: {val}")
                }
                (Some(loss), None) => info!("epoch {epoch}/{epochs} - loss: {loss}"),
                _ => info!("epoch {epoch}/{epochs} - no loss reported"),
            }
        }

        Ok(&self.history)
    }

    /// Runs one evaluation round over the validation data.
    ///
    /// # Returns
    /// The round's loss, or `InvalidInput` if there's no validation data.
    pub async fn evaluate(&mut self) -> Result<Option<f32>> {
        let Some(validation) = &self.validation else {
            return Err(CoordinatorError::InvalidInput(
                "no validation data to evaluate on".into(),
            ));
        };

        let snapshot = self.model.snapshot();
        let batch_size = self.batch_size;

        let outcome = run_sharded(&mut self.coordinator, validation, PartitionMode::Exact, |shard| {
            let (inputs, outputs) = paired(shard)?;
            Ok(RequestPayload::Evaluate {
                model: snapshot.clone(),
                batch_size,
                inputs,
                outputs,
            })
        })
        .await?;

        let loss = outcome.result.loss;
        if let Some(loss) = loss {
            self.history.evaluate_loss.push(loss);
        }

        Ok(loss)
    }

    /// Runs one prediction round over `inputs`.
    ///
    /// # Returns
    /// The outputs stacked in the order devices finished, not in sample order.
    pub async fn predict(&mut self, inputs: Tensor) -> Result<Option<Tensor>> {
        let snapshot = self.model.snapshot();
        let batch_size = self.batch_size;
        let dataset = Dataset::inputs_only(inputs);

        let outcome = run_sharded(&mut self.coordinator, &dataset, PartitionMode::Exact, |shard| {
            Ok(RequestPayload::Predict {
                model: snapshot.clone(),
                batch_size,
                inputs: shard.inputs,
            })
        })
        .await?;

        Ok(outcome.result.outputs)
    }
}

/// Partitions `dataset` across the currently available devices and runs a round over it.
async fn run_sharded<C, D, F>(
    coordinator: &mut Coordinator<C, D>,
    dataset: &Dataset,
    mode: PartitionMode,
    build: F,
) -> Result<RoundOutcome>
where
    C: TaskChannel,
    D: DeviceDirectory,
    F: Fn(Shard) -> Result<RequestPayload>,
{
    let devices = coordinator.refresh_devices().await;

    let requests = if devices.is_empty() {
        warn!("no devices available, the round will do nothing");
        Vec::new()
    } else {
        info!("running round on {} device(s)", devices.len());
        partition::partition(dataset, &devices, mode)?
            .into_iter()
            .map(build)
            .collect::<Result<Vec<_>>>()?
    };

    let outcome = coordinator.run_round(requests).await?;
    if outcome.timed_out {
        warn!(
            "round timed out, {} device(s) did not respond",
            outcome.unresponsive.len()
        );
    }
    if !outcome.undispatched.is_empty() {
        warn!("{} request(s) were never dispatched", outcome.undispatched.len());
    }

    Ok(outcome)
}

fn paired(shard: Shard) -> Result<(Tensor, Tensor)> {
    let Shard {
        device_id,
        inputs,
        outputs,
        ..
    } = shard;

    let outputs = outputs.ok_or_else(|| {
        CoordinatorError::InvalidInput(format!("shard for {device_id} has no outputs"))
    })?;

    Ok((inputs, outputs))
}
