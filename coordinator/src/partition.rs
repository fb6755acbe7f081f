use std::ops::Range;

use comms::specs::{DeviceId, Tensor};
use log::debug;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::error::{CoordinatorError, Result};

/// An input dataset with optional paired outputs, sample dimension first.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub inputs: Tensor,
    pub outputs: Option<Tensor>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Returns
    /// The dataset, or `InvalidInput` if `outputs` doesn't have as many samples as `inputs`.
    pub fn new(inputs: Tensor, outputs: Option<Tensor>) -> Result<Self> {
        let dataset = Self { inputs, outputs };
        dataset.check_paired()?;
        Ok(dataset)
    }

    /// A dataset without outputs, as used for prediction.
    pub fn inputs_only(inputs: Tensor) -> Self {
        Self {
            inputs,
            outputs: None,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with `InvalidInput` if the outputs don't hold as many samples as the inputs.
    fn check_paired(&self) -> Result<()> {
        match &self.outputs {
            Some(outputs) if outputs.rows() != self.inputs.rows() => {
                Err(CoordinatorError::InvalidInput(format!(
                    "inputs hold {} samples but outputs hold {}",
                    self.inputs.rows(),
                    outputs.rows()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One device's slice of a round's dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub device_id: DeviceId,
    /// The sample range this shard covers in the (possibly replicated) dataset.
    pub range: Range<usize>,
    pub inputs: Tensor,
    pub outputs: Option<Tensor>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// How a dataset is split across devices, chosen explicitly per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Every sample goes to exactly one device.
    #[default]
    Exact,
    /// Every sample is replicated and the copies shuffled before splitting, so a dropped
    /// device is unlikely to take a sample's only copy with it.
    Redundant {
        /// The minimum replication factor, rounded up until the replicated size divides evenly.
        factor: usize,
        batch_size: usize,
        seed: Option<u64>,
    },
}

/// Splits `total` samples among `parts` and returns the range of part `idx`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, the first `total % parts` ranges are the larger ones.
pub fn shard_range(total: usize, idx: usize, parts: usize) -> Range<usize> {
    debug_assert!(idx < parts);

    let base = total / parts;
    let rem = total % parts;

    let start = idx * base + idx.min(rem);
    let extra = usize::from(idx < rem);

    start..start + base + extra
}

/// Splits `dataset` across `devices`, in iteration order.
///
/// # Arguments
/// * `dataset` - The samples to split.
/// * `devices` - The devices to give a shard to, one shard each.
/// * `mode` - Whether the split is exact or redundant.
///
/// # Returns
/// One shard per device, or `InvalidInput` if there are no devices, the outputs don't
/// pair up with the inputs or the mode's parameters are zero.
pub fn partition(dataset: &Dataset, devices: &[DeviceId], mode: PartitionMode) -> Result<Vec<Shard>> {
    if devices.is_empty() {
        return Err(CoordinatorError::InvalidInput(
            "no devices available to partition across".into(),
        ));
    }
    dataset.check_paired()?;

    match mode {
        PartitionMode::Exact => Ok(split(dataset, devices)),
        PartitionMode::Redundant {
            factor,
            batch_size,
            seed,
        } => {
            if factor == 0 || batch_size == 0 {
                return Err(CoordinatorError::InvalidInput(
                    "replication factor and batch size must be greater than zero".into(),
                ));
            }

            let factor = replication_factor(dataset.len(), devices.len(), batch_size, factor);
            debug!(
                "replicating {} samples {factor} time(s) across {} device(s)",
                dataset.len(),
                devices.len()
            );

            let replicated = replicate_and_shuffle(dataset, factor, seed);
            Ok(split(&replicated, devices))
        }
    }
}

/// The smallest factor `>= min_factor` such that `samples * factor` is a multiple of both
/// `devices` and `batch_size`.
///
/// Terminates since `lcm(devices, batch_size)` always satisfies both constraints.
pub fn replication_factor(samples: usize, devices: usize, batch_size: usize, min_factor: usize) -> usize {
    let mut factor = min_factor.max(1);

    loop {
        let size = samples * factor;
        if size % devices == 0 && size % batch_size == 0 {
            return factor;
        }

        factor += 1;
    }
}

fn split(dataset: &Dataset, devices: &[DeviceId]) -> Vec<Shard> {
    let total = dataset.len();

    let shards: Vec<_> = devices
        .iter()
        .enumerate()
        .map(|(i, &device_id)| {
            let range = shard_range(total, i, devices.len());
            Shard {
                device_id,
                inputs: dataset.inputs.slice_rows(range.clone()),
                outputs: dataset.outputs.as_ref().map(|o| o.slice_rows(range.clone())),
                range,
            }
        })
        .collect();

    debug_assert_eq!(shards.iter().map(Shard::len).sum::<usize>(), total);
    shards
}

fn replicate_and_shuffle(dataset: &Dataset, factor: usize, seed: Option<u64>) -> Dataset {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut indices: Vec<usize> = (0..dataset.len())
        .flat_map(|i| std::iter::repeat_n(i, factor))
        .collect();
    indices.shuffle(&mut rng);

    Dataset {
        inputs: dataset.inputs.gather_rows(&indices),
        outputs: dataset.outputs.as_ref().map(|o| o.gather_rows(&indices)),
    }
}
