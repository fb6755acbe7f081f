use std::env;

use anyhow::Context;
use comms::specs::{ModelSnapshot, Tensor};
use coordinator::{Coordinator, Dataset, ModelHandle, NetClient, RoundConfig, Trainer};
use log::info;
use tokio::signal;

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:7070";
const EPOCHS: usize = 5;
const BATCH_SIZE: usize = 2;

/// A single dense layer held in memory, trained entirely by the devices.
struct DenseModel {
    inputs: usize,
    units: usize,
    weights: Vec<Tensor>,
}

impl DenseModel {
    fn new(inputs: usize, units: usize) -> Self {
        Self {
            inputs,
            units,
            weights: vec![Tensor::zeros(vec![inputs, units]), Tensor::zeros(vec![units])],
        }
    }
}

impl ModelHandle for DenseModel {
    fn snapshot(&self) -> ModelSnapshot {
        let topology = serde_json::json!({
            "layers": [{
                "type": "dense",
                "units": self.units,
                "activation": "sigmoid",
            }],
            "input_shape": [self.inputs],
        });

        ModelSnapshot {
            topology: topology.to_string(),
            weights: self.weights.clone(),
        }
    }

    fn apply_weights(&mut self, weights: Vec<Tensor>) {
        self.weights = weights;
    }
}

fn xor_dataset() -> anyhow::Result<Dataset> {
    let inputs = Tensor::from_rows(&[
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ])?;
    let outputs = Tensor::from_rows(&[vec![0.0], vec![1.0], vec![1.0], vec![0.0]])?;

    Ok(Dataset::new(inputs, Some(outputs))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let addr = env::var("BROKER_ADDR").unwrap_or_else(|_| DEFAULT_BROKER_ADDR.to_string());
    let config = RoundConfig::from_env()?;

    let channel = NetClient::connect(&addr)
        .await
        .with_context(|| format!("connecting to broker at {addr}"))?;
    let directory = NetClient::connect(&addr).await?;
    let coordinator = Coordinator::new(channel, directory, config);

    let train = xor_dataset()?;
    let validation = train.clone();
    let mut trainer = Trainer::new(coordinator, DenseModel::new(2, 1), train.clone(), BATCH_SIZE)?
        .with_validation(validation)?;

    tokio::select! {
        ret = trainer.fit(EPOCHS) => {
            let history = ret?;
            info!("training finished, loss history: {:?}", history.train_loss);
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT, stopping");
            return Ok(());
        }
    }

    if let Some(outputs) = trainer.predict(train.inputs).await? {
        info!("predictions: {}", serde_json::to_string(&outputs)?);
    }

    Ok(())
}
