pub mod aggregator;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod net;
pub mod partition;
pub mod registry;
pub mod task_store;
pub mod trainer;

pub use aggregator::{Aggregator, RoundResult};
pub use channel::{DeviceDirectory, Subscription, TaskChannel};
pub use config::{EmptyRoundPolicy, RoundConfig, TimeoutPolicy};
pub use coordinator::{Coordinator, RoundOutcome, RoundState};
pub use error::{CoordinatorError, Result};
pub use net::NetClient;
pub use partition::{Dataset, PartitionMode, Shard};
pub use registry::DeviceRegistry;
pub use task_store::{Task, TaskStore};
pub use trainer::{History, ModelHandle, Trainer};
