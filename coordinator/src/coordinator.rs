use std::{collections::VecDeque, time::SystemTime};

use comms::specs::{CompletionEvent, DeviceId, Event, RequestPayload, TaskSubmission};
use log::{debug, info, warn};
use tokio::time::{self, MissedTickBehavior};

use crate::{
    aggregator::{Aggregator, RoundResult},
    channel::{DeviceDirectory, Subscription, TaskChannel},
    config::{RoundConfig, TimeoutPolicy},
    error::{CoordinatorError, Result},
    registry::DeviceRegistry,
    task_store::TaskStore,
};

/// Where the coordinator is within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Connecting,
    Dispatching,
    Awaiting,
    Drained,
}

/// Everything a caller needs to know about a finished round.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub result: RoundResult,
    /// Whether the round stopped waiting because of expired tasks.
    pub timed_out: bool,
    /// Devices whose task was still incomplete when the round drained.
    pub unresponsive: Vec<DeviceId>,
    /// Requests that never reached a device: failed submissions and leftover backlog.
    pub undispatched: Vec<RequestPayload>,
    /// The amount of tasks successfully submitted, replenishments included.
    pub dispatched: usize,
}

struct Gathered {
    timed_out: bool,
    dispatched: usize,
}

/// Runs dispatch and gather rounds against a task channel.
///
/// A round goes `Idle -> Connecting -> Dispatching -> Awaiting -> Drained`. Every piece of
/// round state is mutated from the single control loop in `run_round`, inbound events are
/// drained from the round's `Subscription` in arrival order.
pub struct Coordinator<C, D>
where
    C: TaskChannel,
    D: DeviceDirectory,
{
    channel: C,
    registry: DeviceRegistry<D>,
    store: TaskStore,
    aggregator: Aggregator,
    config: RoundConfig,
    state: RoundState,
    backlog: VecDeque<RequestPayload>,
    undispatched: Vec<RequestPayload>,
}

impl<C, D> Coordinator<C, D>
where
    C: TaskChannel,
    D: DeviceDirectory,
{
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `channel` - The broker's task queue, owned for the coordinator's lifetime.
    /// * `directory` - The broker's device directory.
    /// * `config` - The round tunables.
    pub fn new(channel: C, directory: D, config: RoundConfig) -> Self {
        Self {
            channel,
            registry: DeviceRegistry::new(directory, config.freshness_window),
            store: TaskStore::new(config.task_timeout),
            aggregator: Aggregator::new(config.empty_policy),
            config,
            state: RoundState::Idle,
            backlog: VecDeque::new(),
            undispatched: Vec::new(),
        }
    }

    /// Reloads the available devices from the directory.
    pub async fn refresh_devices(&mut self) -> Vec<DeviceId> {
        self.registry.refresh().await
    }

    pub fn available_devices(&self) -> Vec<DeviceId> {
        self.registry.available()
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// The task ledger, expired tasks of the last round stay here until discarded.
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TaskStore {
        &mut self.store
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry<D> {
        &mut self.registry
    }

    /// Runs one round: sends `requests` to the available devices, one each, replenishes
    /// devices as they finish, and aggregates whatever completed.
    ///
    /// The task store is reset first, tasks left over from a previous round are discarded.
    ///
    /// # Arguments
    /// * `requests` - The work queue, one request per shard. Requests beyond the amount of
    ///   available devices form the replenishment backlog.
    ///
    /// # Returns
    /// The round's outcome. Fails with `Subscription` if the event streams couldn't be
    /// opened, `AlreadyExists` if the channel hands out a task id twice, or `NoResults` if
    /// nothing completed and the empty round policy says so.
    pub async fn run_round(&mut self, requests: Vec<RequestPayload>) -> Result<RoundOutcome> {
        self.reset();
        self.backlog.extend(requests);

        self.transition(RoundState::Connecting);
        let mut subscription = match self.channel.subscribe(self.config.consumer_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.transition(RoundState::Idle);
                return Err(CoordinatorError::Subscription(e));
            }
        };

        let gathered = self.gather(&mut subscription).await;

        subscription.cancel();
        self.transition(RoundState::Drained);

        let Gathered {
            timed_out,
            dispatched,
        } = gathered?;

        let unresponsive: Vec<_> = self
            .store
            .incomplete()
            .into_iter()
            .map(|(task_id, task)| {
                warn!(task_id = task_id.0; "{} did not respond in time", task.device_id);
                task.device_id
            })
            .collect();

        let mut undispatched = std::mem::take(&mut self.undispatched);
        undispatched.extend(self.backlog.drain(..));

        let result = self.aggregator.reduce(self.store.take_completed())?;

        info!(
            "round drained: {}/{dispatched} task(s) completed, timed out: {timed_out}, {} undispatched",
            result.completed,
            undispatched.len()
        );

        Ok(RoundOutcome {
            result,
            timed_out,
            unresponsive,
            undispatched,
            dispatched,
        })
    }

    fn reset(&mut self) {
        let leftover = self.store.clear();
        if leftover > 0 {
            debug!("discarded {leftover} task(s) left over from the previous round");
        }

        self.backlog.clear();
        self.undispatched.clear();
        self.state = RoundState::Idle;
    }

    async fn gather(&mut self, subscription: &mut Subscription) -> Result<Gathered> {
        self.transition(RoundState::Dispatching);
        let mut dispatched = 0;

        let devices = self.registry.available();
        info!(
            "dispatching {} request(s) to {} device(s)",
            self.backlog.len(),
            devices.len()
        );

        for device_id in devices {
            let Some(request) = self.backlog.pop_front() else {
                break;
            };

            if self.dispatch(device_id, request).await? {
                dispatched += 1;
            }
        }

        self.transition(RoundState::Awaiting);
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut timed_out = false;
        while self.store.has_incomplete() {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(Event::Completion(completion)) => {
                        if self.on_completion(completion).await? {
                            dispatched += 1;
                        }
                    }
                    Some(Event::Liveness(liveness)) => self.registry.apply_liveness(liveness),
                    None => {
                        warn!("event stream closed, draining the round early");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.deadline_reached(SystemTime::now()) {
                        info!("round timed out with {} expired task(s)", self.store.expired().len());
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        Ok(Gathered {
            timed_out,
            dispatched,
        })
    }

    /// Records a completion and replenishes the device that sent it.
    ///
    /// # Returns
    /// Whether a replenishment task was submitted.
    async fn on_completion(&mut self, completion: CompletionEvent) -> Result<bool> {
        let CompletionEvent {
            task_id,
            device_id,
            response,
        } = completion;

        match self.store.record_completion(task_id, response) {
            Ok(None) => {
                debug!(task_id = task_id.0, device_id = device_id.0; "task completed");
            }
            Ok(Some(_)) => {
                debug!(task_id = task_id.0; "duplicate completion, response overwritten");
                return Ok(false);
            }
            Err(CoordinatorError::NotFound(_)) => {
                warn!(task_id = task_id.0, device_id = device_id.0; "ignoring completion for unknown task");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let Some(request) = self.backlog.pop_front() else {
            return Ok(false);
        };

        debug!(device_id = device_id.0; "replenishing device from backlog");
        self.dispatch(device_id, request).await
    }

    /// Submits `request` to `device_id` and starts tracking it.
    ///
    /// A failed submission is logged and the request set aside as undispatched.
    ///
    /// # Returns
    /// Whether the task was submitted.
    async fn dispatch(&mut self, device_id: DeviceId, request: RequestPayload) -> Result<bool> {
        let submission = TaskSubmission::new(device_id, self.config.consumer_id, request);

        match self.channel.submit(&submission).await {
            Ok(receipt) => {
                debug!(
                    task_id = receipt.task_id.0,
                    device_id = device_id.0;
                    "submitted {} task",
                    submission.request_type.as_str()
                );

                self.store.create(
                    receipt.task_id,
                    device_id,
                    submission.request,
                    receipt.sent_at(),
                )?;

                Ok(true)
            }
            Err(e) => {
                warn!(device_id = device_id.0; "failed to submit task, skipping device: {e}");
                self.undispatched.push(submission.request);
                Ok(false)
            }
        }
    }

    fn deadline_reached(&self, now: SystemTime) -> bool {
        match self.config.timeout_policy {
            TimeoutPolicy::AbortOnAnyExpiry => self.store.any_expired_at(now),
            TimeoutPolicy::ExcludeExpired => {
                self.store.has_incomplete() && !self.store.any_live_at(now)
            }
        }
    }

    fn transition(&mut self, state: RoundState) {
        debug!("round state {:?} -> {state:?}", self.state);
        self.state = state;
    }
}
