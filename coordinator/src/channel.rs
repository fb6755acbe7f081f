use std::{io, time::Duration};

use comms::specs::{DeviceId, Event, TaskReceipt, TaskSubmission};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The broker's task queue: durable task enqueueing plus pub/sub of completions.
#[allow(unused)]
#[trait_variant::make(TaskChannel: Send)]
pub trait LocalTaskChannel {
    /// Enqueues a task for a device.
    ///
    /// # Arguments
    /// * `submission` - The work order and the device it's addressed to.
    ///
    /// # Returns
    /// The broker assigned task id and send timestamp, or an io error if the task wasn't enqueued.
    async fn submit(&mut self, submission: &TaskSubmission) -> io::Result<TaskReceipt>;

    /// Opens the inbound event streams (device liveness and task completion) for a consumer.
    ///
    /// # Arguments
    /// * `consumer_id` - The identifier of the subscribing coordinator.
    ///
    /// # Returns
    /// A live `Subscription`, or an io error if it couldn't be established.
    async fn subscribe(&mut self, consumer_id: u64) -> io::Result<Subscription>;
}

/// The broker's device directory.
#[allow(unused)]
#[trait_variant::make(DeviceDirectory: Send)]
pub trait LocalDeviceDirectory {
    /// Lists the devices marked available with a heartbeat within `freshness`.
    async fn list_available(&mut self, freshness: Duration) -> io::Result<Vec<DeviceId>>;
}

/// The consuming end of the inbound event streams of one round.
///
/// Events are queued by whoever produces them and drained by the coordinator's control loop.
/// Cancelling (explicitly or by dropping) stops the producers and closes the queue, so no
/// late event can be observed afterwards.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<Event>,
    token: CancellationToken,
}

impl Subscription {
    /// Creates a new `Subscription`.
    ///
    /// # Arguments
    /// * `events` - The inbound event queue.
    /// * `token` - Cancelled when the subscription ends, producers should stop on it.
    pub fn new(events: mpsc::Receiver<Event>, token: CancellationToken) -> Self {
        Self { events, token }
    }

    /// Waits for the next inbound event.
    ///
    /// # Returns
    /// `None` once the producers are gone or the subscription was cancelled.
    pub async fn recv(&mut self) -> Option<Event> {
        if self.token.is_cancelled() {
            return None;
        }

        self.events.recv().await
    }

    /// Tears the subscription down, idempotent.
    pub fn cancel(&mut self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }

        self.events.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::{DeviceStatus, LivenessEvent};

    use super::*;

    fn liveness(id: u64) -> Event {
        Event::Liveness(LivenessEvent {
            device_id: DeviceId(id),
            status: DeviceStatus::Available,
        })
    }

    #[tokio::test]
    async fn cancel_closes_the_queue() {
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let mut sub = Subscription::new(rx, token.clone());

        tx.send(liveness(1)).await.unwrap();
        assert!(sub.recv().await.is_some());

        sub.cancel();
        assert!(token.is_cancelled());
        assert!(tx.send(liveness(2)).await.is_err());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn drop_cancels_the_token() {
        let (_tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        drop(Subscription::new(rx, token.clone()));

        assert!(token.is_cancelled());
    }
}
