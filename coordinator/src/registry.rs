use std::time::{Duration, Instant};

use comms::specs::{DeviceId, DeviceStatus, LivenessEvent};
use log::{debug, warn};

use crate::channel::DeviceDirectory;

/// A reachable worker device as last seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub status: DeviceStatus,
    pub last_heartbeat: Instant,
}

impl Device {
    fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        self.status == DeviceStatus::Available
            && now.saturating_duration_since(self.last_heartbeat) <= window
    }
}

/// Tracks the set of currently reachable devices.
///
/// The set is refreshed from the device directory and kept current by liveness events.
/// Each device id appears at most once, in the order it was first seen.
pub struct DeviceRegistry<D: DeviceDirectory> {
    directory: D,
    freshness_window: Duration,
    devices: Vec<Device>,
}

impl<D: DeviceDirectory> DeviceRegistry<D> {
    /// Creates a new, empty `DeviceRegistry`.
    ///
    /// # Arguments
    /// * `directory` - Where available devices are queried from.
    /// * `freshness_window` - How old a heartbeat may be for its device to count as available.
    pub fn new(directory: D, freshness_window: Duration) -> Self {
        Self {
            directory,
            freshness_window,
            devices: Vec::new(),
        }
    }

    /// Replaces the registry contents with the directory's current view.
    ///
    /// Fails soft: a directory error is logged and leaves the registry empty, a round with
    /// zero devices simply does nothing.
    ///
    /// # Returns
    /// The available device ids.
    pub async fn refresh(&mut self) -> Vec<DeviceId> {
        let now = Instant::now();

        let ids = match self.directory.list_available(self.freshness_window).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("unable to load devices, assuming none are available: {e}");
                Vec::new()
            }
        };

        self.devices.clear();
        for id in ids {
            self.mark_available(id, now);
        }

        debug!("registry refreshed: {} device(s) available", self.devices.len());
        self.available()
    }

    /// Applies a liveness change, idempotent.
    ///
    /// Adding a present device only refreshes its heartbeat, removing an absent one is a
    /// no-op that gets logged since it points to a duplicate unavailability notice.
    pub fn apply_liveness(&mut self, event: LivenessEvent) {
        let LivenessEvent { device_id, status } = event;

        match status {
            DeviceStatus::Available => {
                debug!(device_id = device_id.0; "device became available");
                self.mark_available(device_id, Instant::now());
            }
            DeviceStatus::Unavailable => {
                let before = self.devices.len();
                self.devices.retain(|d| d.id != device_id);

                if self.devices.len() == before {
                    warn!("received unavailability notice for unknown {device_id}");
                } else {
                    debug!(device_id = device_id.0; "device became unavailable");
                }
            }
        }
    }

    /// The ids of the devices that are available and fresh right now.
    pub fn available(&self) -> Vec<DeviceId> {
        self.available_at(Instant::now())
    }

    /// The ids of the devices that are available and fresh at `now`, in first seen order.
    pub fn available_at(&self, now: Instant) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|d| d.is_fresh(now, self.freshness_window))
            .map(|d| d.id)
            .collect()
    }

    /// Looks a device up, regardless of freshness.
    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn mark_available(&mut self, id: DeviceId, now: Instant) {
        match self.devices.iter_mut().find(|d| d.id == id) {
            Some(device) => {
                device.status = DeviceStatus::Available;
                device.last_heartbeat = now;
            }
            None => self.devices.push(Device {
                id,
                status: DeviceStatus::Available,
                last_heartbeat: now,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct StaticDirectory(io::Result<Vec<DeviceId>>);

    impl DeviceDirectory for StaticDirectory {
        async fn list_available(&mut self, _freshness: Duration) -> io::Result<Vec<DeviceId>> {
            match &self.0 {
                Ok(ids) => Ok(ids.clone()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn ids(raw: &[u64]) -> Vec<DeviceId> {
        raw.iter().copied().map(DeviceId).collect()
    }

    fn event(id: u64, status: DeviceStatus) -> LivenessEvent {
        LivenessEvent {
            device_id: DeviceId(id),
            status,
        }
    }

    #[tokio::test]
    async fn refresh_keeps_directory_order() {
        let directory = StaticDirectory(Ok(ids(&[3, 1, 2])));
        let mut registry = DeviceRegistry::new(directory, Duration::from_secs(60));

        assert_eq!(registry.refresh().await, ids(&[3, 1, 2]));
    }

    #[tokio::test]
    async fn refresh_fails_soft() {
        let directory = StaticDirectory(Err(io::Error::other("directory down")));
        let mut registry = DeviceRegistry::new(directory, Duration::from_secs(60));
        registry.apply_liveness(event(1, DeviceStatus::Available));

        assert!(registry.refresh().await.is_empty());
        assert!(registry.available().is_empty());
    }

    #[test]
    fn liveness_events_are_idempotent() {
        let directory = StaticDirectory(Ok(Vec::new()));
        let mut registry = DeviceRegistry::new(directory, Duration::from_secs(60));

        registry.apply_liveness(event(1, DeviceStatus::Available));
        registry.apply_liveness(event(1, DeviceStatus::Available));
        registry.apply_liveness(event(2, DeviceStatus::Available));
        assert_eq!(registry.available(), ids(&[1, 2]));

        registry.apply_liveness(event(1, DeviceStatus::Unavailable));
        registry.apply_liveness(event(1, DeviceStatus::Unavailable));
        assert_eq!(registry.available(), ids(&[2]));
    }

    #[test]
    fn stale_heartbeats_are_not_available() {
        let directory = StaticDirectory(Ok(Vec::new()));
        let window = Duration::from_secs(60);
        let mut registry = DeviceRegistry::new(directory, window);
        registry.apply_liveness(event(1, DeviceStatus::Available));

        let seen = registry.get(DeviceId(1)).unwrap().last_heartbeat;
        assert_eq!(registry.available_at(seen + window), ids(&[1]));
        assert!(
            registry
                .available_at(seen + window + Duration::from_millis(1))
                .is_empty()
        );
    }
}
