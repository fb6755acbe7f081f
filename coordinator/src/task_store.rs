use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use comms::specs::{DeviceId, RequestPayload, ResponsePayload, TaskId};

use crate::error::{CoordinatorError, Result};

/// A tracked unit of work: one request sent to one device and its eventual response.
#[derive(Debug, Clone)]
pub struct Task {
    pub device_id: DeviceId,
    pub request: RequestPayload,
    pub sent_at: SystemTime,
    response: Option<ResponsePayload>,
    /// Position in completion order, meaningful only once a response is attached.
    completed_seq: u64,
}

impl Task {
    pub fn response(&self) -> Option<&ResponsePayload> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<ResponsePayload> {
        self.response
    }

    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }

    /// Whether the task is still incomplete `timeout` or more after it was sent.
    ///
    /// A send time in the future (clock skew) counts as just sent.
    pub fn is_expired_at(&self, now: SystemTime, timeout: Duration) -> bool {
        !self.is_completed()
            && now
                .duration_since(self.sent_at)
                .is_ok_and(|elapsed| elapsed >= timeout)
    }
}

/// In-memory ledger of a round's tasks, keyed by task id.
///
/// The completed, incomplete and expired views are computed on every call against the
/// current time, they're never cached.
#[derive(Debug)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    task_timeout: Duration,
    completions: u64,
}

impl TaskStore {
    /// Creates a new, empty `TaskStore`.
    ///
    /// # Arguments
    /// * `task_timeout` - How long a task may stay incomplete before it's expired.
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            task_timeout,
            completions: 0,
        }
    }

    /// Starts tracking a task.
    ///
    /// # Returns
    /// `AlreadyExists` if `task_id` is already tracked.
    pub fn create(
        &mut self,
        task_id: TaskId,
        device_id: DeviceId,
        request: RequestPayload,
        sent_at: SystemTime,
    ) -> Result<()> {
        if self.tasks.contains_key(&task_id) {
            return Err(CoordinatorError::AlreadyExists(task_id));
        }

        let task = Task {
            device_id,
            request,
            sent_at,
            response: None,
            completed_seq: 0,
        };

        self.tasks.insert(task_id, task);
        Ok(())
    }

    /// Attaches a response to a tracked task, last write wins.
    ///
    /// Duplicate completions are accepted since the broker delivers at least once; they
    /// keep the task's original position in completion order.
    ///
    /// # Returns
    /// The response that was replaced, `None` on the first completion, or `NotFound` if
    /// `task_id` isn't tracked.
    pub fn record_completion(
        &mut self,
        task_id: TaskId,
        response: ResponsePayload,
    ) -> Result<Option<ResponsePayload>> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(CoordinatorError::NotFound(task_id))?;

        if task.response.is_none() {
            task.completed_seq = self.completions;
            self.completions += 1;
        }

        Ok(task.response.replace(response))
    }

    /// Stops tracking a task, whatever its state.
    pub fn discard(&mut self, task_id: TaskId) -> Option<Task> {
        self.tasks.remove(&task_id)
    }

    /// Discards every task.
    ///
    /// # Returns
    /// The amount of tasks discarded.
    pub fn clear(&mut self) -> usize {
        let len = self.tasks.len();
        self.tasks.clear();
        self.completions = 0;
        len
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Tasks with a response, in the order they completed.
    pub fn completed(&self) -> Vec<(TaskId, &Task)> {
        let mut completed: Vec<_> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_completed())
            .map(|(&id, task)| (id, task))
            .collect();

        completed.sort_by_key(|(_, task)| task.completed_seq);
        completed
    }

    /// Tasks still waiting on a response, ordered by task id.
    pub fn incomplete(&self) -> Vec<(TaskId, &Task)> {
        self.collect_sorted(|task| !task.is_completed())
    }

    /// Incomplete tasks past the timeout right now.
    pub fn expired(&self) -> Vec<(TaskId, &Task)> {
        self.expired_at(SystemTime::now())
    }

    /// Incomplete tasks past the timeout at `now`, ordered by task id.
    pub fn expired_at(&self, now: SystemTime) -> Vec<(TaskId, &Task)> {
        let timeout = self.task_timeout;
        self.collect_sorted(|task| task.is_expired_at(now, timeout))
    }

    /// Whether any incomplete task is past the timeout at `now`.
    pub fn any_expired_at(&self, now: SystemTime) -> bool {
        let timeout = self.task_timeout;
        self.tasks.values().any(|task| task.is_expired_at(now, timeout))
    }

    /// Whether at least one incomplete task is still within the timeout at `now`.
    pub fn any_live_at(&self, now: SystemTime) -> bool {
        let timeout = self.task_timeout;
        self.tasks
            .values()
            .any(|task| !task.is_completed() && !task.is_expired_at(now, timeout))
    }

    pub fn has_incomplete(&self) -> bool {
        self.tasks.values().any(|task| !task.is_completed())
    }

    /// Removes the completed tasks from the store and returns them in completion order.
    pub fn take_completed(&mut self) -> Vec<(TaskId, Task)> {
        let ids: Vec<_> = self.completed().into_iter().map(|(id, _)| id).collect();

        ids.into_iter()
            .filter_map(|id| self.tasks.remove(&id).map(|task| (id, task)))
            .collect()
    }

    fn collect_sorted<F>(&self, predicate: F) -> Vec<(TaskId, &Task)>
    where
        F: Fn(&Task) -> bool,
    {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|(_, task)| predicate(task))
            .map(|(&id, task)| (id, task))
            .collect();

        tasks.sort_by_key(|(id, _)| *id);
        tasks
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::{ModelSnapshot, Tensor};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn request() -> RequestPayload {
        RequestPayload::Evaluate {
            model: ModelSnapshot {
                topology: String::new(),
                weights: Vec::new(),
            },
            batch_size: 1,
            inputs: Tensor::zeros(vec![1, 1]),
            outputs: Tensor::zeros(vec![1, 1]),
        }
    }

    fn response(loss: f32) -> ResponsePayload {
        ResponsePayload::Evaluate { loss: Some(loss) }
    }

    fn ids(tasks: &[(TaskId, &Task)]) -> Vec<u64> {
        tasks.iter().map(|(id, _)| id.0).collect()
    }

    #[test]
    fn duplicate_create_is_already_exists() {
        let mut store = TaskStore::new(TIMEOUT);
        let now = SystemTime::now();
        store.create(TaskId(1), DeviceId(1), request(), now).unwrap();

        let err = store.create(TaskId(1), DeviceId(2), request(), now).unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyExists(TaskId(1))));
        assert_eq!(store.get(TaskId(1)).unwrap().device_id, DeviceId(1));
    }

    #[test]
    fn completion_for_untracked_id_is_not_found() {
        let mut store = TaskStore::new(TIMEOUT);
        let err = store.record_completion(TaskId(9), response(1.0)).unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(TaskId(9))));
    }

    #[test]
    fn duplicate_completion_overwrites() {
        let mut store = TaskStore::new(TIMEOUT);
        store
            .create(TaskId(1), DeviceId(1), request(), SystemTime::now())
            .unwrap();

        assert_eq!(store.record_completion(TaskId(1), response(1.0)).unwrap(), None);
        assert_eq!(
            store.record_completion(TaskId(1), response(2.0)).unwrap(),
            Some(response(1.0))
        );
        assert_eq!(
            store.get(TaskId(1)).unwrap().response(),
            Some(&response(2.0))
        );
    }

    #[test]
    fn views_partition_the_store() {
        let mut store = TaskStore::new(TIMEOUT);
        let now = SystemTime::now();
        let old = now - Duration::from_secs(10);

        store.create(TaskId(1), DeviceId(1), request(), old).unwrap();
        store.create(TaskId(2), DeviceId(2), request(), old).unwrap();
        store.create(TaskId(3), DeviceId(3), request(), now).unwrap();
        store.create(TaskId(4), DeviceId(4), request(), now).unwrap();
        store.record_completion(TaskId(2), response(0.1)).unwrap();
        store.record_completion(TaskId(4), response(0.2)).unwrap();

        let completed = ids(&store.completed());
        let incomplete = ids(&store.incomplete());
        let expired = ids(&store.expired_at(now));

        assert_eq!(completed, [2, 4]);
        assert_eq!(incomplete, [1, 3]);
        assert_eq!(expired, [1]);
        assert!(expired.iter().all(|id| incomplete.contains(id)));
        assert_eq!(completed.len() + incomplete.len(), store.len());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let mut store = TaskStore::new(TIMEOUT);
        let sent_at = SystemTime::now();
        store.create(TaskId(1), DeviceId(1), request(), sent_at).unwrap();

        let one_ms = Duration::from_millis(1);
        assert!(store.expired_at(sent_at + TIMEOUT - one_ms).is_empty());
        assert_eq!(ids(&store.expired_at(sent_at + TIMEOUT)), [1]);
    }

    #[test]
    fn future_send_time_is_not_expired() {
        let mut store = TaskStore::new(TIMEOUT);
        let now = SystemTime::now();
        store
            .create(TaskId(1), DeviceId(1), request(), now + Duration::from_secs(60))
            .unwrap();

        assert!(store.expired_at(now).is_empty());
        assert!(store.any_live_at(now));
    }

    #[test]
    fn completed_tasks_come_out_in_completion_order() {
        let mut store = TaskStore::new(TIMEOUT);
        let now = SystemTime::now();
        for id in 1..=3 {
            store.create(TaskId(id), DeviceId(id), request(), now).unwrap();
        }

        store.record_completion(TaskId(3), response(3.0)).unwrap();
        store.record_completion(TaskId(1), response(1.0)).unwrap();
        store.record_completion(TaskId(3), response(3.5)).unwrap();

        let taken = store.take_completed();
        let order: Vec<_> = taken.iter().map(|(id, _)| id.0).collect();
        assert_eq!(order, [3, 1]);
        assert_eq!(ids(&store.incomplete()), [2]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn discard_removes_unconditionally() {
        let mut store = TaskStore::new(TIMEOUT);
        store
            .create(TaskId(1), DeviceId(1), request(), SystemTime::now())
            .unwrap();

        assert!(store.discard(TaskId(1)).is_some());
        assert!(store.discard(TaskId(1)).is_none());
        assert!(store.is_empty());
    }
}
