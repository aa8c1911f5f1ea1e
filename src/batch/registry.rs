//! Task Registry
//!
//! Process-local table of get-batch tasks keyed by task id. Control messages that
//! reference the same id converge on one task instance (create-or-reuse), so retried
//! and duplicate deliveries never produce a second task.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::task::{BatchTask, TaskDeps};
use super::types::{PLACEHOLDER_TASK_ID, Role, TaskId, TaskScope};
use crate::error::BatchError;

pub struct TaskRegistry {
    tasks: DashMap<TaskId, Arc<BatchTask>>,
    deps: Arc<TaskDeps>,
    /// Non-terminal tasks idle for longer than this are aborted.
    task_idle: Duration,
    /// Terminal tasks stay visible this long so that re-entry gets a terminal error.
    keep_finished: Duration,
}

impl TaskRegistry {
    pub fn new(deps: Arc<TaskDeps>, task_idle: Duration, keep_finished: Duration) -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            deps,
            task_idle,
            keep_finished,
        })
    }

    pub fn deps(&self) -> &Arc<TaskDeps> {
        &self.deps
    }

    /// Creates the task or returns the existing one.
    ///
    /// The coordinator (`designated`) mints a fresh id when given the placeholder;
    /// contributors must be given a well-formed id. Returns the task and whether this
    /// call created it.
    pub fn acquire(
        &self,
        scope: TaskScope,
        task_id: &str,
        designated: bool,
    ) -> Result<(Arc<BatchTask>, bool), BatchError> {
        let membership = &self.deps.membership;
        if membership.get_member(&scope.coordinator).is_none() {
            return Err(BatchError::NodeNotFound(scope.coordinator.clone()));
        }
        if !membership.is_local_active() {
            return Err(BatchError::NotInScope(membership.local_id().clone()));
        }
        if designated != (scope.coordinator == *membership.local_id()) {
            return Err(BatchError::NotInScope(membership.local_id().clone()));
        }

        let id = if designated && (task_id.is_empty() || task_id == PLACEHOLDER_TASK_ID) {
            TaskId::new()
        } else {
            TaskId::parse(task_id).ok_or_else(|| BatchError::MalformedTaskId(task_id.to_string()))?
        };
        let role = if designated {
            Role::Coordinator
        } else {
            Role::Contributor
        };

        match self.tasks.entry(id.clone()) {
            Entry::Occupied(slot) => {
                let task = slot.get().clone();
                drop(slot);
                if task.is_finished() {
                    return Err(task.terminal_error());
                }
                if task.role() != role || *task.scope() != scope {
                    return Err(BatchError::ScopeMismatch {
                        task: id,
                        reason: format!(
                            "registered as {:?} for {:?} via {}, requested as {:?} for {:?} via {}",
                            task.role(),
                            task.scope().bucket,
                            task.scope().coordinator,
                            role,
                            scope.bucket,
                            scope.coordinator
                        ),
                    });
                }
                tracing::debug!("Reusing task {} ({:?})", id, role);
                Ok((task, false))
            }
            Entry::Vacant(slot) => {
                let task = Arc::new(BatchTask::new(id.clone(), role, scope, self.deps.clone()));
                slot.insert(task.clone());
                tracing::debug!("Created task {} ({:?})", id, role);
                Ok((task, true))
            }
        }
    }

    /// The task for a data request. Finished tasks answer with their terminal error.
    pub fn get_active(&self, task_id: &str) -> Result<Arc<BatchTask>, BatchError> {
        let id = TaskId::parse(task_id)
            .ok_or_else(|| BatchError::MalformedTaskId(task_id.to_string()))?;
        let task = self
            .get(&id)
            .ok_or_else(|| BatchError::TaskNotActive(id.clone()))?;

        if task.is_finished() {
            return Err(task.terminal_error());
        }
        Ok(task)
    }

    pub fn get(&self, id: &TaskId) -> Option<Arc<BatchTask>> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    /// Aborts idle tasks (broadcasting the abort) and drops tasks that finished more
    /// than `keep_finished` ago. Returns the number of tasks dropped.
    pub async fn housekeep(&self, now: Instant) -> usize {
        let idle: Vec<Arc<BatchTask>> = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                !task.is_finished()
                    && now.saturating_duration_since(task.last_activity()) > self.task_idle
            })
            .map(|entry| entry.value().clone())
            .collect();

        for task in idle {
            let err = BatchError::Timeout {
                task: task.id().clone(),
                waited: now.saturating_duration_since(task.last_activity()),
            };
            tracing::warn!("Task {} idle, aborting", task.id());
            task.bcast_abort(&err).await;
            task.abort(err);
        }

        let before = self.tasks.len();
        self.tasks.retain(|_, task| match task.finished_at() {
            Some(finished) => now.saturating_duration_since(finished) < self.keep_finished,
            None => true,
        });
        let dropped = before.saturating_sub(self.tasks.len());
        if dropped > 0 {
            tracing::debug!("Task housekeeping dropped {} finished tasks", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }
}
