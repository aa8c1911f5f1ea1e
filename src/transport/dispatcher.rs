use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::TransportError;
use super::frame::{Frame, Opcode};
use crate::batch::types::TaskId;

/// Routes inbound frames to the receive endpoints of local tasks.
pub struct Dispatcher {
    routes: DashMap<TaskId, mpsc::Sender<Frame>>,
    early_aborts: DashMap<TaskId, (Frame, Instant)>,
    depth: usize,
}

impl Dispatcher {
    pub fn new(depth: usize) -> Self {
        Self {
            routes: DashMap::new(),
            early_aborts: DashMap::new(),
            depth: depth.max(1),
        }
    }

    pub fn register(&self, task: &TaskId) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let (tx, rx) = mpsc::channel(self.depth);
        match self.routes.entry(task.clone()) {
            Entry::Occupied(_) => {
                return Err(TransportError::AlreadyRegistered(task.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
            }
        }

        if let Some((_, (frame, _))) = self.early_aborts.remove(task) {
            tracing::debug!("Delivering stashed abort to task {}", task);
            let _ = tx.try_send(frame);
        }
        Ok(rx)
    }

    pub fn unregister(&self, task: &TaskId) {
        self.routes.remove(task);
    }

    pub fn is_registered(&self, task: &TaskId) -> bool {
        self.routes.contains_key(task)
    }

    pub async fn deliver(&self, frame: Frame) {
        let task = frame.task_id().clone();
        let route = self.routes.get(&task).map(|entry| entry.value().clone());

        match route {
            Some(tx) => {
                if tx.send(frame).await.is_err() {
                    tracing::debug!("Task {} closed its receive endpoint", task);
                }
            }
            None if frame.opcode() == Opcode::Abort => {
                self.early_aborts
                    .insert(task.clone(), (frame, Instant::now()));
                // The task may have registered in the meantime.
                if let Some(tx) = self.routes.get(&task).map(|entry| entry.value().clone())
                    && let Some((_, (frame, _))) = self.early_aborts.remove(&task)
                {
                    let _ = tx.send(frame).await;
                } else {
                    tracing::debug!("Stashed abort for task {} (not registered yet)", task);
                }
            }
            None => {
                tracing::debug!(
                    "Dropping {:?} frame for unknown task {}",
                    frame.opcode(),
                    task
                );
            }
        }
    }

    pub fn prune(&self, older_than: Duration) {
        let now = Instant::now();
        self.early_aborts
            .retain(|_, (_, stashed)| now.saturating_duration_since(*stashed) < older_than);
    }

    pub fn registered(&self) -> usize {
        self.routes.len()
    }

    pub fn stashed(&self) -> usize {
        self.early_aborts.len()
    }
}
