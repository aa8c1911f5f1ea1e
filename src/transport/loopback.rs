use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::dispatcher::Dispatcher;
use super::frame::{Frame, Opcode};
use super::{Transport, TransportError};
use crate::batch::types::TaskId;
use crate::membership::types::{Node, NodeId};

/// In-process switch connecting the dispatchers of several nodes.
pub struct LoopbackHub {
    nodes: DashMap<NodeId, Arc<Dispatcher>>,
    /// Data frames a node may still send before its sends start failing.
    data_budget: DashMap<NodeId, u64>,
    data_frames: AtomicU64,
    control_frames: AtomicU64,
    depth: usize,
}

impl LoopbackHub {
    pub fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            data_budget: DashMap::new(),
            data_frames: AtomicU64::new(0),
            control_frames: AtomicU64::new(0),
            depth,
        })
    }

    pub fn transport(self: &Arc<Self>, local: NodeId) -> Arc<LoopbackTransport> {
        let dispatcher = Arc::new(Dispatcher::new(self.depth));
        self.nodes.insert(local.clone(), dispatcher.clone());
        Arc::new(LoopbackTransport {
            local,
            hub: self.clone(),
            dispatcher,
        })
    }

    /// After `n` more data frames, every data frame sent by `node` fails.
    /// Control frames keep flowing.
    pub fn fail_data_after(&self, node: &NodeId, n: u64) {
        self.data_budget.insert(node.clone(), n);
    }

    pub fn data_frames(&self) -> u64 {
        self.data_frames.load(Ordering::Acquire)
    }

    pub fn control_frames(&self) -> u64 {
        self.control_frames.load(Ordering::Acquire)
    }

    fn charge_data_frame(&self, from: &NodeId) -> Result<(), TransportError> {
        if let Some(mut budget) = self.data_budget.get_mut(from) {
            if *budget == 0 {
                return Err(TransportError::Send(
                    from.clone(),
                    "injected data-frame failure".to_string(),
                ));
            }
            *budget -= 1;
        }
        Ok(())
    }
}

pub struct LoopbackTransport {
    local: NodeId,
    hub: Arc<LoopbackHub>,
    dispatcher: Arc<Dispatcher>,
}

impl LoopbackTransport {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_id(&self) -> &NodeId {
        &self.local
    }

    fn register(&self, task: &TaskId) -> Result<mpsc::Receiver<Frame>, TransportError> {
        self.dispatcher.register(task)
    }

    fn unregister(&self, task: &TaskId) {
        self.dispatcher.unregister(task);
    }

    async fn send(&self, to: &Node, frame: Frame) -> Result<(), TransportError> {
        if frame.opcode() == Opcode::Data {
            self.hub.charge_data_frame(&self.local)?;
        }
        let target = self
            .hub
            .nodes
            .get(&to.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::Unreachable(to.id.clone(), "not attached to hub".to_string())
            })?;

        if frame.opcode().is_control() {
            self.hub.control_frames.fetch_add(1, Ordering::AcqRel);
        } else {
            self.hub.data_frames.fetch_add(1, Ordering::AcqRel);
        }
        target.deliver(frame).await;
        Ok(())
    }

    fn prune(&self, older_than: Duration) {
        self.dispatcher.prune(older_than);
    }
}
