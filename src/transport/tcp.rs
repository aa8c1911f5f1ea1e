use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::dispatcher::Dispatcher;
use super::frame::{Frame, FrameCodec};
use super::{Transport, TransportError};
use crate::batch::types::TaskId;
use crate::membership::types::{Node, NodeId};

type Connection = Arc<Mutex<FramedWrite<TcpStream, FrameCodec>>>;

/// Data mover over TCP: one outbound connection per peer, frames length-delimited.
pub struct TcpTransport {
    local: NodeId,
    dispatcher: Arc<Dispatcher>,
    conns: DashMap<NodeId, Connection>,
    max_frame_size: usize,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(
        local: NodeId,
        depth: usize,
        max_frame_size: usize,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            dispatcher: Arc::new(Dispatcher::new(depth)),
            conns: DashMap::new(),
            max_frame_size,
            connect_timeout,
        })
    }

    pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accepts peer connections and feeds their frames to the dispatcher.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!("Data mover: accepted connection from {}", peer);
                        let dispatcher = transport.dispatcher.clone();
                        let codec = FrameCodec::new(transport.max_frame_size);
                        tokio::spawn(async move {
                            let mut reader = FramedRead::new(stream, codec);
                            while let Some(next) = reader.next().await {
                                match next {
                                    Ok(frame) => dispatcher.deliver(frame).await,
                                    Err(e) => {
                                        tracing::warn!("Data mover: bad frame from {}: {}", peer, e);
                                        break;
                                    }
                                }
                            }
                            tracing::debug!("Data mover: connection from {} closed", peer);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Data mover: accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
    }

    async fn connection(&self, to: &Node) -> Result<Connection, TransportError> {
        if let Some(conn) = self.conns.get(&to.id).map(|entry| entry.value().clone()) {
            return Ok(conn);
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(to.data_addr))
            .await
            .map_err(|_| TransportError::Unreachable(to.id.clone(), "connect timed out".to_string()))?
            .map_err(|e| TransportError::Unreachable(to.id.clone(), e.to_string()))?;
        let _ = stream.set_nodelay(true);

        tracing::debug!("Data mover: connected to {} at {}", to.id, to.data_addr);
        let conn = Arc::new(Mutex::new(FramedWrite::new(
            stream,
            FrameCodec::new(self.max_frame_size),
        )));
        Ok(self
            .conns
            .entry(to.id.clone())
            .or_insert(conn)
            .value()
            .clone())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
        if to.id == self.local {
            self.dispatcher.deliver(frame).await;
            return Ok(());
        }

        let conn = self.connection(to).await?;
        let mut writer = conn.lock().await;
        if let Err(e) = writer.send(frame).await {
            drop(writer);
            self.conns.remove(&to.id);
            tracing::warn!("Data mover: send to {} failed: {}", to.id, e);
            return Err(TransportError::Send(to.id.clone(), e.to_string()));
        }
        Ok(())
    }

    fn prune(&self, older_than: Duration) {
        self.dispatcher.prune(older_than);
    }
}
