use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::types::{BatchIn, BatchRequest, Role, TaskId, TaskScope, TaskState, WaveId};
use crate::archive::{self, ArchiveWriter, OutputFormat};
use crate::bucket::directory::BucketDirectory;
use crate::bucket::types::Bucket;
use crate::error::BatchError;
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::placement::object_owner;
use crate::store::ObjectStore;
use crate::store::types::{ObjAttrs, StoreError};
use crate::transport::{EntryError, EntryHeader, Frame, Opcode, Transport};

/// Depth of the channel between the archive writer and the client response body.
const OUTPUT_CHANNEL_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct TaskTimeouts {
    pub max_host_busy: Duration,
    pub send_file: Duration,
    pub min_assemble_wait: Duration,
    pub max_assemble_wait: Duration,
    pub progress_interval: Duration,
}

impl TaskTimeouts {
    /// How long Assemble waits for shards: the larger of the host-busy and send-file
    /// thresholds, clamped to `[min_assemble_wait, max_assemble_wait]`.
    pub fn assemble_wait(&self) -> Duration {
        self.send_file
            .max(self.max_host_busy)
            .max(self.min_assemble_wait)
            .min(self.max_assemble_wait)
    }
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            max_host_busy: Duration::from_secs(20),
            send_file: Duration::from_secs(30),
            min_assemble_wait: Duration::from_secs(10),
            max_assemble_wait: Duration::from_secs(60),
            progress_interval: Duration::from_secs(2),
        }
    }
}

/// Node-wide collaborators shared by every task.
pub struct TaskDeps {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn ObjectStore>,
    pub membership: Arc<MembershipService>,
    pub buckets: Arc<BucketDirectory>,
    pub timeouts: TaskTimeouts,
    /// Shards larger than this are sent as multiple ordered parts.
    pub chunk_size: usize,
}

/// A requested object, resolved against buckets and placement.
#[derive(Debug, Clone)]
struct Placed {
    index: u32,
    item: BatchIn,
    bucket: Result<Bucket, BatchError>,
    owner: Option<NodeId>,
}

impl Placed {
    fn bucket_name(&self, scope: &TaskScope) -> String {
        match &self.bucket {
            Ok(bucket) => bucket.name.clone(),
            Err(_) => self
                .item
                .bucket
                .clone()
                .or_else(|| scope.bucket.clone())
                .unwrap_or_default(),
        }
    }
}

/// Shard received from a contributor.
#[derive(Debug)]
enum Shard {
    Data { attrs: Option<ObjAttrs>, data: Bytes },
    Missing,
    Failed(String),
}

#[derive(Debug)]
struct PartialShard {
    next_part: u32,
    attrs: Option<ObjAttrs>,
    buf: BytesMut,
}

struct TaskInner {
    state: TaskState,
    wave: Option<WaveId>,
    request: Option<BatchRequest>,
    format: OutputFormat,
    participants: Vec<Node>,
    placed: Vec<Placed>,
    shards: HashMap<u32, Shard>,
    partial: HashMap<u32, PartialShard>,
    /// Contributors that have not signalled done (coordinator).
    pending: HashSet<NodeId>,
    /// Request indexes owned by contributors (coordinator).
    expected: HashSet<u32>,
    error: Option<BatchError>,
    /// Entries streamed to the coordinator (contributor).
    sent: u64,
    finished_at: Option<Instant>,
}

/// Output of `assemble`: the archive stream for the client response body.
pub struct AssembledStream {
    pub format: OutputFormat,
    pub body: mpsc::Receiver<Result<Bytes, io::Error>>,
}

/// One node's instance of a coordinated get-batch task.
///
/// The coordinator prepares to receive (`prep_rx`), waits for every contributor and
/// assembles the archive (`assemble`). Contributors stream the requested objects they
/// own (`send`). Any fatal error aborts the task on every participant.
pub struct BatchTask {
    id: TaskId,
    role: Role,
    scope: TaskScope,
    deps: Arc<TaskDeps>,
    inner: Mutex<TaskInner>,
    changed: watch::Sender<u64>,
    cancel: CancellationToken,
    created: Instant,
    /// Nanoseconds since `created`.
    last_activity: AtomicU64,
}

impl BatchTask {
    pub fn new(id: TaskId, role: Role, scope: TaskScope, deps: Arc<TaskDeps>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            id,
            role,
            scope,
            deps,
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                wave: None,
                request: None,
                format: OutputFormat::default(),
                participants: Vec::new(),
                placed: Vec::new(),
                shards: HashMap::new(),
                partial: HashMap::new(),
                pending: HashSet::new(),
                expected: HashSet::new(),
                error: None,
                sent: 0,
                finished_at: None,
            }),
            changed,
            cancel: CancellationToken::new(),
            created: Instant::now(),
            last_activity: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn wave(&self) -> Option<WaveId> {
        self.inner.lock().wave.clone()
    }

    pub fn error(&self) -> Option<BatchError> {
        self.inner.lock().error.clone()
    }

    /// Error returned to anyone who reaches this task after it finished.
    pub fn terminal_error(&self) -> BatchError {
        let inner = self.inner.lock();
        self.terminal_error_locked(&inner)
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.inner.lock().finished_at
    }

    /// Entries streamed so far by a contributor.
    pub fn sent(&self) -> u64 {
        self.inner.lock().sent
    }

    /// Contributors the coordinator is still waiting for.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.created + Duration::from_nanos(self.last_activity.load(Ordering::Acquire))
    }

    fn touch(&self) {
        let elapsed = self.created.elapsed().as_nanos() as u64;
        self.last_activity.fetch_max(elapsed, Ordering::AcqRel);
    }

    fn notify(&self) {
        self.changed.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn local_id(&self) -> &NodeId {
        self.deps.membership.local_id()
    }

    fn check_node_count(&self, nat: usize) -> Result<(), BatchError> {
        let live = self.deps.membership.count_active();
        if live != nat {
            return Err(BatchError::NodeCountMismatch {
                expected: nat,
                actual: live,
            });
        }
        Ok(())
    }

    fn place(&self, request: &BatchRequest, participants: &[Node]) -> Vec<Placed> {
        request
            .input
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let bucket = match item.bucket.as_deref().or(self.scope.bucket.as_deref()) {
                    Some(name) => self.deps.buckets.lookup(name, item.provider.as_deref()),
                    None => Err(BatchError::InvalidRequest(format!(
                        "{}: no bucket given",
                        item.obj_name
                    ))),
                };
                let owner = bucket.as_ref().ok().and_then(|b| {
                    object_owner(participants, &b.object_uname(&item.obj_name)).map(|n| n.id)
                });
                Placed {
                    index: i as u32,
                    item: item.clone(),
                    bucket,
                    owner,
                }
            })
            .collect()
    }

    // ============================================================
    // COORDINATOR: PREPARE TO RECEIVE
    // ============================================================

    /// Validates the node count, snapshots the participants and, when other nodes take
    /// part, opens the receive endpoint. Repeating the call for the same wave is a no-op.
    pub fn prep_rx(
        self: &Arc<Self>,
        request: BatchRequest,
        wave: WaveId,
        nat: usize,
    ) -> Result<(), BatchError> {
        if self.role != Role::Coordinator {
            return Err(BatchError::Internal(format!(
                "task {}: prep_rx on a contributor",
                self.id
            )));
        }
        self.check_node_count(nat)?;
        let format = OutputFormat::normalize(request.output_format.as_deref())?;

        let participants = self.deps.membership.get_active_members();
        let receiving = participants.len() > 1;
        let local = self.local_id().clone();
        let placed = self.place(&request, &participants);

        {
            let mut inner = self.inner.lock();
            match inner.state {
                TaskState::Created => {}
                state if state.is_terminal() => return Err(self.terminal_error_locked(&inner)),
                _ => {
                    return match &inner.wave {
                        Some(w) if *w == wave => Ok(()),
                        other => Err(BatchError::WaveMismatch {
                            task: self.id.clone(),
                            expected: other.as_ref().map(|w| w.to_string()).unwrap_or_default(),
                            got: wave.to_string(),
                        }),
                    };
                }
            }

            inner.expected = placed
                .iter()
                .filter(|p| p.owner.as_ref().is_some_and(|owner| *owner != local))
                .map(|p| p.index)
                .collect();
            inner.pending = participants
                .iter()
                .filter(|n| n.id != local)
                .map(|n| n.id.clone())
                .collect();
            inner.wave = Some(wave);
            inner.request = Some(request);
            inner.format = format;
            inner.participants = participants;
            inner.placed = placed;
            inner.state = if receiving {
                TaskState::Receiving
            } else {
                TaskState::AllShardsIn
            };
        }

        if receiving {
            let rx = match self.deps.transport.register(&self.id) {
                Ok(rx) => rx,
                Err(e) => {
                    let err = BatchError::from(e);
                    self.abort(err.clone());
                    return Err(err);
                }
            };
            let task = self.clone();
            tokio::spawn(async move { task.run_rx(rx).await });
        }

        self.touch();
        self.notify();
        tracing::debug!(
            "Task {}: prepared to receive ({} contributors, {} remote entries)",
            self.id,
            self.pending(),
            self.inner.lock().expected.len()
        );
        Ok(())
    }

    fn terminal_error_locked(&self, inner: &TaskInner) -> BatchError {
        inner
            .error
            .clone()
            .unwrap_or_else(|| BatchError::TaskFinished(self.id.clone()))
    }

    // ============================================================
    // CONTRIBUTOR: SEND
    // ============================================================

    /// Starts streaming the locally owned requested objects to `coordinator`.
    ///
    /// A second call for the same wave (duplicate control message) returns without
    /// opening another session or resending anything.
    pub fn send(
        self: &Arc<Self>,
        request: BatchRequest,
        coordinator: Node,
        wave: WaveId,
        nat: usize,
    ) -> Result<(), BatchError> {
        if self.role != Role::Contributor {
            return Err(BatchError::Internal(format!(
                "task {}: send on the coordinator",
                self.id
            )));
        }
        self.check_node_count(nat)?;

        let participants = self.deps.membership.get_active_members();
        let placed = self.place(&request, &participants);
        let local = self.local_id().clone();

        let owned: Vec<Placed> = {
            let mut inner = self.inner.lock();
            match inner.state {
                TaskState::Created => {}
                state if state.is_terminal() && inner.error.is_some() => {
                    return Err(self.terminal_error_locked(&inner));
                }
                _ => {
                    return match &inner.wave {
                        Some(w) if *w == wave => {
                            tracing::debug!("Task {}: duplicate send for wave {}", self.id, wave);
                            Ok(())
                        }
                        other => Err(BatchError::WaveMismatch {
                            task: self.id.clone(),
                            expected: other.as_ref().map(|w| w.to_string()).unwrap_or_default(),
                            got: wave.to_string(),
                        }),
                    };
                }
            }

            let owned = placed
                .iter()
                .filter(|p| p.owner.as_ref() == Some(&local))
                .cloned()
                .collect();
            inner.state = TaskState::Sending;
            inner.wave = Some(wave.clone());
            inner.request = Some(request);
            inner.participants = participants;
            inner.placed = placed;
            owned
        };

        let mut rx = match self.deps.transport.register(&self.id) {
            Ok(rx) => rx,
            Err(e) => {
                let err = BatchError::from(e);
                self.abort(err.clone());
                return Err(err);
            }
        };

        // An abort may have been stashed before this node heard of the task.
        if let Ok(frame) = rx.try_recv() {
            if frame.opcode() == Opcode::Abort {
                let err = self.peer_abort_error(&frame);
                self.abort(err.clone());
                return Err(err);
            }
            self.on_contributor_frame(frame);
        }

        let task = self.clone();
        tokio::spawn(async move { task.run_rx(rx).await });

        let task = self.clone();
        tokio::spawn(async move {
            match task.stream_owned(&coordinator, &wave, owned).await {
                Ok(sent) => task.close_sent(sent),
                Err(err) if task.cancel.is_cancelled() => {
                    tracing::debug!("Task {}: sending stopped: {}", task.id, err);
                }
                Err(err) => {
                    tracing::warn!("Task {}: send to {} failed: {}", task.id, coordinator, err);
                    task.bcast_abort(&err).await;
                    task.abort(err);
                }
            }
        });

        self.touch();
        Ok(())
    }

    async fn stream_owned(
        &self,
        coordinator: &Node,
        wave: &WaveId,
        owned: Vec<Placed>,
    ) -> Result<u64, BatchError> {
        let local = self.local_id().clone();
        let chunk_size = self.deps.chunk_size.max(1);
        let mut sent = 0u64;

        for placed in owned {
            let bucket = match &placed.bucket {
                Ok(bucket) => bucket,
                Err(_) => continue,
            };
            let name = &placed.item.obj_name;
            let mut entry = EntryHeader {
                index: placed.index,
                bucket: bucket.name.clone(),
                obj_name: name.clone(),
                attrs: None,
                error: None,
                part: 0,
                last: true,
            };

            match self.deps.store.get(bucket, name).await {
                Ok(object) => {
                    let data = object.data;
                    let parts = data.len().div_ceil(chunk_size).max(1);
                    for part in 0..parts {
                        self.ensure_running()?;
                        let start = part * chunk_size;
                        let end = (start + chunk_size).min(data.len());
                        entry.part = part as u32;
                        entry.last = part + 1 == parts;
                        entry.attrs = (part == 0).then(|| object.attrs.clone());
                        let frame = Frame::data(
                            &self.id,
                            wave,
                            &local,
                            entry.clone(),
                            data.slice(start..end),
                        );
                        self.deps.transport.send(coordinator, frame).await?;
                        self.touch();
                    }
                }
                Err(err) => {
                    self.ensure_running()?;
                    entry.error = Some(match err {
                        StoreError::NotFound { .. } => EntryError::NotFound,
                        other => EntryError::Failed(other.to_string()),
                    });
                    let frame = Frame::data(&self.id, wave, &local, entry, Bytes::new());
                    self.deps.transport.send(coordinator, frame).await?;
                }
            }

            sent += 1;
            self.inner.lock().sent = sent;
        }

        self.ensure_running()?;
        self.deps
            .transport
            .send(coordinator, Frame::done(&self.id, wave, &local, sent))
            .await?;
        Ok(sent)
    }

    fn ensure_running(&self) -> Result<(), BatchError> {
        if self.cancel.is_cancelled() {
            return Err(self.terminal_error());
        }
        Ok(())
    }

    fn close_sent(&self, sent: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Sending {
                return;
            }
            inner.state = TaskState::Sent;
            tracing::debug!("Task {}: sent {} entries", self.id, sent);
            inner.state = TaskState::Closed;
            inner.finished_at = Some(Instant::now());
        }
        self.deps.transport.unregister(&self.id);
        self.cancel.cancel();
        self.notify();
    }

    // ============================================================
    // RECEIVE LOOP
    // ============================================================

    async fn run_rx(self: Arc<Self>, mut rx: mpsc::Receiver<Frame>) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if frame.opcode() == Opcode::Abort {
                let err = self.peer_abort_error(&frame);
                tracing::info!("Task {}: {}", self.id, err);
                self.abort(err);
                break;
            }

            match self.role {
                Role::Coordinator => {
                    if let Err(err) = self.on_coordinator_frame(frame) {
                        tracing::error!("Task {}: {}", self.id, err);
                        self.bcast_abort(&err).await;
                        self.abort(err);
                        break;
                    }
                }
                Role::Contributor => self.on_contributor_frame(frame),
            }
        }
    }

    fn peer_abort_error(&self, frame: &Frame) -> BatchError {
        BatchError::Aborted {
            task: self.id.clone(),
            reason: format!(
                "aborted by {}: {}",
                frame.header.sender,
                frame.header.reason.as_deref().unwrap_or("unknown reason")
            ),
        }
    }

    fn on_coordinator_frame(&self, frame: Frame) -> Result<(), BatchError> {
        let sender = frame.header.sender.clone();
        let mut inner = self.inner.lock();

        if inner.wave.as_ref() != Some(&frame.header.wave_id) {
            tracing::debug!(
                "Task {}: dropping {:?} frame from {} for wave {}",
                self.id,
                frame.opcode(),
                sender,
                frame.header.wave_id
            );
            return Ok(());
        }
        if inner.state != TaskState::Receiving {
            return Ok(());
        }

        match frame.opcode() {
            Opcode::Data => {
                let entry = frame.header.entry.clone().ok_or_else(|| {
                    BatchError::Internal(format!("data frame from {} without entry", sender))
                })?;
                self.on_data(&mut inner, &sender, entry, frame.payload)?;
            }
            Opcode::Done => {
                if inner.pending.remove(&sender) {
                    tracing::debug!(
                        "Task {}: {} done after {} entries ({} pending)",
                        self.id,
                        sender,
                        frame.header.progress,
                        inner.pending.len()
                    );
                }
                if inner.pending.is_empty() {
                    if let Some(missing) = inner.expected.iter().find(|i| !inner.shards.contains_key(i)) {
                        return Err(BatchError::Internal(format!(
                            "all contributors done, entry {} never arrived",
                            missing
                        )));
                    }
                    inner.state = TaskState::AllShardsIn;
                }
            }
            Opcode::ProgressResp => {
                tracing::debug!(
                    "Task {}: {} has sent {} entries",
                    self.id,
                    sender,
                    frame.header.progress
                );
            }
            Opcode::ProgressReq | Opcode::Abort => {}
        }

        drop(inner);
        self.touch();
        self.notify();
        Ok(())
    }

    fn on_data(
        &self,
        inner: &mut TaskInner,
        sender: &NodeId,
        entry: EntryHeader,
        payload: Bytes,
    ) -> Result<(), BatchError> {
        let index = entry.index;
        if !inner.expected.contains(&index) {
            return Err(BatchError::Internal(format!(
                "unexpected entry {} ({}/{}) from {}",
                index, entry.bucket, entry.obj_name, sender
            )));
        }
        if inner.shards.contains_key(&index) {
            tracing::debug!("Task {}: duplicate entry {} from {}", self.id, index, sender);
            return Ok(());
        }

        if let Some(error) = entry.error {
            let shard = match error {
                EntryError::NotFound => Shard::Missing,
                EntryError::Failed(reason) => Shard::Failed(reason),
            };
            inner.shards.insert(index, shard);
            return Ok(());
        }

        let partial = inner.partial.entry(index).or_insert_with(|| PartialShard {
            next_part: 0,
            attrs: None,
            buf: BytesMut::new(),
        });
        if entry.part != partial.next_part {
            return Err(BatchError::Internal(format!(
                "entry {} from {}: part {} arrived, expected part {}",
                index, sender, entry.part, partial.next_part
            )));
        }
        if entry.part == 0 {
            partial.attrs = entry.attrs;
        }
        partial.next_part += 1;

        if entry.last && partial.next_part == 1 {
            // Single-part shard: keep the payload as is.
            let attrs = partial.attrs.take();
            inner.partial.remove(&index);
            inner.shards.insert(index, Shard::Data { attrs, data: payload });
        } else {
            partial.buf.extend_from_slice(&payload);
            if entry.last
                && let Some(done) = inner.partial.remove(&index)
            {
                inner.shards.insert(
                    index,
                    Shard::Data {
                        attrs: done.attrs,
                        data: done.buf.freeze(),
                    },
                );
            }
        }
        Ok(())
    }

    fn on_contributor_frame(self: &Arc<Self>, frame: Frame) {
        match frame.opcode() {
            Opcode::ProgressReq => {
                let Some(to) = self.deps.membership.get_member(&frame.header.sender) else {
                    return;
                };
                let (sent, wave) = {
                    let inner = self.inner.lock();
                    (inner.sent, inner.wave.clone().unwrap_or_default())
                };
                let reply = Frame::progress_response(&self.id, &wave, self.local_id(), sent);
                let task = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = task.deps.transport.send(&to, reply).await {
                        tracing::debug!("Task {}: progress response failed: {}", task.id, e);
                    }
                });
            }
            other => {
                tracing::debug!("Task {}: contributor ignores {:?} frame", self.id, other);
            }
        }
    }

    // ============================================================
    // COORDINATOR: WAIT AND ASSEMBLE
    // ============================================================

    /// Blocks until every contributor has signalled done, the task is aborted, or the
    /// assemble wait elapses. Pending contributors are asked for progress meanwhile.
    pub async fn wait_ready(&self) -> Result<(), BatchError> {
        let waited = self.deps.timeouts.assemble_wait();
        let deadline = tokio::time::Instant::now() + waited;
        let mut changed = self.changed.subscribe();
        let mut ticker = tokio::time::interval(self.deps.timeouts.progress_interval);
        ticker.tick().await;

        loop {
            {
                let inner = self.inner.lock();
                match inner.state {
                    TaskState::AllShardsIn => return Ok(()),
                    TaskState::Receiving => {}
                    TaskState::Assembling => return Err(self.assembly_in_progress()),
                    state if state.is_terminal() => return Err(self.terminal_error_locked(&inner)),
                    state => {
                        return Err(BatchError::Internal(format!(
                            "task {} cannot assemble in state {:?}",
                            self.id, state
                        )));
                    }
                }
            }

            tokio::select! {
                res = changed.changed() => {
                    if res.is_err() {
                        return Err(BatchError::Internal(format!("task {}: signal channel closed", self.id)));
                    }
                }
                _ = self.cancel.cancelled() => {
                    return Err(self.terminal_error());
                }
                _ = ticker.tick() => self.request_progress().await,
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(BatchError::Timeout { task: self.id.clone(), waited });
                }
            }
        }
    }

    async fn request_progress(&self) {
        let (targets, wave) = {
            let inner = self.inner.lock();
            let targets: Vec<Node> = inner
                .participants
                .iter()
                .filter(|n| inner.pending.contains(&n.id))
                .cloned()
                .collect();
            (targets, inner.wave.clone().unwrap_or_default())
        };
        for node in targets {
            let frame = Frame::progress_request(&self.id, &wave, self.local_id());
            if let Err(e) = self.deps.transport.send(&node, frame).await {
                tracing::warn!("Task {}: progress request to {} failed: {}", self.id, node, e);
            }
        }
    }

    fn assembly_in_progress(&self) -> BatchError {
        BatchError::ScopeMismatch {
            task: self.id.clone(),
            reason: "assembly already in progress".to_string(),
        }
    }

    /// Waits for the shards and starts streaming the archive.
    ///
    /// A request that does not match the prepared one (wave, input, or a second
    /// concurrent data request) is rejected without touching the task. Other errors
    /// before streaming starts are returned and the caller aborts on the fatal ones.
    /// Once streaming, a client that goes away is a benign termination.
    pub async fn assemble(
        self: &Arc<Self>,
        request: &BatchRequest,
        wave: &WaveId,
    ) -> Result<AssembledStream, BatchError> {
        if self.role != Role::Coordinator {
            return Err(BatchError::TaskNotActive(self.id.clone()));
        }
        {
            let inner = self.inner.lock();
            if inner.state.is_terminal() {
                return Err(self.terminal_error_locked(&inner));
            }
            match &inner.wave {
                Some(w) if w == wave => {}
                other => {
                    return Err(BatchError::WaveMismatch {
                        task: self.id.clone(),
                        expected: other.as_ref().map(|w| w.to_string()).unwrap_or_default(),
                        got: wave.to_string(),
                    });
                }
            }
            if inner.request.as_ref().map(|r| r.input.as_slice()) != Some(request.input.as_slice()) {
                return Err(BatchError::ScopeMismatch {
                    task: self.id.clone(),
                    reason: "request differs from the prepared one".to_string(),
                });
            }
            if matches!(inner.state, TaskState::Assembling) {
                return Err(self.assembly_in_progress());
            }
        }

        self.wait_ready().await?;

        let (format, only_obj_name, placed, shards) = {
            let mut inner = self.inner.lock();
            match inner.state {
                TaskState::AllShardsIn => {}
                TaskState::Assembling => return Err(self.assembly_in_progress()),
                _ => return Err(self.terminal_error_locked(&inner)),
            }
            inner.state = TaskState::Assembling;
            (
                inner.format,
                inner.request.as_ref().is_some_and(|r| r.only_obj_name),
                inner.placed.clone(),
                std::mem::take(&mut inner.shards),
            )
        };
        self.touch();

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let task = self.clone();
        tokio::spawn(async move {
            match task.write_archive(format, only_obj_name, placed, shards, &tx).await {
                Ok(entries) => task.finish_assembled(entries),
                Err(err) if err.is_benign() => {
                    tracing::debug!("Task {}: {}", task.id, err);
                    task.bcast_abort(&err).await;
                    task.abort(err);
                }
                Err(err) => {
                    tracing::error!("Task {}: assembly failed: {}", task.id, err);
                    let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
                    task.bcast_abort(&err).await;
                    task.abort(err);
                }
            }
        });

        Ok(AssembledStream { format, body: rx })
    }

    async fn write_archive(
        &self,
        format: OutputFormat,
        only_obj_name: bool,
        placed: Vec<Placed>,
        mut shards: HashMap<u32, Shard>,
        tx: &mpsc::Sender<Result<Bytes, io::Error>>,
    ) -> Result<usize, BatchError> {
        let mut writer = ArchiveWriter::new(format);
        let local = self.local_id().clone();

        for p in placed {
            if self.cancel.is_cancelled() {
                return Err(self.terminal_error());
            }
            let bucket_name = p.bucket_name(&self.scope);
            let name = &p.item.obj_name;

            let shard = match (&p.bucket, &p.owner) {
                (Err(err), _) => Shard::Failed(err.to_string()),
                (Ok(_), Some(owner)) if *owner != local => shards.remove(&p.index).ok_or_else(|| {
                    BatchError::Internal(format!("entry {} missing at assembly", p.index))
                })?,
                (Ok(bucket), _) => match self.deps.store.get(bucket, name).await {
                    Ok(object) => Shard::Data {
                        attrs: Some(object.attrs),
                        data: object.data,
                    },
                    Err(StoreError::NotFound { .. }) => Shard::Missing,
                    Err(other) => Shard::Failed(other.to_string()),
                },
            };

            let appended = match shard {
                Shard::Data { attrs, data } => writer.append(
                    &archive::entry_name(&bucket_name, name, only_obj_name),
                    attrs.as_ref(),
                    &data,
                ),
                Shard::Missing => {
                    writer.append(&archive::missing_entry_name(&bucket_name, name), None, &[])
                }
                Shard::Failed(reason) => writer.append(
                    &archive::failed_entry_name(&bucket_name, name),
                    None,
                    reason.as_bytes(),
                ),
            };
            let chunk = appended.map_err(|e| BatchError::Internal(format!("archive: {}", e)))?;
            self.emit(tx, chunk).await?;
        }

        let entries = writer.entries();
        let tail = writer
            .finish()
            .map_err(|e| BatchError::Internal(format!("archive: {}", e)))?;
        self.emit(tx, tail).await?;
        Ok(entries)
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<Result<Bytes, io::Error>>,
        chunk: Bytes,
    ) -> Result<(), BatchError> {
        if chunk.is_empty() {
            return Ok(());
        }
        tx.send(Ok(chunk))
            .await
            .map_err(|_| BatchError::Benign(format!("task {}: client connection closed", self.id)))?;
        self.touch();
        Ok(())
    }

    fn finish_assembled(&self, entries: usize) {
        {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Assembling {
                return;
            }
            inner.state = TaskState::Done;
            inner.finished_at = Some(Instant::now());
        }
        tracing::info!("Task {}: assembled {} entries", self.id, entries);
        self.deps.transport.unregister(&self.id);
        self.cancel.cancel();
        self.notify();
    }

    // ============================================================
    // ABORT
    // ============================================================

    /// Terminates the task locally: releases the receive endpoint, discards partial
    /// state and wakes every waiter. Returns false if the task had already finished.
    pub fn abort(&self, err: BatchError) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = match err {
                BatchError::Timeout { .. } => TaskState::TimedOut,
                _ => TaskState::Aborted,
            };
            inner.shards.clear();
            inner.partial.clear();
            inner.pending.clear();
            inner.finished_at = Some(Instant::now());
            if !err.is_benign() {
                inner.error = Some(match err.clone() {
                    e @ (BatchError::Aborted { .. } | BatchError::Timeout { .. }) => e,
                    other => BatchError::Aborted {
                        task: self.id.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        if err.is_benign() {
            tracing::debug!("Task {} closed: {}", self.id, err);
        } else {
            tracing::warn!("Task {} aborted: {}", self.id, err);
        }
        self.deps.transport.unregister(&self.id);
        self.cancel.cancel();
        self.notify();
        true
    }

    /// Sends an abort to every other participant of the task.
    pub async fn bcast_abort(&self, err: &BatchError) {
        let (participants, wave) = {
            let inner = self.inner.lock();
            let participants = if inner.participants.is_empty() {
                self.deps.membership.get_active_members()
            } else {
                inner.participants.clone()
            };
            (participants, inner.wave.clone().unwrap_or_default())
        };
        let local = self.local_id().clone();
        let reason = err.to_string();

        for node in participants.iter().filter(|n| n.id != local) {
            let frame = Frame::abort(&self.id, &wave, &local, &reason);
            if let Err(e) = self.deps.transport.send(node, frame).await {
                tracing::warn!("Task {}: abort to {} not delivered: {}", self.id, node, e);
            }
        }
    }
}
