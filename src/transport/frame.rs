//! Frame Wire Format
//!
//! - header_len: u32 (big-endian)
//! - header: bincode-encoded `FrameHeader`
//! - payload_len: u32 (big-endian)
//! - payload: bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::batch::types::{TaskId, WaveId};
use crate::membership::types::NodeId;
use crate::store::types::ObjAttrs;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Opcode {
    Data,
    Done,
    Abort,
    ProgressReq,
    ProgressResp,
}

impl Opcode {
    pub fn is_control(&self) -> bool {
        !matches!(self, Opcode::Data)
    }
}

/// Inline per-object failure, carried instead of object bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EntryError {
    NotFound,
    Failed(String),
}

/// Describes the object (or part of it) a data frame carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryHeader {
    /// Position of the object in the request.
    pub index: u32,
    pub bucket: String,
    pub obj_name: String,
    pub attrs: Option<ObjAttrs>,
    pub error: Option<EntryError>,
    /// Parts of one object are numbered from zero and sent in order.
    pub part: u32,
    pub last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub task_id: TaskId,
    pub wave_id: WaveId,
    pub sender: NodeId,
    pub entry: Option<EntryHeader>,
    pub reason: Option<String>,
    pub progress: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    fn control(opcode: Opcode, task_id: &TaskId, wave_id: &WaveId, sender: &NodeId) -> Self {
        Self {
            header: FrameHeader {
                opcode,
                task_id: task_id.clone(),
                wave_id: wave_id.clone(),
                sender: sender.clone(),
                entry: None,
                reason: None,
                progress: 0,
            },
            payload: Bytes::new(),
        }
    }

    pub fn data(
        task_id: &TaskId,
        wave_id: &WaveId,
        sender: &NodeId,
        entry: EntryHeader,
        payload: Bytes,
    ) -> Self {
        let mut frame = Self::control(Opcode::Data, task_id, wave_id, sender);
        frame.header.entry = Some(entry);
        frame.payload = payload;
        frame
    }

    pub fn done(task_id: &TaskId, wave_id: &WaveId, sender: &NodeId, sent: u64) -> Self {
        let mut frame = Self::control(Opcode::Done, task_id, wave_id, sender);
        frame.header.progress = sent;
        frame
    }

    pub fn abort(task_id: &TaskId, wave_id: &WaveId, sender: &NodeId, reason: &str) -> Self {
        let mut frame = Self::control(Opcode::Abort, task_id, wave_id, sender);
        frame.header.reason = Some(reason.to_string());
        frame
    }

    pub fn progress_request(task_id: &TaskId, wave_id: &WaveId, sender: &NodeId) -> Self {
        Self::control(Opcode::ProgressReq, task_id, wave_id, sender)
    }

    pub fn progress_response(
        task_id: &TaskId,
        wave_id: &WaveId,
        sender: &NodeId,
        sent: u64,
    ) -> Self {
        let mut frame = Self::control(Opcode::ProgressResp, task_id, wave_id, sender);
        frame.header.progress = sent;
        frame
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    pub fn task_id(&self) -> &TaskId {
        &self.header.task_id
    }
}

/// Length-delimited codec for `Frame`, enforcing a maximum frame size.
#[derive(Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let header_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if 4 + header_len + 4 > self.max_frame_size {
            return Err(invalid_data(format!("frame header too large: {} bytes", header_len)));
        }
        if src.len() < 4 + header_len + 4 {
            return Ok(None);
        }

        let payload_len_offset = 4 + header_len;
        let payload_len = u32::from_be_bytes([
            src[payload_len_offset],
            src[payload_len_offset + 1],
            src[payload_len_offset + 2],
            src[payload_len_offset + 3],
        ]) as usize;

        let total_len = 4 + header_len + 4 + payload_len;
        if total_len > self.max_frame_size {
            return Err(invalid_data(format!(
                "frame too large: {} bytes (max: {} bytes)",
                total_len, self.max_frame_size
            )));
        }
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(total_len).freeze();
        frame_bytes.advance(4);
        let header_bytes = frame_bytes.split_to(header_len);
        let header: FrameHeader = bincode::deserialize(&header_bytes)
            .map_err(|e| invalid_data(format!("failed to decode frame header: {}", e)))?;
        frame_bytes.advance(4);

        Ok(Some(Frame {
            header,
            payload: frame_bytes,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header_bytes = bincode::serialize(&item.header)
            .map_err(|e| invalid_data(format!("failed to encode frame header: {}", e)))?;

        let total_len = 4 + header_bytes.len() + 4 + item.payload.len();
        if total_len > self.max_frame_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "frame too large: {} bytes (max: {} bytes)",
                    total_len, self.max_frame_size
                ),
            ));
        }

        dst.reserve(total_len);
        dst.put_u32(header_bytes.len() as u32);
        dst.put_slice(&header_bytes);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);

        Ok(())
    }
}
