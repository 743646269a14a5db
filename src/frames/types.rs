//! # Frame Types
//!
//! Every frame the stream layer speaks, as a discriminated union that
//! round-trips byte-exact through the codec. Frame payloads are owned
//! `Bytes` so a decoded frame can outlive the packet it arrived in.

#![forbid(unsafe_code)]

use crate::types::StreamId;
use bytes::Bytes;

/// Frame type registry
///
/// The leading type byte selects the decode routine. Every accepted byte
/// is enumerated here; anything else is an unknown frame type. STREAM
/// needs a full 8-entry block for its flag bits, and with STOP_SENDING
/// at 0x0c and the window frames at 0x10/0x11 the first free block is
/// 0x18-0x1f.
pub const FRAME_TYPE_PADDING: u8 = 0x00;
pub const FRAME_TYPE_PING: u8 = 0x01;
pub const FRAME_TYPE_RESET_STREAM: u8 = 0x04;
pub const FRAME_TYPE_STOP_SENDING: u8 = 0x0c;
pub const FRAME_TYPE_MAX_DATA: u8 = 0x10;
pub const FRAME_TYPE_MAX_STREAM_DATA: u8 = 0x11;
pub const FRAME_TYPE_DATA_BLOCKED: u8 = 0x14;
pub const FRAME_TYPE_STREAM_DATA_BLOCKED: u8 = 0x15;
pub const FRAME_TYPE_STREAM_BASE: u8 = 0x18; // 0x18-0x1f

/// STREAM frame flag bits, carried in the low 3 bits of the type byte
pub const STREAM_FRAME_BIT_FIN: u8 = 0x01;
pub const STREAM_FRAME_BIT_LEN: u8 = 0x02;
pub const STREAM_FRAME_BIT_OFF: u8 = 0x04;

/// STREAM Frame
///
/// Carries application data on a stream. Offset defaults to 0 when the
/// OFF bit is absent; a missing LEN bit means the data runs to the end
/// of the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Stream ID
    pub stream_id: StreamId,

    /// Byte offset of `data` within the stream
    pub offset: u64,

    /// Stream data
    pub data: Bytes,

    /// Final frame of the stream; fixes the final size at offset + len
    pub fin: bool,
}

impl StreamFrame {
    /// Exclusive end offset of the carried data
    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// RESET_STREAM Frame
///
/// Abruptly terminates the sender's side of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStreamFrame {
    /// Stream ID being reset
    pub stream_id: StreamId,

    /// Application-opaque error code, uninterpreted by this layer
    pub error_code: u64,

    /// Final size of the stream in bytes
    pub final_size: u64,
}

/// STOP_SENDING Frame
///
/// Requests that the peer abandon sending on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSendingFrame {
    /// Stream ID to stop sending on
    pub stream_id: StreamId,

    /// Application-opaque error code
    pub error_code: u64,
}

/// MAX_DATA Frame
///
/// Raises the connection-level limit on total bytes the peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDataFrame {
    /// Maximum cumulative offset, in bytes
    pub max_offset: u64,
}

/// MAX_STREAM_DATA Frame
///
/// Raises the stream-level limit on bytes the peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    /// Stream ID
    pub stream_id: StreamId,

    /// Maximum offset on this stream, in bytes
    pub max_offset: u64,
}

/// DATA_BLOCKED Frame
///
/// Reports that sending stalled at the connection-level limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockedFrame {
    /// Connection limit at which sending stalled
    pub limit: u64,
}

/// STREAM_DATA_BLOCKED Frame
///
/// Reports that sending on one stream stalled at its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDataBlockedFrame {
    /// Stream ID
    pub stream_id: StreamId,

    /// Stream limit at which sending stalled
    pub limit: u64,
}

/// Unified frame type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PADDING frame (0x00); a run of padding decodes as one frame
    Padding,

    /// PING frame (0x01)
    Ping,

    /// RESET_STREAM frame (0x04)
    ResetStream(ResetStreamFrame),

    /// STOP_SENDING frame (0x0c)
    StopSending(StopSendingFrame),

    /// MAX_DATA frame (0x10)
    MaxData(MaxDataFrame),

    /// MAX_STREAM_DATA frame (0x11)
    MaxStreamData(MaxStreamDataFrame),

    /// DATA_BLOCKED frame (0x14)
    DataBlocked(DataBlockedFrame),

    /// STREAM_DATA_BLOCKED frame (0x15)
    StreamDataBlocked(StreamDataBlockedFrame),

    /// STREAM frame (0x18-0x1f)
    Stream(StreamFrame),
}

impl Frame {
    /// Stream ID this frame is routed by, if any
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::Stream(f) => Some(f.stream_id),
            Frame::ResetStream(f) => Some(f.stream_id),
            Frame::StopSending(f) => Some(f.stream_id),
            Frame::MaxStreamData(f) => Some(f.stream_id),
            Frame::StreamDataBlocked(f) => Some(f.stream_id),
            Frame::Padding | Frame::Ping | Frame::MaxData(_) | Frame::DataBlocked(_) => None,
        }
    }
}
