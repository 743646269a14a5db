//! # Frame Serialization
//!
//! Serializes frames into caller-provided buffers, with exact-size
//! accounting so callers can budget packet space before encoding.
//!
//! The encoder always emits an explicit length for STREAM frames; the
//! implicit rest-of-packet form is only produced through
//! `encode_stream_last`, when the caller declares the frame final in its
//! packet.

#![forbid(unsafe_code)]

use super::types::*;
use crate::config::WireVersion;
use crate::error::{Error, Result};
use crate::varint::VarIntCodec;
use bytes::{BufMut, BytesMut};

/// Frame encoder for one connection's negotiated wire version
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    version: WireVersion,
}

impl FrameEncoder {
    /// Create an encoder for the given wire version
    pub fn new(version: WireVersion) -> Self {
        Self { version }
    }

    /// Serialize a frame into `buf`, returning the bytes written
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();

        match frame {
            Frame::Padding => {
                buf.put_u8(FRAME_TYPE_PADDING);
            }

            Frame::Ping => {
                buf.put_u8(FRAME_TYPE_PING);
            }

            Frame::ResetStream(f) => {
                buf.put_u8(FRAME_TYPE_RESET_STREAM);
                Self::put_varint(f.stream_id.value(), buf)?;
                self.put_error_code(f.error_code, buf)?;
                Self::put_varint(f.final_size, buf)?;
            }

            Frame::StopSending(f) => {
                buf.put_u8(FRAME_TYPE_STOP_SENDING);
                Self::put_varint(f.stream_id.value(), buf)?;
                self.put_error_code(f.error_code, buf)?;
            }

            Frame::MaxData(f) => {
                buf.put_u8(FRAME_TYPE_MAX_DATA);
                Self::put_varint(f.max_offset, buf)?;
            }

            Frame::MaxStreamData(f) => {
                buf.put_u8(FRAME_TYPE_MAX_STREAM_DATA);
                Self::put_varint(f.stream_id.value(), buf)?;
                Self::put_varint(f.max_offset, buf)?;
            }

            Frame::DataBlocked(f) => {
                buf.put_u8(FRAME_TYPE_DATA_BLOCKED);
                Self::put_varint(f.limit, buf)?;
            }

            Frame::StreamDataBlocked(f) => {
                buf.put_u8(FRAME_TYPE_STREAM_DATA_BLOCKED);
                Self::put_varint(f.stream_id.value(), buf)?;
                Self::put_varint(f.limit, buf)?;
            }

            Frame::Stream(f) => {
                self.put_stream(f, true, buf)?;
            }
        }

        Ok(buf.len() - start)
    }

    /// Serialize a STREAM frame in the implicit-length form
    ///
    /// Only valid when the caller places this frame last in its packet;
    /// the data runs to the end of the payload on the wire.
    pub fn encode_stream_last(&self, frame: &StreamFrame, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();
        self.put_stream(frame, false, buf)?;
        Ok(buf.len() - start)
    }

    /// Exact encoded length of a frame
    ///
    /// Matches what `encode` writes byte for byte; callers use it to
    /// budget packet space before encoding.
    pub fn encoded_len(&self, frame: &Frame) -> usize {
        match frame {
            Frame::Padding | Frame::Ping => 1,

            Frame::ResetStream(f) => {
                1 + VarIntCodec::size(f.stream_id.value())
                    + self.error_code_len(f.error_code)
                    + VarIntCodec::size(f.final_size)
            }

            Frame::StopSending(f) => {
                1 + VarIntCodec::size(f.stream_id.value()) + self.error_code_len(f.error_code)
            }

            Frame::MaxData(f) => 1 + VarIntCodec::size(f.max_offset),

            Frame::MaxStreamData(f) => {
                1 + VarIntCodec::size(f.stream_id.value()) + VarIntCodec::size(f.max_offset)
            }

            Frame::DataBlocked(f) => 1 + VarIntCodec::size(f.limit),

            Frame::StreamDataBlocked(f) => {
                1 + VarIntCodec::size(f.stream_id.value()) + VarIntCodec::size(f.limit)
            }

            Frame::Stream(f) => {
                let mut len = 1 + VarIntCodec::size(f.stream_id.value());
                if f.offset != 0 {
                    len += VarIntCodec::size(f.offset);
                }
                len + VarIntCodec::size(f.data.len() as u64) + f.data.len()
            }
        }
    }

    /// Exact encoded length of the implicit-length STREAM form
    pub fn encoded_len_stream_last(&self, frame: &StreamFrame) -> usize {
        let mut len = 1 + VarIntCodec::size(frame.stream_id.value());
        if frame.offset != 0 {
            len += VarIntCodec::size(frame.offset);
        }
        len + frame.data.len()
    }

    fn put_stream(&self, f: &StreamFrame, explicit_len: bool, buf: &mut BytesMut) -> Result<()> {
        let mut frame_type = FRAME_TYPE_STREAM_BASE;
        if f.offset != 0 {
            frame_type |= STREAM_FRAME_BIT_OFF;
        }
        if explicit_len {
            frame_type |= STREAM_FRAME_BIT_LEN;
        }
        if f.fin {
            frame_type |= STREAM_FRAME_BIT_FIN;
        }

        buf.put_u8(frame_type);
        Self::put_varint(f.stream_id.value(), buf)?;
        if f.offset != 0 {
            Self::put_varint(f.offset, buf)?;
        }
        if explicit_len {
            Self::put_varint(f.data.len() as u64, buf)?;
        }
        buf.put_slice(&f.data);
        Ok(())
    }

    fn put_error_code(&self, code: u64, buf: &mut BytesMut) -> Result<()> {
        match self.version {
            WireVersion::Legacy => {
                // Refuse codes the 16-bit field cannot carry rather than
                // silently truncating
                let code = u16::try_from(code).map_err(|_| Error::MalformedFrame)?;
                buf.put_u16(code);
                Ok(())
            }
            WireVersion::Current => Self::put_varint(code, buf),
        }
    }

    fn error_code_len(&self, code: u64) -> usize {
        match self.version {
            WireVersion::Legacy => 2,
            WireVersion::Current => VarIntCodec::size(code),
        }
    }

    fn put_varint(value: u64, buf: &mut BytesMut) -> Result<()> {
        VarIntCodec::put(value, buf)
            .map(|_| ())
            .ok_or(Error::MalformedFrame)
    }
}
