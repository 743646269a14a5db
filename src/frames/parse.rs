//! # Frame Parsing
//!
//! Decodes frames from a packet payload. Parsing never reads past the
//! buffer and never panics on truncated input: every failure is a typed
//! error the dispatcher can classify.

#![forbid(unsafe_code)]

use super::types::*;
use crate::config::WireVersion;
use crate::error::{Error, Result};
use crate::types::StreamId;
use crate::varint::VarIntCodec;
use bytes::Bytes;

/// Frame decoder for one connection's negotiated wire version
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    version: WireVersion,
}

impl FrameDecoder {
    /// Create a decoder for the given wire version
    pub fn new(version: WireVersion) -> Self {
        Self { version }
    }

    /// Decode a single frame, returning it and the bytes consumed
    ///
    /// STREAM frames without the LEN bit take the rest of the buffer; the
    /// caller is expected to pass exactly one packet payload.
    pub fn decode(&self, buf: &[u8]) -> Result<(Frame, usize)> {
        let frame_type = *buf.first().ok_or(Error::MalformedFrame)?;

        // A run of PADDING bytes decodes as a single frame
        if frame_type == FRAME_TYPE_PADDING {
            let mut consumed = 1;
            while consumed < buf.len() && buf[consumed] == FRAME_TYPE_PADDING {
                consumed += 1;
            }
            return Ok((Frame::Padding, consumed));
        }

        let body = &buf[1..];

        let (frame, body_consumed) = match frame_type {
            FRAME_TYPE_PING => (Frame::Ping, 0),

            FRAME_TYPE_RESET_STREAM => {
                let (frame, len) = self.decode_reset_stream(body)?;
                (Frame::ResetStream(frame), len)
            }

            FRAME_TYPE_STOP_SENDING => {
                let (frame, len) = self.decode_stop_sending(body)?;
                (Frame::StopSending(frame), len)
            }

            FRAME_TYPE_MAX_DATA => {
                let (frame, len) = Self::decode_max_data(body)?;
                (Frame::MaxData(frame), len)
            }

            FRAME_TYPE_MAX_STREAM_DATA => {
                let (frame, len) = Self::decode_max_stream_data(body)?;
                (Frame::MaxStreamData(frame), len)
            }

            FRAME_TYPE_DATA_BLOCKED => {
                let (frame, len) = Self::decode_data_blocked(body)?;
                (Frame::DataBlocked(frame), len)
            }

            FRAME_TYPE_STREAM_DATA_BLOCKED => {
                let (frame, len) = Self::decode_stream_data_blocked(body)?;
                (Frame::StreamDataBlocked(frame), len)
            }

            t if (FRAME_TYPE_STREAM_BASE..FRAME_TYPE_STREAM_BASE + 8).contains(&t) => {
                let (frame, len) = Self::decode_stream(t, body)?;
                (Frame::Stream(frame), len)
            }

            t => return Err(Error::UnknownFrameType(t)),
        };

        Ok((frame, 1 + body_consumed))
    }

    /// Iterate over all frames in a packet payload
    pub fn iter<'a>(&'a self, payload: &'a [u8]) -> FrameIter<'a> {
        FrameIter {
            decoder: self,
            buf: payload,
            offset: 0,
        }
    }

    fn decode_stream(frame_type: u8, buf: &[u8]) -> Result<(StreamFrame, usize)> {
        let has_offset = (frame_type & STREAM_FRAME_BIT_OFF) != 0;
        let has_length = (frame_type & STREAM_FRAME_BIT_LEN) != 0;
        let fin = (frame_type & STREAM_FRAME_BIT_FIN) != 0;

        let mut offset = 0;

        let (stream_id, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        let stream_offset = if has_offset {
            let (off, consumed) =
                VarIntCodec::decode(&buf[offset..]).ok_or(Error::MalformedFrame)?;
            offset += consumed;
            off
        } else {
            0
        };

        let data = if has_length {
            let (length, consumed) =
                VarIntCodec::decode(&buf[offset..]).ok_or(Error::MalformedFrame)?;
            offset += consumed;

            if length > (buf.len() - offset) as u64 {
                return Err(Error::MalformedFrame);
            }

            let data = Bytes::copy_from_slice(&buf[offset..offset + length as usize]);
            offset += length as usize;
            data
        } else {
            // No length field: the data runs to the end of the packet
            let data = Bytes::copy_from_slice(&buf[offset..]);
            offset = buf.len();
            data
        };

        Ok((
            StreamFrame {
                stream_id: StreamId::new(stream_id),
                offset: stream_offset,
                data,
                fin,
            },
            offset,
        ))
    }

    fn decode_reset_stream(&self, buf: &[u8]) -> Result<(ResetStreamFrame, usize)> {
        let mut offset = 0;

        let (stream_id, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        let (error_code, consumed) = self.decode_error_code(&buf[offset..])?;
        offset += consumed;

        let (final_size, consumed) =
            VarIntCodec::decode(&buf[offset..]).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        Ok((
            ResetStreamFrame {
                stream_id: StreamId::new(stream_id),
                error_code,
                final_size,
            },
            offset,
        ))
    }

    fn decode_stop_sending(&self, buf: &[u8]) -> Result<(StopSendingFrame, usize)> {
        let mut offset = 0;

        let (stream_id, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        let (error_code, consumed) = self.decode_error_code(&buf[offset..])?;
        offset += consumed;

        Ok((
            StopSendingFrame {
                stream_id: StreamId::new(stream_id),
                error_code,
            },
            offset,
        ))
    }

    fn decode_max_data(buf: &[u8]) -> Result<(MaxDataFrame, usize)> {
        let (max_offset, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        Ok((MaxDataFrame { max_offset }, consumed))
    }

    fn decode_max_stream_data(buf: &[u8]) -> Result<(MaxStreamDataFrame, usize)> {
        let mut offset = 0;

        let (stream_id, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        let (max_offset, consumed) =
            VarIntCodec::decode(&buf[offset..]).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        Ok((
            MaxStreamDataFrame {
                stream_id: StreamId::new(stream_id),
                max_offset,
            },
            offset,
        ))
    }

    fn decode_data_blocked(buf: &[u8]) -> Result<(DataBlockedFrame, usize)> {
        let (limit, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        Ok((DataBlockedFrame { limit }, consumed))
    }

    fn decode_stream_data_blocked(buf: &[u8]) -> Result<(StreamDataBlockedFrame, usize)> {
        let mut offset = 0;

        let (stream_id, consumed) = VarIntCodec::decode(buf).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        let (limit, consumed) = VarIntCodec::decode(&buf[offset..]).ok_or(Error::MalformedFrame)?;
        offset += consumed;

        Ok((
            StreamDataBlockedFrame {
                stream_id: StreamId::new(stream_id),
                limit,
            },
            offset,
        ))
    }

    /// Error codes are 2-byte big-endian in the legacy wire version and
    /// VarInt in the current one.
    fn decode_error_code(&self, buf: &[u8]) -> Result<(u64, usize)> {
        match self.version {
            WireVersion::Legacy => {
                if buf.len() < 2 {
                    return Err(Error::MalformedFrame);
                }
                Ok((u16::from_be_bytes([buf[0], buf[1]]) as u64, 2))
            }
            WireVersion::Current => VarIntCodec::decode(buf).ok_or(Error::MalformedFrame),
        }
    }
}

/// Iterator over the frames of one packet payload
///
/// Stops at the first malformed frame, yielding the error once.
pub struct FrameIter<'a> {
    decoder: &'a FrameDecoder,
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }

        match self.decoder.decode(&self.buf[self.offset..]) {
            Ok((frame, consumed)) => {
                self.offset += consumed;
                Some(Ok(frame))
            }
            Err(e) => {
                // Frame boundary lost; stop iterating
                self.offset = self.buf.len();
                Some(Err(e))
            }
        }
    }
}
