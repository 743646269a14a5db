//! # Stream Send Queue
//!
//! Ordered outgoing bytes awaiting framing, plus the sent-cursor.
//! Acknowledgment tracking is an external collaborator's concern, so
//! framed bytes are not retained here.

#![forbid(unsafe_code)]

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;

/// Send queue for one stream's send direction
#[derive(Debug, Default)]
pub struct SendQueue {
    /// Written chunks not yet cut into frames
    queued: VecDeque<Bytes>,

    /// Total queued bytes
    queued_len: usize,

    /// Stream offset of the first queued byte; equals bytes already framed
    offset: u64,

    /// Final size, once the stream's send side closed
    final_size: Option<u64>,
}

impl SendQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append written bytes
    pub fn push(&mut self, data: Bytes) {
        self.queued_len += data.len();
        self.queued.push_back(data);
    }

    /// Cut up to `max` bytes off the front as one contiguous chunk
    ///
    /// Returns the chunk's stream offset and data, advancing the
    /// sent-cursor. Single-chunk cuts are zero-copy.
    pub fn take(&mut self, max: usize) -> Option<(u64, Bytes)> {
        if self.queued_len == 0 || max == 0 {
            return None;
        }

        let offset = self.offset;
        let take = self.queued_len.min(max);

        let first = self.queued.front_mut()?;
        let data = if first.len() >= take {
            let data = first.split_to(take);
            if first.is_empty() {
                self.queued.pop_front();
            }
            data
        } else {
            let mut data = BytesMut::with_capacity(take);
            let mut remaining = take;
            while remaining > 0 {
                let Some(mut chunk) = self.queued.pop_front() else {
                    break;
                };
                if chunk.len() > remaining {
                    data.put_slice(&chunk.split_to(remaining));
                    self.queued.push_front(chunk);
                    remaining = 0;
                } else {
                    remaining -= chunk.len();
                    data.put_slice(&chunk);
                }
            }
            data.freeze()
        };

        self.queued_len -= data.len();
        self.offset += data.len() as u64;
        Some((offset, data))
    }

    /// Bytes queued and not yet framed
    pub fn queued_len(&self) -> usize {
        self.queued_len
    }

    /// Sent-cursor: stream offset of the next byte to frame
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Close the send side, fixing the final size
    pub fn close(&mut self) -> u64 {
        let final_size = self.offset + self.queued_len as u64;
        self.final_size = Some(final_size);
        final_size
    }

    /// Final size, if the send side closed
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Drop queued bytes that were never framed (local abort)
    ///
    /// Returns the stream offset sending stopped at.
    pub fn discard_unsent(&mut self) -> u64 {
        self.queued.clear();
        self.queued_len = 0;
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_within_single_chunk() {
        let mut q = SendQueue::new();
        q.push(Bytes::from_static(b"hello world"));

        let (offset, data) = q.take(5).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(&data[..], b"hello");
        assert_eq!(q.offset(), 5);
        assert_eq!(q.queued_len(), 6);

        let (offset, data) = q.take(100).unwrap();
        assert_eq!(offset, 5);
        assert_eq!(&data[..], b" world");
        assert!(q.take(10).is_none());
    }

    #[test]
    fn test_take_spans_chunks() {
        let mut q = SendQueue::new();
        q.push(Bytes::from_static(b"ab"));
        q.push(Bytes::from_static(b"cd"));
        q.push(Bytes::from_static(b"ef"));

        let (offset, data) = q.take(5).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(&data[..], b"abcde");

        let (offset, data) = q.take(5).unwrap();
        assert_eq!(offset, 5);
        assert_eq!(&data[..], b"f");
    }

    #[test]
    fn test_close_fixes_final_size() {
        let mut q = SendQueue::new();
        q.push(Bytes::from_static(b"abc"));
        let (_, _) = q.take(2).unwrap();
        assert_eq!(q.close(), 3, "framed 2 + queued 1");
        assert_eq!(q.final_size(), Some(3));
    }

    #[test]
    fn test_discard_unsent() {
        let mut q = SendQueue::new();
        q.push(Bytes::from_static(b"abcdef"));
        let (_, _) = q.take(4).unwrap();
        assert_eq!(q.discard_unsent(), 4);
        assert_eq!(q.queued_len(), 0);
        assert!(q.take(4).is_none());
    }
}
