//! # Stream Data Reassembly
//!
//! Converts arbitrary-order, possibly-overlapping deliveries into one
//! ordered byte stream. Pending data lives in a sorted set of disjoint
//! ranges keyed by start offset; the consumed-cursor only advances
//! through the contiguous prefix.
//!
//! Ingest is split into a check phase and a commit phase so flow control
//! can veto a delivery before any state changes. The check phase also
//! counts the genuinely new bytes in a delivery — the only bytes that
//! cost flow-control credit, so a peer cannot bypass the limit by
//! re-sending the same range.

#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Reassembly buffer for one stream's receive direction
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    /// Next byte the application will see
    consumed: u64,

    /// Disjoint pending ranges, keyed by start offset
    ///
    /// Overlaps are trimmed at ingest (existing data wins). Adjacent
    /// ranges are not physically merged; the contiguous prefix walks
    /// consecutive ranges instead.
    ranges: BTreeMap<u64, Bytes>,

    /// Highest exclusive end offset seen so far
    highest: u64,

    /// Unique bytes accepted, for connection-level accounting
    charged: u64,

    /// Final size, once a FIN fixed it
    final_size: Option<u64>,
}

impl ReceiveBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a delivery and count its genuinely new bytes
    ///
    /// Fails with `FinalSizeMismatch` when the delivery contradicts a
    /// recorded final size; the buffer is untouched either way.
    pub fn ingest_check(&self, offset: u64, len: u64, fin: bool) -> Result<u64> {
        let end = offset + len;

        if let Some(final_size) = self.final_size {
            if end > final_size {
                return Err(Error::FinalSizeMismatch);
            }
            if fin && end != final_size {
                return Err(Error::FinalSizeMismatch);
            }
        }
        if fin && end < self.highest {
            // FIN claims a size below data already received
            return Err(Error::FinalSizeMismatch);
        }

        Ok(self.fresh_len(offset, end))
    }

    /// Commit a delivery previously validated by `ingest_check`
    ///
    /// Returns the bytes actually added, which equals what the check
    /// reported for the same arguments.
    pub fn ingest(&mut self, offset: u64, data: Bytes, fin: bool) -> u64 {
        let end = offset + data.len() as u64;

        if fin {
            self.final_size = Some(end);
        }
        if end > self.highest {
            self.highest = end;
        }

        let mut added = 0;
        for (gap_start, gap_end) in self.uncovered(offset, end) {
            let lo = (gap_start - offset) as usize;
            let hi = (gap_end - offset) as usize;
            added += (hi - lo) as u64;
            self.ranges.insert(gap_start, data.slice(lo..hi));
        }
        self.charged += added;
        added
    }

    /// Unique bytes in [offset, end) not yet covered by the consumed
    /// prefix or a pending range
    fn fresh_len(&self, offset: u64, end: u64) -> u64 {
        self.uncovered(offset, end)
            .into_iter()
            .map(|(s, e)| e - s)
            .sum()
    }

    /// Sub-ranges of [offset, end) not yet held anywhere
    fn uncovered(&self, offset: u64, end: u64) -> Vec<(u64, u64)> {
        let mut cursor = offset.max(self.consumed);
        if end <= cursor {
            return Vec::new();
        }

        // A range starting at or before the cursor may already cover part
        // of the delivery
        if let Some((&start, data)) = self.ranges.range(..=cursor).next_back() {
            let range_end = start + data.len() as u64;
            if range_end > cursor {
                cursor = range_end.min(end);
            }
        }

        let mut gaps = Vec::new();
        for (&start, data) in self.ranges.range(cursor..end) {
            if start > cursor {
                gaps.push((cursor, start.min(end)));
            }
            let range_end = start + data.len() as u64;
            cursor = cursor.max(range_end.min(end));
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        gaps
    }

    /// Length of the contiguous prefix available to the application
    pub fn contiguous_len(&self) -> u64 {
        let mut cursor = self.consumed;
        for (&start, data) in self.ranges.range(self.consumed..) {
            if start != cursor {
                break;
            }
            cursor += data.len() as u64;
        }
        cursor - self.consumed
    }

    /// Copy contiguous bytes into `out`, advancing the consumed-cursor
    pub fn copy_into(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            let Some((start, data)) = self.ranges.pop_first() else {
                break;
            };
            if start != self.consumed {
                self.ranges.insert(start, data);
                break;
            }

            let n = data.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&data[..n]);
            copied += n;

            if n < data.len() {
                self.ranges.insert(start + n as u64, data.slice(n..));
            }
            self.consumed += n as u64;
        }
        copied
    }

    /// Current consumed-cursor position
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Unique bytes accepted so far
    pub fn charged(&self) -> u64 {
        self.charged
    }

    /// Final size, if a FIN fixed it
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Whether the application consumed everything up to the final size
    pub fn is_finished(&self) -> bool {
        self.final_size == Some(self.consumed)
    }

    /// Bytes currently buffered and not yet consumed
    pub fn buffered(&self) -> usize {
        self.ranges.values().map(Bytes::len).sum()
    }

    /// Drop all pending data (stream reset)
    pub fn discard(&mut self) {
        self.ranges.clear();
    }
}
