//! # Frame Dispatch
//!
//! Applies decoded incoming frames to their target streams. One logical
//! dispatcher calls into here in arrival order; the per-stream mutex
//! serializes same-stream mutation while different streams proceed
//! concurrently with consumer reads and writes.
//!
//! Every ingest error surfaces from `dispatch`; connection-fatal kinds
//! close the multiplexer before returning so blocked operations observe
//! the failure, and the caller tears the connection down via the
//! transport collaborator.

#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::StreamMux;
use crate::error::{Error, Result};
use crate::frames::{Frame, ResetStreamFrame, StopSendingFrame, StreamFrame};
use crate::stream::{StreamEntry, StreamState};
use crate::types::StreamId;

impl StreamMux {
    /// Decode a packet payload and dispatch every frame in it
    pub fn dispatch_packet(&self, payload: &[u8]) -> Result<()> {
        let decoder = self.inner().decoder;
        for item in decoder.iter(payload) {
            match item {
                Ok(frame) => self.dispatch(frame)?,
                Err(e) => {
                    warn!(error = %e, "undecodable packet payload");
                    if e.is_connection_fatal() {
                        self.close_internal(e);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Apply one decoded frame
    ///
    /// Frames for the same stream must arrive here in order; that is the
    /// caller's (single-dispatcher) contract, and this is the only path
    /// into a stream's internals.
    pub fn dispatch(&self, frame: Frame) -> Result<()> {
        if self.closed_reason().is_some() {
            return Err(Error::ConnectionClosed);
        }
        trace!(?frame, "dispatch");

        let result = self.dispatch_inner(frame);
        if let Err(e) = result {
            if e.is_connection_fatal() {
                warn!(error = %e, "connection-fatal frame");
                self.close_internal(e);
            }
            return Err(e);
        }
        Ok(())
    }

    fn dispatch_inner(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Padding | Frame::Ping => Ok(()),

            Frame::MaxData(f) => {
                let raised = self.inner().conn_send.lock().update_limit(f.max_offset);
                if raised {
                    trace!(limit = f.max_offset, "connection send window raised");
                    self.inner().conn_writable.notify_waiters();
                }
                Ok(())
            }

            Frame::MaxStreamData(f) => {
                if !self.can_send_on(f.stream_id) {
                    return Err(Error::ProtocolViolation);
                }
                let Some(entry) = self.entry_for_frame(f.stream_id)? else {
                    return Ok(());
                };
                let raised = entry.core.lock().send_window.update_limit(f.max_offset);
                if raised {
                    entry.writable.notify_waiters();
                }
                Ok(())
            }

            Frame::DataBlocked(f) => {
                debug!(limit = f.limit, "peer blocked at connection limit");
                Ok(())
            }

            Frame::StreamDataBlocked(f) => {
                debug!(stream = %f.stream_id, limit = f.limit, "peer blocked at stream limit");
                Ok(())
            }

            Frame::Stream(f) => self.on_stream_frame(f),
            Frame::ResetStream(f) => self.on_reset_stream(f),
            Frame::StopSending(f) => self.on_stop_sending(f),
        }
    }

    fn on_stream_frame(&self, f: StreamFrame) -> Result<()> {
        if !self.can_recv_on(f.stream_id) {
            // Data on our own unidirectional stream
            return Err(Error::ProtocolViolation);
        }
        let Some(entry) = self.entry_for_frame(f.stream_id)? else {
            return Ok(());
        };

        let end = f.end_offset();
        let len = f.data.len() as u64;
        let wake = {
            let mut core = entry.core.lock();
            // Validate before any state changes: final size first (a
            // violation is fatal even on an ended receive side), then
            // the stricter of the two flow-control limits
            let fresh = core.recv.ingest_check(f.offset, len, f.fin)?;
            if core.reset_error.is_some() || !matches_receivable(&core.state) {
                // Stale retransmission for an ended receive side
                return Ok(());
            }
            core.recv_window.check_offset(end)?;
            self.inner().conn_recv.lock().try_charge(fresh)?;

            let added = core.recv.ingest(f.offset, f.data, f.fin);
            debug_assert_eq!(added, fresh);
            core.state.on_data(f.fin);

            core.recv.contiguous_len() > 0 || core.recv.final_size() == Some(core.recv.consumed())
        };

        if wake {
            entry.readable.notify_waiters();
        }
        Ok(())
    }

    fn on_reset_stream(&self, f: ResetStreamFrame) -> Result<()> {
        if !self.can_recv_on(f.stream_id) {
            return Err(Error::ProtocolViolation);
        }
        let Some(entry) = self.entry_for_frame(f.stream_id)? else {
            return Ok(());
        };

        {
            let mut core = entry.core.lock();
            // A reset fixes the final size exactly like a FIN would, and
            // must agree with everything received so far
            core.recv.ingest_check(f.final_size, 0, true)?;
            core.recv_window.check_offset(f.final_size)?;

            if core.reset_error.is_some() {
                return Ok(());
            }
            if !core.state.on_recv_reset() {
                // Receive side fully read already; nothing to abort
                return Ok(());
            }

            // Bytes the peer claims to have sent but we never saw still
            // count against the connection window
            let shortfall = f.final_size.saturating_sub(core.recv.charged());
            self.inner().conn_recv.lock().try_charge(shortfall)?;

            core.recv.ingest(f.final_size, Bytes::new(), true);
            core.recv.discard();
            core.reset_error = Some(f.error_code);
            debug!(stream = %f.stream_id, error_code = f.error_code, "stream reset by peer");
        }

        entry.readable.notify_waiters();
        self.maybe_reclaim(&entry);
        Ok(())
    }

    fn on_stop_sending(&self, f: StopSendingFrame) -> Result<()> {
        if !self.can_send_on(f.stream_id) {
            // STOP_SENDING for a stream the peer sends on
            return Err(Error::ProtocolViolation);
        }
        let Some(entry) = self.entry_for_frame(f.stream_id)? else {
            return Ok(());
        };

        let reset = {
            let mut core = entry.core.lock();
            // Only an active send side reacts; after CloseWrite the data
            // already went out and the peer's request changes nothing
            let active = matches!(
                core.state.send,
                crate::stream::SendState::Ready | crate::stream::SendState::Send
            );
            if active && core.state.on_send_reset() {
                let final_size = core.send.discard_unsent();
                core.send_reset_error = Some(f.error_code);
                debug!(stream = %f.stream_id, error_code = f.error_code, "peer stopped our sending");
                Some(Frame::ResetStream(ResetStreamFrame {
                    stream_id: f.stream_id,
                    error_code: f.error_code,
                    final_size,
                }))
            } else {
                // Repeat STOP_SENDING, or the send side already ended
                None
            }
        };

        entry.writable.notify_waiters();
        if let Some(frame) = reset {
            self.send_frame(&frame)?;
        }
        Ok(())
    }

    /// Find the stream a frame routes to, lazily creating peer-initiated
    /// receive records
    ///
    /// Returns `Ok(None)` for frames referencing our own reclaimed
    /// streams (late deliveries are dropped, not errors). Unseen
    /// peer-initiated IDs create every lower-numbered stream of the same
    /// kind too, so later frames for those are legal.
    fn entry_for_frame(&self, id: StreamId) -> Result<Option<Arc<StreamEntry>>> {
        let mut table = self.inner().table.lock();
        if let Some(entry) = table.streams.get(&id.value()) {
            return Ok(Some(entry.clone()));
        }

        if id.is_initiated_by(self.inner().config.side) {
            return if id.value() < table.next_local(id.direction()) {
                // Reclaimed local stream
                Ok(None)
            } else {
                // The peer referenced a stream we never opened
                Err(Error::ProtocolViolation)
            };
        }

        let next = table.next_peer(id.direction());
        if id.value() < next {
            return Err(Error::StreamIdReused);
        }
        if id.index() >= self.inner().config.advertised_max_streams {
            return Err(Error::StreamLimitExceeded);
        }

        let state = if id.is_bidirectional() {
            StreamState::bidirectional()
        } else {
            StreamState::recv_only()
        };

        let mut created = None;
        let mut cursor = next;
        while cursor <= id.value() {
            let sid = StreamId::new(cursor);
            let entry = Arc::new(self.new_entry(sid, state));
            table.streams.insert(cursor, entry.clone());
            let _ = self.inner().accept_tx.send(sid);
            debug!(stream = %sid, "peer opened stream");
            created = Some(entry);
            cursor += 4;
        }
        *table.next_peer_mut(id.direction()) = cursor;

        Ok(created)
    }
}

/// Whether the receive side still accepts data
fn matches_receivable(state: &StreamState) -> bool {
    use crate::stream::RecvState;
    matches!(
        state.recv,
        RecvState::Ready | RecvState::Recv | RecvState::SizeKnown
    )
}
