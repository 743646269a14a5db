//! # Stream Multiplexer
//!
//! Owns the stream table and ties the codec, flow controllers,
//! reassemblers, and state machines together behind the
//! open/accept/read/write/close API. It is the sole path through which
//! incoming frames reach a stream's internals and outgoing frames reach
//! the transport, which is what guarantees strict per-stream ordering of
//! frame application.
//!
//! ## Locking
//!
//! Three lock levels, never nested against each other except as listed:
//! the table lock (lookup/create/reclaim only), one mutex per stream
//! (all per-stream mutation), and the connection window locks (taken
//! inside a stream lock when both levels are charged). The pending-frame
//! queue has its own lock and is never held across another. No lock is
//! held while calling the transport send primitive.

#![forbid(unsafe_code)]

mod dispatch;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tracing::debug;

use crate::config::MuxConfig;
use crate::error::{Error, Result};
use crate::flow::{RecvWindow, SendWindow};
use crate::frames::{
    Frame, FrameDecoder, FrameEncoder, MaxDataFrame, MaxStreamDataFrame, ResetStreamFrame,
    StopSendingFrame, StreamFrame,
};
use crate::stream::{StreamEntry, StreamState};
use crate::types::{first_stream_id, StreamDirection, StreamId};

/// Non-blocking send primitive provided by the packet collaborator
///
/// `WouldBlock` means the transport cannot take the payload right now;
/// the multiplexer queues the frame and retries on [`StreamMux::flush`].
pub trait TransportSink: Send + Sync {
    /// Hand one encoded frame to the transport
    fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Outcome of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// More data may follow
    Open,
    /// The consumed-cursor reached the stream's final size
    Fin,
}

/// Stream multiplexer for one connection
///
/// Cheap to clone; all clones share the same connection state.
#[derive(Clone)]
pub struct StreamMux {
    inner: Arc<MuxInner>,
}

pub(crate) struct MuxInner {
    pub(crate) config: MuxConfig,
    pub(crate) encoder: FrameEncoder,
    pub(crate) decoder: FrameDecoder,
    transport: Arc<dyn TransportSink>,

    pub(crate) table: Mutex<StreamTable>,
    pub(crate) conn_send: Mutex<SendWindow>,
    pub(crate) conn_recv: Mutex<RecvWindow>,

    /// Wakes writers blocked on the connection-level window
    pub(crate) conn_writable: Notify,

    /// Encoded frames the transport could not take yet
    pending: Mutex<VecDeque<Bytes>>,

    pub(crate) accept_tx: mpsc::UnboundedSender<StreamId>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamId>>,

    /// None while open; Some(reason) once closed
    pub(crate) closed_tx: watch::Sender<Option<Error>>,
}

pub(crate) struct StreamTable {
    pub(crate) streams: HashMap<u64, Arc<StreamEntry>>,

    /// Next ID to allocate locally, per direction
    next_local_bidi: u64,
    next_local_uni: u64,

    /// Watermark below which every peer-initiated ID has been seen
    next_peer_bidi: u64,
    next_peer_uni: u64,
}

impl StreamTable {
    pub(crate) fn next_local(&self, direction: StreamDirection) -> u64 {
        match direction {
            StreamDirection::Bidirectional => self.next_local_bidi,
            StreamDirection::Unidirectional => self.next_local_uni,
        }
    }

    fn next_local_mut(&mut self, direction: StreamDirection) -> &mut u64 {
        match direction {
            StreamDirection::Bidirectional => &mut self.next_local_bidi,
            StreamDirection::Unidirectional => &mut self.next_local_uni,
        }
    }

    pub(crate) fn next_peer(&self, direction: StreamDirection) -> u64 {
        match direction {
            StreamDirection::Bidirectional => self.next_peer_bidi,
            StreamDirection::Unidirectional => self.next_peer_uni,
        }
    }

    pub(crate) fn next_peer_mut(&mut self, direction: StreamDirection) -> &mut u64 {
        match direction {
            StreamDirection::Bidirectional => &mut self.next_peer_bidi,
            StreamDirection::Unidirectional => &mut self.next_peer_uni,
        }
    }
}

impl StreamMux {
    /// Create a multiplexer for one connection
    ///
    /// Lives exactly as long as the connection: the session collaborator
    /// creates it after setup and drops it at teardown.
    pub fn new(config: MuxConfig, transport: Arc<dyn TransportSink>) -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(None);

        let local = config.side.initiator();
        let peer = config.side.opposite().initiator();

        let inner = MuxInner {
            encoder: FrameEncoder::new(config.wire_version),
            decoder: FrameDecoder::new(config.wire_version),
            transport,
            table: Mutex::new(StreamTable {
                streams: HashMap::new(),
                next_local_bidi: first_stream_id(local, StreamDirection::Bidirectional),
                next_local_uni: first_stream_id(local, StreamDirection::Unidirectional),
                next_peer_bidi: first_stream_id(peer, StreamDirection::Bidirectional),
                next_peer_uni: first_stream_id(peer, StreamDirection::Unidirectional),
            }),
            conn_send: Mutex::new(SendWindow::new(config.peer_initial_conn_window)),
            conn_recv: Mutex::new(RecvWindow::new(
                config.local_conn_window,
                config.window_update_threshold,
            )),
            conn_writable: Notify::new(),
            pending: Mutex::new(VecDeque::new()),
            accept_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            closed_tx,
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Open a locally-initiated stream
    ///
    /// IDs ascend per direction parity and are never reused.
    pub fn open_stream(&self, direction: StreamDirection) -> Result<StreamId> {
        self.check_open()?;

        let mut table = self.inner.table.lock();
        let next = table.next_local(direction);
        let id = StreamId::new(next);
        if id.index() >= self.inner.config.peer_max_streams {
            return Err(Error::StreamLimitExceeded);
        }
        *table.next_local_mut(direction) += 4;

        let state = match direction {
            StreamDirection::Bidirectional => StreamState::bidirectional(),
            StreamDirection::Unidirectional => StreamState::send_only(),
        };
        table
            .streams
            .insert(id.value(), Arc::new(self.new_entry(id, state)));
        debug!(stream = %id, "opened local stream");
        Ok(id)
    }

    /// Wait for the next peer-initiated stream
    ///
    /// Streams surface here in creation order, including those created
    /// implicitly when a higher ID arrived first.
    pub async fn accept_stream(&self) -> Result<StreamId> {
        let mut rx = self.inner.accept_rx.lock().await;
        let mut closed = self.inner.closed_tx.subscribe();
        loop {
            if self.closed_reason().is_some() {
                return Err(Error::ConnectionClosed);
            }
            tokio::select! {
                id = rx.recv() => {
                    if let Some(id) = id {
                        return Ok(id);
                    }
                }
                _ = closed.changed() => {}
            }
        }
    }

    /// Read from a stream into `buf`
    ///
    /// Suspends until contiguous data, end-of-stream, or reset is
    /// available. Returns the bytes copied and whether the stream ended;
    /// the Fin status repeats idempotently on further reads.
    pub async fn read(&self, id: StreamId, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        let entry = self.lookup(id)?;
        if !self.can_recv_on(id) {
            return Err(Error::StreamClosed);
        }

        let mut closed = self.inner.closed_tx.subscribe();
        loop {
            let notified = entry.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut window_frames: Vec<Frame> = Vec::new();
            let outcome = {
                let mut core = entry.core.lock();
                if let Some(code) = core.reset_error {
                    return Err(Error::StreamReset(code));
                }

                if !buf.is_empty() && core.recv.contiguous_len() > 0 {
                    let n = core.recv.copy_into(buf);
                    core.recv_window.on_consumed(n as u64);
                    if let Some(limit) = core.recv_window.maybe_increase() {
                        window_frames.push(Frame::MaxStreamData(MaxStreamDataFrame {
                            stream_id: id,
                            max_offset: limit,
                        }));
                    }
                    {
                        let mut conn = self.inner.conn_recv.lock();
                        conn.on_consumed(n as u64);
                        if let Some(limit) = conn.maybe_increase() {
                            window_frames.push(Frame::MaxData(MaxDataFrame { max_offset: limit }));
                        }
                    }

                    if core.recv.is_finished() {
                        core.state.on_all_read();
                        Some((n, ReadStatus::Fin))
                    } else {
                        Some((n, ReadStatus::Open))
                    }
                } else if core.recv.is_finished() {
                    core.state.on_all_read();
                    Some((0, ReadStatus::Fin))
                } else if buf.is_empty() {
                    Some((0, ReadStatus::Open))
                } else if self.closed_reason().is_some() {
                    return Err(Error::ConnectionClosed);
                } else {
                    None
                }
            };

            if let Some((n, status)) = outcome {
                for frame in &window_frames {
                    self.send_frame(frame)?;
                }
                if status == ReadStatus::Fin {
                    self.maybe_reclaim(&entry);
                }
                return Ok((n, status));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = closed.changed() => {}
            }
        }
    }

    /// Write to a stream
    ///
    /// Never blocks on delivery; suspends only while the send window
    /// (stream or connection, whichever is stricter) is exhausted, and
    /// resumes when the peer raises it. Data is cut into STREAM frames
    /// at the configured size, on `close_write`, or on `flush_stream`.
    pub async fn write(&self, id: StreamId, data: &[u8]) -> Result<usize> {
        let entry = self.lookup(id)?;
        if !self.can_send_on(id) {
            return Err(Error::StreamClosed);
        }

        if data.is_empty() {
            let core = entry.core.lock();
            if let Some(code) = core.send_reset_error {
                return Err(Error::StreamReset(code));
            }
            return match core.state.send {
                crate::stream::SendState::Ready | crate::stream::SendState::Send => Ok(0),
                _ => Err(Error::StreamClosed),
            };
        }

        let mut closed = self.inner.closed_tx.subscribe();
        let mut written = 0;
        while written < data.len() {
            let notified_stream = entry.writable.notified();
            let notified_conn = self.inner.conn_writable.notified();
            tokio::pin!(notified_stream);
            tokio::pin!(notified_conn);
            notified_stream.as_mut().enable();
            notified_conn.as_mut().enable();

            let mut frames: Vec<Frame> = Vec::new();
            let accepted = {
                let mut core = entry.core.lock();
                if self.closed_reason().is_some() {
                    return Err(Error::ConnectionClosed);
                }
                if let Some(code) = core.send_reset_error {
                    return Err(Error::StreamReset(code));
                }
                core.state.on_write()?;

                let conn_avail = self.inner.conn_send.lock().available();
                let avail = core
                    .send_window
                    .available()
                    .min(conn_avail)
                    .min((data.len() - written) as u64) as usize;

                if avail == 0 {
                    if let Some(limit) = core.send_window.blocked_signal() {
                        frames.push(Frame::StreamDataBlocked(
                            crate::frames::StreamDataBlockedFrame { stream_id: id, limit },
                        ));
                    }
                    let mut conn = self.inner.conn_send.lock();
                    if conn.available() == 0 {
                        if let Some(limit) = conn.blocked_signal() {
                            frames.push(Frame::DataBlocked(crate::frames::DataBlockedFrame {
                                limit,
                            }));
                        }
                    }
                } else {
                    core.send_window.record_sent(avail as u64);
                    self.inner.conn_send.lock().record_sent(avail as u64);
                    core.send
                        .push(Bytes::copy_from_slice(&data[written..written + avail]));

                    let cap = self.inner.config.max_frame_data;
                    while core.send.queued_len() >= cap {
                        let Some((offset, chunk)) = core.send.take(cap) else {
                            break;
                        };
                        frames.push(Frame::Stream(StreamFrame {
                            stream_id: id,
                            offset,
                            data: chunk,
                            fin: false,
                        }));
                    }
                }
                avail
            };

            for frame in &frames {
                self.send_frame(frame)?;
            }

            if accepted > 0 {
                written += accepted;
                continue;
            }

            tokio::select! {
                _ = &mut notified_stream => {}
                _ = &mut notified_conn => {}
                _ = closed.changed() => {}
            }
        }
        Ok(written)
    }

    /// Close a stream's send side, fixing its final size
    ///
    /// Queued bytes are cut into frames with FIN on the last one; with
    /// nothing queued an empty FIN frame goes out. Idempotent after the
    /// first call.
    pub fn close_write(&self, id: StreamId) -> Result<()> {
        let entry = self.lookup(id)?;
        if !self.can_send_on(id) {
            return Err(Error::StreamClosed);
        }

        let mut frames: Vec<Frame> = Vec::new();
        {
            let mut core = entry.core.lock();
            use crate::stream::SendState;
            match core.state.send {
                SendState::DataSent | SendState::DataRecvd => return Ok(()),
                _ => {}
            }
            core.state.on_close_write()?;
            core.send.close();

            let cap = self.inner.config.max_frame_data;
            while let Some((offset, chunk)) = core.send.take(cap) {
                let fin = core.send.queued_len() == 0;
                frames.push(Frame::Stream(StreamFrame {
                    stream_id: id,
                    offset,
                    data: chunk,
                    fin,
                }));
            }
            if frames.is_empty() {
                frames.push(Frame::Stream(StreamFrame {
                    stream_id: id,
                    offset: core.send.offset(),
                    data: Bytes::new(),
                    fin: true,
                }));
            }
        }

        for frame in &frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Abort a stream's send side
    ///
    /// Emits RESET_STREAM with the bytes framed so far as the final
    /// size; queued unsent bytes are discarded. Repeats are no-ops.
    pub fn reset_stream(&self, id: StreamId, error_code: u64) -> Result<()> {
        let entry = self.lookup(id)?;
        if !self.can_send_on(id) {
            return Err(Error::StreamClosed);
        }

        let frame = {
            let mut core = entry.core.lock();
            if core.state.on_send_reset() {
                let final_size = core.send.discard_unsent();
                core.send_reset_error = Some(error_code);
                Some(Frame::ResetStream(ResetStreamFrame {
                    stream_id: id,
                    error_code,
                    final_size,
                }))
            } else {
                None
            }
        };
        entry.writable.notify_waiters();

        if let Some(frame) = frame {
            debug!(stream = %id, error_code, "reset stream");
            self.send_frame(&frame)?;
        }
        Ok(())
    }

    /// Ask the peer to stop sending on a stream
    pub fn stop_sending(&self, id: StreamId, error_code: u64) -> Result<()> {
        let _ = self.lookup(id)?;
        if !self.can_recv_on(id) {
            return Err(Error::StreamClosed);
        }
        self.send_frame(&Frame::StopSending(StopSendingFrame {
            stream_id: id,
            error_code,
        }))
    }

    /// Cut a stream's queued bytes into frames now
    pub fn flush_stream(&self, id: StreamId) -> Result<()> {
        let entry = self.lookup(id)?;

        let mut frames: Vec<Frame> = Vec::new();
        {
            let mut core = entry.core.lock();
            let cap = self.inner.config.max_frame_data;
            while let Some((offset, chunk)) = core.send.take(cap) {
                frames.push(Frame::Stream(StreamFrame {
                    stream_id: id,
                    offset,
                    data: chunk,
                    fin: false,
                }));
            }
        }
        for frame in &frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Transport collaborator confirmed delivery of a stream's data or
    /// reset; advances DataSent/ResetSent to their terminal states
    pub fn on_delivery_confirmed(&self, id: StreamId) {
        let entry = {
            let table = self.inner.table.lock();
            table.streams.get(&id.value()).cloned()
        };
        let Some(entry) = entry else {
            return;
        };
        entry.core.lock().state.on_delivery_confirmed();
        self.maybe_reclaim(&entry);
    }

    /// Close the connection; every blocked and future operation observes
    /// `ConnectionClosed`
    pub fn close(&self, reason: Error) {
        self.close_internal(reason);
    }

    /// Why the connection closed, if it has
    pub fn closed_reason(&self) -> Option<Error> {
        *self.inner.closed_tx.borrow()
    }

    /// Watch for connection close; the value flips to Some(reason) once
    pub fn closed_signal(&self) -> watch::Receiver<Option<Error>> {
        self.inner.closed_tx.subscribe()
    }

    /// Drive the multiplexer from a raw-frame feed until it ends
    ///
    /// The feed is the packet collaborator's decoded payload sequence in
    /// arrival order; the channel closing means the connection closed.
    /// Fatal dispatch errors stop the loop and propagate to the caller
    /// for teardown.
    pub async fn run_dispatch(&self, mut feed: mpsc::Receiver<Bytes>) -> Result<()> {
        while let Some(payload) = feed.recv().await {
            self.dispatch_packet(&payload)?;
        }
        self.close_internal(Error::ConnectionClosed);
        Ok(())
    }

    /// Retry frames the transport previously refused with `WouldBlock`
    ///
    /// Call when the packet collaborator reports writability again.
    pub fn flush(&self) -> Result<()> {
        loop {
            let payload = { self.inner.pending.lock().pop_front() };
            let Some(payload) = payload else {
                return Ok(());
            };
            match self.inner.transport.send(&payload) {
                Ok(()) => {}
                Err(Error::WouldBlock) => {
                    self.inner.pending.lock().push_front(payload);
                    return Err(Error::WouldBlock);
                }
                Err(e) => {
                    self.close_internal(Error::ConnectionClosed);
                    return Err(e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals shared with the dispatcher
    // ------------------------------------------------------------------

    pub(crate) fn inner(&self) -> &MuxInner {
        &self.inner
    }

    pub(crate) fn new_entry(&self, id: StreamId, state: StreamState) -> StreamEntry {
        StreamEntry::new(
            id,
            state,
            SendWindow::new(self.inner.config.peer_initial_stream_window),
            RecvWindow::new(
                self.inner.config.local_stream_window,
                self.inner.config.window_update_threshold,
            ),
        )
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        match self.closed_reason() {
            Some(_) => Err(Error::ConnectionClosed),
            None => Ok(()),
        }
    }

    /// Whether we receive data on this stream
    pub(crate) fn can_recv_on(&self, id: StreamId) -> bool {
        !id.is_initiated_by(self.inner.config.side) || id.is_bidirectional()
    }

    /// Whether we send data on this stream
    pub(crate) fn can_send_on(&self, id: StreamId) -> bool {
        id.is_initiated_by(self.inner.config.side) || id.is_bidirectional()
    }

    /// Look up a stream for a local API call
    fn lookup(&self, id: StreamId) -> Result<Arc<StreamEntry>> {
        let table = self.inner.table.lock();
        if let Some(entry) = table.streams.get(&id.value()) {
            return Ok(entry.clone());
        }
        let next = if id.is_initiated_by(self.inner.config.side) {
            table.next_local(id.direction())
        } else {
            table.next_peer(id.direction())
        };
        if id.value() < next {
            // Reclaimed: both directions already reached a terminal state
            Err(Error::StreamClosed)
        } else {
            Err(Error::StreamNotFound)
        }
    }

    /// Reclaim a stream's table entry once both directions are terminal
    pub(crate) fn maybe_reclaim(&self, entry: &Arc<StreamEntry>) {
        if !entry.core.lock().state.is_terminal() {
            return;
        }
        let mut table = self.inner.table.lock();
        if table.streams.remove(&entry.id.value()).is_some() {
            debug!(stream = %entry.id, "stream reclaimed");
        }
    }

    pub(crate) fn close_internal(&self, reason: Error) {
        self.inner.closed_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Encode a frame and hand it to the transport
    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.inner.encoder.encoded_len(frame));
        self.inner.encoder.encode(frame, &mut buf)?;
        self.send_or_queue(buf.freeze())
    }

    /// Send one encoded frame, queueing it when the transport pushes back
    ///
    /// The pending lock is released before the transport call; nothing
    /// here blocks the dispatcher on network backpressure.
    fn send_or_queue(&self, payload: Bytes) -> Result<()> {
        {
            let mut pending = self.inner.pending.lock();
            if !pending.is_empty() {
                pending.push_back(payload);
                return Ok(());
            }
        }

        match self.inner.transport.send(&payload) {
            Ok(()) => Ok(()),
            Err(Error::WouldBlock) => {
                self.inner.pending.lock().push_back(payload);
                Ok(())
            }
            Err(e) => {
                self.close_internal(Error::ConnectionClosed);
                Err(e)
            }
        }
    }
}
