//! # Per-Stream State
//!
//! Everything one stream owns: its directional state machines, the
//! receive-side reassembly buffer, the send queue, and both flow-control
//! windows. The multiplexer owns the table of these and is the only path
//! through which frames reach them.

pub mod recv_buffer;
pub mod send_buffer;
pub mod state;

pub use recv_buffer::ReceiveBuffer;
pub use send_buffer::SendQueue;
pub use state::{RecvState, SendState, StreamState};

use crate::flow::{RecvWindow, SendWindow};
use crate::types::StreamId;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Mutable per-stream state, serialized behind the entry's mutex
///
/// One mutator at a time per stream; different streams proceed
/// concurrently.
#[derive(Debug)]
pub(crate) struct StreamCore {
    pub state: StreamState,
    pub recv: ReceiveBuffer,
    pub send: SendQueue,
    pub send_window: SendWindow,
    pub recv_window: RecvWindow,

    /// Error code from a received RESET_STREAM; fails reads
    pub reset_error: Option<u64>,

    /// Error code attached to our own ResetSent side; fails writes
    pub send_reset_error: Option<u64>,
}

impl StreamCore {
    pub(crate) fn new(state: StreamState, send_window: SendWindow, recv_window: RecvWindow) -> Self {
        Self {
            state,
            recv: ReceiveBuffer::new(),
            send: SendQueue::new(),
            send_window,
            recv_window,
            reset_error: None,
            send_reset_error: None,
        }
    }
}

/// One stream's slot in the multiplexer table
#[derive(Debug)]
pub(crate) struct StreamEntry {
    pub id: StreamId,
    pub core: Mutex<StreamCore>,

    /// Woken on new contiguous data, FIN completion, or reset
    pub readable: Notify,

    /// Woken when the stream's send window grows or the stream aborts
    pub writable: Notify,
}

impl StreamEntry {
    pub(crate) fn new(id: StreamId, state: StreamState, send_window: SendWindow, recv_window: RecvWindow) -> Self {
        Self {
            id,
            core: Mutex::new(StreamCore::new(state, send_window, recv_window)),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }
}
