//! # Stream State Machines
//!
//! Two independent per-direction machines combined per stream.
//!
//! Send:    Ready → Send → DataSent → DataRecvd
//!                   ↘ ResetSent → ResetRecvd
//! Receive: Ready → Recv → SizeKnown → DataRead
//!                   ↘ ResetRecvd (any pre-terminal state)
//!
//! The transport collaborator confirms delivery (DataSent → DataRecvd,
//! ResetSent → ResetRecvd); everything else is driven by local calls and
//! dispatched frames.

#![forbid(unsafe_code)]

use crate::error::{Error, Result};

/// Send-direction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Stream created, no data written yet
    Ready,

    /// Data written
    Send,

    /// Send side closed; final size fixed
    DataSent,

    /// Delivery confirmed by the transport collaborator
    DataRecvd,

    /// Local abort sent (RESET_STREAM emitted)
    ResetSent,

    /// Reset confirmed by the transport collaborator
    ResetRecvd,
}

impl SendState {
    /// Whether this direction is finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::DataRecvd | SendState::ResetRecvd)
    }
}

/// Receive-direction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// Stream created, no data received yet
    Ready,

    /// Receiving data
    Recv,

    /// FIN seen; final size known
    SizeKnown,

    /// Application consumed everything up to the final size
    DataRead,

    /// RESET_STREAM received; buffered data discarded
    ResetRecvd,
}

impl RecvState {
    /// Whether this direction is finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecvState::DataRead | RecvState::ResetRecvd)
    }
}

/// Combined per-stream state
///
/// Directions a stream does not have (the peer's half of a
/// unidirectional stream) start terminal so reclamation only waits on
/// the half that exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    pub send: SendState,
    pub recv: RecvState,
}

impl StreamState {
    /// State for a stream we can both send and receive on
    pub fn bidirectional() -> Self {
        Self {
            send: SendState::Ready,
            recv: RecvState::Ready,
        }
    }

    /// State for a stream we only send on
    pub fn send_only() -> Self {
        Self {
            send: SendState::Ready,
            recv: RecvState::DataRead,
        }
    }

    /// State for a stream we only receive on
    pub fn recv_only() -> Self {
        Self {
            send: SendState::DataRecvd,
            recv: RecvState::Ready,
        }
    }

    /// Validate a local write
    pub fn on_write(&mut self) -> Result<()> {
        match self.send {
            SendState::Ready | SendState::Send => {
                self.send = SendState::Send;
                Ok(())
            }
            SendState::DataSent | SendState::DataRecvd => Err(Error::StreamClosed),
            SendState::ResetSent | SendState::ResetRecvd => Err(Error::StreamClosed),
        }
    }

    /// Close the send side; idempotent
    pub fn on_close_write(&mut self) -> Result<()> {
        match self.send {
            SendState::Ready | SendState::Send => {
                self.send = SendState::DataSent;
                Ok(())
            }
            SendState::DataSent | SendState::DataRecvd => Ok(()),
            SendState::ResetSent | SendState::ResetRecvd => Err(Error::StreamClosed),
        }
    }

    /// Abort the send side locally, or on a received STOP_SENDING
    ///
    /// Returns true when a RESET_STREAM must be emitted: exactly once,
    /// repeats are no-ops.
    pub fn on_send_reset(&mut self) -> bool {
        match self.send {
            SendState::Ready | SendState::Send | SendState::DataSent => {
                self.send = SendState::ResetSent;
                true
            }
            SendState::DataRecvd | SendState::ResetSent | SendState::ResetRecvd => false,
        }
    }

    /// Record incoming data; returns false when the data must be ignored
    /// (the receive side already ended)
    pub fn on_data(&mut self, fin: bool) -> bool {
        match self.recv {
            RecvState::Ready | RecvState::Recv => {
                self.recv = if fin { RecvState::SizeKnown } else { RecvState::Recv };
                true
            }
            RecvState::SizeKnown => true,
            RecvState::DataRead | RecvState::ResetRecvd => false,
        }
    }

    /// Record a received RESET_STREAM; returns false when it must be
    /// ignored (receive side already fully read)
    pub fn on_recv_reset(&mut self) -> bool {
        match self.recv {
            RecvState::Ready | RecvState::Recv | RecvState::SizeKnown => {
                self.recv = RecvState::ResetRecvd;
                true
            }
            RecvState::ResetRecvd => true,
            RecvState::DataRead => false,
        }
    }

    /// The application consumed everything up to the final size
    pub fn on_all_read(&mut self) {
        if matches!(self.recv, RecvState::SizeKnown) {
            self.recv = RecvState::DataRead;
        }
    }

    /// Transport collaborator confirmed delivery of data or reset
    pub fn on_delivery_confirmed(&mut self) {
        self.send = match self.send {
            SendState::DataSent => SendState::DataRecvd,
            SendState::ResetSent => SendState::ResetRecvd,
            other => other,
        };
    }

    /// Both directions finished; the table entry can be reclaimed
    pub fn is_terminal(&self) -> bool {
        self.send.is_terminal() && self.recv.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_lifecycle() {
        let mut st = StreamState::bidirectional();
        assert_eq!(st.send, SendState::Ready);

        st.on_write().unwrap();
        assert_eq!(st.send, SendState::Send);
        st.on_write().unwrap();

        st.on_close_write().unwrap();
        assert_eq!(st.send, SendState::DataSent);
        assert_eq!(st.on_write(), Err(Error::StreamClosed));

        st.on_delivery_confirmed();
        assert_eq!(st.send, SendState::DataRecvd);
        assert!(st.send.is_terminal());
    }

    #[test]
    fn test_close_write_is_idempotent() {
        let mut st = StreamState::bidirectional();
        st.on_close_write().unwrap();
        st.on_close_write().unwrap();
        assert_eq!(st.send, SendState::DataSent);
    }

    #[test]
    fn test_send_reset_emits_once() {
        let mut st = StreamState::bidirectional();
        st.on_write().unwrap();

        assert!(st.on_send_reset(), "first reset emits a frame");
        assert_eq!(st.send, SendState::ResetSent);
        assert!(!st.on_send_reset(), "repeat is a no-op");

        assert_eq!(st.on_write(), Err(Error::StreamClosed));
        assert_eq!(st.on_close_write(), Err(Error::StreamClosed));

        st.on_delivery_confirmed();
        assert_eq!(st.send, SendState::ResetRecvd);
    }

    #[test]
    fn test_recv_lifecycle() {
        let mut st = StreamState::bidirectional();
        assert!(st.on_data(false));
        assert_eq!(st.recv, RecvState::Recv);

        assert!(st.on_data(true));
        assert_eq!(st.recv, RecvState::SizeKnown);

        st.on_all_read();
        assert_eq!(st.recv, RecvState::DataRead);
        assert!(st.recv.is_terminal());

        // Stale retransmissions after full read are ignored
        assert!(!st.on_data(false));
        assert!(!st.on_recv_reset());
    }

    #[test]
    fn test_recv_reset_discards() {
        let mut st = StreamState::bidirectional();
        st.on_data(false);
        assert!(st.on_recv_reset());
        assert_eq!(st.recv, RecvState::ResetRecvd);
        // Duplicate reset stays in the same state
        assert!(st.on_recv_reset());
        assert!(!st.on_data(false), "data after reset is dropped");
    }

    #[test]
    fn test_half_open_streams_start_terminal() {
        let send_only = StreamState::send_only();
        assert!(send_only.recv.is_terminal());
        assert!(!send_only.is_terminal());

        let recv_only = StreamState::recv_only();
        assert!(recv_only.send.is_terminal());
        assert!(!recv_only.is_terminal());
    }

    #[test]
    fn test_terminal_requires_both_directions() {
        let mut st = StreamState::bidirectional();
        st.on_close_write().unwrap();
        st.on_delivery_confirmed();
        assert!(!st.is_terminal(), "receive side still open");

        st.on_data(true);
        st.on_all_read();
        assert!(st.is_terminal());
    }
}
