//! # Connection Parameters
//!
//! Read-only parameters the session collaborator hands to the multiplexer
//! at connection setup: negotiated wire version, stream limits, and the
//! initial flow-control windows for both directions.

#![forbid(unsafe_code)]

use crate::types::Side;

/// Negotiated wire version
///
/// The only codec-visible difference between versions is the error-code
/// encoding in STOP_SENDING and RESET_STREAM: 2-byte big-endian in the
/// legacy version, VarInt in the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireVersion {
    /// Legacy wire format: 2-byte big-endian error codes
    Legacy,
    /// Current wire format: VarInt error codes
    Current,
}

/// Multiplexer configuration
///
/// Limits prefixed `local_` are what we enforce on the peer; limits
/// prefixed `peer_` are what the peer granted us during setup.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Which endpoint this multiplexer is
    pub side: Side,

    /// Negotiated wire version
    pub wire_version: WireVersion,

    /// Maximum number of peer-initiated streams we accept (per kind)
    pub advertised_max_streams: u64,

    /// Maximum number of streams we may open (per kind)
    pub peer_max_streams: u64,

    /// Stream-level send limit granted by the peer (bytes)
    pub peer_initial_stream_window: u64,

    /// Connection-level send limit granted by the peer (bytes)
    pub peer_initial_conn_window: u64,

    /// Stream-level receive window we advertise (bytes)
    pub local_stream_window: u64,

    /// Connection-level receive window we advertise (bytes)
    pub local_conn_window: u64,

    /// Fraction of a receive window that must be consumed before the
    /// announced limit is raised
    pub window_update_threshold: f64,

    /// Largest data payload placed in one STREAM frame
    pub max_frame_data: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            side: Side::Client,
            wire_version: WireVersion::Current,
            advertised_max_streams: 100,
            peer_max_streams: 100,
            peer_initial_stream_window: 1024 * 1024, // 1 MB
            peer_initial_conn_window: 10 * 1024 * 1024, // 10 MB
            local_stream_window: 1024 * 1024,
            local_conn_window: 10 * 1024 * 1024,
            window_update_threshold: 0.5,
            max_frame_data: 1200,
        }
    }
}

impl MuxConfig {
    /// Server-side configuration with otherwise default limits
    pub fn server() -> Self {
        Self {
            side: Side::Server,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MuxConfig::default();
        assert_eq!(cfg.side, Side::Client);
        assert_eq!(cfg.wire_version, WireVersion::Current);
        assert!(cfg.local_conn_window >= cfg.local_stream_window);
        assert!(cfg.window_update_threshold > 0.0 && cfg.window_update_threshold < 1.0);
    }

    #[test]
    fn test_server_constructor() {
        assert_eq!(MuxConfig::server().side, Side::Server);
    }
}
