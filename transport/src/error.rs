use thiserror::Error;

/// Errors surfaced by operations on a [crate::peer::Peer].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PeerError {
    /// The peer was disposed; its state is gone and no further operation is valid.
    #[error("peer used after disposal")]
    Disposed,
}

/// Why a peer was evicted. Reported through
///  [crate::peer_event::PeerEventHandler::on_peer_disconnected].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A reliable packet went unacknowledged through the full retry budget.
    Unreachable,
    /// No inbound traffic for the configured liveness window.
    TimedOut,
    /// The remote refused the login.
    Denied,
    /// The local application or the remote side ended the session.
    Left,
    /// The remote flooded the reorder buffer with out-of-order sequence numbers.
    ReceiveBufferFlooded,
    /// The local endpoint is shutting down.
    ShuttingDown,
}
