//! Peer reliability and ordering layer for a real-time proximity voice chat. It sits on top
//!  of a plain UDP socket and gives each remote peer selectively reliable, strictly in-order
//!  delivery of control packets, unfiltered passthrough of voice packets, liveness tracking,
//!  and a minimal login handshake.
//!
//! ## Design goals
//!
//! * Voice traffic never waits for anything. A late voice frame is worthless, so voice
//!   packets are unreliable: no sequence numbers, no acknowledgement, no reorder buffering,
//!   delivered in arrival order.
//! * Control traffic (joins, binds, session metadata) is rare but must arrive, exactly once
//!   and in order. Reliable packets carry a sequence number, are acknowledged individually,
//!   and are retransmitted on a fixed schedule until acknowledged or the peer is declared
//!   unreachable.
//! * One UDP socket per process handles all peers; packets are demultiplexed by source
//!   address, falling back to the peer id in the header so that a client switching networks
//!   (NAT rebinding, WiFi to cellular) keeps its session - the peer's endpoint is simply
//!   rewritten to the new source address.
//! * A peer that floods the reorder buffer with out-of-order sequence numbers, exhausts the
//!   retry budget of a reliable packet, or goes silent past the liveness window is evicted;
//!   the application is told why.
//! * No congestion control beyond the fixed retry schedule, no encryption, no fragmentation:
//!   packets are single datagrams and the application keeps them under the path MTU.
//!
//! ## Header
//!
//! Packet header (inside a UDP datagram) - all numbers in network byte order (BE):
//! ```ascii
//! 0:  protocol version (u8)
//! 1:  packet kind (u8):
//!     * 0 LOGIN
//!     * 1 ACCEPT
//!     * 2 DENY
//!     * 3 ACK
//!     * 4 DISCONNECT
//!     * 5 CONTROL
//!     * 6 VOICE
//! 2:  flags (u8):
//!     * bit 0: reliable - the packet is sequenced, acknowledged and retransmitted
//!     * bit 1-7: unused, should be 0
//! 3:  peer id (i64): the id the sender is known by at the receiving end, or the i64
//!      minimum as "no id assigned yet". Assigned by the accepting side during the
//!      handshake.
//! 11: sequence number (u32): position in the sender's reliable stream; 0 and meaningless
//!      when the reliable flag is clear
//! 15: payload - opaque to this layer
//! ```
//!
//! ## Handshake
//!
//! *LOGIN*
//!
//! Sent reliably by the connecting side. The accepting side creates a peer record with a
//!  fresh random id and key and answers with ACCEPT, or with DENY when it is at its peer
//!  limit. A retransmitted LOGIN is deduplicated like any other reliable packet.
//!
//! *ACCEPT*
//!
//! Sent reliably by the accepting side; the header carries the assigned peer id and the
//!  payload the assigned public key (i16 BE). The connecting side adopts both and reports
//!  the peer as connected. Both sides stamp all subsequent packets with the assigned id,
//!  which is what makes id-based endpoint rewriting work.
//!
//! *ACK*
//!
//! Unreliable; payload is the acknowledged sequence number (u32 BE). Every arriving
//!  reliable packet is acknowledged, duplicates included - the previous ack may be the
//!  very datagram that was lost.
//!
//! *DENY / DISCONNECT*
//!
//! Terminal, no payload. DENY refuses a login; DISCONNECT announces a graceful leave and
//!  is best-effort - if it is lost, the liveness timeout cleans up.
//!
//! ## Related:
//! * QUIC - connection ids serve the same roaming purpose as the peer id here, but QUIC
//!   brings handshake encryption and stream multiplexing this layer deliberately avoids
//! * RakNet - same split into per-packet reliability classes for game traffic
//! * RTP over UDP - voice-frame transport without retransmission; this layer adds the
//!   reliable control plane RTP delegates to signaling

pub mod config;
pub mod end_point;
pub mod error;
pub mod packet;
pub mod peer;
pub mod peer_event;
pub mod peer_id;
pub mod send_socket;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
