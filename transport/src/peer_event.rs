use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::error::DisconnectReason;
use crate::packet::Packet;
use crate::peer::Peer;
use crate::peer_id::PeerId;

/// The application's view of the transport. Implementations are called from the endpoint's
///  dispatch tasks, outside of any peer lock - calling back into the transport (e.g.
///  [Peer::enqueue] from [Self::on_packet_received]) is fine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerEventHandler: Send + Sync + 'static {
    /// Fires once for every in-order reliable packet and once for every unreliable packet.
    async fn on_packet_received(&self, peer: Arc<Peer>, packet: Packet);

    /// Fires when a peer's handshake completes, on both the accepting and the connecting side.
    async fn on_peer_connected(&self, peer: Arc<Peer>);

    /// Fires when a peer is evicted, with the reason.
    async fn on_peer_disconnected(&self, peer_id: PeerId, reason: DisconnectReason);
}
