use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use transport::config::TransportConfig;
use transport::end_point::EndPoint;
use transport::error::DisconnectReason;
use transport::packet::{Packet, PacketKind};
use transport::peer::Peer;
use transport::peer_event::PeerEventHandler;
use transport::peer_id::PeerId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let addr_a: SocketAddr = SocketAddr::from_str("127.0.0.1:9100")?;
    let addr_b: SocketAddr = SocketAddr::from_str("127.0.0.1:9101")?;

    let a = Arc::new(EndPoint::new(
        Arc::new(TransportConfig::default_for_addr(addr_a)),
        Arc::new(LoggingEventHandler { name: "a" }),
    ).await?);
    let b = Arc::new(EndPoint::new(
        Arc::new(TransportConfig::default_for_addr(addr_b)),
        Arc::new(LoggingEventHandler { name: "b" }),
    ).await?);

    let cloned_a = a.clone();
    let cloned_b = b.clone();
    tokio::spawn(async move { cloned_a.run().await });
    tokio::spawn(async move { cloned_b.run().await });

    let remote_b = a.connect(addr_b).await?;
    while !remote_b.is_connected().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    info!("a is connected to b as {}", remote_b.id().await);

    remote_b.enqueue(Packet::reliable(PacketKind::Control, b"bind me to player 1".to_vec())).await?;
    for frame in 0u8..5 {
        remote_b.enqueue(Packet::unreliable(PacketKind::Voice, vec![frame; 160])).await?;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    a.disconnect(remote_b.id().await).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

struct LoggingEventHandler {
    name: &'static str,
}

#[async_trait::async_trait]
impl PeerEventHandler for LoggingEventHandler {
    async fn on_packet_received(&self, peer: Arc<Peer>, packet: Packet) {
        info!("[{}] received {:?} packet of {} bytes from peer {}",
            self.name, packet.kind, packet.payload.len(), peer.id().await);
    }

    async fn on_peer_connected(&self, peer: Arc<Peer>) {
        info!("[{}] peer {} connected with key {}", self.name, peer.id().await, peer.key().await);
    }

    async fn on_peer_disconnected(&self, peer_id: PeerId, reason: DisconnectReason) {
        info!("[{}] peer {} disconnected: {:?}", self.name, peer_id, reason);
    }
}
