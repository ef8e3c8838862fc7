use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::TransportConfig;
use crate::error::{DisconnectReason, PeerError};
use crate::packet::{Packet, PacketKind};
use crate::peer::{Peer, ResendOutcome, MAX_SEND_RETRIES};
use crate::peer_event::PeerEventHandler;
use crate::peer_id::PeerId;
use crate::send_socket::SendSocket;

const MAX_DATAGRAM_LEN: usize = 1500;

#[derive(Default)]
struct PeerTable {
    by_endpoint: FxHashMap<SocketAddr, Arc<Peer>>,
    by_id: FxHashMap<PeerId, Arc<Peer>>,
}

impl PeerTable {
    /// Removal is by pointer identity rather than by key: both the endpoint and the id of a
    ///  peer can be rewritten while an eviction is in flight, and a stale key must not leave
    ///  a dangling entry behind.
    fn remove(&mut self, peer: &Arc<Peer>) {
        self.by_endpoint.retain(|_, p| !Arc::ptr_eq(p, peer));
        self.by_id.retain(|_, p| !Arc::ptr_eq(p, peer));
    }

    fn live_peers(&self) -> Vec<Arc<Peer>> {
        self.by_endpoint.values().cloned().collect()
    }
}

/// EndPoint is the place where all other parts of the protocol come together: It listens on a
///  UdpSocket, demultiplexes incoming packets onto their peers, drains the peers' send queues
///  back onto the socket, and runs the periodic tick that retransmits and evicts.
///
/// Ingress resolution order is: exact source-address match first; failing that, the peer id
///  carried in the packet header, in which case the peer's endpoint is rewritten to the new
///  source address (this is what lets a client survive NAT rebinding and network switches).
///  A packet matching neither is a login attempt or noise.
pub struct EndPoint {
    config: Arc<TransportConfig>,
    receive_socket: Arc<UdpSocket>,
    send_socket: Arc<dyn SendSocket>,
    peers: Arc<RwLock<PeerTable>>,
    events: Arc<dyn PeerEventHandler>,
    cancel: CancellationToken,
}

impl EndPoint {
    pub async fn new(
        config: Arc<TransportConfig>,
        events: Arc<dyn PeerEventHandler>,
    ) -> anyhow::Result<EndPoint> {
        config.validate()?;

        let receive_socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound receive socket to {:?}", receive_socket.local_addr()?);

        Ok(EndPoint {
            config,
            receive_socket: receive_socket.clone(),
            send_socket: Arc::new(receive_socket),
            peers: Default::default(),
            events,
            cancel: CancellationToken::new(),
        })
    }

    pub fn self_addr(&self) -> SocketAddr {
        self.receive_socket.local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }

    pub async fn get_peer(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.by_id.get(&id).cloned()
    }

    /// Drive the endpoint until [Self::shutdown] is called. Ingress and the periodic loops
    ///  run concurrently inside this future, so a single spawned task per endpoint is enough.
    pub async fn run(&self) {
        select! {
            _ = self.cancel.cancelled() => {}
            _ = self.recv_loop() => {}
            _ = self.drive_loop() => {}
        }
    }

    /// Initiate a session with a remote endpoint: creates the local peer record and queues a
    ///  `Login`. The peer reports connected once the remote's `Accept` arrives.
    pub async fn connect(&self, remote: SocketAddr) -> anyhow::Result<Arc<Peer>> {
        if let Some(peer) = self.peers.read().await.by_endpoint.get(&remote) {
            return Ok(peer.clone());
        }

        let peer = self.create_peer(remote).await;
        debug!("connecting to {:?}", remote);
        peer.enqueue(Packet::reliable(PacketKind::Login, Vec::new())).await?;
        Ok(peer)
    }

    /// End a session gracefully: best-effort `Disconnect` notification, then local eviction.
    ///  If the notification is lost the remote falls back to its liveness timeout.
    pub async fn disconnect(&self, id: PeerId) {
        let peer = self.peers.read().await.by_id.get(&id).cloned();
        if let Some(peer) = peer {
            let to = peer.endpoint().await;
            let mut leave = Packet::unreliable(PacketKind::Disconnect, Vec::new());
            leave.peer_id = id;
            self.send_packet(to, &leave).await;
            Self::evict_peer(&self.peers, &self.events, &peer, DisconnectReason::Left).await;
        }
    }

    /// Stop the loops and dispose every peer.
    pub async fn shutdown(&self) {
        info!("shutting down endpoint");
        self.cancel.cancel();

        let peers = {
            let mut table = self.peers.write().await;
            let peers = table.live_peers();
            table.by_endpoint.clear();
            table.by_id.clear();
            peers
        };
        for peer in peers {
            if peer.dispose().await {
                self.events.on_peer_disconnected(peer.id().await, DisconnectReason::ShuttingDown).await;
            }
        }
    }

    async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let (num_read, from) = match self.receive_socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let packet = match Packet::deser(&mut &buf[..num_read]) {
                Ok(packet) => packet,
                Err(_) => {
                    // a malformed datagram says nothing about the health of the peer it
                    //  claims to come from - drop it, keep the peer
                    warn!("received packet with unparsable header from {:?}, dropping", from);
                    continue;
                }
            };

            trace!("received {:?} packet from {:?}", packet.kind, from);
            self.handle_packet(from, packet).await;
        }
    }

    async fn handle_packet(&self, from: SocketAddr, packet: Packet) {
        let peer = self.resolve_peer(from, packet.peer_id).await;

        match packet.kind {
            PacketKind::Login => match peer {
                // a retransmitted login for an existing peer only needs re-acking, which
                //  ingest takes care of via its duplicate handling
                Some(peer) => {
                    let _ = peer.ingest(packet).await;
                }
                None => self.handle_new_login(from, packet).await,
            },
            PacketKind::Ack => {
                let Some(peer) = peer else {
                    debug!("ack from unknown source {:?} - dropping", from);
                    return;
                };
                match packet.ack_sequence() {
                    Ok(sequence) => {
                        let _ = peer.acknowledge(sequence).await;
                    }
                    Err(_) => warn!("malformed ack from {:?} - dropping", from),
                }
            }
            PacketKind::Deny => {
                if let Some(peer) = peer {
                    debug!("login denied by {:?}", from);
                    Self::evict_peer(&self.peers, &self.events, &peer, DisconnectReason::Denied).await;
                }
            }
            _ => {
                let Some(peer) = peer else {
                    debug!("{:?} packet from unknown source {:?} - dropping", packet.kind, from);
                    return;
                };
                match peer.ingest(packet).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("peer {} saturated its receive buffer with out-of-order packets - dropping peer", peer.id().await);
                        Self::evict_peer(&self.peers, &self.events, &peer, DisconnectReason::ReceiveBufferFlooded).await;
                    }
                    // an eviction raced the ingress path; nothing left to do
                    Err(PeerError::Disposed) => {}
                }
            }
        }
    }

    async fn resolve_peer(&self, from: SocketAddr, id: PeerId) -> Option<Arc<Peer>> {
        {
            let table = self.peers.read().await;
            if let Some(peer) = table.by_endpoint.get(&from) {
                return Some(peer.clone());
            }
        }

        if id == PeerId::NONE {
            return None;
        }
        let peer = self.peers.read().await.by_id.get(&id).cloned()?;

        debug!("peer {} now sends from {:?} - rewriting its endpoint", id, from);
        peer.set_endpoint(from).await.ok()?;
        let mut table = self.peers.write().await;
        table.by_endpoint.retain(|_, p| !Arc::ptr_eq(p, &peer));
        table.by_endpoint.insert(from, peer.clone());
        Some(peer)
    }

    async fn handle_new_login(&self, from: SocketAddr, packet: Packet) {
        let peer_count = self.peers.read().await.by_endpoint.len();
        if peer_count >= self.config.max_peers {
            warn!("login from {:?} rejected: peer limit of {} reached", from, self.config.max_peers);
            self.send_packet(from, &Packet::unreliable(PacketKind::Deny, Vec::new())).await;
            return;
        }

        let peer = self.create_peer(from).await;
        debug!("created peer {} for login from {:?}", peer.id().await, from);
        let _ = peer.ingest(packet).await;
    }

    async fn create_peer(&self, endpoint: SocketAddr) -> Arc<Peer> {
        let (emissions, emissions_recv) = mpsc::unbounded_channel();
        let peer = Arc::new(Peer::new(endpoint, emissions));

        {
            let mut table = self.peers.write().await;
            table.by_endpoint.insert(endpoint, peer.clone());
            table.by_id.insert(peer.id().await, peer.clone());
        }

        self.spawn_peer_dispatch(peer.clone(), emissions_recv);
        peer
    }

    /// One task per peer pulls in-order deliveries off the peer's emission channel,
    ///  translates the lifecycle kinds into peer state transitions and hands everything else
    ///  to the application. Running this outside the peer's critical section is what allows
    ///  event handlers to call back into the transport.
    fn spawn_peer_dispatch(&self, peer: Arc<Peer>, mut emissions: mpsc::UnboundedReceiver<Packet>) {
        let peers = self.peers.clone();
        let events = self.events.clone();
        let peer_cancel = peer.cancel_token();
        let endpoint_cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let packet = select! {
                    biased;
                    _ = peer_cancel.cancelled() => break,
                    _ = endpoint_cancel.cancelled() => break,
                    packet = emissions.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                };

                match packet.kind {
                    PacketKind::Login => {
                        if let Ok(true) = peer.accept_login().await {
                            events.on_peer_connected(peer.clone()).await;
                        }
                    }
                    PacketKind::Accept => {
                        let Ok(key) = packet.accept_key() else {
                            warn!("malformed accept payload from {:?} - dropping", peer.endpoint().await);
                            continue;
                        };
                        if let Ok(true) = peer.complete_login(packet.peer_id, key).await {
                            // the provisional random id is dead, re-key to the assigned one
                            let mut table = peers.write().await;
                            table.by_id.retain(|_, p| !Arc::ptr_eq(p, &peer));
                            table.by_id.insert(packet.peer_id, peer.clone());
                            drop(table);
                            events.on_peer_connected(peer.clone()).await;
                        }
                    }
                    PacketKind::Disconnect => {
                        Self::evict_peer(&peers, &events, &peer, DisconnectReason::Left).await;
                    }
                    _ => events.on_packet_received(peer.clone(), packet).await,
                }
            }
        });
    }

    async fn drive_loop(&self) {
        let mut egress = interval(self.config.egress_interval);
        let mut tick = interval(self.config.tick_interval);

        loop {
            select! {
                _ = egress.tick() => self.drain_outbound().await,
                _ = tick.tick() => self.tick_peers().await,
            }
        }
    }

    async fn drain_outbound(&self) {
        let peers = self.peers.read().await.live_peers();
        for peer in peers {
            let Ok(packets) = peer.take_outbound().await else { continue };
            if packets.is_empty() {
                continue;
            }
            let to = peer.endpoint().await;
            for packet in packets {
                self.send_packet(to, &packet).await;
            }
        }
    }

    async fn tick_peers(&self) {
        let now = Instant::now();
        let peers = self.peers.read().await.live_peers();

        for peer in peers {
            match peer.tick_resends().await {
                Ok(ResendOutcome::WithinBudget) => {}
                Ok(ResendOutcome::RetriesExhausted) => {
                    warn!("peer {} unreachable: a packet went unacknowledged through {} retries", peer.id().await, MAX_SEND_RETRIES);
                    Self::evict_peer(&self.peers, &self.events, &peer, DisconnectReason::Unreachable).await;
                    continue;
                }
                Err(PeerError::Disposed) => continue,
            }

            if now.duration_since(peer.last_active().await) > self.config.idle_timeout {
                debug!("peer {} idle for longer than {:?} - evicting", peer.id().await, self.config.idle_timeout);
                Self::evict_peer(&self.peers, &self.events, &peer, DisconnectReason::TimedOut).await;
            }
        }
    }

    async fn evict_peer(
        peers: &RwLock<PeerTable>,
        events: &Arc<dyn PeerEventHandler>,
        peer: &Arc<Peer>,
        reason: DisconnectReason,
    ) {
        peers.write().await.remove(peer);

        // dispose reports whether this call actually tore the peer down, so racing
        //  evictions announce the disconnect exactly once
        if peer.dispose().await {
            let id = peer.id().await;
            debug!("peer {} evicted: {:?}", id, reason);
            events.on_peer_disconnected(id, reason).await;
        }
    }

    async fn send_packet(&self, to: SocketAddr, packet: &Packet) {
        let mut buf = BytesMut::with_capacity(Packet::HEADER_LEN + packet.payload.len());
        packet.ser(&mut buf);
        self.send_socket.do_send_packet(packet.peer_id, to, &buf).await;
    }
}
