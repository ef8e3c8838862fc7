use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::PeerError;
use crate::packet::Packet;
use crate::peer_id::{PeerId, PeerKey};

/// delay before the first retransmission of a reliable packet
pub const RESEND_TIME: Duration = Duration::from_millis(200);
/// delay between retransmissions after the first
pub const RETRY_RESEND_TIME: Duration = Duration::from_millis(500);
/// number of retransmissions after which a peer is considered unreachable
pub const MAX_SEND_RETRIES: u32 = 20;
/// bound on the number of out-of-order reliable packets buffered per peer
pub const MAX_RECV_BUFFER_SIZE: usize = 30;

/// Reported by [Peer::tick_resends] so the endpoint can tell a struggling peer from a dead one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    /// all unacknowledged packets are still within the retry budget
    WithinBudget,
    /// at least one packet went through the full retry budget without being acknowledged
    RetriesExhausted,
}

struct PeerInner {
    /// the remote network address; rewritten when the same peer id shows up from a new
    ///  source address (NAT rebinding, WiFi-to-cellular switches and the like)
    endpoint: SocketAddr,
    id: PeerId,
    key: PeerKey,
    connected: bool,
    disposed: bool,

    /// sequence number for the next outbound reliable packet.
    ///
    /// NB: This is a u32 that wraps after ~4 billion reliable packets, which bounds a session
    ///      rather than being handled: at one reliable packet per millisecond that is 49 days
    ///      of uninterrupted control traffic to a single peer. The reorder buffer bound keeps
    ///      the live window tiny compared to the number space, so no serial-number arithmetic
    ///      is needed below that session bound.
    send_sequence: u32,
    /// the next inbound sequence number that can be delivered to the application
    expected_sequence: u32,

    /// outbound packets awaiting transmission; drained by the endpoint's egress loop
    send_queue: VecDeque<Packet>,
    /// unacknowledged reliable packets by sequence number, kept for retransmission
    reliability_queue: FxHashMap<u32, Packet>,
    /// reliable packets that arrived out of order, by sequence number, waiting for their
    ///  predecessors; bounded to [MAX_RECV_BUFFER_SIZE] entries
    receive_buffer: FxHashMap<u32, Packet>,

    /// when the last inbound packet was accepted; drives idle eviction
    last_active: Instant,

    /// in-order deliveries leave through this channel; the endpoint's per-peer dispatch task
    ///  consumes it. Sends happen inside the peer's critical section, which is what makes the
    ///  delivery order match the sequence order even when ingest is called from racing tasks.
    emissions: Option<mpsc::UnboundedSender<Packet>>,
}

impl PeerInner {
    fn check_disposed(&self) -> Result<(), PeerError> {
        if self.disposed {
            Err(PeerError::Disposed)
        }
        else {
            Ok(())
        }
    }

    fn emit(&self, packet: Packet) {
        if let Some(emissions) = &self.emissions {
            // the receiver only goes away when the peer is being torn down, so a failed
            //  send is not worth propagating
            let _ = emissions.send(packet);
        }
    }

    /// Common outbound path: reliable packets get their sequence number and initial resend
    ///  deadline here and are retained for retransmission until acknowledged.
    fn push_outbound(&mut self, mut packet: Packet) {
        if packet.is_reliable {
            packet.sequence = self.send_sequence;
            packet.resend_deadline = Some(Instant::now() + RESEND_TIME);
            self.reliability_queue.entry(packet.sequence).or_insert_with(|| packet.clone());
            self.send_sequence = self.send_sequence.wrapping_add(1);
        }
        self.send_queue.push_back(packet);
    }

    /// Deliver everything that became deliverable, in sequence order.
    ///
    /// Each pass discards buffered packets that fell below the delivery pointer (late
    ///  duplicates of already-delivered sequences), then hands out the packet at the pointer
    ///  if it is present. Looping until the pointer stops moving makes the result independent
    ///  of the order in which packets were buffered.
    fn drain_in_order(&mut self) {
        loop {
            let expected = self.expected_sequence;
            self.receive_buffer.retain(|&sequence, _| sequence >= expected);

            match self.receive_buffer.remove(&expected) {
                Some(packet) => {
                    self.expected_sequence = self.expected_sequence.wrapping_add(1);
                    trace!("delivering reliable packet #{}", packet.sequence);
                    self.emit(packet);
                }
                None => break,
            }
        }
    }
}

/// Per-remote-endpoint reliability state: a sliding sender window with retransmission, a
///  bounded reorder buffer delivering strictly monotonic sequence numbers, and the
///  login/accept handshake surface.
///
/// All methods are safe to call from racing tasks (ingress reader, application producer,
///  periodic tick); the state sits behind one lock per peer and no method blocks on I/O.
pub struct Peer {
    inner: RwLock<PeerInner>,
    cancel: CancellationToken,
}

impl Peer {
    /// A fresh peer with a random identity, not yet connected. In-order deliveries are pushed
    ///  into `emissions`.
    pub fn new(endpoint: SocketAddr, emissions: mpsc::UnboundedSender<Packet>) -> Peer {
        Peer {
            inner: RwLock::new(PeerInner {
                endpoint,
                id: PeerId::random(),
                key: PeerKey::random(),
                connected: false,
                disposed: false,
                send_sequence: 0,
                expected_sequence: 0,
                send_queue: VecDeque::new(),
                reliability_queue: FxHashMap::default(),
                receive_buffer: FxHashMap::default(),
                last_active: Instant::now(),
                emissions: Some(emissions),
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn id(&self) -> PeerId {
        self.inner.read().await.id
    }

    pub async fn key(&self) -> PeerKey {
        self.inner.read().await.key
    }

    pub async fn endpoint(&self) -> SocketAddr {
        self.inner.read().await.endpoint
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }

    pub async fn last_active(&self) -> Instant {
        self.inner.read().await.last_active
    }

    /// Fired on disposal; loops observing this peer terminate on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn set_endpoint(&self, endpoint: SocketAddr) -> Result<(), PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        inner.endpoint = endpoint;
        Ok(())
    }

    /// Queue a packet for transmission. Reliable packets are assigned the next sequence
    ///  number and retained until acknowledged.
    pub async fn enqueue(&self, packet: Packet) -> Result<(), PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        inner.push_outbound(packet);
        Ok(())
    }

    /// Process an inbound packet.
    ///
    /// Returns `Ok(false)` if the reorder buffer is saturated with out-of-order packets and
    ///  this one does not fill the gap - the remote is either hopelessly behind or flooding
    ///  garbage sequence numbers, and the caller gets to decide whether to reset or drop the
    ///  peer. Everything else is `Ok(true)`: unreliable packets are delivered immediately,
    ///  reliable ones are acknowledged, deduplicated and delivered once their predecessors
    ///  are in.
    pub async fn ingest(&self, packet: Packet) -> Result<bool, PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        inner.last_active = Instant::now();

        if inner.receive_buffer.len() >= MAX_RECV_BUFFER_SIZE
            && packet.sequence != inner.expected_sequence
        {
            warn!("receive buffer full and packet #{} is not the expected #{} - rejecting",
                packet.sequence, inner.expected_sequence);
            return Ok(false);
        }

        if !packet.is_reliable {
            trace!("delivering unreliable {:?} packet", packet.kind);
            inner.emit(packet);
            return Ok(true);
        }

        let sequence = packet.sequence;
        // a duplicate of a buffered packet is dropped silently, but it is acknowledged
        //  again - the previous ack may be the very thing that got lost
        inner.receive_buffer.entry(sequence).or_insert(packet);
        inner.push_outbound(Packet::ack(sequence));
        inner.drain_in_order();
        Ok(true)
    }

    /// Re-queue every reliable packet whose resend deadline has passed. Packets stay in the
    ///  reliability queue until acknowledged; only the deadline and retry counter move.
    pub async fn tick_resends(&self) -> Result<ResendOutcome, PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;

        let now = Instant::now();
        let mut resend = Vec::new();
        let mut exhausted = false;

        for packet in inner.reliability_queue.values_mut() {
            if packet.retries >= MAX_SEND_RETRIES {
                exhausted = true;
                continue;
            }
            if packet.resend_deadline.is_some_and(|deadline| deadline <= now) {
                packet.resend_deadline = Some(now + RETRY_RESEND_TIME);
                packet.retries += 1;
                debug!("resending packet #{} (retry {})", packet.sequence, packet.retries);
                resend.push(packet.clone());
                if packet.retries >= MAX_SEND_RETRIES {
                    exhausted = true;
                }
            }
        }
        inner.send_queue.extend(resend);

        if exhausted {
            Ok(ResendOutcome::RetriesExhausted)
        }
        else {
            Ok(ResendOutcome::WithinBudget)
        }
    }

    /// The remote confirmed a reliable packet; stop retransmitting it. Unknown sequence
    ///  numbers are a no-op - acks for long-acknowledged packets arrive whenever the remote
    ///  re-acks a duplicate.
    pub async fn acknowledge(&self, sequence: u32) -> Result<(), PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        inner.last_active = Instant::now();
        if inner.reliability_queue.remove(&sequence).is_some() {
            trace!("packet #{} acknowledged", sequence);
        }
        Ok(())
    }

    /// Accepting side of the handshake: mark the peer connected and queue an `Accept`
    ///  carrying its assigned key. Idempotent; returns whether this call did the transition,
    ///  so exactly one caller gets to announce the new peer.
    pub async fn accept_login(&self) -> Result<bool, PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        if inner.connected {
            return Ok(false);
        }
        inner.connected = true;
        let accept = Packet::accept(inner.key);
        inner.push_outbound(accept);
        Ok(true)
    }

    /// Connecting side of the handshake: adopt the identity assigned by the remote's
    ///  `Accept` and mark the peer connected. Idempotent like [Self::accept_login].
    pub async fn complete_login(&self, id: PeerId, key: PeerKey) -> Result<bool, PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        if inner.connected {
            return Ok(false);
        }
        debug!("login complete, assigned id {} / key {}", id, key);
        inner.id = id;
        inner.key = key;
        inner.connected = true;
        Ok(true)
    }

    /// Drain the send queue for transmission, stamping each packet with this peer's current
    ///  id so the remote can associate roamed traffic.
    pub async fn take_outbound(&self) -> Result<Vec<Packet>, PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        let id = inner.id;
        Ok(inner.send_queue
            .drain(..)
            .map(|mut packet| {
                packet.peer_id = id;
                packet
            })
            .collect())
    }

    /// Throw away all in-flight state and start both sequence counters over. Identity,
    ///  connectedness and the endpoint survive a reset.
    pub async fn reset(&self) -> Result<(), PeerError> {
        let mut inner = self.inner.write().await;
        inner.check_disposed()?;
        debug!("resetting peer {}", inner.id);
        inner.send_queue.clear();
        inner.reliability_queue.clear();
        inner.receive_buffer.clear();
        inner.send_sequence = 0;
        inner.expected_sequence = 0;
        Ok(())
    }

    /// Tear the peer down: fire the cancellation token, drop all queued state and close the
    ///  emission channel. Every subsequent operation fails with [PeerError::Disposed].
    ///  Returns whether this call did the teardown, so eviction paths racing each other
    ///  report the disconnect exactly once.
    pub async fn dispose(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.disposed {
            return false;
        }
        inner.disposed = true;
        inner.connected = false;
        inner.send_queue.clear();
        inner.reliability_queue.clear();
        inner.receive_buffer.clear();
        inner.emissions = None;
        self.cancel.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use rstest::rstest;
    use tokio::runtime::Builder;
    use tokio::time;

    fn test_peer() -> (Peer, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(SocketAddr::from(([127, 0, 0, 1], 9)), tx), rx)
    }

    fn arrived(sequence: u32) -> Packet {
        let mut packet = Packet::reliable(PacketKind::Control, vec![]);
        packet.sequence = sequence;
        packet
    }

    fn emitted(rx: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut result = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            result.push(packet);
        }
        result
    }

    async fn queued_acks(peer: &Peer) -> Vec<u32> {
        peer.take_outbound().await.unwrap()
            .iter()
            .filter(|p| p.kind == PacketKind::Ack)
            .map(|p| p.ack_sequence().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_assigns_monotonic_sequences() {
        let (peer, _rx) = test_peer();

        for _ in 0..5 {
            peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        }

        let inner = peer.inner.read().await;
        assert_eq!(inner.send_sequence, 5);
        assert_eq!(inner.send_queue.len(), 5);
        assert_eq!(
            inner.send_queue.iter().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4],
        );
        let mut retained = inner.reliability_queue.keys().cloned().collect::<Vec<_>>();
        retained.sort();
        assert_eq!(retained, vec![0, 1, 2, 3, 4]);
        assert!(inner.reliability_queue.values().all(|p| p.resend_deadline.is_some()));
    }

    #[tokio::test]
    async fn test_enqueue_unreliable_bypasses_the_reliability_queue() {
        let (peer, _rx) = test_peer();

        peer.enqueue(Packet::unreliable(PacketKind::Voice, vec![1])).await.unwrap();

        let inner = peer.inner.read().await;
        assert_eq!(inner.send_sequence, 0);
        assert!(inner.reliability_queue.is_empty());
        assert_eq!(inner.send_queue.len(), 1);
        assert_eq!(inner.send_queue[0].resend_deadline, None);
    }

    #[rstest]
    #[case::in_order(vec![0, 1, 2], vec![0, 1, 2], 3)]
    #[case::reordered(vec![2, 0, 1, 4, 3], vec![0, 1, 2, 3, 4], 5)]
    #[case::reversed(vec![4, 3, 2, 1, 0], vec![0, 1, 2, 3, 4], 5)]
    #[case::duplicates(vec![0, 0, 1, 1, 2], vec![0, 1, 2], 3)]
    #[case::gap_stays_buffered(vec![0, 2, 3], vec![0], 1)]
    #[case::nothing_deliverable(vec![5, 6], vec![], 0)]
    fn test_ingest_delivers_in_order(
        #[case] arrivals: Vec<u32>,
        #[case] expected_deliveries: Vec<u32>,
        #[case] expected_next: u32,
    ) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let (peer, mut rx) = test_peer();

            for &sequence in &arrivals {
                assert!(peer.ingest(arrived(sequence)).await.unwrap());
            }

            assert_eq!(
                emitted(&mut rx).iter().map(|p| p.sequence).collect::<Vec<_>>(),
                expected_deliveries,
            );
            // every arrival is acknowledged, duplicates included
            assert_eq!(queued_acks(&peer).await, arrivals);

            let inner = peer.inner.read().await;
            assert_eq!(inner.expected_sequence, expected_next);
            assert!(inner.receive_buffer.keys().all(|&s| s >= expected_next));
        });
    }

    #[tokio::test]
    async fn test_late_duplicate_of_delivered_packet_is_dropped_silently() {
        let (peer, mut rx) = test_peer();

        assert!(peer.ingest(arrived(0)).await.unwrap());
        assert!(peer.ingest(arrived(1)).await.unwrap());
        assert_eq!(emitted(&mut rx).len(), 2);

        // sequence 0 shows up again after having been delivered
        assert!(peer.ingest(arrived(0)).await.unwrap());

        assert!(emitted(&mut rx).is_empty());
        assert_eq!(queued_acks(&peer).await, vec![0, 1, 0]);
        let inner = peer.inner.read().await;
        assert!(inner.receive_buffer.is_empty());
        assert_eq!(inner.expected_sequence, 2);
    }

    #[tokio::test]
    async fn test_unreliable_packets_bypass_ordering() {
        let (peer, mut rx) = test_peer();

        let unreliable = |marker: u8| Packet::unreliable(PacketKind::Voice, vec![marker]);

        assert!(peer.ingest(unreliable(1)).await.unwrap());
        assert!(peer.ingest(arrived(1)).await.unwrap());
        assert!(peer.ingest(unreliable(2)).await.unwrap());
        assert!(peer.ingest(arrived(0)).await.unwrap());

        let delivered = emitted(&mut rx);
        assert_eq!(
            delivered.iter().map(|p| (p.kind, p.sequence)).collect::<Vec<_>>(),
            vec![
                (PacketKind::Voice, 0),
                (PacketKind::Voice, 0),
                (PacketKind::Control, 0),
                (PacketKind::Control, 1),
            ],
        );
        assert_eq!(delivered[0].payload, vec![1]);
        assert_eq!(delivered[1].payload, vec![2]);
        // only the reliable arrivals are acknowledged
        assert_eq!(queued_acks(&peer).await, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_saturated_receive_buffer_rejects_all_but_the_expected_sequence() {
        let (peer, mut rx) = test_peer();

        // 30 out-of-order packets fill the buffer
        for sequence in 1..=30 {
            assert!(peer.ingest(arrived(sequence)).await.unwrap());
        }
        assert!(emitted(&mut rx).is_empty());
        assert_eq!(peer.inner.read().await.receive_buffer.len(), 30);

        // a 31st out-of-order packet is rejected
        assert!(!peer.ingest(arrived(31)).await.unwrap());
        assert_eq!(peer.inner.read().await.receive_buffer.len(), 30);

        // the missing head of the window is still let through and flushes everything
        assert!(peer.ingest(arrived(0)).await.unwrap());
        assert_eq!(
            emitted(&mut rx).iter().map(|p| p.sequence).collect::<Vec<_>>(),
            (0..=30).collect::<Vec<_>>(),
        );
        let inner = peer.inner.read().await;
        assert!(inner.receive_buffer.is_empty());
        assert_eq!(inner.expected_sequence, 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_ingest_still_counts_as_liveness() {
        let (peer, _rx) = test_peer();
        for sequence in 1..=30 {
            peer.ingest(arrived(sequence)).await.unwrap();
        }

        time::advance(Duration::from_secs(5)).await;
        let before = peer.last_active().await;
        time::advance(Duration::from_secs(1)).await;
        assert!(!peer.ingest(arrived(99)).await.unwrap());

        assert!(peer.last_active().await > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_schedule() {
        let (peer, _rx) = test_peer();

        peer.enqueue(Packet::reliable(PacketKind::Control, vec![7])).await.unwrap();
        // the initial transmission leaves the queue
        assert_eq!(peer.take_outbound().await.unwrap().len(), 1);

        // one millisecond short of the resend deadline: nothing happens
        time::advance(Duration::from_millis(199)).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::WithinBudget);
        assert!(peer.take_outbound().await.unwrap().is_empty());

        // at the deadline: first retry, next deadline 500ms out
        time::advance(Duration::from_millis(1)).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::WithinBudget);
        let resent = peer.take_outbound().await.unwrap();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].retries, 1);

        time::advance(Duration::from_millis(499)).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::WithinBudget);
        assert!(peer.take_outbound().await.unwrap().is_empty());

        time::advance(Duration::from_millis(1)).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::WithinBudget);
        assert_eq!(peer.take_outbound().await.unwrap()[0].retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_packet_exhausts_its_retries() {
        let (peer, _rx) = test_peer();

        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.take_outbound().await.unwrap();

        time::advance(RESEND_TIME).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::WithinBudget); // retry 1

        for retry in 2..=MAX_SEND_RETRIES {
            time::advance(RETRY_RESEND_TIME).await;
            let outcome = peer.tick_resends().await.unwrap();
            if retry == MAX_SEND_RETRIES {
                assert_eq!(outcome, ResendOutcome::RetriesExhausted);
            }
            else {
                assert_eq!(outcome, ResendOutcome::WithinBudget);
            }
        }

        // the tick keeps reporting exhaustion until the endpoint acts on it
        time::advance(RETRY_RESEND_TIME).await;
        assert_eq!(peer.tick_resends().await.unwrap(), ResendOutcome::RetriesExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_stops_retransmission() {
        let (peer, _rx) = test_peer();

        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.take_outbound().await.unwrap();

        peer.acknowledge(0).await.unwrap();

        time::advance(RESEND_TIME).await;
        peer.tick_resends().await.unwrap();
        let resent = peer.take_outbound().await.unwrap();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_of_unknown_sequence_is_a_no_op() {
        let (peer, _rx) = test_peer();

        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.acknowledge(17).await.unwrap();

        let inner = peer.inner.read().await;
        assert_eq!(inner.reliability_queue.len(), 1);
        assert!(inner.reliability_queue.contains_key(&0));
    }

    #[tokio::test]
    async fn test_accept_login_is_idempotent() {
        let (peer, _rx) = test_peer();
        let key = peer.key().await;

        assert!(peer.accept_login().await.unwrap());
        assert!(!peer.accept_login().await.unwrap());
        assert!(peer.is_connected().await);

        let accepts = peer.take_outbound().await.unwrap()
            .into_iter()
            .filter(|p| p.kind == PacketKind::Accept)
            .collect::<Vec<_>>();
        assert_eq!(accepts.len(), 1);
        assert!(accepts[0].is_reliable);
        assert_eq!(accepts[0].accept_key().unwrap(), key);
    }

    #[tokio::test]
    async fn test_complete_login_adopts_the_assigned_identity_once() {
        let (peer, _rx) = test_peer();

        let assigned_id = PeerId::from_raw(42);
        let assigned_key = PeerKey::from_raw(7);
        assert!(peer.complete_login(assigned_id, assigned_key).await.unwrap());
        assert_eq!(peer.id().await, assigned_id);
        assert_eq!(peer.key().await, assigned_key);
        assert!(peer.is_connected().await);

        // a retransmitted accept must not re-assign
        assert!(!peer.complete_login(PeerId::from_raw(43), PeerKey::from_raw(8)).await.unwrap());
        assert_eq!(peer.id().await, assigned_id);
        assert_eq!(peer.key().await, assigned_key);
    }

    #[tokio::test]
    async fn test_take_outbound_stamps_the_current_peer_id() {
        let (peer, _rx) = test_peer();
        peer.complete_login(PeerId::from_raw(42), PeerKey::from_raw(7)).await.unwrap();

        peer.enqueue(Packet::unreliable(PacketKind::Voice, vec![])).await.unwrap();
        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();

        let outbound = peer.take_outbound().await.unwrap();
        assert_eq!(outbound.len(), 2);
        assert!(outbound.iter().all(|p| p.peer_id == PeerId::from_raw(42)));
    }

    #[tokio::test]
    async fn test_reset_starts_the_session_over_but_keeps_the_identity() {
        let (peer, mut rx) = test_peer();

        peer.accept_login().await.unwrap();
        let id = peer.id().await;
        let key = peer.key().await;

        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        peer.ingest(arrived(0)).await.unwrap();
        peer.ingest(arrived(5)).await.unwrap();

        peer.reset().await.unwrap();

        {
            let inner = peer.inner.read().await;
            assert_eq!(inner.send_sequence, 0);
            assert_eq!(inner.expected_sequence, 0);
            assert!(inner.send_queue.is_empty());
            assert!(inner.reliability_queue.is_empty());
            assert!(inner.receive_buffer.is_empty());
        }
        assert_eq!(peer.id().await, id);
        assert_eq!(peer.key().await, key);
        assert!(peer.is_connected().await);

        // the counters really start over
        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();
        assert_eq!(peer.take_outbound().await.unwrap()[0].sequence, 0);
        peer.ingest(arrived(0)).await.unwrap();
        emitted(&mut rx); // pre-reset deliveries
        assert_eq!(peer.inner.read().await.expected_sequence, 1);
    }

    #[tokio::test]
    async fn test_disposed_peer_rejects_every_operation() {
        let (peer, mut rx) = test_peer();
        peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await.unwrap();

        assert!(peer.dispose().await);
        assert!(!peer.dispose().await);

        assert!(peer.cancel_token().is_cancelled());
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));

        assert_eq!(peer.enqueue(Packet::reliable(PacketKind::Control, vec![])).await, Err(PeerError::Disposed));
        assert_eq!(peer.ingest(arrived(0)).await, Err(PeerError::Disposed));
        assert_eq!(peer.tick_resends().await, Err(PeerError::Disposed));
        assert_eq!(peer.acknowledge(0).await, Err(PeerError::Disposed));
        assert_eq!(peer.accept_login().await, Err(PeerError::Disposed));
        assert_eq!(peer.complete_login(PeerId::from_raw(1), PeerKey::from_raw(1)).await, Err(PeerError::Disposed));
        assert_eq!(peer.take_outbound().await, Err(PeerError::Disposed));
        assert_eq!(peer.reset().await, Err(PeerError::Disposed));
        assert_eq!(peer.set_endpoint(SocketAddr::from(([127, 0, 0, 1], 10))).await, Err(PeerError::Disposed));

        let inner = peer.inner.read().await;
        assert!(inner.send_queue.is_empty());
        assert!(inner.reliability_queue.is_empty());
        assert!(inner.receive_buffer.is_empty());
        assert!(!inner.connected);
    }
}
