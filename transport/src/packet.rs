use anyhow::bail;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::time::Instant;

use crate::peer_id::{PeerId, PeerKey};

/// The kind of a packet. The transport layer interprets the lifecycle kinds (`Login`,
///  `Accept`, `Deny`, `Ack`, `Disconnect`) itself; `Control` and `Voice` are handed to the
///  application unchanged.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketKind {
    /// request to join, sent by the connecting side
    Login = 0,
    /// positive handshake outcome; payload carries the assigned public key
    Accept = 1,
    /// negative handshake outcome
    Deny = 2,
    /// acknowledgement of a reliable packet; payload carries the acknowledged sequence number
    Ack = 3,
    /// graceful end of the session
    Disconnect = 4,
    /// application control data, typically sent reliably
    Control = 5,
    /// voice frames, sent unreliably - late audio is worthless, so it is never retransmitted
    Voice = 6,
}

/// A single packet as it travels through the layer. The header fields (`kind`, `is_reliable`,
///  `sequence`, `peer_id`) go on the wire; `retries` and `resend_deadline` are sender-local
///  retransmission bookkeeping and are never serialized. The payload is opaque here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub is_reliable: bool,
    /// assigned from the peer's send counter at enqueue time; meaningful only when
    ///  `is_reliable` is set
    pub sequence: u32,
    /// the id the sender is known by at the receiving end ([PeerId::NONE] before the
    ///  handshake has assigned one)
    pub peer_id: PeerId,
    pub payload: Vec<u8>,

    /// number of retransmissions so far
    pub retries: u32,
    /// the point in time after which the packet becomes eligible for retransmission;
    ///  `None` for unreliable packets and for packets that were received rather than sent
    pub resend_deadline: Option<Instant>,
}

const FLAG_RELIABLE: u8 = 1;

impl Packet {
    pub const PROTOCOL_VERSION_1: u8 = 0;

    /// version + kind + flags + peer id + sequence
    pub const HEADER_LEN: usize = 1 + 1 + 1 + 8 + 4;

    pub fn reliable(kind: PacketKind, payload: Vec<u8>) -> Packet {
        Packet {
            kind,
            is_reliable: true,
            sequence: 0,
            peer_id: PeerId::NONE,
            payload,
            retries: 0,
            resend_deadline: None,
        }
    }

    pub fn unreliable(kind: PacketKind, payload: Vec<u8>) -> Packet {
        Packet {
            kind,
            is_reliable: false,
            sequence: 0,
            peer_id: PeerId::NONE,
            payload,
            retries: 0,
            resend_deadline: None,
        }
    }

    /// an acknowledgement for the given reliable sequence number
    pub fn ack(sequence: u32) -> Packet {
        let mut payload = Vec::with_capacity(4);
        payload.put_u32(sequence);
        Packet::unreliable(PacketKind::Ack, payload)
    }

    /// a positive handshake reply carrying the assigned public key
    pub fn accept(key: PeerKey) -> Packet {
        let mut payload = Vec::with_capacity(2);
        key.ser(&mut payload);
        Packet::reliable(PacketKind::Accept, payload)
    }

    /// The sequence number acknowledged by an `Ack` packet.
    pub fn ack_sequence(&self) -> anyhow::Result<u32> {
        if self.kind != PacketKind::Ack {
            bail!("not an ack packet: {:?}", self.kind);
        }
        let mut buf = self.payload.as_slice();
        if buf.remaining() < 4 {
            bail!("truncated ack payload: {} bytes", buf.remaining());
        }
        Ok(buf.get_u32())
    }

    /// The public key carried in an `Accept` packet.
    pub fn accept_key(&self) -> anyhow::Result<PeerKey> {
        if self.kind != PacketKind::Accept {
            bail!("not an accept packet: {:?}", self.kind);
        }
        let mut buf = self.payload.as_slice();
        if buf.remaining() < 2 {
            bail!("truncated accept payload: {} bytes", buf.remaining());
        }
        Ok(PeerKey::deser(&mut buf))
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(Self::PROTOCOL_VERSION_1);
        buf.put_u8(self.kind.into());
        buf.put_u8(if self.is_reliable { FLAG_RELIABLE } else { 0 });
        self.peer_id.ser(buf);
        buf.put_u32(if self.is_reliable { self.sequence } else { 0 });
        buf.put_slice(&self.payload);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        if buf.remaining() < Self::HEADER_LEN {
            bail!("incomplete packet header: {} bytes", buf.remaining());
        }

        let protocol_version = buf.get_u8();
        if protocol_version != Self::PROTOCOL_VERSION_1 {
            bail!("unsupported protocol version {}", protocol_version);
        }

        let kind = PacketKind::try_from(buf.get_u8())?;
        let flags = buf.get_u8();
        let peer_id = PeerId::deser(buf);
        let sequence = buf.get_u32();

        let mut payload = vec![0u8; buf.remaining()];
        buf.copy_to_slice(&mut payload);

        Ok(Packet {
            kind,
            is_reliable: flags & FLAG_RELIABLE != 0,
            sequence,
            peer_id,
            payload,
            retries: 0,
            resend_deadline: None,
        })
    }
}
