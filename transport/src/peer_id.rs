use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut};
use rand::Rng;

/// The id under which a peer is tracked for the lifetime of its session. The accepting side
///  assigns it when the peer record is created; the connecting side adopts the assigned value
///  from the `Accept` packet. It is carried in every packet header so that a peer roaming to
///  a new network address can be re-associated with its existing state.
///
/// NB: It is *not* a security feature - it is an association handle, comparable to QUIC's
///  connection id. Guessing it buys an attacker nothing that spoofing the UDP source
///  address would not.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PeerId(i64);

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PeerId {
    /// reserved sentinel for "no id assigned yet" - never generated
    pub const NONE: PeerId = PeerId(i64::MIN);

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> i64 {
        self.0
    }

    pub fn random() -> Self {
        PeerId(rand::thread_rng().gen_range((i64::MIN + 1)..=i64::MAX))
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_i64(self.0);
    }

    pub fn deser(buf: &mut impl Buf) -> PeerId {
        PeerId(buf.get_i64())
    }
}

/// The short public handle of a peer, suitable for displaying to users and for out-of-band
///  lookup (the application hands it around, e.g. to bind a voice participant to a player).
///  Assigned alongside [PeerId] and communicated in the `Accept` packet.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PeerKey(i16);

impl Display for PeerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PeerKey {
    /// reserved sentinel for "no key assigned yet" - never generated
    pub const NONE: PeerKey = PeerKey(i16::MIN);

    pub fn from_raw(value: i16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> i16 {
        self.0
    }

    pub fn random() -> Self {
        PeerKey(rand::thread_rng().gen_range((i16::MIN + 1)..=i16::MAX))
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.0);
    }

    pub fn deser(buf: &mut impl Buf) -> PeerKey {
        PeerKey(buf.get_i16())
    }
}
