use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{error, trace};

use crate::peer_id::PeerId;

/// Where outbound datagrams leave the layer. The indirection lets tests assert on exactly
///  which bytes would have gone to which peer without binding real sockets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    /// `peer` attributes the datagram for logging and diagnostics - [PeerId::NONE] for
    ///  traffic outside any session, such as denied logins.
    async fn do_send_packet(&self, peer: PeerId, to: SocketAddr, packet_buf: &[u8]);
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, peer: PeerId, to: SocketAddr, packet_buf: &[u8]) {
        let send_started = Instant::now();

        if let Err(e) = self.send_to(packet_buf, to).await {
            // a failed send is no different from the datagram dying on the wire: reliable
            //  packets come around again on the resend schedule, voice moves on
            error!("error sending datagram of {} bytes to peer {} at {:?}: {}",
                packet_buf.len(), peer, to, e);
            return;
        }

        trace!("sent datagram of {} bytes to peer {} at {:?} in {:?}",
            packet_buf.len(), peer, to, send_started.elapsed());
    }
}
