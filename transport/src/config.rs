use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

/// Host-level knobs of an [crate::end_point::EndPoint]. The retransmission schedule itself
///  (resend delays, retry budget, reorder buffer bound) is wire-affecting and therefore fixed
///  in [crate::peer], not configurable per host - peers with different schedules would still
///  interoperate, but eviction behavior becomes hard to reason about.
pub struct TransportConfig {
    /// local address the endpoint binds its UDP socket to
    pub self_addr: SocketAddr,

    /// A peer with no accepted inbound packet for this long is evicted. Choose this
    ///  comfortably above the worst acceptable silence of a voice client - the cost of
    ///  keeping an idle peer around is a map entry and its tick scan.
    pub idle_timeout: Duration,

    /// cadence at which retransmissions and liveness are checked; single-digit milliseconds
    ///  keeps the actual resend delay close to the nominal schedule
    pub tick_interval: Duration,

    /// cadence at which peers' send queues are drained onto the socket
    pub egress_interval: Duration,

    /// logins beyond this number of live peers are answered with `Deny`
    pub max_peers: usize,
}

impl TransportConfig {
    pub fn default_for_addr(self_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            self_addr,
            idle_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(5),
            egress_interval: Duration::from_millis(1),
            max_peers: 64,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick interval must not be zero");
        }
        if self.egress_interval.is_zero() {
            bail!("egress interval must not be zero");
        }
        if self.idle_timeout < crate::peer::RETRY_RESEND_TIME {
            bail!("idle timeout below the retry resend delay would evict peers that are merely retransmitting");
        }
        if self.max_peers == 0 {
            bail!("an endpoint that denies every login is useless");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(TransportConfig::default_for_addr(addr()).validate().is_ok());
    }

    #[rstest]
    #[case::zero_tick(|c: &mut TransportConfig| c.tick_interval = Duration::ZERO)]
    #[case::zero_egress(|c: &mut TransportConfig| c.egress_interval = Duration::ZERO)]
    #[case::tiny_idle_timeout(|c: &mut TransportConfig| c.idle_timeout = Duration::from_millis(100))]
    #[case::no_peers(|c: &mut TransportConfig| c.max_peers = 0)]
    fn test_validate_rejects(#[case] break_it: fn(&mut TransportConfig)) {
        let mut config = TransportConfig::default_for_addr(addr());
        break_it(&mut config);
        assert!(config.validate().is_err());
    }
}
