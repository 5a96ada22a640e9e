use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use crate::framing::FRAMING_OVERHEAD;

pub struct RtpConfig {
    pub self_addr: SocketAddr,

    /// The receive window advertised to peers, in segments: the maximum number of out-of-order
    ///  segments a connection buffers, and the initial bound on a peer's unacknowledged segments.
    ///  This is fixed for a connection's lifetime.
    pub max_window_size: u32,

    /// Fixed interval after which an unacknowledged segment is sent again. There is no backoff
    ///  and no upper limit for the number of retries.
    pub retransmit_interval: Duration,

    /// Size of the receive buffer, i.e. the biggest datagram that is accepted. Since RTP does not
    ///  discover the path MTU, it is the application's responsibility to choose this (and
    ///  [RtpConfig::max_segment_payload]) small enough to avoid fragmentation.
    ///
    /// With full Ethernet frames and no optional IP headers, the UDP payload is `1500 - 20 - 8 = 1472`
    ///  for IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    pub max_datagram_size: usize,

    /// Application data is split into segments carrying at most this many bytes
    pub max_segment_payload: usize,
}

impl RtpConfig {
    pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);
    pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1472;

    pub fn new(self_addr: SocketAddr, max_window_size: u32) -> RtpConfig {
        RtpConfig {
            self_addr,
            max_window_size,
            retransmit_interval: Self::DEFAULT_RETRANSMIT_INTERVAL,
            max_datagram_size: Self::DEFAULT_MAX_DATAGRAM_SIZE,
            max_segment_payload: Self::DEFAULT_MAX_DATAGRAM_SIZE - FRAMING_OVERHEAD,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_window_size == 0 {
            bail!("max window size must be at least 1");
        }
        if self.max_window_size > i32::MAX as u32 {
            bail!("max window size {} exceeds the sequence number space", self.max_window_size);
        }
        if self.retransmit_interval.is_zero() {
            bail!("retransmit interval must not be zero");
        }
        if self.max_segment_payload == 0 {
            bail!("max segment payload must not be zero");
        }
        if self.max_segment_payload + FRAMING_OVERHEAD > self.max_datagram_size {
            bail!("a segment with {} bytes of payload does not fit into a datagram of {} bytes", self.max_segment_payload, self.max_datagram_size);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> RtpConfig {
        RtpConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)), 16)
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.retransmit_interval, Duration::from_millis(200));
        assert_eq!(config.max_segment_payload + FRAMING_OVERHEAD, config.max_datagram_size);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_window(|c: &mut RtpConfig| c.max_window_size = 0)]
    #[case::huge_window(|c: &mut RtpConfig| c.max_window_size = u32::MAX)]
    #[case::zero_interval(|c: &mut RtpConfig| c.retransmit_interval = Duration::ZERO)]
    #[case::zero_payload(|c: &mut RtpConfig| c.max_segment_payload = 0)]
    #[case::payload_too_big(|c: &mut RtpConfig| c.max_segment_payload = c.max_datagram_size)]
    fn test_validate_invalid(#[case] modify: fn(&mut RtpConfig)) {
        let mut config = config();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
