//! Reachability probing
//!
//! One ICMP echo with a short timeout and at most one retry. The result is
//! either a round-trip time or `None`, the unreachable sentinel - callers
//! normalize the sentinel to a published latency of 0.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::trace;

/// Number of echo attempts before a device counts as unreachable.
const PROBE_ATTEMPTS: u32 = 2;

/// Liveness check. Behind a trait so tests can script reachability.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `Some(rtt)` if the device answered, `None` if unreachable.
    async fn probe(&self, addr: IpAddr) -> Option<Duration>;
}

/// ICMP echo prober.
pub struct IcmpProber {
    attempt_timeout: Duration,
}

impl IcmpProber {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self { attempt_timeout }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, addr: IpAddr) -> Option<Duration> {
        let payload = [0u8; 16];

        for attempt in 1..=PROBE_ATTEMPTS {
            match timeout(self.attempt_timeout, surge_ping::ping(addr, &payload)).await {
                Ok(Ok((_packet, rtt))) => {
                    trace!("{addr}: echo reply after {rtt:?} (attempt {attempt})");
                    return Some(rtt);
                }
                Ok(Err(e)) => {
                    trace!("{addr}: echo failed (attempt {attempt}): {e}");
                }
                Err(_) => {
                    trace!("{addr}: echo timed out (attempt {attempt})");
                }
            }
        }

        None
    }
}
