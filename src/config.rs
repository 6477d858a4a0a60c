//! In-memory configuration surface. Never round-tripped to disk — the core
//! is constructed fresh by its owning process each run.

use std::time::Duration;

/// Retransmission policy for `INCOMPLETE` ARP cache entries.
///
/// Answers the open design question left by the ARP cache on INCOMPLETE
/// entry expiry: entries get a bounded number of retransmissions with
/// exponential backoff before the slot is freed back to the pool.
#[derive(Debug, Clone, Copy)]
pub struct ArpRetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: u32,
    pub max_delay: Duration,
}

impl Default for ArpRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ArpRetryPolicy {
    /// Delay before the `attempt`-th (0-based) retransmission.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.saturating_mul(self.backoff_multiplier.saturating_pow(attempt));
        scaled.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    /// Periodic tick granularity for the interrupt fabric's timer-tick.
    pub tick_interval: Duration,
    /// Depth of each protocol's input FIFO before `input` reports `FifoFull`.
    pub protocol_fifo_depth: usize,
    pub arp_retry: ArpRetryPolicy,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            protocol_fifo_depth: 64,
            arp_retry: ArpRetryPolicy::default(),
        }
    }
}
