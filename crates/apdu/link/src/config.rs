//! Configuration options for link transports

use std::time::Duration;

/// What the producer side of a full fragment queue does with a new packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the packet and log it (radio callbacks must not stall)
    #[default]
    Drop,
    /// Block the producer until the consumer frees a slot
    Block,
}

/// Configuration options for link transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Largest packet the link carries, flag byte included
    pub mtu: usize,

    /// Number of packets the inbound fragment queue holds
    pub queue_capacity: usize,

    /// Behaviour of the inbound queue once full
    pub overflow: OverflowPolicy,

    /// How long a blocking reader waits for a complete reply
    pub reply_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mtu: Self::DEFAULT_MTU,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Drop,
            reply_timeout: Duration::from_secs(2),
        }
    }
}

impl LinkConfig {
    /// Default packet size, flag byte included
    pub const DEFAULT_MTU: usize = 128;

    /// Default inbound queue depth
    pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link MTU
    pub const fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the inbound queue depth
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the queue overflow policy
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the reply timeout
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}
