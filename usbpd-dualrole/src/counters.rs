//! Counters for retry attempts, message IDs and policy limits.
//!
//! Reaching a limit is only ever reported, never acted upon. The policy engine checks
//! [`Counter::exhausted`] or the result of [`Counter::increment_and_check`] and decides what to do.

/// Kinds of counters, each with its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Source capability advertisements without a response (`nCapsCount`).
    Caps,
    /// Discover identity attempts without a response (`nDiscoverIdentityCount`).
    DiscoverIdentity,
    /// Hard resets without a successful contract (`nHardResetCount`).
    HardReset,
    /// Message IDs, wrapping (`nMessageIDCount`).
    MessageId,
    /// Retransmissions of one message (`nRetryCount`).
    Retry,
    /// Hard resets caused by failed power role swaps.
    SwapHardReset,
}

impl CounterType {
    /// The limit of this counter kind.
    pub const fn limit(self) -> u8 {
        match self {
            CounterType::Caps => 16,
            CounterType::DiscoverIdentity => 20,
            CounterType::HardReset => 4,
            CounterType::MessageId => 7,
            CounterType::Retry => 3,
            CounterType::SwapHardReset => 4,
        }
    }
}

/// A saturating or wrapping counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    counter_type: CounterType,
    value: u8,
}

impl Counter {
    /// Create a counter at zero.
    pub fn new(counter_type: CounterType) -> Self {
        Self { counter_type, value: 0 }
    }

    /// Create a counter with an initial value.
    ///
    /// Message ID values wrap into their valid range.
    pub fn new_from_value(counter_type: CounterType, value: u8) -> Self {
        let mut counter = Self::new(counter_type);
        counter.set(value);
        counter
    }

    /// Set the counter value.
    pub fn set(&mut self, value: u8) {
        self.value = match self.counter_type {
            CounterType::MessageId => value % (CounterType::MessageId.limit() + 1),
            _ => value.min(self.counter_type.limit()),
        };
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// The limit of this counter.
    pub fn limit(&self) -> u8 {
        self.counter_type.limit()
    }

    /// Increment the counter.
    ///
    /// Message IDs wrap to zero, all other counters stop at their limit.
    pub fn increment(&mut self) {
        self.set(self.value.wrapping_add(1));
    }

    /// Increment the counter, and report whether its limit is now reached.
    pub fn increment_and_check(&mut self) -> bool {
        self.increment();
        self.exhausted()
    }

    /// Whether the counter has reached its limit.
    ///
    /// Message ID counters wrap and are never exhausted.
    pub fn exhausted(&self) -> bool {
        match self.counter_type {
            CounterType::MessageId => false,
            _ => self.value >= self.counter_type.limit(),
        }
    }

    /// Reset the counter to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}
