//! Definition of counters, used for retry attempts, and message IDs.

/// Counter errors.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter went past its maximum value and wrapped to zero.
    #[error("counter exceeded its maximum")]
    Exceeded,
}

/// A bounded counter that wraps to zero past its maximum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// Types of counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Busy responses to a VDM request.
    Busy,
    /// Source_Capabilities messages that were sent without GoodCRC (nCapsCount).
    Caps,
    /// Discover Identity requests.
    DiscoverIdentity,
    /// Hard Resets that were sent (nHardResetCount).
    HardReset,
    /// Message IDs (modulo 8).
    MessageId,
    /// Transmit retries after a collision (nRetryCount).
    Retry,
}

impl Counter {
    /// Create a new counter of a given type, starting at zero.
    pub fn new(counter_type: CounterType) -> Self {
        let max_value = match counter_type {
            CounterType::Busy => 5,
            CounterType::Caps => 50,
            CounterType::DiscoverIdentity => 20,
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
            CounterType::Retry => 2,
        };

        Self { value: 0, max_value }
    }

    /// Create a new counter of a given type, starting at `value`.
    pub fn new_from_value(counter_type: CounterType, value: u8) -> Self {
        let mut counter = Self::new(counter_type);
        counter.set(value);
        counter
    }

    /// Set the counter value, wrapped into the valid range.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Whether the counter sits at its maximum, such that the next increment wraps.
    pub fn exhausted(&self) -> bool {
        self.value == self.max_value
    }

    /// Increment the counter.
    ///
    /// Returns [`Error::Exceeded`] when the counter wrapped to zero.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 {
            Err(Error::Exceeded)
        } else {
            Ok(())
        }
    }

    /// Increment the counter, ignoring a wrap. Used for message IDs.
    pub fn increment_wrapping(&mut self) {
        self.set(self.value + 1);
    }

    /// Reset the counter to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, CounterType, Error};

    #[test]
    fn message_id_wraps_modulo_eight() {
        let mut counter = Counter::new_from_value(CounterType::MessageId, 6);
        counter.increment_wrapping();
        assert_eq!(counter.value(), 7);
        counter.increment_wrapping();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn hard_reset_counter_exceeds_after_three_increments() {
        let mut counter = Counter::new(CounterType::HardReset);
        assert!(counter.increment().is_ok());
        assert!(counter.increment().is_ok());
        assert!(counter.exhausted());
        assert_eq!(counter.increment(), Err(Error::Exceeded));
        assert_eq!(counter.value(), 0);
    }
}
