//! Bounded log of every transmitted and received message, and protocol events.
//!
//! Records are stored back to back as `[len, kind, timestamp_lo, timestamp_hi, payload...]`,
//! where `len` counts the whole record. When space runs out, the oldest whole records are
//! dropped and the overflow flag is raised. Records are never split.
use heapless::Deque;

/// Size of a record header.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Kinds of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordKind {
    /// A transmitted message, header and data objects.
    Tx = 1,
    /// A received message, header and data objects.
    Rx = 2,
    /// A protocol event, see [`Token`].
    Token = 3,
}

/// Protocol events that are logged as single-byte token records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Token {
    /// Hard reset ordered sets were sent.
    HardResetSent = 1,
    /// Hard reset ordered sets were received.
    HardResetReceived = 2,
    /// A soft reset was sent.
    SoftResetSent = 3,
    /// A soft reset was received.
    SoftResetReceived = 4,
    /// A transmission collided with bus activity.
    Collision = 5,
    /// Transmission retries were exhausted.
    RetryFail = 6,
}

/// A bounded log with a capacity of `N` bytes.
#[derive(Debug)]
pub struct MessageLog<const N: usize> {
    bytes: Deque<u8, N>,
    overflow: bool,
}

impl<const N: usize> Default for MessageLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MessageLog<N> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            bytes: Deque::new(),
            overflow: false,
        }
    }

    /// Append a message record.
    pub fn push_message(&mut self, kind: RecordKind, timestamp: u64, message: &[u8]) {
        self.push(kind, timestamp, message);
    }

    /// Append a token record.
    pub fn push_token(&mut self, token: Token, timestamp: u64) {
        self.push(RecordKind::Token, timestamp, &[token as u8]);
    }

    fn push(&mut self, kind: RecordKind, timestamp: u64, payload: &[u8]) {
        let len = RECORD_HEADER_SIZE + payload.len();
        if len > N || len > u8::MAX as usize {
            self.overflow = true;
            return;
        }

        while N - self.bytes.len() < len {
            self.drop_oldest();
            self.overflow = true;
        }

        let timestamp = timestamp as u16;
        let header = [len as u8, kind as u8, timestamp as u8, (timestamp >> 8) as u8];
        for byte in header.iter().chain(payload) {
            // Space was made above.
            let _ = self.bytes.push_back(*byte);
        }
    }

    fn drop_oldest(&mut self) {
        let len = self.bytes.front().copied().unwrap_or_default() as usize;
        for _ in 0..len.max(1) {
            self.bytes.pop_front();
        }
    }

    /// Drain whole records into `buffer`, returning the number of bytes written.
    pub fn read(&mut self, buffer: &mut [u8]) -> usize {
        let mut written = 0;

        while let Some(len) = self.bytes.front().copied() {
            let len = len as usize;
            if written + len > buffer.len() {
                break;
            }

            for byte in &mut buffer[written..written + len] {
                *byte = self.bytes.pop_front().unwrap_or_default();
            }
            written += len;
        }

        written
    }

    /// Whether records were dropped since the last call. Clears the flag.
    pub fn take_overflow(&mut self) -> bool {
        core::mem::take(&mut self.overflow)
    }

    /// Whether records were dropped, without clearing the flag.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// The number of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop all records.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageLog, RecordKind, Token};

    #[test]
    fn records_are_read_whole() {
        let mut log = MessageLog::<32>::new();
        log.push_message(RecordKind::Tx, 0x1234, &[0xA1, 0x11]);
        log.push_token(Token::Collision, 0x0001);

        let mut buffer = [0u8; 8];
        assert_eq!(log.read(&mut buffer), 6);
        assert_eq!(&buffer[..6], &[6, 1, 0x34, 0x12, 0xA1, 0x11]);

        assert_eq!(log.read(&mut buffer), 5);
        assert_eq!(&buffer[..5], &[5, 3, 0x01, 0x00, 5]);
        assert!(log.is_empty());
        assert!(!log.take_overflow());
    }

    #[test]
    fn overflow_drops_oldest_whole_record() {
        let mut log = MessageLog::<16>::new();
        log.push_message(RecordKind::Rx, 1, &[1, 2, 3, 4]);
        log.push_message(RecordKind::Rx, 2, &[5, 6, 7, 8]);
        assert!(!log.overflowed());

        log.push_message(RecordKind::Tx, 3, &[9, 10]);
        assert!(log.take_overflow());
        assert!(!log.take_overflow());

        let mut buffer = [0u8; 16];
        assert_eq!(log.read(&mut buffer), 14);
        assert_eq!(&buffer[..8], &[8, 2, 2, 0, 5, 6, 7, 8]);
        assert_eq!(&buffer[8..14], &[6, 1, 3, 0, 9, 10]);
    }
}
