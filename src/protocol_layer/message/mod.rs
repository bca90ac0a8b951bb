//! Definitions of message content.
pub mod data;
pub mod header;

use byteorder::{ByteOrder, LittleEndian};
use header::{Header, MessageType};

/// Size of the largest message, a header followed by seven data objects.
pub const MAX_MESSAGE_SIZE: usize = 2 + 7 * 4;

/// Errors that can occur during message/header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    /// * `expected` - The expected length.
    /// * `found` - The actual length found.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is not supported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// Extended messages are not supported.
    #[error("unsupported extended message type `{0}`")]
    UnsupportedExtendedMessage(u8),
    /// The CRC of a received frame does not match its content.
    #[error("CRC mismatch")]
    CrcMismatch,
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Optional payload for data messages.
    pub payload: Option<data::Data>,
}

impl Message {
    /// Create a new message from a message header.
    pub fn new(header: Header) -> Self {
        Self { header, payload: None }
    }

    /// Create a new message from a message header and payload data.
    pub fn new_with_data(header: Header, data: data::Data) -> Self {
        Self {
            header,
            payload: Some(data),
        }
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    ///
    /// The buffer must hold at least [`MAX_MESSAGE_SIZE`] bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        self.header.to_bytes(buffer)
            + match self.payload.as_ref() {
                Some(data) => data.to_bytes(&mut buffer[2..]),
                None => 0,
            }
    }

    /// Parse a message from a header and its data objects, without CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(data)?;
        let message = Self::new(header);
        let payload = &data[2..];

        let expected = 4 * header.num_objects();
        if payload.len() < expected {
            return Err(ParseError::InvalidLength {
                expected: expected + 2,
                found: data.len(),
            });
        }

        match message.header.message_type() {
            MessageType::Control(_) => Ok(message),
            MessageType::Data(message_type) => {
                let objects = payload[..expected]
                    .chunks_exact(4)
                    .map(LittleEndian::read_u32)
                    .collect::<heapless::Vec<u32, 7>>();

                Ok(Self::new_with_data(
                    header,
                    data::Data::parse(message_type, &objects),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::data::Data;
    use super::header::{DataMessageType, Header, SpecificationRevision};
    use super::{MAX_MESSAGE_SIZE, Message, ParseError};
    use crate::counters::{Counter, CounterType};
    use crate::{DataRole, PowerRole};

    #[test]
    fn truncated_data_message_is_rejected() {
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R2_0);
        let header = Header::new_data(template, Counter::new(CounterType::MessageId), DataMessageType::Request, 1);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        header.to_bytes(&mut buffer);

        assert_eq!(
            Message::from_bytes(&buffer[..4]),
            Err(ParseError::InvalidLength { expected: 6, found: 4 })
        );
    }

    #[test]
    fn bist_message_keeps_objects() {
        let bytes = [0x43, 0x10, 0x00, 0x00, 0x00, 0x50];
        let message = Message::from_bytes(&bytes).unwrap();

        match message.payload {
            Some(Data::Bist(objects)) => assert_eq!(objects.as_slice(), &[0x5000_0000]),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
