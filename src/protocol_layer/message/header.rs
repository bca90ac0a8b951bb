//! The 16 bit message header that starts every PD message.
use core::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::counters::Counter;
use crate::protocol_layer::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    /// Message header.
    ///
    /// For SOP' and SOP'' messages, bit 8 is the cable plug flag and bit 5 is reserved.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Extended messages carry a second header, and are not supported.
        pub extended: bool @ 15,
        /// Data objects after the header. Zero for control messages.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// Rolling counter of the sender, per SOP type.
        pub message_id: u8 @ 9..=11,
        /// Power role of the sender, on SOP.
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// Revision 3.0 is 10b, 11b is reserved.
        pub spec_revision: u8 [try_get SpecificationRevision, set SpecificationRevision] @ 6..=7,
        /// Data role of the sender, on SOP.
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// Control or data message type, depending on `num_objects`.
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// A header that only carries roles and revision. Messages are built from it.
    pub fn new_template(
        port_data_role: DataRole,
        port_power_role: PowerRole,
        spec_revision: SpecificationRevision,
    ) -> Self {
        Self(0)
            .with_port_data_role(port_data_role)
            .with_port_power_role(port_power_role)
            .with_spec_revision(spec_revision)
    }

    /// Complete a template for one message.
    pub fn new(template: Self, message_id: Counter, message_type: MessageType, num_objects: u8) -> Self {
        template
            .with_extended(false)
            .with_message_id(message_id.value())
            .with_message_type_raw(message_type.raw())
            .with_num_objects(num_objects)
    }

    /// A control message header.
    pub fn new_control(template: Self, message_id: Counter, message_type: ControlMessageType) -> Self {
        Self::new(template, message_id, MessageType::Control(message_type), 0)
    }

    /// A data message header.
    pub fn new_data(template: Self, message_id: Counter, message_type: DataMessageType, num_objects: u8) -> Self {
        Self::new(template, message_id, MessageType::Data(message_type), num_objects)
    }

    /// Clear the role bits, as required for messages to a cable plug.
    pub fn for_cable_plug(self) -> Self {
        self.with_port_power_role(PowerRole::Sink)
            .with_port_data_role(DataRole::Ufp)
    }

    /// Parse the first two bytes of `buf`.
    ///
    /// Headers with the reserved revision, and extended messages, are refused.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        let Some(bytes) = buf.get(..2) else {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        };

        let header = Header(LittleEndian::read_u16(bytes));
        header.spec_revision()?;

        match header.extended() {
            true => Err(ParseError::UnsupportedExtendedMessage(header.message_type_raw())),
            false => Ok(header),
        }
    }

    /// Write the header to the first two bytes of `buf`.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// The message type.
    pub fn message_type(&self) -> MessageType {
        MessageType::from_raw(self.message_type_raw(), self.num_objects())
    }

    /// Whether this is a control message of the given type.
    pub fn is_control(&self, message_type: ControlMessageType) -> bool {
        self.message_type() == MessageType::Control(message_type)
    }
}

/// Specification revisions, ordered by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
pub enum SpecificationRevision {
    /// Revision 1.0, deprecated.
    R1_0,
    /// Revision 2.0.
    R2_0,
    /// Revision 3.0 and later.
    R3_0,
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        [Self::R1_0, Self::R2_0, Self::R3_0]
            .get(value as usize)
            .copied()
            .ok_or(ParseError::UnsupportedSpecificationRevision(value))
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        value as u8
    }
}

/// The type of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// A message without data objects.
    Control(ControlMessageType),
    /// A message with data objects.
    Data(DataMessageType),
}

impl MessageType {
    /// Decode the type field. The same value denotes different types with and without objects.
    pub fn from_raw(raw: u8, num_objects: usize) -> Self {
        match num_objects {
            0 => Self::Control(ControlMessageType::from(raw)),
            _ => Self::Data(DataMessageType::from(raw)),
        }
    }

    /// The value of the type field.
    pub fn raw(self) -> u8 {
        match self {
            Self::Control(message_type) => message_type as u8,
            Self::Data(message_type) => message_type as u8,
        }
    }
}

/// Types of control messages.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMessageType {
    GoodCRC = 0x01,
    GotoMin = 0x02,
    Accept = 0x03,
    Reject = 0x04,
    Ping = 0x05,
    PsRdy = 0x06,
    GetSourceCap = 0x07,
    GetSinkCap = 0x08,
    DrSwap = 0x09,
    PrSwap = 0x0A,
    VconnSwap = 0x0B,
    Wait = 0x0C,
    SoftReset = 0x0D,
    NotSupported = 0x10,
    /// Any type that is not handled.
    Reserved = 0x1F,
}

impl ControlMessageType {
    const KNOWN: [Self; 14] = [
        Self::GoodCRC,
        Self::GotoMin,
        Self::Accept,
        Self::Reject,
        Self::Ping,
        Self::PsRdy,
        Self::GetSourceCap,
        Self::GetSinkCap,
        Self::DrSwap,
        Self::PrSwap,
        Self::VconnSwap,
        Self::Wait,
        Self::SoftReset,
        Self::NotSupported,
    ];
}

impl From<u8> for ControlMessageType {
    fn from(value: u8) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|message_type| *message_type as u8 == value)
            .unwrap_or(Self::Reserved)
    }
}

/// Types of data messages.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataMessageType {
    SourceCapabilities = 0x01,
    Request = 0x02,
    Bist = 0x03,
    SinkCapabilities = 0x04,
    BatteryStatus = 0x05,
    Alert = 0x06,
    GetCountryInfo = 0x07,
    VendorDefined = 0x0F,
    /// Any type that is not handled.
    Reserved = 0x1F,
}

impl DataMessageType {
    const KNOWN: [Self; 8] = [
        Self::SourceCapabilities,
        Self::Request,
        Self::Bist,
        Self::SinkCapabilities,
        Self::BatteryStatus,
        Self::Alert,
        Self::GetCountryInfo,
        Self::VendorDefined,
    ];
}

impl From<u8> for DataMessageType {
    fn from(value: u8) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|message_type| *message_type as u8 == value)
            .unwrap_or(Self::Reserved)
    }
}
