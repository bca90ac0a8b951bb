//! Definitions and implementations of data messages.
//!
//! See [6.4].
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use crate::protocol_layer::message::header::DataMessageType;

pub mod pdo;
pub mod request;
pub mod vendor_defined;

/// Payload of a data message.
///
/// Data objects are not self-describing, the message type selects their interpretation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Data {
    /// Source capabilities.
    SourceCapabilities(pdo::Capabilities),
    /// Sink capabilities.
    SinkCapabilities(pdo::Capabilities),
    /// Request for a power level from the source.
    Request(request::RawDataObject),
    /// Built-in self-test data objects.
    Bist(Vec<u32, 7>),
    /// Vendor defined message, a VDM header followed by up to six VDOs.
    VendorDefined((vendor_defined::VdmHeader, Vec<u32, 6>)),
    /// Any other data message, kept as raw data objects.
    Unknown(DataMessageType, Vec<u32, 7>),
}

impl Data {
    /// Interpret data objects according to the message type.
    pub fn parse(message_type: DataMessageType, objects: &[u32]) -> Self {
        match message_type {
            DataMessageType::SourceCapabilities => Data::SourceCapabilities(pdo::Capabilities::from_raw(objects)),
            DataMessageType::SinkCapabilities => Data::SinkCapabilities(pdo::Capabilities::from_raw(objects)),
            DataMessageType::Request if objects.len() == 1 => Data::Request(request::RawDataObject(objects[0])),
            DataMessageType::Bist => Data::Bist(objects.iter().copied().collect()),
            DataMessageType::VendorDefined if !objects.is_empty() => {
                let header = vendor_defined::VdmHeader::from(objects[0]);
                let vdos = objects[1..].iter().copied().take(6).collect();

                trace!("VDM RX: {:?} {:?}", header, vdos);
                Data::VendorDefined((header, vdos))
            }
            _ => {
                warn!("Unhandled data message type {:?}", message_type);
                Data::Unknown(message_type, objects.iter().copied().collect())
            }
        }
    }

    /// The data message type that carries this payload.
    pub fn message_type(&self) -> DataMessageType {
        match self {
            Data::SourceCapabilities(_) => DataMessageType::SourceCapabilities,
            Data::SinkCapabilities(_) => DataMessageType::SinkCapabilities,
            Data::Request(_) => DataMessageType::Request,
            Data::Bist(_) => DataMessageType::Bist,
            Data::VendorDefined(_) => DataMessageType::VendorDefined,
            Data::Unknown(message_type, _) => *message_type,
        }
    }

    /// The number of data objects.
    pub fn num_objects(&self) -> u8 {
        let count = match self {
            Data::SourceCapabilities(caps) | Data::SinkCapabilities(caps) => caps.pdos().len(),
            Data::Request(_) => 1,
            Data::Bist(objects) | Data::Unknown(_, objects) => objects.len(),
            Data::VendorDefined((_, vdos)) => 1 + vdos.len(),
        };

        count as u8
    }

    /// Serialize message data to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        let mut written = 0;
        let mut write = |object: u32| {
            LittleEndian::write_u32(&mut payload[written..written + 4], object);
            written += 4;
        };

        match self {
            Data::SourceCapabilities(caps) | Data::SinkCapabilities(caps) => {
                caps.pdos().iter().for_each(|pdo| write(pdo.raw()));
            }
            Data::Request(rdo) => write(rdo.0),
            Data::Bist(objects) | Data::Unknown(_, objects) => objects.iter().for_each(|object| write(*object)),
            Data::VendorDefined((header, vdos)) => {
                write((*header).into());
                vdos.iter().for_each(|vdo| write(*vdo));
            }
        }

        written
    }
}
