//! Vendor defined message headers and the data objects of Discover Identity.
//!
//! Decoding never fails: reserved command codes and product types are kept as raw values.
use proc_bitfield::bitfield;

/// Number of SVIDs that fit into one Discover SVIDs response.
pub const MAX_SVIDS_PER_MESSAGE: usize = 12;

/// Number of modes that fit into one Discover Modes response.
pub const MAX_MODES_PER_MESSAGE: usize = 6;

/// The PD standard ID.
pub const PD_SID: u16 = 0xFF00;

/// Structured VDM command types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommandType {
    /// Initiator request.
    InitiatorReq,
    /// Responder acknowledge.
    ResponderAck,
    /// Responder not-acknowledge.
    ResponderNak,
    /// Responder busy.
    ResponderBusy,
}

impl From<VdmCommandType> for u8 {
    fn from(value: VdmCommandType) -> Self {
        match value {
            VdmCommandType::InitiatorReq => 0,
            VdmCommandType::ResponderAck => 1,
            VdmCommandType::ResponderNak => 2,
            VdmCommandType::ResponderBusy => 3,
        }
    }
}

impl From<u8> for VdmCommandType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => VdmCommandType::InitiatorReq,
            1 => VdmCommandType::ResponderAck,
            2 => VdmCommandType::ResponderNak,
            _ => VdmCommandType::ResponderBusy,
        }
    }
}

/// Structured VDM commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommand {
    /// Discover Identity.
    DiscoverIdentity,
    /// Discover SVIDs.
    DiscoverSvids,
    /// Discover Modes.
    DiscoverModes,
    /// Enter Mode.
    EnterMode,
    /// Exit Mode.
    ExitMode,
    /// Attention.
    Attention,
    /// Reserved or SVID-specific command.
    Other(u8),
}

impl From<VdmCommand> for u8 {
    fn from(value: VdmCommand) -> Self {
        match value {
            VdmCommand::DiscoverIdentity => 0x1,
            VdmCommand::DiscoverSvids => 0x2,
            VdmCommand::DiscoverModes => 0x3,
            VdmCommand::EnterMode => 0x4,
            VdmCommand::ExitMode => 0x5,
            VdmCommand::Attention => 0x6,
            VdmCommand::Other(command) => command & 0x1F,
        }
    }
}

impl From<u8> for VdmCommand {
    fn from(value: u8) -> Self {
        match value & 0x1F {
            0x01 => VdmCommand::DiscoverIdentity,
            0x02 => VdmCommand::DiscoverSvids,
            0x03 => VdmCommand::DiscoverModes,
            0x04 => VdmCommand::EnterMode,
            0x05 => VdmCommand::ExitMode,
            0x06 => VdmCommand::Attention,
            other => VdmCommand::Other(other),
        }
    }
}

/// Kinds of VDM headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmType {
    /// Unstructured, content defined by the vendor.
    Unstructured,
    /// Structured, with a defined command set.
    Structured,
}

impl From<VdmType> for bool {
    fn from(value: VdmType) -> Self {
        match value {
            VdmType::Unstructured => false,
            VdmType::Structured => true,
        }
    }
}

impl From<bool> for VdmType {
    fn from(value: bool) -> Self {
        match value {
            true => VdmType::Structured,
            false => VdmType::Unstructured,
        }
    }
}

/// A VDM header, the first data object of a vendor defined message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VdmHeader {
    /// Structured VDM header.
    Structured(VdmHeaderStructured),
    /// Unstructured VDM header.
    Unstructured(VdmHeaderUnstructured),
}

impl VdmHeader {
    /// The SVID that the message belongs to.
    pub fn svid(&self) -> u16 {
        match self {
            VdmHeader::Structured(header) => header.standard_or_vid(),
            VdmHeader::Unstructured(header) => header.standard_or_vid(),
        }
    }
}

impl From<VdmHeader> for u32 {
    fn from(value: VdmHeader) -> Self {
        match value {
            VdmHeader::Structured(header) => header.into(),
            VdmHeader::Unstructured(header) => header.into(),
        }
    }
}

impl From<u32> for VdmHeader {
    fn from(value: u32) -> Self {
        let header = VdmHeaderRaw(value);
        match header.vdm_type() {
            VdmType::Structured => VdmHeader::Structured(VdmHeaderStructured(value)),
            VdmType::Unstructured => VdmHeader::Unstructured(VdmHeaderUnstructured(value)),
        }
    }
}

bitfield! {
    /// The fields common to both kinds of VDM header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmHeaderRaw(pub u32): FromStorage, IntoStorage {
        /// VDM Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// VDM Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
    }
}

bitfield! {
    /// A structured VDM header.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VdmHeaderStructured(pub u32): FromStorage, IntoStorage {
        /// VDM Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// VDM Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
        /// Structured VDM version
        pub vdm_version: u8 @ 13..=14,
        /// Object Position
        pub object_position: u8 @ 8..=10,
        /// Command Type
        pub command_type: u8 [VdmCommandType] @ 6..=7,
        /// Command
        pub command: u8 [VdmCommand] @ 0..=4,
    }
}

impl Default for VdmHeaderStructured {
    fn default() -> Self {
        VdmHeaderStructured(0).with_vdm_type(VdmType::Structured)
    }
}

impl VdmHeaderStructured {
    /// A request header for a command.
    pub fn request(svid: u16, command: VdmCommand, object_position: u8) -> Self {
        Self::default()
            .with_standard_or_vid(svid)
            .with_object_position(object_position)
            .with_command_type(VdmCommandType::InitiatorReq)
            .with_command(command)
    }

    /// The response header to this request, echoing SVID, command and object position.
    pub fn response(self, command_type: VdmCommandType) -> Self {
        self.with_command_type(command_type)
    }
}

bitfield! {
    /// An unstructured VDM header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VdmHeaderUnstructured(pub u32): FromStorage, IntoStorage {
        /// Vdm Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// Vdm Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
        /// Vendor defined content
        pub data: u16 @ 0..=14
    }
}

/// Product types reported in the ID header.
///
/// Cable plugs report the cable types, ports report the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProductType {
    /// Undefined.
    Undefined,
    /// PDUSB hub.
    Hub,
    /// PDUSB peripheral.
    Peripheral,
    /// Passive cable.
    PassiveCable,
    /// Active cable.
    ActiveCable,
    /// Alternate mode adapter.
    Ama,
    /// Reserved value.
    Other(u8),
}

impl From<ProductType> for u8 {
    fn from(value: ProductType) -> Self {
        match value {
            ProductType::Undefined => 0b000,
            ProductType::Hub => 0b001,
            ProductType::Peripheral => 0b010,
            ProductType::PassiveCable => 0b011,
            ProductType::ActiveCable => 0b100,
            ProductType::Ama => 0b101,
            ProductType::Other(value) => value & 0b111,
        }
    }
}

impl From<u8> for ProductType {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            0b000 => ProductType::Undefined,
            0b001 => ProductType::Hub,
            0b010 => ProductType::Peripheral,
            0b011 => ProductType::PassiveCable,
            0b100 => ProductType::ActiveCable,
            0b101 => ProductType::Ama,
            other => ProductType::Other(other),
        }
    }
}

bitfield! {
    /// The ID header VDO.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct IdHeaderVdo(pub u32): FromStorage, IntoStorage {
        /// Host data capable
        pub host_data: bool @ 31,
        /// Device data capable
        pub device_data: bool @ 30,
        /// Product type
        pub product_type: u8 [ProductType] @ 27..=29,
        /// Modal Operation Supported
        pub modal_supported: bool @ 26,
        /// USB vendor ID
        pub vid: u16 @ 0..=15,
    }
}

bitfield! {
    /// The certification status VDO.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct CertStatVdo(pub u32): FromStorage, IntoStorage {
        /// XID assigned by USB-IF
        pub xid: u32 @ 0..=31,
    }
}

bitfield! {
    /// The product VDO.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ProductVdo(pub u32): FromStorage, IntoStorage {
        /// USB Product ID
        pub pid: u16 @ 16..=31,
        /// Device release number
        pub bcd_device: u16 @ 0..=15,
    }
}

bitfield! {
    /// The cable VDO, reported by cable plugs.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct CableVdo(pub u32): FromStorage, IntoStorage {
        pub hw_version: u8 @ 28..=31,
        pub fw_version: u8 @ 24..=27,
        pub plug_type: u8 @ 18..=19,
        pub latency: u8 @ 13..=16,
        pub termination: u8 @ 11..=12,
        pub sstx1_directionality: bool @ 10,
        pub sstx2_directionality: bool @ 9,
        pub ssrx1_directionality: bool @ 8,
        pub ssrx2_directionality: bool @ 7,
        pub vbus_current: u8 @ 5..=6,
        pub vbus_through: bool @ 4,
        pub sop2_present: bool @ 3,
        pub superspeed_signaling: u8 @ 0..=2,
    }
}

bitfield! {
    /// The alternate mode adapter VDO.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct AmaVdo(pub u32): FromStorage, IntoStorage {
        pub hw_version: u8 @ 28..=31,
        pub fw_version: u8 @ 24..=27,
        pub sstx1_directionality: bool @ 11,
        pub sstx2_directionality: bool @ 10,
        pub ssrx1_directionality: bool @ 9,
        pub ssrx2_directionality: bool @ 8,
        pub vconn_power: u8 @ 5..=7,
        pub vconn_required: bool @ 4,
        pub vbus_required: bool @ 3,
        pub superspeed_signaling: u8 @ 0..=2,
    }
}

#[cfg(test)]
mod tests {
    use super::{VdmCommand, VdmCommandType, VdmHeader, VdmHeaderStructured, VdmHeaderUnstructured, VdmType};

    #[test]
    fn structured_header_fields() {
        let header = VdmHeaderStructured::request(0xFF01, VdmCommand::EnterMode, 1)
            .with_vdm_version(0)
            .response(VdmCommandType::ResponderAck);

        let raw: u32 = header.into();
        assert_eq!(raw, 0xFF01_8144);
        assert_eq!(VdmHeader::from(raw), VdmHeader::Structured(header));
        assert_eq!(header.command(), VdmCommand::EnterMode);
        assert_eq!(header.command_type(), VdmCommandType::ResponderAck);
    }

    #[test]
    fn header_round_trip_over_bit_patterns() {
        let patterns = [
            0x0000_8000,
            0xFF00_8001,
            0x1234_A7C6,
            0xFFFF_FFFF & !(1 << 5) & !(1 << 11) & !(1 << 12),
            0x0000_0000,
            0xABCD_7FFF,
        ];

        for raw in patterns {
            let header = VdmHeader::from(raw);
            assert_eq!(u32::from(header), raw);

            match header {
                VdmHeader::Structured(structured) => {
                    let rebuilt = VdmHeaderStructured::default()
                        .with_standard_or_vid(structured.standard_or_vid())
                        .with_vdm_version(structured.vdm_version())
                        .with_object_position(structured.object_position())
                        .with_command_type(structured.command_type())
                        .with_command(structured.command());
                    assert_eq!(rebuilt, structured);
                }
                VdmHeader::Unstructured(unstructured) => {
                    let rebuilt = VdmHeaderUnstructured(0)
                        .with_standard_or_vid(unstructured.standard_or_vid())
                        .with_vdm_type(VdmType::Unstructured)
                        .with_data(unstructured.data());
                    assert_eq!(rebuilt, unstructured);
                }
            }
        }
    }

    #[test]
    fn reserved_command_is_kept() {
        assert_eq!(VdmCommand::from(0x10), VdmCommand::Other(0x10));
        assert_eq!(u8::from(VdmCommand::Other(0x10)), 0x10);
    }
}
