//! Definitions of request message content.
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::pdo::{Kind, PowerDataObject};
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, Power};

bitfield! {
    /// A request data object, before it is interpreted against the advertised capabilities.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
    }
}

bitfield! {
    /// Request for a fixed or variable supply.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        /// Operating current in 10 mA units
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum (or minimum, with giveback) operating current in 10 mA units
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl FixedVariableSupply {
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

bitfield! {
    /// Request for a battery supply.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Object position (0000b and 1110b…1111b are Reserved and Shall Not be used)
        pub object_position: u8 @ 28..=31,
        /// GiveBackFlag = 0
        pub giveback_flag: bool @ 27,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
        /// USB communications capable
        pub usb_communications_capable: bool @ 25,
        /// No USB Suspend
        pub no_usb_suspend: bool @ 24,
        /// Operating power in 250mW units
        pub raw_operating_power: u16 @ 10..=19,
        /// Maximum operating power in 250mW units
        pub raw_max_operating_power: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl Battery {
    pub fn operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_operating_power().into())
    }

    pub fn max_operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_operating_power().into())
    }
}

/// A request, interpreted against the capabilities it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
    /// Request for a fixed or variable supply.
    FixedVariableSupply(FixedVariableSupply),
    /// Request for a battery supply.
    Battery(Battery),
    /// The object position does not refer to a supported object.
    Unknown(RawDataObject),
}

impl PowerSource {
    /// Interpret a request according to the kind of the object it selects.
    pub fn interpret(raw: RawDataObject, pdos: &[PowerDataObject]) -> Self {
        let selected = match raw.object_position() {
            0 => None,
            position => pdos.get(position as usize - 1),
        };

        match selected.map(PowerDataObject::kind) {
            Some(Kind::FixedSupply | Kind::VariableSupply) => Self::FixedVariableSupply(FixedVariableSupply(raw.0)),
            Some(Kind::Battery) => Self::Battery(Battery(raw.0)),
            _ => Self::Unknown(raw),
        }
    }

    /// The 1-based position of the selected object.
    pub fn object_position(&self) -> u8 {
        match self {
            Self::FixedVariableSupply(rdo) => rdo.object_position(),
            Self::Battery(rdo) => rdo.object_position(),
            Self::Unknown(rdo) => rdo.object_position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedVariableSupply, PowerSource, RawDataObject};
    use crate::protocol_layer::message::data::pdo::{FixedSupply, PowerDataObject, to_milliamperes};

    #[test]
    fn request_is_interpreted_against_capabilities() {
        let pdos = [PowerDataObject::FixedSupply(FixedSupply::new(5_000, 1_500))];
        let rdo = FixedVariableSupply(0)
            .with_object_position(1)
            .with_raw_operating_current(100)
            .with_raw_max_operating_current(150);

        match PowerSource::interpret(RawDataObject(rdo.0), &pdos) {
            PowerSource::FixedVariableSupply(request) => {
                assert_eq!(to_milliamperes(request.operating_current()), 1_000);
                assert_eq!(to_milliamperes(request.max_operating_current()), 1_500);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let out_of_range = RawDataObject(0).with_object_position(2);
        assert_eq!(
            PowerSource::interpret(out_of_range, &pdos),
            PowerSource::Unknown(out_of_range)
        );
    }
}
