//! Power data objects, as advertised in source and sink capabilities.
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::{centiampere, milliampere};
use uom::si::electric_potential::millivolt;
use uom::si::power::milliwatt;

use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// Kinds of supplies that can be reported within capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// Fixed voltage supply.
    FixedSupply,
    /// Battery supply.
    Battery,
    /// Variable voltage supply.
    VariableSupply,
    /// Augmented supply.
    Augmented,
}

/// A power data object holds information about one type of capability.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerDataObject {
    /// Fixed voltage supply.
    FixedSupply(FixedSupply),
    /// Battery supply.
    Battery(Battery),
    /// Variable voltage supply.
    VariableSupply(VariableSupply),
    /// Augmented supply, kept raw.
    Augmented(u32),
}

impl From<u32> for PowerDataObject {
    fn from(value: u32) -> Self {
        match RawPowerDataObject(value).kind() {
            0b00 => PowerDataObject::FixedSupply(FixedSupply(value)),
            0b01 => PowerDataObject::Battery(Battery(value)),
            0b10 => PowerDataObject::VariableSupply(VariableSupply(value)),
            _ => PowerDataObject::Augmented(value),
        }
    }
}

impl PowerDataObject {
    /// The raw data object.
    pub fn raw(&self) -> u32 {
        match self {
            PowerDataObject::FixedSupply(pdo) => pdo.0,
            PowerDataObject::Battery(pdo) => pdo.0,
            PowerDataObject::VariableSupply(pdo) => pdo.0,
            PowerDataObject::Augmented(raw) => *raw,
        }
    }

    /// The kind of supply.
    pub fn kind(&self) -> Kind {
        match self {
            PowerDataObject::FixedSupply(_) => Kind::FixedSupply,
            PowerDataObject::Battery(_) => Kind::Battery,
            PowerDataObject::VariableSupply(_) => Kind::VariableSupply,
            PowerDataObject::Augmented(_) => Kind::Augmented,
        }
    }

    /// Voltage and maximum current of fixed and variable supplies.
    ///
    /// Variable supplies report their maximum voltage.
    pub fn voltage_and_current(&self) -> Option<(ElectricPotential, ElectricCurrent)> {
        match self {
            PowerDataObject::FixedSupply(pdo) => Some((pdo.voltage(), pdo.max_current())),
            PowerDataObject::VariableSupply(pdo) => Some((pdo.max_voltage(), pdo.max_current())),
            _ => None,
        }
    }
}

bitfield! {
    /// A raw power data object.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The kind of power data object.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply
        pub kind: u8 @ 30..=31,
        /// Dual-role power
        pub dual_role_power: bool @ 29,
        /// USB suspend supported (source), higher capability (sink)
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power
        pub unconstrained_power: bool @ 27,
        /// USB communications capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data
        pub dual_role_data: bool @ 25,
        /// Peak current
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(clippy::derivable_impls)]
impl Default for FixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupply {
    /// A fixed supply with voltage and maximum current given in mV and mA.
    pub fn new(millivolts: u32, milliamperes: u32) -> Self {
        Self::default()
            .with_raw_voltage((millivolts / 50) as u16)
            .with_raw_max_current((milliamperes / 10) as u16)
    }

    /// The voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// The maximum current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    /// A battery supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum Allowable Power in 250 mW units
        pub raw_max_power: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl Battery {
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    /// A variable supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply (non-battery)
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl VariableSupply {
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

/// A set of up to seven power data objects, replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities(pub Vec<PowerDataObject, 7>);

impl Capabilities {
    /// Interpret raw data objects. Objects past the seventh are dropped.
    pub fn from_raw(objects: &[u32]) -> Self {
        Self(objects.iter().take(7).map(|object| PowerDataObject::from(*object)).collect())
    }

    /// The vSafe5V object, which always comes first.
    pub fn vsafe_5v(&self) -> Option<&FixedSupply> {
        self.0.first().and_then(|supply| {
            if let PowerDataObject::FixedSupply(supply) = supply {
                Some(supply)
            } else {
                None
            }
        })
    }

    /// Whether the partner is dual-role power capable.
    pub fn dual_role_power(&self) -> bool {
        self.vsafe_5v().map(FixedSupply::dual_role_power).unwrap_or_default()
    }

    /// Whether the partner is dual-role data capable.
    pub fn dual_role_data(&self) -> bool {
        self.vsafe_5v().map(FixedSupply::dual_role_data).unwrap_or_default()
    }

    /// The power data objects.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// The object at a 1-based object position.
    pub fn at_object_position(&self, position: u8) -> Option<&PowerDataObject> {
        match position {
            0 => None,
            position => self.0.get(position as usize - 1),
        }
    }
}

/// Convert a voltage to millivolts, rounded to nearest.
pub fn to_millivolts(voltage: ElectricPotential) -> u32 {
    (voltage.get::<millivolt>() + 0.5) as u32
}

/// Convert a current to milliamperes, rounded to nearest.
pub fn to_milliamperes(current: ElectricCurrent) -> u32 {
    (current.get::<milliampere>() + 0.5) as u32
}

/// Convert a power to milliwatts, rounded to nearest.
pub fn to_milliwatts(power: Power) -> u32 {
    (power.get::<milliwatt>() + 0.5) as u32
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, FixedSupply, Kind, PowerDataObject, to_milliamperes, to_millivolts};

    #[test]
    fn fixed_supply_fields() {
        let pdo = FixedSupply::new(12_000, 1_500);
        assert_eq!(pdo.raw_voltage(), 240);
        assert_eq!(pdo.raw_max_current(), 150);
        assert_eq!(to_millivolts(pdo.voltage()), 12_000);
        assert_eq!(to_milliamperes(pdo.max_current()), 1_500);
    }

    #[test]
    fn capabilities_interpret_kinds() {
        let caps = Capabilities::from_raw(&[0x2601_912C, 0x8000_0000 | (100 << 20) | (60 << 10) | 200, 0xC000_0000]);

        assert!(caps.dual_role_power());
        assert_eq!(caps.pdos()[1].kind(), Kind::VariableSupply);
        assert_eq!(caps.pdos()[2], PowerDataObject::Augmented(0xC000_0000));
        assert!(caps.at_object_position(0).is_none());
        assert!(caps.at_object_position(4).is_none());
        assert_eq!(caps.at_object_position(1).map(PowerDataObject::kind), Some(Kind::FixedSupply));
    }
}
