//! USB Type-C and USB Power Delivery port stack for the FUSB302 port controller.
//!
//! The stack is layered as
//! - [`typec`]: attach/detach detection, orientation and role arbitration,
//! - [`protocol_layer`]: message framing, message IDs, GoodCRC and retries,
//! - [`policy_engine`]: capability negotiation, swaps and reset escalation,
//! - [`vdm`]: structured VDM discovery and alternate mode entry.
//!
//! All layers are cooperative state machines that share a single [`port::PortContext`],
//! driven by [`port::Port::process`] once per wake event.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
extern crate uom;

#[macro_use]
mod fmt;

pub mod counters;
pub mod device_policy_manager;
#[cfg(test)]
pub mod dummy;
pub mod log_buffer;
pub mod policy_engine;
pub mod port;
pub mod protocol_layer;
pub mod registers;
pub mod timers;
pub mod typec;
pub mod vdm;

pub use fusb302_traits::{BusError, CcPin, Hardware, VbusRail};

use crate::protocol_layer::message::ParseError;

/// Errors that abort a single processing cycle of the port.
///
/// The next wake event retries from the state that was reached.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Register access failed.
    #[error("register access failed: {0}")]
    Bus(#[from] BusError),
    /// A message could not be parsed.
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),
    /// The requested message cannot be sent by this port.
    #[error("unsupported request")]
    UnsupportedRequest,
    /// The request queue of the policy engine is full.
    #[error("request queue full")]
    QueueFull,
}

/// Physical quantities used in capability and request objects.
pub mod units {
    pub use uom::si::f32::{ElectricCurrent, ElectricPotential, Power};
}

mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// The power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerRole {
    /// Provides power on VBUS.
    Source,
    /// Consumes power from VBUS.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataRole {
    /// Upstream facing port.
    Ufp,
    /// Downstream facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
