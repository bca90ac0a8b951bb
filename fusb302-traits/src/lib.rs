//! FUSB302 Type-C/USB-PD stack traits.
//!
//! Provides the hardware trait through which the port stack reaches the controller's
//! register file and the board-level power switches.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
use core::future::Future;

/// Register transport error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The device did not acknowledge the transfer.
    #[error("transfer not acknowledged")]
    Nack,

    /// The bus timed out during the transfer.
    #[error("bus timeout")]
    Timeout,

    /// Any other transport failure.
    #[error("bus failure")]
    Other,
}

/// One of the two configuration channel pins of a Type-C connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcPin {
    /// CC1
    Cc1,
    /// CC2
    Cc2,
}

impl CcPin {
    /// The respective other pin.
    pub fn other(self) -> Self {
        match self {
            CcPin::Cc1 => CcPin::Cc2,
            CcPin::Cc2 => CcPin::Cc1,
        }
    }

    /// Index into per-pin arrays.
    pub fn index(self) -> usize {
        match self {
            CcPin::Cc1 => 0,
            CcPin::Cc2 => 1,
        }
    }
}

/// VBUS supply rails that a source port can switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VbusRail {
    /// vSafe5V rail.
    V5,
    /// 12 V rail.
    V12,
}

/// Hardware trait, through which the port stack talks to the controller and the board.
///
/// Register transactions are synchronous and short. Side effects on power switches and muxes
/// are fire-and-forget.
pub trait Hardware {
    /// Read `buffer.len()` consecutive registers, starting at `address`.
    fn read_registers(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError>;

    /// Write consecutive registers, starting at `address`.
    fn write_registers(&mut self, address: u8, data: &[u8]) -> Result<(), BusError>;

    /// Whether the (level-sensitive) interrupt line is asserted.
    fn interrupt_pending(&mut self) -> bool;

    /// Monotonic time in milliseconds.
    fn now_millis(&self) -> u64;

    /// Wait until the interrupt line is asserted.
    fn wait_for_interrupt(&mut self) -> impl Future<Output = ()>;

    /// Switch a VBUS supply rail.
    fn enable_vbus(&mut self, rail: VbusRail, on: bool);

    /// Switch an external VCONN supply onto a CC pin.
    ///
    /// Boards that rely on the controller's internal VCONN switches can ignore this.
    fn enable_vconn(&mut self, _pin: CcPin, _on: bool) {}

    /// Route the superspeed lanes for the given plug orientation, or disconnect them.
    fn select_superspeed_mux(&mut self, _orientation: Option<CcPin>) {}

    /// Connect or disconnect the audio accessory switch.
    fn select_audio_switch(&mut self, _on: bool) {}
}
