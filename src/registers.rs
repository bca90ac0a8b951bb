//! FUSB302 register file.
//!
//! Register layouts are `proc-bitfield` types whose `Default` is the power-on reset value.
//! [`Device`] owns the hardware and a mirror of all writable configuration registers.
//! Every setter writes the hardware first and updates the mirror only when the write succeeded,
//! so the mirror never holds a value the chip does not.
use fusb302_traits::{CcPin, Hardware};
use proc_bitfield::bitfield;

use crate::Error;

/// Register addresses.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    DeviceId = 0x01,
    Switches0 = 0x02,
    Switches1 = 0x03,
    Measure = 0x04,
    Slice = 0x05,
    Control0 = 0x06,
    Control1 = 0x07,
    Control2 = 0x08,
    Control3 = 0x09,
    Mask1 = 0x0A,
    Power = 0x0B,
    Reset = 0x0C,
    OcPreg = 0x0D,
    MaskA = 0x0E,
    MaskB = 0x0F,
    Control4 = 0x10,
    Status0A = 0x3C,
    Status1A = 0x3D,
    InterruptA = 0x3E,
    InterruptB = 0x3F,
    Status0 = 0x40,
    Status1 = 0x41,
    Interrupt = 0x42,
    Fifo = 0x43,
}

/// Host pull-up current advertised on CC when acting as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCurrent {
    /// Pull-ups disabled.
    None,
    /// 80 µA, default USB power.
    Default,
    /// 180 µA, 1.5 A.
    Medium,
    /// 330 µA, 3 A.
    High,
}

impl From<u8> for HostCurrent {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::None,
            0b01 => Self::Default,
            0b10 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl From<HostCurrent> for u8 {
    fn from(value: HostCurrent) -> Self {
        match value {
            HostCurrent::None => 0b00,
            HostCurrent::Default => 0b01,
            HostCurrent::Medium => 0b10,
            HostCurrent::High => 0b11,
        }
    }
}

/// Role that the autonomous toggle engine polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleMode {
    /// Manual mode, no polling.
    Manual,
    /// Dual-role polling.
    Drp,
    /// Sink polling.
    Sink,
    /// Source polling.
    Source,
}

impl From<u8> for ToggleMode {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::Manual,
            0b01 => Self::Drp,
            0b10 => Self::Sink,
            _ => Self::Source,
        }
    }
}

impl From<ToggleMode> for u8 {
    fn from(value: ToggleMode) -> Self {
        match value {
            ToggleMode::Manual => 0b00,
            ToggleMode::Drp => 0b01,
            ToggleMode::Sink => 0b10,
            ToggleMode::Source => 0b11,
        }
    }
}

/// Result of the autonomous toggle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleResult {
    /// Toggle logic is still running.
    Running,
    /// Settled as source, Rd detected on the given pin.
    Source(CcPin),
    /// Settled as sink, Rp detected on the given pin.
    Sink(CcPin),
    /// Ra detected on both pins.
    AudioAccessory,
    /// Undefined result.
    Other(u8),
}

impl From<u8> for ToggleResult {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            0b000 => Self::Running,
            0b001 => Self::Source(CcPin::Cc1),
            0b010 => Self::Source(CcPin::Cc2),
            0b101 => Self::Sink(CcPin::Cc1),
            0b110 => Self::Sink(CcPin::Cc2),
            0b111 => Self::AudioAccessory,
            other => Self::Other(other),
        }
    }
}

impl From<ToggleResult> for u8 {
    fn from(value: ToggleResult) -> Self {
        match value {
            ToggleResult::Running => 0b000,
            ToggleResult::Source(CcPin::Cc1) => 0b001,
            ToggleResult::Source(CcPin::Cc2) => 0b010,
            ToggleResult::Sink(CcPin::Cc1) => 0b101,
            ToggleResult::Sink(CcPin::Cc2) => 0b110,
            ToggleResult::AudioAccessory => 0b111,
            ToggleResult::Other(other) => other & 0b111,
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct DeviceId(pub u8): Debug, FromStorage, IntoStorage {
        pub version_id: u8 @ 4..=7,
        pub product_id: u8 @ 2..=3,
        pub revision_id: u8 @ 0..=1,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Switches0(pub u8): Debug, FromStorage, IntoStorage {
        /// Host pull-up on CC2
        pub pu_en2: bool @ 7,
        /// Host pull-up on CC1
        pub pu_en1: bool @ 6,
        /// VCONN on CC2
        pub vconn_cc2: bool @ 5,
        /// VCONN on CC1
        pub vconn_cc1: bool @ 4,
        /// Measure block on CC2
        pub meas_cc2: bool @ 3,
        /// Measure block on CC1
        pub meas_cc1: bool @ 2,
        /// Pull-down on CC2
        pub pdwn2: bool @ 1,
        /// Pull-down on CC1
        pub pdwn1: bool @ 0,
    }
}

impl Switches0 {
    /// Route the measure block to a single pin.
    pub fn with_measure(self, pin: CcPin) -> Self {
        self.with_meas_cc1(pin == CcPin::Cc1).with_meas_cc2(pin == CcPin::Cc2)
    }

    /// The pin the measure block is routed to, if exactly one.
    pub fn measured(&self) -> Option<CcPin> {
        match (self.meas_cc1(), self.meas_cc2()) {
            (true, false) => Some(CcPin::Cc1),
            (false, true) => Some(CcPin::Cc2),
            _ => None,
        }
    }

    /// Whether the host pull-up is applied to a pin.
    pub fn pull_up(&self, pin: CcPin) -> bool {
        match pin {
            CcPin::Cc1 => self.pu_en1(),
            CcPin::Cc2 => self.pu_en2(),
        }
    }

    /// Whether the pull-down is applied to a pin.
    pub fn pull_down(&self, pin: CcPin) -> bool {
        match pin {
            CcPin::Cc1 => self.pdwn1(),
            CcPin::Cc2 => self.pdwn2(),
        }
    }

    /// Switch VCONN onto a pin, or remove it from both.
    pub fn with_vconn(self, pin: Option<CcPin>) -> Self {
        self.with_vconn_cc1(pin == Some(CcPin::Cc1))
            .with_vconn_cc2(pin == Some(CcPin::Cc2))
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Switches1(pub u8): Debug, FromStorage, IntoStorage {
        /// Power role of automatically generated GoodCRC messages
        pub power_role: bool @ 7,
        /// Specification revision of automatically generated GoodCRC messages
        pub spec_rev: u8 @ 5..=6,
        /// Data role of automatically generated GoodCRC messages
        pub data_role: bool @ 4,
        /// Automatically acknowledge received messages with GoodCRC
        pub auto_crc: bool @ 2,
        /// BMC transmit driver on CC2
        pub txcc2: bool @ 1,
        /// BMC transmit driver on CC1
        pub txcc1: bool @ 0,
    }
}

impl Switches1 {
    /// Enable the BMC transmit driver on a single pin, or on none.
    pub fn with_transmit(self, pin: Option<CcPin>) -> Self {
        self.with_txcc1(pin == Some(CcPin::Cc1)).with_txcc2(pin == Some(CcPin::Cc2))
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Measure(pub u8): Debug, FromStorage, IntoStorage {
        /// Measure VBUS instead of CC
        pub meas_vbus: bool @ 6,
        /// Comparator threshold, 42 mV steps (420 mV steps when measuring VBUS)
        pub mdac: u8 @ 0..=5,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Slice(pub u8): Debug, FromStorage, IntoStorage {
        pub sdac_hys: u8 @ 6..=7,
        pub sdac: u8 @ 0..=5,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Control0(pub u8): Debug, FromStorage, IntoStorage {
        /// Self-clearing TX FIFO flush
        pub tx_flush: bool @ 6,
        /// Mask all interrupts
        pub int_mask: bool @ 5,
        /// Host pull-up current
        pub host_cur: u8 [get HostCurrent, set HostCurrent] @ 2..=3,
        /// Start transmitter on TXON without SOP preamble
        pub auto_pre: bool @ 1,
        /// Self-clearing transmit start
        pub tx_start: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Control1(pub u8): Debug, FromStorage, IntoStorage {
        pub ensop2db: bool @ 6,
        pub ensop1db: bool @ 5,
        pub bist_mode2: bool @ 4,
        /// Self-clearing RX FIFO flush
        pub rx_flush: bool @ 2,
        /// Receive SOP'' packets
        pub ensop2: bool @ 1,
        /// Receive SOP' packets
        pub ensop1: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Control2(pub u8): Debug, FromStorage, IntoStorage {
        pub tog_save_pwr: u8 @ 6..=7,
        /// Stop toggling on Ra
        pub tog_rd_only: bool @ 5,
        pub wake_en: bool @ 3,
        /// Toggle engine mode
        pub mode: u8 [get ToggleMode, set ToggleMode] @ 1..=2,
        /// Enable the toggle engine
        pub toggle: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Control3(pub u8): Debug, FromStorage, IntoStorage {
        /// Self-clearing hard reset ordered set transmission
        pub send_hard_reset: bool @ 6,
        pub bist_tmode: bool @ 5,
        pub auto_hardreset: bool @ 4,
        pub auto_softreset: bool @ 3,
        /// Hardware retries
        pub n_retries: u8 @ 1..=2,
        /// Hardware retry on missing GoodCRC
        pub auto_retry: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Mask1(pub u8): Debug, FromStorage, IntoStorage {
        pub m_vbusok: bool @ 7,
        pub m_activity: bool @ 6,
        pub m_comp_chng: bool @ 5,
        pub m_crc_chk: bool @ 4,
        pub m_alert: bool @ 3,
        pub m_wake: bool @ 2,
        pub m_collision: bool @ 1,
        pub m_bc_lvl: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Power(pub u8): Debug, FromStorage, IntoStorage {
        /// Power enables: bandgap/wake, receiver, measure block, internal oscillator
        pub pwr: u8 @ 0..=3,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Reset(pub u8): Debug, FromStorage, IntoStorage {
        /// Reset the PD logic
        pub pd_reset: bool @ 1,
        /// Reset the whole chip, including the register file
        pub sw_res: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct MaskA(pub u8): Debug, FromStorage, IntoStorage {
        pub m_ocp_temp: bool @ 7,
        pub m_togdone: bool @ 6,
        pub m_softfail: bool @ 5,
        pub m_retryfail: bool @ 4,
        pub m_hardsent: bool @ 3,
        pub m_txsent: bool @ 2,
        pub m_softrst: bool @ 1,
        pub m_hardrst: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct MaskB(pub u8): Debug, FromStorage, IntoStorage {
        pub m_gcrcsent: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Control4(pub u8): Debug, FromStorage, IntoStorage {
        /// Stop toggling on audio accessories
        pub tog_exit_aud: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status0A(pub u8): Debug, FromStorage, IntoStorage {
        pub softfail: bool @ 5,
        pub retryfail: bool @ 4,
        pub power: u8 @ 2..=3,
        pub softrst: bool @ 1,
        pub hardrst: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status1A(pub u8): Debug, FromStorage, IntoStorage {
        /// Toggle engine result
        pub togss: u8 [get ToggleResult, set ToggleResult] @ 3..=5,
        pub rxsop2db: bool @ 2,
        pub rxsop1db: bool @ 1,
        pub rxsop: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterruptA(pub u8): Debug, FromStorage, IntoStorage {
        pub i_ocp_temp: bool @ 7,
        /// The toggle engine settled
        pub i_togdone: bool @ 6,
        pub i_softfail: bool @ 5,
        /// Hardware retries exhausted
        pub i_retryfail: bool @ 4,
        /// Hard reset ordered set sent
        pub i_hardsent: bool @ 3,
        /// Message sent and acknowledged with GoodCRC
        pub i_txsent: bool @ 2,
        pub i_softrst: bool @ 1,
        /// Hard reset ordered set received
        pub i_hardrst: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterruptB(pub u8): Debug, FromStorage, IntoStorage {
        /// GoodCRC sent in response to a received message
        pub i_gcrcsent: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status0(pub u8): Debug, FromStorage, IntoStorage {
        /// VBUS above vVBUSthr
        pub vbusok: bool @ 7,
        pub activity: bool @ 6,
        /// Measured CC voltage above the MDAC threshold
        pub comp: bool @ 5,
        pub crc_chk: bool @ 4,
        pub alert: bool @ 3,
        pub wake: bool @ 2,
        /// Measured CC voltage level: <200 mV, <660 mV, <1.23 V, >=1.23 V
        pub bc_lvl: u8 @ 0..=1,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status1(pub u8): Debug, FromStorage, IntoStorage {
        pub rxsop2: bool @ 7,
        pub rxsop1: bool @ 6,
        pub rx_empty: bool @ 5,
        pub rx_full: bool @ 4,
        pub tx_empty: bool @ 3,
        pub tx_full: bool @ 2,
        pub ovrtemp: bool @ 1,
        pub ocp: bool @ 0,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Interrupt(pub u8): Debug, FromStorage, IntoStorage {
        /// VBUSOK changed
        pub i_vbusok: bool @ 7,
        pub i_activity: bool @ 6,
        /// COMP changed
        pub i_comp_chng: bool @ 5,
        /// A packet with a valid CRC was received
        pub i_crc_chk: bool @ 4,
        pub i_alert: bool @ 3,
        pub i_wake: bool @ 2,
        /// Transmission aborted because the line was busy
        pub i_collision: bool @ 1,
        /// BC_LVL changed
        pub i_bc_lvl: bool @ 0,
    }
}

macro_rules! reset_values {
    ($($reg:ident = $value:expr),* $(,)?) => {
        $(
            impl Default for $reg {
                fn default() -> Self {
                    Self($value)
                }
            }
        )*
    };
}

reset_values!(
    DeviceId = 0b1001_0000,
    Switches0 = 0b0000_0011,
    Switches1 = 0b0010_0000,
    Measure = 0b0011_0001,
    Slice = 0b0110_0000,
    Control0 = 0b0010_0100,
    Control1 = 0b0000_0000,
    Control2 = 0b0000_0010,
    Control3 = 0b0000_0110,
    Mask1 = 0b0000_0000,
    Power = 0b0000_0001,
    Reset = 0b0000_0000,
    MaskA = 0b0000_0000,
    MaskB = 0b0000_0000,
    Control4 = 0b0000_0000,
    Status0A = 0b0000_0000,
    Status1A = 0b0000_0000,
    InterruptA = 0b0000_0000,
    InterruptB = 0b0000_0000,
    Status0 = 0b0000_0000,
    Status1 = 0b0010_1000,
    Interrupt = 0b0000_0000,
);

/// Interrupt and status registers, read in one burst from `Status0A` to `Interrupt`.
///
/// Reading clears the interrupt registers. Status fields describe the moment of the burst read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptSnapshot {
    /// Status0A
    pub status0a: Status0A,
    /// Status1A
    pub status1a: Status1A,
    /// InterruptA
    pub interrupt_a: InterruptA,
    /// InterruptB
    pub interrupt_b: InterruptB,
    /// Status0
    pub status0: Status0,
    /// Status1
    pub status1: Status1,
    /// Interrupt
    pub interrupt: Interrupt,
}

macro_rules! mirrored_registers {
    ($(($reg:ident, $getter:ident, $setter:ident)),* $(,)?) => {
        /// Mirror of the writable configuration registers.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct Mirror {
            $(
                #[allow(missing_docs)]
                pub $getter: $reg,
            )*
        }

        impl<HW: Hardware> Device<HW> {
            $(
                #[doc = concat!("The last value written to `", stringify!($reg), "`.")]
                pub fn $getter(&self) -> $reg {
                    self.mirror.$getter
                }

                #[doc = concat!("Write `", stringify!($reg), "` and update the mirror.")]
                pub fn $setter(&mut self, value: $reg) -> Result<(), Error> {
                    self.hw.write_registers(Register::$reg as u8, &[value.0])?;
                    self.mirror.$getter = value;
                    Ok(())
                }
            )*
        }
    };
}

/// The FUSB302 device: hardware access plus register mirror.
#[derive(Debug)]
pub struct Device<HW: Hardware> {
    hw: HW,
    mirror: Mirror,
}

mirrored_registers!(
    (Switches0, switches0, set_switches0),
    (Switches1, switches1, set_switches1),
    (Measure, measure, set_measure),
    (Slice, slice, set_slice),
    (Control0, control0, set_control0),
    (Control1, control1, set_control1),
    (Control2, control2, set_control2),
    (Control3, control3, set_control3),
    (Mask1, mask1, set_mask1),
    (Power, power, set_power),
    (MaskA, mask_a, set_mask_a),
    (MaskB, mask_b, set_mask_b),
    (Control4, control4, set_control4),
);

impl<HW: Hardware> Device<HW> {
    /// Wrap the hardware. The mirror starts out at the reset values.
    pub fn new(hw: HW) -> Self {
        Self {
            hw,
            mirror: Mirror::default(),
        }
    }

    /// Access to the hardware, for board-level side effects.
    pub fn hw(&mut self) -> &mut HW {
        &mut self.hw
    }

    /// Shared access to the hardware.
    pub fn hw_ref(&self) -> &HW {
        &self.hw
    }

    /// The register mirror.
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    fn read_register(&mut self, register: Register) -> Result<u8, Error> {
        let mut buffer = [0u8; 1];
        self.hw.read_registers(register as u8, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Read the device ID.
    pub fn device_id(&mut self) -> Result<DeviceId, Error> {
        Ok(DeviceId(self.read_register(Register::DeviceId)?))
    }

    /// Reset the whole chip, and the mirror with it.
    pub fn reset_chip(&mut self) -> Result<(), Error> {
        self.hw
            .write_registers(Register::Reset as u8, &[Reset(0).with_sw_res(true).0])?;
        self.mirror = Mirror::default();
        Ok(())
    }

    /// Reset the PD logic, including the chip's own message ID counter.
    pub fn reset_pd(&mut self) -> Result<(), Error> {
        self.hw
            .write_registers(Register::Reset as u8, &[Reset(0).with_pd_reset(true).0])?;
        Ok(())
    }

    /// Flush the TX FIFO. The flush bit self-clears and is not mirrored.
    pub fn flush_tx(&mut self) -> Result<(), Error> {
        let value = self.mirror.control0.with_tx_flush(true);
        self.hw.write_registers(Register::Control0 as u8, &[value.0])?;
        Ok(())
    }

    /// Flush the RX FIFO. The flush bit self-clears and is not mirrored.
    pub fn flush_rx(&mut self) -> Result<(), Error> {
        let value = self.mirror.control1.with_rx_flush(true);
        self.hw.write_registers(Register::Control1 as u8, &[value.0])?;
        Ok(())
    }

    /// Send hard reset ordered sets. The request bit self-clears and is not mirrored.
    pub fn send_hard_reset(&mut self) -> Result<(), Error> {
        let value = self.mirror.control3.with_send_hard_reset(true);
        self.hw.write_registers(Register::Control3 as u8, &[value.0])?;
        Ok(())
    }

    /// Read `Status0`.
    pub fn status0(&mut self) -> Result<Status0, Error> {
        Ok(Status0(self.read_register(Register::Status0)?))
    }

    /// Read `Status1`.
    pub fn status1(&mut self) -> Result<Status1, Error> {
        Ok(Status1(self.read_register(Register::Status1)?))
    }

    /// Read all interrupt and status registers in one burst, clearing the interrupts.
    pub fn read_interrupts(&mut self) -> Result<InterruptSnapshot, Error> {
        let mut buffer = [0u8; 7];
        self.hw.read_registers(Register::Status0A as u8, &mut buffer)?;

        Ok(InterruptSnapshot {
            status0a: Status0A(buffer[0]),
            status1a: Status1A(buffer[1]),
            interrupt_a: InterruptA(buffer[2]),
            interrupt_b: InterruptB(buffer[3]),
            status0: Status0(buffer[4]),
            status1: Status1(buffer[5]),
            interrupt: Interrupt(buffer[6]),
        })
    }

    /// Read bytes from the RX FIFO.
    pub fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        self.hw.read_registers(Register::Fifo as u8, buffer)?;
        Ok(())
    }

    /// Write bytes to the TX FIFO.
    pub fn write_fifo(&mut self, data: &[u8]) -> Result<(), Error> {
        self.hw.write_registers(Register::Fifo as u8, data)?;
        Ok(())
    }
}
