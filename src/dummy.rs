//! A simulated FUSB302 with a port partner, and a timer on a simulated clock, for testing.
use std::cell::Cell;
use std::collections::VecDeque;
use std::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use fusb302_traits::{BusError, CcPin, Hardware, VbusRail};

use crate::counters::{Counter, CounterType};
use crate::protocol_layer::crc::crc32;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::{ControlMessageType, Header, MessageType, SpecificationRevision};
use crate::protocol_layer::{Sop, tokens};
use crate::registers::{
    Control0, Control1, Control2, Control3, Control4, InterruptA, Mask1, MaskA, MaskB, Measure, Power, Register,
    Reset, Slice, Status0, Status1, Status1A, Switches0, Switches1, ToggleMode, ToggleResult,
};
use crate::timers::Timer;
use crate::typec::cc::SourceCurrent;
use crate::{DataRole, PowerRole};

thread_local! {
    static CLOCK: Cell<u64> = const { Cell::new(0) };
}

/// The simulated time in milliseconds.
pub fn now() -> u64 {
    CLOCK.with(Cell::get)
}

/// Set the simulated time.
pub fn set_time(milliseconds: u64) {
    CLOCK.with(|clock| clock.set(milliseconds));
}

/// Advance the simulated time.
pub fn advance(milliseconds: u64) {
    CLOCK.with(|clock| clock.set(clock.get() + milliseconds));
}

/// A timer that expires immediately, advancing the simulated clock.
pub struct DummyTimer;

impl Timer for DummyTimer {
    async fn after_millis(milliseconds: u64) {
        advance(milliseconds);
    }
}

/// The termination that the port partner applies to a CC line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerCc {
    /// Nothing connected.
    Open,
    /// Cable or accessory resistance.
    Ra,
    /// Sink pull-down.
    Rd,
    /// Source pull-up, advertising a current.
    Rp(SourceCurrent),
}

/// A simulated FUSB302 with a port partner.
///
/// The partner acknowledges every transmitted message with GoodCRC, unless told otherwise.
pub struct DummyHardware {
    registers: [u8; 0x44],
    bus_failure: bool,
    partner: [PartnerCc; 2],
    partner_vbus: bool,
    rails: [bool; 2],
    vconn: [bool; 2],
    audio_switch: bool,
    mux: Option<CcPin>,
    rx_fifo: VecDeque<u8>,
    tx_fifo: Vec<u8>,
    transmitted: Vec<(Sop, Vec<u8>)>,
    partner_message_id: [u8; 3],
    hard_resets_sent: usize,
    /// Do not answer transmissions with GoodCRC.
    pub drop_good_crc: bool,
    /// Number of upcoming transmissions that collide.
    pub collisions: usize,
}

impl Default for DummyHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyHardware {
    /// A chip after power-on, without partner.
    pub fn new() -> Self {
        let mut hw = Self {
            registers: [0; 0x44],
            bus_failure: false,
            partner: [PartnerCc::Open; 2],
            partner_vbus: false,
            rails: [false; 2],
            vconn: [false; 2],
            audio_switch: false,
            mux: None,
            rx_fifo: VecDeque::new(),
            tx_fifo: Vec::new(),
            transmitted: Vec::new(),
            partner_message_id: [0; 3],
            hard_resets_sent: 0,
            drop_good_crc: false,
            collisions: 0,
        };
        hw.reset_registers();
        hw
    }

    fn reset_registers(&mut self) {
        self.registers = [0; 0x44];

        let defaults = [
            (Register::DeviceId, 0x91),
            (Register::Switches0, Switches0::default().0),
            (Register::Switches1, Switches1::default().0),
            (Register::Measure, Measure::default().0),
            (Register::Slice, Slice::default().0),
            (Register::Control0, Control0::default().0),
            (Register::Control1, Control1::default().0),
            (Register::Control2, Control2::default().0),
            (Register::Control3, Control3::default().0),
            (Register::Mask1, Mask1::default().0),
            (Register::Power, Power::default().0),
            (Register::MaskA, MaskA::default().0),
            (Register::MaskB, MaskB::default().0),
            (Register::Control4, Control4::default().0),
        ];
        for (register, value) in defaults {
            self.registers[register as usize] = value;
        }

        self.rx_fifo.clear();
        self.tx_fifo.clear();
    }

    /// Make all register accesses fail.
    pub fn fail_bus(&mut self, fail: bool) {
        self.bus_failure = fail;
    }

    /// The raw content of a register.
    pub fn register(&self, address: u8) -> u8 {
        self.registers[address as usize]
    }

    /// Whether one of our VBUS rails is switched on.
    pub fn vbus(&self, rail: VbusRail) -> bool {
        self.rails[rail as usize]
    }

    /// Whether we supply VCONN on a pin.
    pub fn vconn(&self, pin: CcPin) -> bool {
        self.vconn[pin.index()]
    }

    /// The superspeed mux orientation.
    pub fn mux(&self) -> Option<CcPin> {
        self.mux
    }

    /// Whether the audio accessory switch is connected.
    pub fn audio_switch(&self) -> bool {
        self.audio_switch
    }

    /// Number of hard resets that were signaled.
    pub fn hard_resets_sent(&self) -> usize {
        self.hard_resets_sent
    }

    /// Apply partner terminations to both CC lines.
    pub fn set_partner(&mut self, cc1: PartnerCc, cc2: PartnerCc) {
        self.partner = [cc1, cc2];
        self.latch(Register::Interrupt, 1 << 0);
        self.evaluate_toggle();
    }

    /// Attach a source partner on a pin, which also supplies VBUS.
    pub fn attach_source(&mut self, pin: CcPin, current: SourceCurrent) {
        self.partner_vbus = true;
        match pin {
            CcPin::Cc1 => self.set_partner(PartnerCc::Rp(current), PartnerCc::Open),
            CcPin::Cc2 => self.set_partner(PartnerCc::Open, PartnerCc::Rp(current)),
        }
    }

    /// Attach a sink partner on a pin.
    pub fn attach_sink(&mut self, pin: CcPin) {
        match pin {
            CcPin::Cc1 => self.set_partner(PartnerCc::Rd, PartnerCc::Open),
            CcPin::Cc2 => self.set_partner(PartnerCc::Open, PartnerCc::Rd),
        }
    }

    /// Remove the partner.
    pub fn detach(&mut self) {
        self.partner_vbus = false;
        self.set_partner(PartnerCc::Open, PartnerCc::Open);
    }

    /// Switch the partner's VBUS supply.
    pub fn set_partner_vbus(&mut self, on: bool) {
        self.partner_vbus = on;
        self.latch(Register::Interrupt, 1 << 7);
    }

    /// Receive a message from the partner, with the next message ID of the partner.
    pub fn inject(&mut self, sop: Sop, message_type: MessageType, objects: &[u32]) -> Header {
        let id = self.partner_message_id[sop.index()];
        self.partner_message_id[sop.index()] = (id + 1) % 8;

        let header = Header::new(
            self.partner_template(),
            Counter::new_from_value(CounterType::MessageId, id),
            message_type,
            objects.len() as u8,
        );
        self.inject_raw(sop, header, objects);
        header
    }

    /// Receive a message with a given header.
    pub fn inject_raw(&mut self, sop: Sop, header: Header, objects: &[u32]) {
        let mut frame = Vec::new();
        frame.extend_from_slice(&header.0.to_le_bytes());
        for object in objects {
            frame.extend_from_slice(&object.to_le_bytes());
        }
        let crc = crc32(&frame);

        self.rx_fifo.push_back(sop.rx_token());
        self.rx_fifo.extend(frame);
        self.rx_fifo.extend(crc.to_le_bytes());
        self.latch(Register::Interrupt, 1 << 4);
    }

    /// Receive hard reset signaling.
    pub fn inject_hard_reset(&mut self) {
        self.latch(Register::InterruptA, InterruptA(0).with_i_hardrst(true).0);
    }

    /// Take all messages that were transmitted and not collided.
    pub fn take_transmitted(&mut self) -> Vec<(Sop, Message)> {
        self.transmitted
            .drain(..)
            .filter_map(|(sop, bytes)| Message::from_bytes(&bytes).ok().map(|message| (sop, message)))
            .collect()
    }

    fn partner_template(&self) -> Header {
        let ours = Switches1(self.registers[Register::Switches1 as usize]);
        Header::new_template(
            DataRole::from(!ours.data_role()),
            PowerRole::from(!ours.power_role()),
            SpecificationRevision::R2_0,
        )
    }

    fn latch(&mut self, register: Register, bits: u8) {
        self.registers[register as usize] |= bits;
    }

    fn status0(&self) -> Status0 {
        let vbusok = self.partner_vbus || self.rails.iter().any(|on| *on);
        let switches0 = Switches0(self.registers[Register::Switches0 as usize]);
        let status0 = Status0(0).with_vbusok(vbusok);

        let Some(pin) = switches0.measured() else {
            return status0;
        };

        if switches0.pull_up(pin) {
            match self.partner[pin.index()] {
                PartnerCc::Rd => status0.with_bc_lvl(0b10),
                PartnerCc::Ra => status0.with_bc_lvl(0b00),
                PartnerCc::Open | PartnerCc::Rp(_) => status0.with_comp(true).with_bc_lvl(0b11),
            }
        } else if switches0.pull_down(pin) {
            match self.partner[pin.index()] {
                PartnerCc::Rp(SourceCurrent::Default) => status0.with_bc_lvl(0b01),
                PartnerCc::Rp(SourceCurrent::Current1A5) => status0.with_bc_lvl(0b10),
                PartnerCc::Rp(SourceCurrent::Current3A0) => status0.with_bc_lvl(0b11),
                _ => status0,
            }
        } else {
            status0
        }
    }

    fn evaluate_toggle(&mut self) {
        let control2 = Control2(self.registers[Register::Control2 as usize]);
        if !control2.toggle() {
            return;
        }

        let mode = control2.mode();
        let may_sink = matches!(mode, ToggleMode::Drp | ToggleMode::Sink);
        let may_source = matches!(mode, ToggleMode::Drp | ToggleMode::Source);

        let result = match self.partner {
            [PartnerCc::Rp(_), _] if may_sink => ToggleResult::Sink(CcPin::Cc1),
            [_, PartnerCc::Rp(_)] if may_sink => ToggleResult::Sink(CcPin::Cc2),
            [PartnerCc::Rd, _] if may_source => ToggleResult::Source(CcPin::Cc1),
            [_, PartnerCc::Rd] if may_source => ToggleResult::Source(CcPin::Cc2),
            [PartnerCc::Ra, PartnerCc::Ra] if may_source => ToggleResult::AudioAccessory,
            _ => return,
        };

        self.registers[Register::Status1A as usize] = Status1A(0).with_togss(result).0;
        self.latch(Register::InterruptA, InterruptA(0).with_i_togdone(true).0);
    }

    fn write_register(&mut self, address: u8, value: u8) {
        match address {
            a if a == Register::Reset as u8 => {
                let reset = Reset(value);
                if reset.sw_res() {
                    self.reset_registers();
                } else if reset.pd_reset() {
                    self.rx_fifo.clear();
                    self.tx_fifo.clear();
                }
            }
            a if a == Register::Control0 as u8 => {
                let control0 = Control0(value);
                if control0.tx_flush() {
                    self.tx_fifo.clear();
                }
                self.registers[a as usize] = control0.with_tx_flush(false).with_tx_start(false).0;
            }
            a if a == Register::Control1 as u8 => {
                let control1 = Control1(value);
                if control1.rx_flush() {
                    self.rx_fifo.clear();
                }
                self.registers[a as usize] = control1.with_rx_flush(false).0;
            }
            a if a == Register::Control2 as u8 => {
                self.registers[a as usize] = value;
                self.evaluate_toggle();
            }
            a if a == Register::Control3 as u8 => {
                let control3 = Control3(value);
                if control3.send_hard_reset() {
                    self.hard_resets_sent += 1;
                    self.latch(Register::InterruptA, InterruptA(0).with_i_hardsent(true).0);
                }
                self.registers[a as usize] = control3.with_send_hard_reset(false).0;
            }
            a => self.registers[a as usize] = value,
        }
    }

    fn read_register(&mut self, address: u8) -> u8 {
        match address {
            a if a == Register::Status0 as u8 => self.status0().0,
            a if a == Register::Status1 as u8 => Status1(0)
                .with_rx_empty(self.rx_fifo.is_empty())
                .with_tx_empty(self.tx_fifo.is_empty())
                .0,
            a if a == Register::InterruptA as u8
                || a == Register::InterruptB as u8
                || a == Register::Interrupt as u8 =>
            {
                core::mem::take(&mut self.registers[a as usize])
            }
            a => self.registers[a as usize],
        }
    }

    /// Send the frame in the TX FIFO, and answer it like a partner would.
    fn transmit(&mut self) {
        let frame = core::mem::take(&mut self.tx_fifo);
        let Some(sop) = Sop::ALL.into_iter().find(|sop| frame.starts_with(&sop.ordered_set())) else {
            return;
        };

        let len = (frame[4] & !tokens::PACKSYM) as usize;
        let payload = frame[5..5 + len].to_vec();

        if self.collisions > 0 {
            self.collisions -= 1;
            self.latch(Register::Interrupt, 1 << 1);
            return;
        }

        let header = Header(LittleEndian::read_u16(&payload[..2]));
        self.transmitted.push((sop, payload));
        if self.drop_good_crc {
            return;
        }

        let good_crc = Header::new_control(
            self.partner_template(),
            Counter::new_from_value(CounterType::MessageId, header.message_id()),
            ControlMessageType::GoodCRC,
        );
        self.inject_raw(sop, good_crc, &[]);
        self.latch(Register::InterruptA, InterruptA(0).with_i_txsent(true).0);
    }
}

impl Hardware for DummyHardware {
    fn read_registers(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        if self.bus_failure {
            return Err(BusError::Nack);
        }

        if address == Register::Fifo as u8 {
            for byte in buffer.iter_mut() {
                *byte = self.rx_fifo.pop_front().unwrap_or(0);
            }
        } else {
            for (offset, byte) in buffer.iter_mut().enumerate() {
                *byte = self.read_register(address + offset as u8);
            }
        }

        Ok(())
    }

    fn write_registers(&mut self, address: u8, data: &[u8]) -> Result<(), BusError> {
        if self.bus_failure {
            return Err(BusError::Nack);
        }

        if address == Register::Fifo as u8 {
            for byte in data {
                self.tx_fifo.push(*byte);
                if *byte == tokens::TXON {
                    self.transmit();
                }
            }
        } else {
            for (offset, value) in data.iter().enumerate() {
                self.write_register(address + offset as u8, *value);
            }
        }

        Ok(())
    }

    fn interrupt_pending(&mut self) -> bool {
        [Register::InterruptA, Register::InterruptB, Register::Interrupt]
            .iter()
            .any(|register| self.registers[*register as usize] != 0)
    }

    fn now_millis(&self) -> u64 {
        now()
    }

    fn wait_for_interrupt(&mut self) -> impl Future<Output = ()> {
        core::future::poll_fn(move |_| {
            if self.interrupt_pending() {
                core::task::Poll::Ready(())
            } else {
                core::task::Poll::Pending
            }
        })
    }

    fn enable_vbus(&mut self, rail: VbusRail, on: bool) {
        self.rails[rail as usize] = on;
    }

    fn enable_vconn(&mut self, pin: CcPin, on: bool) {
        self.vconn[pin.index()] = on;
    }

    fn select_superspeed_mux(&mut self, orientation: Option<CcPin>) {
        self.mux = orientation;
    }

    fn select_audio_switch(&mut self, on: bool) {
        self.audio_switch = on;
    }
}

#[cfg(test)]
mod tests {
    use fusb302_traits::{CcPin, Hardware};

    use super::DummyHardware;
    use crate::registers::{Control2, Register, Status1A, ToggleMode, ToggleResult};

    #[test]
    fn toggle_settles_on_attached_sink() {
        let mut hw = DummyHardware::new();
        let control2 = Control2::default().with_mode(ToggleMode::Drp).with_toggle(true);
        hw.write_registers(Register::Control2 as u8, &[control2.0]).unwrap();
        assert!(!hw.interrupt_pending());

        hw.attach_sink(CcPin::Cc2);
        assert!(hw.interrupt_pending());

        let mut status1a = [0u8];
        hw.read_registers(Register::Status1A as u8, &mut status1a).unwrap();
        assert_eq!(Status1A(status1a[0]).togss(), ToggleResult::Source(CcPin::Cc2));
    }
}
