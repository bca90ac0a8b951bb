//! The protocol layer is controlled by the policy engine, and commands the FUSB302's BMC PHY.
//!
//! Handles
//! - framing of messages with ordered sets and FIFO tokens,
//! - message IDs per SOP type, and duplicate suppression,
//! - GoodCRC verification and retries after collisions,
//! - hard reset signaling.
//!
//! One message is in flight at a time. The policy engine queues it with [`ProtocolLayer::transmit`]
//! and collects the outcome with [`ProtocolLayer::take_tx_result`].
pub mod crc;
pub mod message;

use byteorder::{ByteOrder, LittleEndian};
use fusb302_traits::{CcPin, Hardware};
use heapless::Deque;
use message::data::Data;
use message::header::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
use message::{MAX_MESSAGE_SIZE, Message, ParseError};

use crate::counters::{Counter, CounterType};
use crate::log_buffer::{RecordKind, Token};
use crate::port::PortContext;
use crate::registers::{Control1, Control3, InterruptSnapshot, Mask1, MaskA, MaskB, Power, Switches1};
use crate::timers::{TimerId, TimerType};
use crate::{DataRole, Error, PowerRole};

/// FIFO tokens of the FUSB302 transmitter.
pub(crate) mod tokens {
    pub const SYNC1: u8 = 0x12;
    pub const SYNC2: u8 = 0x13;
    pub const SYNC3: u8 = 0x1B;
    pub const EOP: u8 = 0x14;
    pub const PACKSYM: u8 = 0x80;
    pub const JAM_CRC: u8 = 0xFF;
    pub const TXOFF: u8 = 0xFE;
    pub const TXON: u8 = 0xA1;
}

/// Size of the largest transmit frame.
const MAX_FRAME_SIZE: usize = 4 + 1 + MAX_MESSAGE_SIZE + 4;

/// Start-of-packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sop {
    /// The port partner.
    Sop,
    /// The near-end cable plug.
    SopPrime,
    /// The far-end cable plug.
    SopDoublePrime,
}

impl Sop {
    /// All SOP types.
    pub const ALL: [Sop; 3] = [Sop::Sop, Sop::SopPrime, Sop::SopDoublePrime];

    /// Index into per-SOP arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The ordered set that starts a packet of this type.
    pub(crate) fn ordered_set(self) -> [u8; 4] {
        use tokens::{SYNC1, SYNC2, SYNC3};

        match self {
            Sop::Sop => [SYNC1, SYNC1, SYNC1, SYNC2],
            Sop::SopPrime => [SYNC1, SYNC1, SYNC3, SYNC3],
            Sop::SopDoublePrime => [SYNC1, SYNC3, SYNC1, SYNC3],
        }
    }

    /// Decode the token that precedes a packet in the RX FIFO.
    pub fn from_rx_token(token: u8) -> Option<Self> {
        match token & 0xE0 {
            0xE0 => Some(Sop::Sop),
            0xC0 => Some(Sop::SopPrime),
            0xA0 => Some(Sop::SopDoublePrime),
            _ => None,
        }
    }

    /// The token that precedes a packet of this type in the RX FIFO.
    pub fn rx_token(self) -> u8 {
        match self {
            Sop::Sop => 0xE0,
            Sop::SopPrime => 0xC0,
            Sop::SopDoublePrime => 0xA0,
        }
    }
}

/// States of the protocol layer.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolState {
    Disabled,
    Reset,
    ResetWait,
    Idle,
    TxSendingMessage,
    TxVerifyGoodCrc,
    SendingHardReset,
}

/// Lifecycle of a single transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStatus {
    /// Nothing queued.
    Idle,
    /// A message is queued for transmission.
    Send,
    /// The message is on the wire.
    Busy,
    /// The message was acknowledged with a matching GoodCRC.
    Success,
    /// No or a wrong GoodCRC was received.
    Error,
    /// Retries after collisions are exhausted.
    Collision,
    /// Hard reset signaling completed.
    HardResetSent,
}

#[derive(Debug)]
struct Counters {
    tx_message: [Counter; 3],
    rx_message: [Option<u8>; 3],
    retry: Counter,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            tx_message: [Counter::new(CounterType::MessageId); 3],
            rx_message: [None; 3],
            retry: Counter::new(CounterType::Retry),
        }
    }
}

impl Counters {
    fn reset_sop(&mut self, sop: Sop) {
        self.tx_message[sop.index()].reset();
        self.rx_message[sop.index()] = None;
    }
}

/// The USB PD protocol layer.
#[derive(Debug)]
pub struct ProtocolLayer {
    state: ProtocolState,
    tx_status: TxStatus,
    counters: Counters,
    template: Header,
    pending: Option<(Sop, Message)>,
    received: Deque<(Sop, Message), 4>,
    hard_reset_received: bool,
}

impl Default for ProtocolLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolLayer {
    /// Create a disabled protocol layer.
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Disabled,
            tx_status: TxStatus::Idle,
            counters: Counters::default(),
            template: Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R2_0),
            pending: None,
            received: Deque::new(),
            hard_reset_received: false,
        }
    }

    /// The protocol state.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// The transmission status.
    pub fn tx_status(&self) -> TxStatus {
        self.tx_status
    }

    /// The header template, holding our roles and the negotiated revision.
    pub fn template(&self) -> Header {
        self.template
    }

    /// The negotiated specification revision.
    pub fn spec_revision(&self) -> SpecificationRevision {
        self.template.spec_revision().unwrap_or(SpecificationRevision::R2_0)
    }

    /// The next message ID that will be used towards an SOP type.
    pub fn tx_message_id(&self, sop: Sop) -> u8 {
        self.counters.tx_message[sop.index()].value()
    }

    /// Enable the PD receiver and transmitter on the CC line of the partner.
    pub fn enable<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        orientation: CcPin,
        power_role: PowerRole,
        data_role: DataRole,
        vconn_source: bool,
    ) -> Result<(), Error> {
        self.template = Header::new_template(data_role, power_role, SpecificationRevision::R2_0);
        self.set_state(ProtocolState::Reset);

        let switches1 = Switches1::default()
            .with_transmit(Some(orientation))
            .with_auto_crc(true)
            .with_power_role(power_role.into())
            .with_data_role(data_role.into())
            .with_spec_rev(SpecificationRevision::R2_0.into());
        ctx.device.set_switches1(switches1)?;
        ctx.device.set_power(Power(0).with_pwr(0b1111))?;

        // Software handles retries and resets.
        ctx.device.set_control3(Control3::default().with_auto_retry(false).with_n_retries(0))?;
        ctx.device.set_mask1(Mask1(0).with_m_activity(true).with_m_alert(true).with_m_wake(true))?;
        ctx.device.set_mask_a(MaskA(0).with_m_ocp_temp(true).with_m_softfail(true).with_m_softrst(true))?;
        ctx.device.set_mask_b(MaskB(0))?;
        ctx.device.set_control1(Control1(0).with_ensop1(vconn_source).with_ensop2(vconn_source))?;

        self.reset(ctx)?;
        debug!("PD enabled on {:?} as {:?}/{:?}", orientation, power_role, data_role);
        Ok(())
    }

    /// Disable PD communication.
    pub fn disable<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        self.set_state(ProtocolState::Disabled);
        self.pending = None;
        self.received.clear();
        self.tx_status = TxStatus::Idle;
        self.hard_reset_received = false;
        ctx.timers.cancel(TimerId::Protocol);

        ctx.device.set_switches1(Switches1::default())?;
        ctx.device.set_control1(Control1(0))
    }

    /// Receive SOP' and SOP'' packets, for as long as we source VCONN.
    pub fn enable_cable_communication<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, on: bool) -> Result<(), Error> {
        let control1 = ctx.device.control1().with_ensop1(on).with_ensop2(on);
        ctx.device.set_control1(control1)
    }

    /// Change the roles that are reported in headers and automatic GoodCRC messages.
    pub fn set_roles<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        power_role: PowerRole,
        data_role: DataRole,
    ) -> Result<(), Error> {
        let switches1 = ctx
            .device
            .switches1()
            .with_power_role(power_role.into())
            .with_data_role(data_role.into());
        ctx.device.set_switches1(switches1)?;

        self.template = self
            .template
            .with_port_power_role(power_role)
            .with_port_data_role(data_role);
        Ok(())
    }

    /// Reset message IDs and FIFOs, e.g. after a hard reset.
    pub fn reset<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        self.set_state(ProtocolState::ResetWait);
        self.counters = Counters::default();
        self.pending = None;
        self.received.clear();
        self.tx_status = TxStatus::Idle;
        ctx.timers.cancel(TimerId::Protocol);

        ctx.device.reset_pd()?;
        ctx.device.flush_tx()?;
        ctx.device.flush_rx()?;

        self.set_state(ProtocolState::Idle);
        Ok(())
    }

    /// Reset the message IDs of an SOP type, as after sending or receiving a soft reset.
    pub fn reset_message_ids(&mut self, sop: Sop) {
        self.counters.reset_sop(sop);
    }

    /// Queue a message for transmission. Its header is completed with roles and message ID.
    pub fn transmit(&mut self, sop: Sop, message: Message) {
        if self.pending.is_some() {
            warn!("Replacing pending transmission");
        }

        self.counters.retry.reset();
        self.pending = Some((sop, message));
        self.tx_status = TxStatus::Send;
    }

    /// Queue a control message.
    pub fn transmit_control(&mut self, sop: Sop, message_type: ControlMessageType) {
        let header = Header::new_control(self.template, Counter::new(CounterType::MessageId), message_type);
        self.transmit(sop, Message::new(header));
    }

    /// Queue a data message.
    pub fn transmit_data(&mut self, sop: Sop, data: Data) {
        let header = Header::new_data(
            self.template,
            Counter::new(CounterType::MessageId),
            data.message_type(),
            data.num_objects(),
        );
        self.transmit(sop, Message::new_with_data(header, data));
    }

    /// Queue a message given by a raw header and data objects.
    pub fn transmit_raw(&mut self, sop: Sop, header: Header, objects: &[u32]) -> Result<(), Error> {
        match header.message_type() {
            MessageType::Control(message_type) => self.transmit_control(sop, message_type),
            MessageType::Data(DataMessageType::Reserved) => return Err(Error::UnsupportedRequest),
            MessageType::Data(message_type) => self.transmit_data(sop, Data::parse(message_type, objects)),
        }

        Ok(())
    }

    /// The outcome of the last transmission, once it is final. Returns the status to idle.
    pub fn take_tx_result(&mut self) -> Option<TxStatus> {
        match self.tx_status {
            TxStatus::Success | TxStatus::Error | TxStatus::Collision | TxStatus::HardResetSent => {
                Some(core::mem::replace(&mut self.tx_status, TxStatus::Idle))
            }
            _ => None,
        }
    }

    /// Whether the outcome of the last transmission is final, and not yet taken.
    pub fn has_tx_result(&self) -> bool {
        matches!(
            self.tx_status,
            TxStatus::Success | TxStatus::Error | TxStatus::Collision | TxStatus::HardResetSent
        )
    }

    /// Start hard reset signaling.
    pub fn send_hard_reset<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        self.pending = None;
        self.tx_status = TxStatus::Busy;
        self.set_state(ProtocolState::SendingHardReset);

        ctx.device.send_hard_reset()?;
        ctx.timers.arm(TimerId::Protocol, TimerType::BmcTimeout);
        Ok(())
    }

    /// Take the next received message.
    pub fn take_received(&mut self) -> Option<(Sop, Message)> {
        self.received.pop_front()
    }

    /// Whether a hard reset was received since the last call.
    pub fn take_hard_reset_received(&mut self) -> bool {
        core::mem::take(&mut self.hard_reset_received)
    }

    fn set_state(&mut self, state: ProtocolState) {
        if self.state != state {
            trace!("Protocol state transition: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Run the protocol layer once.
    pub fn step<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, irq: &InterruptSnapshot) -> Result<(), Error> {
        if self.state == ProtocolState::Disabled {
            return Ok(());
        }

        if irq.interrupt_a.i_hardrst() {
            warn!("Hard reset received");
            ctx.log.push_token(Token::HardResetReceived, ctx.timers.now());
            self.reset(ctx)?;
            self.hard_reset_received = true;
            return Ok(());
        }

        let mut collided = false;
        match self.state {
            ProtocolState::SendingHardReset => {
                if irq.interrupt_a.i_hardsent() || ctx.timers.is_expired(TimerId::Protocol) {
                    info!("Hard reset sent");
                    ctx.log.push_token(Token::HardResetSent, ctx.timers.now());
                    self.reset(ctx)?;
                    self.tx_status = TxStatus::HardResetSent;
                }
                return Ok(());
            }
            ProtocolState::TxSendingMessage if irq.interrupt.i_collision() => {
                collided = true;
                self.handle_collision(ctx);
            }
            ProtocolState::TxSendingMessage if irq.interrupt_a.i_retryfail() => {
                warn!("Transmission failed");
                self.finish_tx(ctx, TxStatus::Error);
            }
            ProtocolState::TxSendingMessage if irq.interrupt_a.i_txsent() => {
                self.set_state(ProtocolState::TxVerifyGoodCrc);
            }
            _ => (),
        }

        self.receive(ctx)?;

        if matches!(self.state, ProtocolState::TxSendingMessage | ProtocolState::TxVerifyGoodCrc)
            && ctx.timers.is_expired(TimerId::Protocol)
        {
            warn!("No GoodCRC within tBMCTimeout");
            self.finish_tx(ctx, TxStatus::Error);
        }

        if self.state == ProtocolState::Idle
            && self.tx_status == TxStatus::Send
            && !collided
            && !ctx.timers.is_running(TimerId::Protocol)
        {
            self.send_pending(ctx)?;
        }

        Ok(())
    }

    fn handle_collision<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) {
        debug!("Collision during transmission");
        ctx.log.push_token(Token::Collision, ctx.timers.now());

        if self.counters.retry.increment().is_err() {
            warn!("Retries exhausted after collision");
            ctx.log.push_token(Token::RetryFail, ctx.timers.now());
            self.finish_tx(ctx, TxStatus::Collision);
        } else {
            // Yield the bus to the partner, retransmit after the guard time.
            self.tx_status = TxStatus::Send;
            self.set_state(ProtocolState::Idle);
            ctx.timers.arm(TimerId::Protocol, TimerType::BmcTimeout);
        }
    }

    fn finish_tx<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, status: TxStatus) {
        ctx.timers.cancel(TimerId::Protocol);
        self.pending = None;
        self.tx_status = status;
        self.set_state(ProtocolState::Idle);
    }

    fn send_pending<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        let Some((sop, message)) = self.pending.as_mut() else {
            self.tx_status = TxStatus::Idle;
            return Ok(());
        };

        let sop = *sop;
        let mut header = message.header.with_message_id(self.counters.tx_message[sop.index()].value());
        if sop != Sop::Sop {
            header = header.for_cable_plug();
        }
        message.header = header;

        let mut frame = [0u8; MAX_FRAME_SIZE];
        frame[..4].copy_from_slice(&sop.ordered_set());
        let len = message.to_bytes(&mut frame[5..5 + MAX_MESSAGE_SIZE]);
        frame[4] = tokens::PACKSYM | len as u8;
        let end = 5 + len;
        frame[end..end + 4].copy_from_slice(&[tokens::JAM_CRC, tokens::EOP, tokens::TXOFF, tokens::TXON]);

        trace!("TX {:?}: {:?}", sop, message);
        ctx.device.flush_tx()?;
        ctx.device.write_fifo(&frame[..end + 4])?;

        self.tx_status = TxStatus::Busy;
        self.set_state(ProtocolState::TxSendingMessage);
        ctx.timers.arm(TimerId::Protocol, TimerType::BmcTimeout);
        Ok(())
    }

    /// Drain the RX FIFO.
    fn receive<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        while !ctx.device.status1()?.rx_empty() {
            let mut buffer = [0u8; 3 + MAX_MESSAGE_SIZE + 4];
            ctx.device.read_fifo(&mut buffer[..3])?;

            let sop = Sop::from_rx_token(buffer[0]);
            let num_objects = ((buffer[2] >> 4) & 0b111) as usize;
            let len = 2 + 4 * num_objects;
            ctx.device.read_fifo(&mut buffer[3..3 + len + 2])?;

            let Some(sop) = sop else {
                debug!("Dropping packet with token {}", buffer[0]);
                continue;
            };

            let frame = &buffer[1..1 + len];
            let received_crc = LittleEndian::read_u32(&buffer[1 + len..1 + len + 4]);
            if crc::crc32(frame) != received_crc {
                debug!("Dropping packet with bad CRC");
                continue;
            }

            match Message::from_bytes(frame) {
                Ok(message) => self.accept(ctx, sop, message, frame),
                Err(ParseError::UnsupportedExtendedMessage(message_type)) => {
                    debug!("Ignoring extended message {}", message_type);
                }
                Err(error) => warn!("Dropping malformed message: {:?}", error),
            }
        }

        Ok(())
    }

    fn accept<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, sop: Sop, message: Message, frame: &[u8]) {
        let header = message.header;

        if header.is_control(ControlMessageType::GoodCRC) {
            self.verify_good_crc(ctx, sop, header);
            return;
        }

        if header.is_control(ControlMessageType::SoftReset) {
            debug!("Soft reset received on {:?}", sop);
            ctx.log.push_token(Token::SoftResetReceived, ctx.timers.now());
            self.counters.reset_sop(sop);
        } else if self.counters.rx_message[sop.index()] == Some(header.message_id()) {
            debug!("Dropping retransmission with message ID {}", header.message_id());
            return;
        }
        self.counters.rx_message[sop.index()] = Some(header.message_id());

        match header.spec_revision() {
            Ok(revision) if sop == Sop::Sop && revision < self.spec_revision() => {
                debug!("Adopting revision {:?}", revision);
                self.template = self.template.with_spec_revision(revision);
            }
            _ => (),
        }

        trace!("RX {:?}: {:?}", sop, message);
        ctx.log.push_message(RecordKind::Rx, ctx.timers.now(), frame);

        if self.received.is_full() {
            warn!("Receive queue full, dropping oldest message");
            self.received.pop_front();
        }
        // Space was made above.
        let _ = self.received.push_back((sop, message));
    }

    fn verify_good_crc<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, sop: Sop, header: Header) {
        if !matches!(self.state, ProtocolState::TxSendingMessage | ProtocolState::TxVerifyGoodCrc) {
            trace!("Ignoring stray GoodCRC");
            return;
        }

        let Some((pending_sop, message)) = self.pending.as_ref() else {
            return;
        };

        let counter = &mut self.counters.tx_message[pending_sop.index()];
        if *pending_sop != sop || header.message_id() != counter.value() {
            warn!(
                "GoodCRC for message ID {}, expected {}",
                header.message_id(),
                counter.value()
            );
            self.finish_tx(ctx, TxStatus::Error);
            return;
        }

        counter.increment_wrapping();
        self.counters.retry.reset();

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let len = message.to_bytes(&mut buffer);
        ctx.log.push_message(RecordKind::Tx, ctx.timers.now(), &buffer[..len]);

        if message.header.is_control(ControlMessageType::SoftReset) {
            ctx.log.push_token(Token::SoftResetSent, ctx.timers.now());
        }

        self.finish_tx(ctx, TxStatus::Success);
    }
}

#[cfg(test)]
mod tests {
    use fusb302_traits::CcPin;

    use super::message::header::{ControlMessageType, Header, MessageType};
    use super::{ProtocolLayer, ProtocolState, Sop, TxStatus};
    use crate::counters::{Counter, CounterType};
    use crate::dummy::{self, DummyHardware};
    use crate::port::PortContext;
    use crate::{DataRole, PowerRole};

    fn enabled() -> (ProtocolLayer, PortContext<DummyHardware>) {
        dummy::set_time(0);
        let mut ctx = PortContext::new(DummyHardware::new());
        let mut protocol = ProtocolLayer::new();
        protocol
            .enable(&mut ctx, CcPin::Cc1, PowerRole::Sink, DataRole::Ufp, false)
            .unwrap();
        (protocol, ctx)
    }

    fn step(protocol: &mut ProtocolLayer, ctx: &mut PortContext<DummyHardware>) {
        ctx.timers.update(dummy::now());
        let irq = ctx.device.read_interrupts().unwrap();
        protocol.step(ctx, &irq).unwrap();
    }

    fn received_types(protocol: &mut ProtocolLayer) -> Vec<MessageType> {
        core::iter::from_fn(|| protocol.take_received())
            .map(|(_, message)| message.header.message_type())
            .collect()
    }

    #[test]
    fn good_crc_completes_transmission() {
        let (mut protocol, mut ctx) = enabled();

        protocol.transmit_control(Sop::Sop, ControlMessageType::GetSourceCap);
        step(&mut protocol, &mut ctx);
        assert_eq!(protocol.tx_status(), TxStatus::Busy);
        assert!(!protocol.has_tx_result());

        step(&mut protocol, &mut ctx);
        assert_eq!(protocol.take_tx_result(), Some(TxStatus::Success));
        assert_eq!(protocol.tx_status(), TxStatus::Idle);
        assert_eq!(protocol.tx_message_id(Sop::Sop), 1);

        let transmitted = ctx.device.hw().take_transmitted();
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0].1.header.message_id(), 0);
    }

    #[test]
    fn cable_plug_has_its_own_message_id() {
        let (mut protocol, mut ctx) = enabled();

        protocol.transmit_control(Sop::SopPrime, ControlMessageType::SoftReset);
        step(&mut protocol, &mut ctx);
        step(&mut protocol, &mut ctx);

        assert_eq!(protocol.take_tx_result(), Some(TxStatus::Success));
        assert_eq!(protocol.tx_message_id(Sop::SopPrime), 1);
        assert_eq!(protocol.tx_message_id(Sop::Sop), 0);
    }

    #[test]
    fn missing_good_crc_is_an_error() {
        let (mut protocol, mut ctx) = enabled();
        ctx.device.hw().drop_good_crc = true;

        protocol.transmit_control(Sop::Sop, ControlMessageType::Ping);
        step(&mut protocol, &mut ctx);
        dummy::advance(6);
        step(&mut protocol, &mut ctx);

        assert_eq!(protocol.take_tx_result(), Some(TxStatus::Error));
        assert_eq!(protocol.tx_message_id(Sop::Sop), 0);
    }

    #[test]
    fn collisions_are_retried_twice() {
        let (mut protocol, mut ctx) = enabled();
        ctx.device.hw().collisions = 3;

        protocol.transmit_control(Sop::Sop, ControlMessageType::Ping);
        step(&mut protocol, &mut ctx);
        for _ in 0..2 {
            step(&mut protocol, &mut ctx);
            assert_eq!(protocol.tx_status(), TxStatus::Send);
            dummy::advance(5);
            step(&mut protocol, &mut ctx);
        }
        step(&mut protocol, &mut ctx);

        assert_eq!(protocol.take_tx_result(), Some(TxStatus::Collision));
        assert!(ctx.device.hw().take_transmitted().is_empty());
    }

    #[test]
    fn retransmission_is_dropped() {
        let (mut protocol, mut ctx) = enabled();

        let header = ctx.device.hw().inject(Sop::Sop, MessageType::Control(ControlMessageType::Ping), &[]);
        ctx.device.hw().inject_raw(Sop::Sop, header, &[]);
        ctx.device
            .hw()
            .inject(Sop::Sop, MessageType::Control(ControlMessageType::GetSinkCap), &[]);
        step(&mut protocol, &mut ctx);

        assert_eq!(
            received_types(&mut protocol),
            [
                MessageType::Control(ControlMessageType::Ping),
                MessageType::Control(ControlMessageType::GetSinkCap)
            ]
        );
    }

    #[test]
    fn soft_reset_is_taken_with_any_message_id() {
        let (mut protocol, mut ctx) = enabled();

        let header = ctx.device.hw().inject(Sop::Sop, MessageType::Control(ControlMessageType::Ping), &[]);
        let soft_reset = Header::new_control(
            header,
            Counter::new_from_value(CounterType::MessageId, header.message_id()),
            ControlMessageType::SoftReset,
        );
        ctx.device.hw().inject_raw(Sop::Sop, soft_reset, &[]);
        step(&mut protocol, &mut ctx);

        assert_eq!(
            received_types(&mut protocol),
            [
                MessageType::Control(ControlMessageType::Ping),
                MessageType::Control(ControlMessageType::SoftReset)
            ]
        );
    }

    #[test]
    fn hard_reset_resets_the_layer() {
        let (mut protocol, mut ctx) = enabled();

        protocol.transmit_control(Sop::Sop, ControlMessageType::Ping);
        step(&mut protocol, &mut ctx);
        step(&mut protocol, &mut ctx);
        assert_eq!(protocol.tx_message_id(Sop::Sop), 1);

        ctx.device.hw().inject_hard_reset();
        step(&mut protocol, &mut ctx);

        assert!(protocol.take_hard_reset_received());
        assert!(!protocol.take_hard_reset_received());
        assert_eq!(protocol.tx_message_id(Sop::Sop), 0);
        assert_eq!(protocol.state(), ProtocolState::Idle);
        assert_eq!(protocol.tx_status(), TxStatus::Idle);
    }

    #[test]
    fn hard_reset_signaling_completes() {
        let (mut protocol, mut ctx) = enabled();

        protocol.send_hard_reset(&mut ctx).unwrap();
        assert_eq!(protocol.state(), ProtocolState::SendingHardReset);
        step(&mut protocol, &mut ctx);

        assert_eq!(protocol.take_tx_result(), Some(TxStatus::HardResetSent));
        assert_eq!(ctx.device.hw().hard_resets_sent(), 1);
    }
}
