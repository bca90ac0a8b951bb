//! The port: a single cooperative event loop that owns all layers.
//!
//! Every wake event, be it the interrupt line or a timer deadline, runs [`Port::process`] once.
//! Within one cycle, the Type-C state machine runs before the protocol layer and the policy
//! engine, and those run before VDM dispatch. A message is therefore never handed to the policy
//! engine before a detach in the same cycle was seen.
use embassy_futures::select::{Either, select};
use fusb302_traits::{CcPin, Hardware};
use heapless::Vec;

use crate::device_policy_manager::{DevicePolicyManager, PortConfig};
use crate::log_buffer::MessageLog;
use crate::policy_engine::{DpmRequest, Env, PolicyEngine, PolicyState};
use crate::protocol_layer::message::data::request::RawDataObject;
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType, Header, MessageType};
use crate::protocol_layer::{ProtocolLayer, ProtocolState, Sop, TxStatus};
use crate::registers::{Device, InterruptSnapshot};
use crate::timers::{Timer, Timers};
use crate::typec::cc::{CcTermination, SourceCurrent};
use crate::typec::{ConnectionState, PortRoleConfig, TypeC, TypeCEvent};
use crate::vdm::{Discovery, VdmManager};
use crate::{DataRole, Error, PowerRole};

/// Size of the message log in bytes.
pub const LOG_SIZE: usize = 512;

/// Upper bound of policy engine steps per cycle.
const MAX_POLICY_STEPS: usize = 8;

/// State that all layers share: the device with its register mirror, the timers and the log.
#[derive(Debug)]
pub struct PortContext<HW: Hardware> {
    /// The FUSB302.
    pub device: Device<HW>,
    /// Timer service.
    pub timers: Timers,
    /// Log of sent and received messages.
    pub log: MessageLog<LOG_SIZE>,
}

impl<HW: Hardware> PortContext<HW> {
    /// Create a context around the hardware.
    pub fn new(hw: HW) -> Self {
        Self {
            device: Device::new(hw),
            timers: Timers::new(),
            log: MessageLog::new(),
        }
    }
}

/// A snapshot of the port state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortStatus {
    /// Type-C connection state.
    pub connection: ConnectionState,
    /// Policy engine state.
    pub policy: PolicyState,
    /// Protocol layer state.
    pub protocol: ProtocolState,
    /// Transmission status.
    pub tx_status: TxStatus,
    /// Debounced terminations on CC1 and CC2.
    pub cc_terminations: [Option<CcTermination>; 2],
    /// Plug orientation, while attached.
    pub orientation: Option<CcPin>,
    /// The current that we advertise as source.
    pub source_current: SourceCurrent,
    /// The current that the partner advertises, while sinking.
    pub sink_current: Option<SourceCurrent>,
    /// Power role, while attached.
    pub power_role: Option<PowerRole>,
    /// Data role, while attached.
    pub data_role: Option<DataRole>,
    /// The explicit contract.
    pub contract: Option<RawDataObject>,
}

/// A USB Type-C port with USB PD, on a FUSB302.
pub struct Port<HW: Hardware, DPM: DevicePolicyManager> {
    ctx: PortContext<HW>,
    config: PortConfig,
    typec: TypeC,
    protocol: ProtocolLayer,
    policy: PolicyEngine,
    vdm: VdmManager,
    dpm: DPM,
}

impl<HW: Hardware, DPM: DevicePolicyManager> Port<HW, DPM> {
    /// Create a port. Nothing happens before [`Port::initialize`].
    pub fn new(hw: HW, config: PortConfig, dpm: DPM) -> Self {
        Self {
            ctx: PortContext::new(hw),
            typec: TypeC::new(config.role, config.source_current),
            config,
            protocol: ProtocolLayer::new(),
            policy: PolicyEngine::new(),
            vdm: VdmManager::new(),
            dpm,
        }
    }

    /// Reset the chip, and start looking for a partner.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.ctx.device.reset_chip()?;

        let id = self.ctx.device.device_id()?;
        info!(
            "FUSB302 version {}, product {}, revision {}",
            id.version_id(),
            id.product_id(),
            id.revision_id()
        );

        self.configure_port_role(self.config.role, self.config.source_current, true)
    }

    /// Apply a new role configuration. This tears down any connection.
    pub fn configure_port_role(
        &mut self,
        role: PortRoleConfig,
        source_current: SourceCurrent,
        enable: bool,
    ) -> Result<(), Error> {
        debug!("Configuring {:?} with {:?}, enable {}", role, source_current, enable);
        self.config.role = role;
        self.config.source_current = source_current;

        self.protocol.disable(&mut self.ctx)?;
        self.policy.stop(&mut self.ctx);
        self.vdm.reset(&mut self.ctx, false);

        self.typec.configure(&mut self.ctx, role, source_current)?;
        // A Detached event of the old connection. The layers above were stopped already.
        let _ = self.typec.take_event();

        if enable {
            self.typec.enable(&mut self.ctx)?;
        }

        Ok(())
    }

    /// Run all layers once.
    pub fn process(&mut self) -> Result<(), Error> {
        let now = self.ctx.device.hw_ref().now_millis();
        self.ctx.timers.update(now);
        for id in self.ctx.timers.poll_expired() {
            trace!("Timer {:?} expired", id);
        }

        let irq = if self.ctx.device.hw().interrupt_pending() {
            self.ctx.device.read_interrupts()?
        } else {
            InterruptSnapshot::default()
        };

        self.typec
            .step(&mut self.ctx, &irq, self.policy.suppress_vbus_detach())?;
        self.handle_typec_events()?;

        self.protocol.step(&mut self.ctx, &irq)?;
        self.run_policy()?;

        let may_initiate = self.policy.may_initiate_vdm();
        self.vdm
            .step(&mut self.ctx, &mut self.dpm, may_initiate, self.typec.vconn_source());
        self.run_policy()?;

        // The policy engine may have torn down the connection.
        self.handle_typec_events()?;

        if self.vdm.mode_active() {
            self.typec.notify_mode_entered();
        }

        Ok(())
    }

    fn run_policy(&mut self) -> Result<(), Error> {
        for _ in 0..MAX_POLICY_STEPS {
            let mut env = Env {
                ctx: &mut self.ctx,
                protocol: &mut self.protocol,
                typec: &mut self.typec,
                vdm: &mut self.vdm,
                dpm: &mut self.dpm,
                config: &self.config,
            };
            self.policy.step(&mut env)?;
            self.protocol.step(&mut self.ctx, &InterruptSnapshot::default())?;

            if !self.policy.take_progress() && !self.protocol.has_tx_result() {
                break;
            }
        }

        Ok(())
    }

    fn handle_typec_events(&mut self) -> Result<(), Error> {
        while let Some(event) = self.typec.take_event() {
            match event {
                TypeCEvent::Attached {
                    power_role,
                    data_role,
                    orientation,
                } => {
                    info!("Attached as {:?}/{:?}", power_role, data_role);
                    let vconn_source = self.typec.vconn_source();
                    self.protocol
                        .enable(&mut self.ctx, orientation, power_role, data_role, vconn_source)?;
                    self.vdm.reset(&mut self.ctx, self.config.auto_discovery);
                    self.policy.start(&mut self.ctx, power_role, data_role);
                }
                TypeCEvent::Detached => {
                    info!("Detached");
                    self.protocol.disable(&mut self.ctx)?;
                    self.vdm.reset(&mut self.ctx, false);
                    self.policy.stop(&mut self.ctx);
                }
            }
        }

        Ok(())
    }

    /// Wait for the interrupt or the next timer deadline, then process.
    pub async fn run_once<TIMER: Timer>(&mut self) -> Result<(), Error> {
        let now = self.ctx.device.hw_ref().now_millis();

        match self.ctx.timers.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_sub(now);
                match select(self.ctx.device.hw().wait_for_interrupt(), TIMER::after_millis(wait)).await {
                    Either::First(_) => trace!("Woken by interrupt"),
                    Either::Second(_) => trace!("Woken by timer"),
                }
            }
            None => self.ctx.device.hw().wait_for_interrupt().await,
        }

        self.process()
    }

    /// Run the port forever.
    ///
    /// A failed cycle is logged, and the next wake event retries.
    pub async fn run<TIMER: Timer>(&mut self) {
        loop {
            if let Err(error) = self.run_once::<TIMER>().await {
                error!("Port cycle failed: {:?}", error);
            }
        }
    }

    /// The port state.
    pub fn status(&self) -> PortStatus {
        let attached = self.typec.is_attached();

        PortStatus {
            connection: self.typec.state(),
            policy: self.policy.state(),
            protocol: self.protocol.state(),
            tx_status: self.protocol.tx_status(),
            cc_terminations: self.typec.cc_terminations(),
            orientation: self.typec.orientation(),
            source_current: self.typec.source_current(),
            sink_current: self.typec.sink_current(),
            power_role: attached.then(|| self.policy.power_role()),
            data_role: attached.then(|| self.policy.data_role()),
            contract: self.policy.contract(),
        }
    }

    /// The status overview byte.
    ///
    /// | Bit | Meaning |
    /// |-----|---------|
    /// | 0 | Port enabled |
    /// | 1 | Partner attached |
    /// | 2 | Source |
    /// | 3 | DFP |
    /// | 4 | Explicit contract |
    /// | 5 | Capabilities of the partner updated |
    /// | 6 | Message log overflowed |
    ///
    /// Bits 5 and 6 clear when read.
    pub fn status_overview(&mut self) -> u8 {
        let attached = self.typec.is_attached();
        let bits = [
            self.typec.state() != ConnectionState::Disabled,
            attached,
            attached && self.policy.power_role() == PowerRole::Source,
            attached && self.policy.data_role() == DataRole::Dfp,
            self.policy.contract().is_some(),
            self.policy.take_caps_updated(),
            self.ctx.log.take_overflow(),
        ];

        bits.iter()
            .enumerate()
            .fold(0, |overview, (bit, set)| overview | ((*set as u8) << bit))
    }

    /// Queue a message for the policy engine, which sends it at the next opportunity.
    ///
    /// Control messages that start an exchange, like swaps, run the respective exchange.
    pub fn send_pd_message(&mut self, header: Header, objects: &[u32]) -> Result<(), Error> {
        let request = match header.message_type() {
            MessageType::Control(ControlMessageType::SoftReset) => DpmRequest::SoftReset,
            MessageType::Control(ControlMessageType::PrSwap) => DpmRequest::PrSwap,
            MessageType::Control(ControlMessageType::DrSwap) => DpmRequest::DrSwap,
            MessageType::Control(ControlMessageType::VconnSwap) => DpmRequest::VconnSwap,
            MessageType::Control(ControlMessageType::GetSourceCap) => DpmRequest::GetSourceCap,
            MessageType::Control(ControlMessageType::GetSinkCap) => DpmRequest::GetSinkCap,
            MessageType::Control(ControlMessageType::GoodCRC | ControlMessageType::Reserved)
            | MessageType::Data(DataMessageType::Reserved) => return Err(Error::UnsupportedRequest),
            MessageType::Control(_) | MessageType::Data(_) => {
                let objects = Vec::from_slice(objects).map_err(|_| Error::UnsupportedRequest)?;
                DpmRequest::SendMessage {
                    sop: Sop::Sop,
                    header,
                    objects,
                }
            }
        };

        self.policy.request(request)
    }

    /// Queue a request for the policy engine.
    pub fn request(&mut self, request: DpmRequest) -> Result<(), Error> {
        self.policy.request(request)
    }

    /// Drain the message log into `buffer`. Returns the number of bytes written.
    pub fn read_pd_message_log(&mut self, buffer: &mut [u8]) -> usize {
        self.ctx.log.read(buffer)
    }

    /// Request to enter a mode of the partner. `mode_index` is 1-based.
    pub fn enter_mode(&mut self, svid: u16, mode_index: u8) -> Result<(), Error> {
        self.vdm.enter_mode(svid, mode_index)
    }

    /// Request to exit a mode of the partner.
    pub fn exit_mode(&mut self, svid: u16, mode_index: u8) -> Result<(), Error> {
        self.vdm.exit_mode(svid, mode_index)
    }

    /// Discover the partner or a cable plug again.
    pub fn start_discovery(&mut self, sop: Sop) {
        self.vdm.start_discovery(sop);
    }

    /// What was discovered about the recipient of an SOP type.
    pub fn discovery(&self, sop: Sop) -> &Discovery {
        self.vdm.discovery(sop)
    }

    /// The configuration.
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// The device policy manager.
    pub fn dpm(&mut self) -> &mut DPM {
        &mut self.dpm
    }

    /// Access to the hardware.
    pub fn hw(&mut self) -> &mut HW {
        self.ctx.device.hw()
    }
}
