//! The USB PD policy engine.
//!
//! Runs capability exchange and contract negotiation as source or sink, the data role, power role
//! and VCONN swaps, and the soft reset, hard reset and error recovery ladder.
//!
//! The engine is a state machine that advances in [`PolicyEngine::step`]. A step never blocks: a
//! state that waits for a transmission, a message or a timer returns and is revisited on the next
//! step. All layers that the engine drives are passed in through an [`Env`].
mod sink;
mod source;
mod swap;
#[cfg(test)]
mod tests;

use fusb302_traits::{Hardware, VbusRail};
use heapless::{Deque, Vec};

use crate::counters::{Counter, CounterType};
use crate::device_policy_manager::{DevicePolicyManager, PortConfig};
use crate::port::PortContext;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::pdo::Capabilities;
use crate::protocol_layer::message::data::request::RawDataObject;
use crate::protocol_layer::message::header::{ControlMessageType, Header, MessageType, SpecificationRevision};
use crate::protocol_layer::{ProtocolLayer, Sop, TxStatus};
use crate::timers::{TimerId, TimerType};
use crate::typec::{PortRole, TypeC};
use crate::vdm::{OutgoingVdm, VdmManager};
use crate::{DataRole, Error, PowerRole};

/// Number of requests that the device policy manager can queue.
const REQUEST_QUEUE_SIZE: usize = 4;

/// Everything that the policy engine drives.
pub struct Env<'a, HW: Hardware, DPM: DevicePolicyManager> {
    /// Device, timers and log.
    pub ctx: &'a mut PortContext<HW>,
    /// The protocol layer.
    pub protocol: &'a mut ProtocolLayer,
    /// The Type-C state machine, for role swaps, VCONN and error recovery.
    pub typec: &'a mut TypeC,
    /// The VDM manager.
    pub vdm: &'a mut VdmManager,
    /// The device policy manager.
    pub dpm: &'a mut DPM,
    /// Port configuration.
    pub config: &'a PortConfig,
}

/// States of the policy engine.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PolicyState {
    Disabled,
    ErrorRecovery,

    SourceStartup,
    SourceDiscovery,
    SourceSendCapabilities,
    SourceNegotiateCapability,
    SourceCapabilityResponse,
    SourceTransitionAccept,
    SourceTransitionSupply,
    SourceSwitchSupply,
    SourceSettleSupply,
    SourceSendPsRdy,
    SourceReady,
    SourceHardReset,
    SourceTransitionDefault,
    SourceRecover,

    SinkStartup,
    SinkDiscovery,
    SinkWaitCapabilities,
    SinkEvaluateCapability,
    SinkSelectCapability,
    SinkTransitionSink,
    SinkReady,
    SinkHardReset,
    SinkTransitionDefault,
    SinkWaitSourceOn,

    GiveSourceCap,
    GiveSinkCap,
    GetSourceCap,
    GetSinkCap,
    /// Send a control message, then return to the ready state.
    SendControl(ControlMessageType),
    SendMessage,
    SendVdm,
    SoftReset,
    SendSoftReset,

    DrSwapSend,
    DrSwapEvaluate,
    DrSwapAccept,

    PrSwapSend,
    PrSwapEvaluate,
    PrSwapAccept,
    PrSwapTransitionToOff,
    PrSwapSourceOffPsRdy,
    PrSwapWaitSourceOn,
    PrSwapWaitSourceOff,
    PrSwapSourceOn,
    PrSwapSendPsRdy,

    VconnSwapSend,
    VconnSwapEvaluate,
    VconnSwapAccept,
    VconnSwapWaitPsRdy,
    VconnSwapTurnOn,
    VconnSwapSendPsRdy,
}

impl PolicyState {
    /// States during which VBUS changes. Unexpected messages lead to a hard reset.
    fn in_power_transition(self) -> bool {
        matches!(
            self,
            PolicyState::SourceTransitionSupply
                | PolicyState::SourceSwitchSupply
                | PolicyState::SourceSettleSupply
                | PolicyState::SourceSendPsRdy
                | PolicyState::SinkTransitionSink
        )
    }

    /// States in which messages are not expected, and dropped.
    fn drops_messages(self) -> bool {
        matches!(
            self,
            PolicyState::Disabled
                | PolicyState::ErrorRecovery
                | PolicyState::SourceStartup
                | PolicyState::SourceDiscovery
                | PolicyState::SourceHardReset
                | PolicyState::SourceTransitionDefault
                | PolicyState::SourceRecover
                | PolicyState::SinkStartup
                | PolicyState::SinkDiscovery
                | PolicyState::SinkHardReset
                | PolicyState::SinkTransitionDefault
                | PolicyState::SinkWaitSourceOn
        )
    }
}

/// Requests of the device policy manager, served in the ready states.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DpmRequest {
    /// Send a message as given.
    SendMessage {
        /// The recipient.
        sop: Sop,
        /// The header. Roles and message ID are filled in on transmission.
        header: Header,
        /// Data objects.
        objects: Vec<u32, 7>,
    },
    /// Run a soft reset.
    SoftReset,
    /// Run a hard reset.
    HardReset,
    /// Request a power role swap.
    PrSwap,
    /// Request a data role swap.
    DrSwap,
    /// Request a VCONN swap.
    VconnSwap,
    /// Ask the partner for its source capabilities.
    GetSourceCap,
    /// Ask the partner for its sink capabilities.
    GetSinkCap,
    /// As source, advertise the configured capabilities again.
    SendSourceCapabilities,
    /// As sink, evaluate the source capabilities again. As source, advertise them again.
    Renegotiate,
}

/// Outcome of a transmission.
enum Tx {
    Pending,
    Sent,
    Failed,
}

/// Outcome of a message that expects a response within tSenderResponse.
enum Exchange {
    Pending,
    Response(Message),
    Timeout,
    Failed,
}

type Next = Result<Option<PolicyState>, Error>;

/// The control message type of a message, if it is a control message.
fn control_type(message: &Message) -> Option<ControlMessageType> {
    match message.header.message_type() {
        MessageType::Control(message_type) => Some(message_type),
        MessageType::Data(_) => None,
    }
}

/// The policy engine.
#[derive(Debug)]
pub struct PolicyEngine {
    state: PolicyState,
    active: bool,
    entry: bool,
    progressed: bool,
    tx_pending: bool,
    sent: bool,

    power_role: PowerRole,
    data_role: DataRole,
    pd_connected: bool,
    ever_contracted: bool,
    suppress_vbus_detach: bool,
    rerequest: bool,

    hard_reset_counter: Counter,
    caps_counter: Counter,

    contract: Option<RawDataObject>,
    request: RawDataObject,
    source_rail: Option<VbusRail>,
    target_rail: VbusRail,
    partner_source_capabilities: Option<Capabilities>,
    partner_sink_capabilities: Option<Capabilities>,
    caps_updated: bool,

    requests: Deque<DpmRequest, REQUEST_QUEUE_SIZE>,
    dpm_message: Option<(Sop, Header, Vec<u32, 7>)>,
    vdm_message: Option<OutgoingVdm>,
    inbox: Option<Message>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Create an inactive policy engine.
    pub fn new() -> Self {
        Self {
            state: PolicyState::Disabled,
            active: false,
            entry: false,
            progressed: false,
            tx_pending: false,
            sent: false,
            power_role: PowerRole::Sink,
            data_role: DataRole::Ufp,
            pd_connected: false,
            ever_contracted: false,
            suppress_vbus_detach: false,
            rerequest: false,
            hard_reset_counter: Counter::new(CounterType::HardReset),
            caps_counter: Counter::new(CounterType::Caps),
            contract: None,
            request: RawDataObject(0),
            source_rail: None,
            target_rail: VbusRail::V5,
            partner_source_capabilities: None,
            partner_sink_capabilities: None,
            caps_updated: false,
            requests: Deque::new(),
            dpm_message: None,
            vdm_message: None,
            inbox: None,
        }
    }

    /// Start on attach, in the given roles.
    pub fn start<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, power_role: PowerRole, data_role: DataRole) {
        *self = Self {
            active: true,
            power_role,
            data_role,
            // The Type-C layer switches vSafe5V on when attaching as source.
            source_rail: (power_role == PowerRole::Source).then_some(VbusRail::V5),
            ..Self::new()
        };

        self.cancel_timers(ctx);
        let startup = match power_role {
            PowerRole::Source => PolicyState::SourceStartup,
            PowerRole::Sink => PolicyState::SinkStartup,
        };
        self.set_state(ctx, startup);
    }

    /// Stop on detach. Error recovery is kept, as it is what caused the detach.
    pub fn stop<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) {
        self.active = false;
        self.cancel_timers(ctx);
        self.contract = None;
        self.source_rail = None;
        self.suppress_vbus_detach = false;
        self.rerequest = false;
        self.requests.clear();
        self.dpm_message = None;
        self.vdm_message = None;
        self.inbox = None;

        if self.state != PolicyState::ErrorRecovery {
            self.set_state(ctx, PolicyState::Disabled);
        }
    }

    fn cancel_timers<HW: Hardware>(&self, ctx: &mut PortContext<HW>) {
        for id in [TimerId::PolicyState, TimerId::NoResponse, TimerId::PrSwap] {
            ctx.timers.cancel(id);
        }
    }

    /// The current state.
    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// Whether the engine is in a ready state, with an explicit contract.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PolicyState::SourceReady | PolicyState::SinkReady)
    }

    /// The power role.
    pub fn power_role(&self) -> PowerRole {
        self.power_role
    }

    /// The data role.
    pub fn data_role(&self) -> DataRole {
        self.data_role
    }

    /// The accepted request of the explicit contract.
    pub fn contract(&self) -> Option<RawDataObject> {
        self.contract
    }

    /// The source capabilities that the partner sent last.
    pub fn partner_source_capabilities(&self) -> Option<&Capabilities> {
        self.partner_source_capabilities.as_ref()
    }

    /// The sink capabilities that the partner sent last.
    pub fn partner_sink_capabilities(&self) -> Option<&Capabilities> {
        self.partner_sink_capabilities.as_ref()
    }

    /// While set, losing VBUS is no detach. Set during hard reset and power role swap.
    pub fn suppress_vbus_detach(&self) -> bool {
        self.suppress_vbus_detach
    }

    /// Whether the VDM manager may start requests: in the ready state, as DFP, with a contract.
    pub fn may_initiate_vdm(&self) -> bool {
        self.is_ready() && self.data_role == DataRole::Dfp && self.contract.is_some()
    }

    /// Queue a request of the device policy manager.
    pub fn request(&mut self, request: DpmRequest) -> Result<(), Error> {
        self.requests.push_back(request).map_err(|_| Error::QueueFull)
    }

    /// Whether the last step changed state or moved a transmission forward.
    pub fn take_progress(&mut self) -> bool {
        core::mem::take(&mut self.progressed)
    }

    /// Whether partner capabilities were received since the last call.
    pub fn take_caps_updated(&mut self) -> bool {
        core::mem::take(&mut self.caps_updated)
    }

    fn set_state<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, state: PolicyState) {
        trace!("Policy state transition: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.entry = true;
        self.progressed = true;
        self.tx_pending = false;
        self.sent = false;
        ctx.timers.cancel(TimerId::PolicyState);
    }

    /// Whether the current state is visited for the first time.
    fn entered(&mut self) -> bool {
        core::mem::take(&mut self.entry)
    }

    fn ready_state(&self) -> PolicyState {
        match self.power_role {
            PowerRole::Source => PolicyState::SourceReady,
            PowerRole::Sink => PolicyState::SinkReady,
        }
    }

    fn hard_reset_state(&self) -> PolicyState {
        match self.power_role {
            PowerRole::Source => PolicyState::SourceHardReset,
            PowerRole::Sink => PolicyState::SinkHardReset,
        }
    }

    /// Run the policy engine once.
    pub fn step<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Result<(), Error> {
        if !self.active {
            return Ok(());
        }

        if !self.tx_pending {
            // Outcome of a transmission of a state that was left.
            let _ = env.protocol.take_tx_result();
        }

        if env.protocol.take_hard_reset_received() {
            warn!("Hard reset by partner");
            self.inbox = None;
            let state = match self.power_role {
                PowerRole::Source => PolicyState::SourceTransitionDefault,
                PowerRole::Sink => PolicyState::SinkTransitionDefault,
            };
            self.set_state(env.ctx, state);
        }

        self.fill_inbox(env);

        if self.inbox.as_ref().is_some_and(|message| message.header.is_control(ControlMessageType::SoftReset))
            && !self.state.drops_messages()
        {
            self.inbox = None;
            self.set_state(env.ctx, PolicyState::SoftReset);
        }

        if env.ctx.timers.is_expired(TimerId::PrSwap) {
            env.ctx.timers.cancel(TimerId::PrSwap);
            warn!("Power role swap bailed out");
            let state = self.error_recovery(env)?;
            self.set_state(env.ctx, state);
            return Ok(());
        }

        let state = self.state;
        let next = match state {
            PolicyState::Disabled | PolicyState::ErrorRecovery => {
                self.inbox = None;
                None
            }

            PolicyState::SourceStartup => self.source_startup(env)?,
            PolicyState::SourceDiscovery => self.source_discovery(env)?,
            PolicyState::SourceSendCapabilities => self.source_send_capabilities(env)?,
            PolicyState::SourceNegotiateCapability => self.source_negotiate_capability(env)?,
            PolicyState::SourceCapabilityResponse => self.source_capability_response(env)?,
            PolicyState::SourceTransitionAccept => self.source_transition_accept(env)?,
            PolicyState::SourceTransitionSupply => self.source_transition_supply(env)?,
            PolicyState::SourceSwitchSupply => self.source_switch_supply(env)?,
            PolicyState::SourceSettleSupply => self.source_settle_supply(env)?,
            PolicyState::SourceSendPsRdy => self.source_send_ps_rdy(env)?,
            PolicyState::SourceReady => self.source_ready(env)?,
            PolicyState::SourceTransitionDefault => self.source_transition_default(env)?,
            PolicyState::SourceRecover => self.source_recover(env)?,

            PolicyState::SinkStartup => self.sink_startup(env)?,
            PolicyState::SinkDiscovery => self.sink_discovery(env)?,
            PolicyState::SinkWaitCapabilities => self.sink_wait_capabilities(env)?,
            PolicyState::SinkEvaluateCapability => self.sink_evaluate_capability(env)?,
            PolicyState::SinkSelectCapability => self.sink_select_capability(env)?,
            PolicyState::SinkTransitionSink => self.sink_transition_sink(env)?,
            PolicyState::SinkReady => self.sink_ready(env)?,
            PolicyState::SinkTransitionDefault => self.sink_transition_default(env)?,
            PolicyState::SinkWaitSourceOn => self.sink_wait_source_on(env)?,

            PolicyState::SourceHardReset | PolicyState::SinkHardReset => self.hard_reset(env)?,
            PolicyState::GiveSourceCap => self.give_source_capabilities(env),
            PolicyState::GiveSinkCap => self.give_sink_capabilities(env),
            PolicyState::GetSourceCap => self.get_source_capabilities(env),
            PolicyState::GetSinkCap => self.get_sink_capabilities(env),
            PolicyState::SendControl(message_type) => self.send_control_then_ready(env, message_type),
            PolicyState::SendMessage => self.send_dpm_message(env),
            PolicyState::SendVdm => self.send_vdm(env),
            PolicyState::SoftReset => self.soft_reset(env),
            PolicyState::SendSoftReset => self.send_soft_reset(env),

            PolicyState::DrSwapSend => self.dr_swap_send(env)?,
            PolicyState::DrSwapEvaluate => self.dr_swap_evaluate(env),
            PolicyState::DrSwapAccept => self.dr_swap_accept(env)?,

            PolicyState::PrSwapSend => self.pr_swap_send(env),
            PolicyState::PrSwapEvaluate => self.pr_swap_evaluate(env),
            PolicyState::PrSwapAccept => self.pr_swap_accept(env),
            PolicyState::PrSwapTransitionToOff => self.pr_swap_transition_to_off(env)?,
            PolicyState::PrSwapSourceOffPsRdy => self.pr_swap_source_off_ps_rdy(env)?,
            PolicyState::PrSwapWaitSourceOn => self.pr_swap_wait_source_on(env)?,
            PolicyState::PrSwapWaitSourceOff => self.pr_swap_wait_source_off(env)?,
            PolicyState::PrSwapSourceOn => self.pr_swap_source_on(env),
            PolicyState::PrSwapSendPsRdy => self.pr_swap_send_ps_rdy(env)?,

            PolicyState::VconnSwapSend => self.vconn_swap_send(env),
            PolicyState::VconnSwapEvaluate => self.vconn_swap_evaluate(env),
            PolicyState::VconnSwapAccept => self.vconn_swap_accept(env),
            PolicyState::VconnSwapWaitPsRdy => self.vconn_swap_wait_ps_rdy(env)?,
            PolicyState::VconnSwapTurnOn => self.vconn_swap_turn_on(env)?,
            PolicyState::VconnSwapSendPsRdy => self.vconn_swap_send_ps_rdy(env)?,
        };

        match next {
            Some(next) => self.set_state(env.ctx, next),
            None if self.state == state => self.unexpected_message(env),
            None => (),
        }

        Ok(())
    }

    /// Take the next SOP message. Messages of cable plugs go to the VDM manager directly.
    fn fill_inbox<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) {
        while self.inbox.is_none() {
            let Some((sop, message)) = env.protocol.take_received() else {
                break;
            };

            if sop == Sop::Sop {
                self.inbox = Some(message);
                continue;
            }

            match message.payload {
                Some(Data::VendorDefined((header, vdos))) => env.vdm.handle(env.ctx, env.dpm, sop, header, &vdos),
                _ => debug!("Ignoring message of {:?}: {:?}", sop, message.header),
            }
        }
    }

    /// A message that the current state did not consume.
    fn unexpected_message<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) {
        let Some(message) = self.inbox.take() else {
            return;
        };

        if self.state.drops_messages() || message.header.is_control(ControlMessageType::Ping) {
            debug!("Dropping {:?} in {:?}", message.header.message_type(), self.state);
        } else if self.state.in_power_transition() {
            warn!("Unexpected {:?} during power transition", message.header.message_type());
            let state = self.hard_reset_state();
            self.set_state(env.ctx, state);
        } else {
            warn!("Unexpected {:?} in {:?}", message.header.message_type(), self.state);
            self.set_state(env.ctx, PolicyState::SendSoftReset);
        }
    }

    /// Queue a message for transmission on the first call, then report its outcome.
    fn send<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        transmit: impl FnOnce(&mut ProtocolLayer, &PortConfig),
    ) -> Tx {
        if !self.tx_pending {
            if env.protocol.tx_status() == TxStatus::Busy {
                return Tx::Pending;
            }

            transmit(&mut *env.protocol, env.config);
            self.tx_pending = true;
            self.progressed = true;
            return Tx::Pending;
        }

        match env.protocol.take_tx_result() {
            None => Tx::Pending,
            Some(TxStatus::Success) => {
                self.tx_pending = false;
                self.progressed = true;
                self.pd_connected = true;
                Tx::Sent
            }
            Some(status) => {
                debug!("Transmission in {:?} failed: {:?}", self.state, status);
                self.tx_pending = false;
                self.progressed = true;
                Tx::Failed
            }
        }
    }

    fn send_control<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        message_type: ControlMessageType,
    ) -> Tx {
        self.send(env, |protocol, _| protocol.transmit_control(Sop::Sop, message_type))
    }

    /// Send a message, then wait tSenderResponse for the response.
    fn request_response<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        transmit: impl FnOnce(&mut ProtocolLayer, &PortConfig),
    ) -> Exchange {
        if !self.sent {
            match self.send(env, transmit) {
                Tx::Pending => return Exchange::Pending,
                Tx::Failed => return Exchange::Failed,
                Tx::Sent => {
                    self.sent = true;
                    env.ctx.timers.arm(TimerId::PolicyState, TimerType::SenderResponse);
                }
            }
        }

        match self.inbox.take() {
            Some(message) if message.header.is_control(ControlMessageType::Ping) => {
                trace!("Ignoring ping");
            }
            Some(message) => {
                env.ctx.timers.cancel(TimerId::PolicyState);
                return Exchange::Response(message);
            }
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            Exchange::Timeout
        } else {
            Exchange::Pending
        }
    }

    fn request_control<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        message_type: ControlMessageType,
    ) -> Exchange {
        self.request_response(env, |protocol, _| protocol.transmit_control(Sop::Sop, message_type))
    }

    /// Reply to an unsupported message: Not_Supported from revision 3.0 on, Reject before.
    fn not_supported(&self, protocol: &ProtocolLayer) -> PolicyState {
        if protocol.spec_revision() >= SpecificationRevision::R3_0 {
            PolicyState::SendControl(ControlMessageType::NotSupported)
        } else {
            PolicyState::SendControl(ControlMessageType::Reject)
        }
    }

    /// Tear down the connection after a failure that PD cannot recover from.
    fn error_recovery<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Result<PolicyState, Error> {
        error!("Entering error recovery");
        self.suppress_vbus_detach = false;
        self.contract = None;
        env.typec.enter_error_recovery(env.ctx)?;
        Ok(PolicyState::ErrorRecovery)
    }

    /// Hard resets are exhausted. Recover from the Type-C layer if there ever was a contract,
    /// otherwise the partner is not PD capable.
    fn escalate<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Result<PolicyState, Error> {
        if self.ever_contracted {
            self.error_recovery(env)
        } else {
            warn!("Partner does not respond, giving up");
            Ok(PolicyState::Disabled)
        }
    }

    fn hard_reset<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if self.entered() {
            // Every wait that leads here is shorter than tNoResponse, so the counter runs out first.
            // NoResponse is checked where no further hard reset follows, in SourceDiscovery.
            if self.hard_reset_counter.exhausted() {
                warn!("Hard resets exhausted");
                return self.escalate(env).map(Some);
            }

            // Not exhausted, so the increment cannot overflow.
            let _ = self.hard_reset_counter.increment();
            info!("Sending hard reset {}", self.hard_reset_counter.value());
            self.inbox = None;
            self.contract = None;
            self.tx_pending = true;
            self.progressed = true;
            env.protocol.send_hard_reset(env.ctx)?;
            return Ok(None);
        }

        match env.protocol.take_tx_result() {
            Some(_) => {
                self.tx_pending = false;
                env.ctx.timers.arm(TimerId::NoResponse, TimerType::NoResponse);
                Ok(Some(match self.power_role {
                    PowerRole::Source => PolicyState::SourceTransitionDefault,
                    PowerRole::Sink => PolicyState::SinkTransitionDefault,
                }))
            }
            None => Ok(None),
        }
    }

    fn soft_reset<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Option<PolicyState> {
        match self.send_control(env, ControlMessageType::Accept) {
            Tx::Pending => None,
            Tx::Sent => Some(self.after_soft_reset()),
            Tx::Failed => Some(self.hard_reset_state()),
        }
    }

    fn send_soft_reset<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Option<PolicyState> {
        if self.entered() {
            env.protocol.reset_message_ids(Sop::Sop);
        }

        match self.request_control(env, ControlMessageType::SoftReset) {
            Exchange::Pending => None,
            Exchange::Response(message) if message.header.is_control(ControlMessageType::Accept) => {
                Some(self.after_soft_reset())
            }
            Exchange::Response(message) => {
                warn!("Soft reset answered with {:?}", message.header.message_type());
                Some(self.hard_reset_state())
            }
            Exchange::Timeout | Exchange::Failed => Some(self.hard_reset_state()),
        }
    }

    /// Capability exchange starts over after a soft reset.
    fn after_soft_reset(&self) -> PolicyState {
        match self.power_role {
            PowerRole::Source => PolicyState::SourceSendCapabilities,
            PowerRole::Sink => PolicyState::SinkWaitCapabilities,
        }
    }

    /// Message and request dispatch that both ready states share.
    fn ready<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Option<PolicyState> {
        if let Some(message) = self.inbox.take() {
            return self.ready_message(env, message);
        }

        if let Some(request) = self.requests.pop_front() {
            return self.ready_request(env, request);
        }

        if let Some(vdm) = env.vdm.take_outgoing() {
            self.vdm_message = Some(vdm);
            return Some(PolicyState::SendVdm);
        }

        None
    }

    fn ready_message<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        message: Message,
    ) -> Option<PolicyState> {
        let dual_role = env.config.role.role == PortRole::Drp;

        match message.payload {
            Some(Data::SourceCapabilities(capabilities)) => {
                env.dpm.source_capabilities_received(&capabilities);
                self.partner_source_capabilities = Some(capabilities);
                self.caps_updated = true;

                match self.power_role {
                    PowerRole::Sink => Some(PolicyState::SinkEvaluateCapability),
                    PowerRole::Source => None,
                }
            }
            Some(Data::Request(request)) => match self.power_role {
                PowerRole::Source => {
                    self.request = request;
                    Some(PolicyState::SourceNegotiateCapability)
                }
                PowerRole::Sink => Some(PolicyState::SendSoftReset),
            },
            Some(Data::SinkCapabilities(capabilities)) => {
                env.dpm.sink_capabilities_received(&capabilities);
                self.partner_sink_capabilities = Some(capabilities);
                self.caps_updated = true;
                None
            }
            Some(Data::VendorDefined((header, vdos))) => {
                env.vdm.handle(env.ctx, env.dpm, Sop::Sop, header, &vdos);
                None
            }
            Some(_) => Some(self.not_supported(env.protocol)),
            None => match control_type(&message) {
                Some(ControlMessageType::GetSourceCap) if self.power_role == PowerRole::Source || dual_role => {
                    Some(PolicyState::GiveSourceCap)
                }
                Some(ControlMessageType::GetSinkCap) if self.power_role == PowerRole::Sink || dual_role => {
                    Some(PolicyState::GiveSinkCap)
                }
                Some(ControlMessageType::DrSwap) => Some(PolicyState::DrSwapEvaluate),
                Some(ControlMessageType::PrSwap) if dual_role => Some(PolicyState::PrSwapEvaluate),
                Some(ControlMessageType::VconnSwap) => Some(PolicyState::VconnSwapEvaluate),
                Some(ControlMessageType::Ping | ControlMessageType::NotSupported) => None,
                Some(
                    ControlMessageType::Accept
                    | ControlMessageType::Reject
                    | ControlMessageType::PsRdy
                    | ControlMessageType::Wait
                    | ControlMessageType::GotoMin,
                ) => Some(PolicyState::SendSoftReset),
                _ => Some(self.not_supported(env.protocol)),
            },
        }
    }

    fn ready_request<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        request: DpmRequest,
    ) -> Option<PolicyState> {
        debug!("Serving {:?}", request);

        match request {
            DpmRequest::SendMessage { sop, header, objects } => {
                self.dpm_message = Some((sop, header, objects));
                Some(PolicyState::SendMessage)
            }
            DpmRequest::SoftReset => Some(PolicyState::SendSoftReset),
            DpmRequest::HardReset => Some(self.hard_reset_state()),
            DpmRequest::PrSwap if env.config.role.role == PortRole::Drp => Some(PolicyState::PrSwapSend),
            DpmRequest::DrSwap if !env.vdm.mode_active() => Some(PolicyState::DrSwapSend),
            DpmRequest::VconnSwap => Some(PolicyState::VconnSwapSend),
            DpmRequest::GetSourceCap => Some(PolicyState::GetSourceCap),
            DpmRequest::GetSinkCap => Some(PolicyState::GetSinkCap),
            DpmRequest::SendSourceCapabilities | DpmRequest::Renegotiate if self.power_role == PowerRole::Source => {
                Some(PolicyState::SourceSendCapabilities)
            }
            DpmRequest::Renegotiate if self.partner_source_capabilities.is_some() => {
                Some(PolicyState::SinkEvaluateCapability)
            }
            request => {
                warn!("Request {:?} is not possible in {:?}", request, self.state);
                None
            }
        }
    }

    fn send_control_then_ready<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
        message_type: ControlMessageType,
    ) -> Option<PolicyState> {
        match self.send_control(env, message_type) {
            Tx::Pending => None,
            Tx::Sent => Some(self.ready_state()),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    fn give_source_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        let tx = self.send(env, |protocol, config| {
            let capabilities = Capabilities(config.source_capabilities.clone());
            protocol.transmit_data(Sop::Sop, Data::SourceCapabilities(capabilities))
        });

        match tx {
            Tx::Pending => None,
            Tx::Sent => Some(self.ready_state()),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    fn give_sink_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        let tx = self.send(env, |protocol, config| {
            let capabilities = Capabilities(config.sink_capabilities.clone());
            protocol.transmit_data(Sop::Sop, Data::SinkCapabilities(capabilities))
        });

        match tx {
            Tx::Pending => None,
            Tx::Sent => Some(self.ready_state()),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    fn get_source_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.request_control(env, ControlMessageType::GetSourceCap) {
            Exchange::Pending => None,
            Exchange::Response(Message {
                payload: Some(Data::SourceCapabilities(capabilities)),
                ..
            }) => {
                env.dpm.source_capabilities_received(&capabilities);
                self.partner_source_capabilities = Some(capabilities);
                self.caps_updated = true;

                match self.power_role {
                    PowerRole::Sink => Some(PolicyState::SinkEvaluateCapability),
                    PowerRole::Source => Some(PolicyState::SourceReady),
                }
            }
            Exchange::Response(message) => Some(self.refused_or_soft_reset(&message)),
            Exchange::Timeout => Some(self.ready_state()),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    fn get_sink_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.request_control(env, ControlMessageType::GetSinkCap) {
            Exchange::Pending => None,
            Exchange::Response(Message {
                payload: Some(Data::SinkCapabilities(capabilities)),
                ..
            }) => {
                env.dpm.sink_capabilities_received(&capabilities);
                self.partner_sink_capabilities = Some(capabilities);
                self.caps_updated = true;
                Some(self.ready_state())
            }
            Exchange::Response(message) => Some(self.refused_or_soft_reset(&message)),
            Exchange::Timeout => Some(self.ready_state()),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    /// A request was answered. Reject, Wait and Not_Supported end the exchange, anything else is
    /// a protocol error.
    fn refused_or_soft_reset(&self, message: &Message) -> PolicyState {
        match control_type(message) {
            Some(ControlMessageType::Reject | ControlMessageType::Wait | ControlMessageType::NotSupported) => {
                debug!("Request refused with {:?}", message.header.message_type());
                self.ready_state()
            }
            _ => PolicyState::SendSoftReset,
        }
    }

    fn send_dpm_message<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        let Some((sop, header, objects)) = self.dpm_message.clone() else {
            return Some(self.ready_state());
        };

        let tx = self.send(env, |protocol, _| match header.message_type() {
            MessageType::Control(message_type) => protocol.transmit_control(sop, message_type),
            MessageType::Data(message_type) => protocol.transmit_data(sop, Data::parse(message_type, &objects)),
        });

        match tx {
            Tx::Pending => None,
            Tx::Sent => {
                self.dpm_message = None;
                Some(self.ready_state())
            }
            Tx::Failed => {
                self.dpm_message = None;
                match sop {
                    Sop::Sop => Some(PolicyState::SendSoftReset),
                    _ => Some(self.ready_state()),
                }
            }
        }
    }

    fn send_vdm<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Option<PolicyState> {
        let Some(vdm) = self.vdm_message.clone() else {
            return Some(self.ready_state());
        };

        let tx = self.send(env, |protocol, _| {
            protocol.transmit_data(vdm.sop, Data::VendorDefined((vdm.header, vdm.vdos.clone())))
        });

        match tx {
            Tx::Pending => None,
            Tx::Sent => {
                self.vdm_message = None;
                env.vdm.sent(env.ctx, &vdm);
                Some(self.ready_state())
            }
            Tx::Failed => {
                self.vdm_message = None;
                env.vdm.send_failed(env.dpm, &vdm);
                match vdm.sop {
                    Sop::Sop => Some(PolicyState::SendSoftReset),
                    _ => Some(self.ready_state()),
                }
            }
        }
    }
}
