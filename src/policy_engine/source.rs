//! Source states of the policy engine.
use fusb302_traits::{Hardware, VbusRail};

use super::{Env, Exchange, Next, PolicyEngine, PolicyState, Tx};
use crate::device_policy_manager::DevicePolicyManager;
use crate::protocol_layer::Sop;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::pdo::{
    Capabilities, PowerDataObject, to_milliamperes, to_millivolts, to_milliwatts,
};
use crate::protocol_layer::message::data::request::{PowerSource, RawDataObject};
use crate::protocol_layer::message::header::ControlMessageType;
use crate::timers::{TimerId, TimerType};
use crate::{DataRole, PowerRole};

/// Objects above this voltage are supplied from the 12 V rail.
const VSAFE_5V_MAX_MILLIVOLTS: u32 = 5_500;

/// Whether a request is in range of the advertised capabilities.
///
/// The operating current of a fixed or variable supply request must not exceed the maximum current
/// of the object. For battery supplies, the operating power is compared instead.
pub(crate) fn request_is_acceptable(request: RawDataObject, pdos: &[PowerDataObject]) -> bool {
    let Some(pdo) = (request.object_position() as usize)
        .checked_sub(1)
        .and_then(|index| pdos.get(index))
    else {
        return false;
    };

    match (PowerSource::interpret(request, pdos), pdo) {
        (PowerSource::FixedVariableSupply(rdo), PowerDataObject::FixedSupply(supply)) => {
            to_milliamperes(rdo.operating_current()) <= to_milliamperes(supply.max_current())
        }
        (PowerSource::FixedVariableSupply(rdo), PowerDataObject::VariableSupply(supply)) => {
            to_milliamperes(rdo.operating_current()) <= to_milliamperes(supply.max_current())
        }
        (PowerSource::Battery(rdo), PowerDataObject::Battery(supply)) => {
            to_milliwatts(rdo.operating_power()) <= to_milliwatts(supply.max_power())
        }
        _ => false,
    }
}

/// The rail that supplies the object that a request selects.
fn rail_for(request: RawDataObject, pdos: &[PowerDataObject]) -> VbusRail {
    let pdo = (request.object_position() as usize)
        .checked_sub(1)
        .and_then(|index| pdos.get(index));

    let voltage = match pdo {
        Some(PowerDataObject::FixedSupply(supply)) => supply.voltage(),
        Some(PowerDataObject::VariableSupply(supply)) => supply.max_voltage(),
        Some(PowerDataObject::Battery(supply)) => supply.max_voltage(),
        Some(PowerDataObject::Augmented(_)) | None => return VbusRail::V5,
    };

    if to_millivolts(voltage) > VSAFE_5V_MAX_MILLIVOLTS {
        VbusRail::V12
    } else {
        VbusRail::V5
    }
}

impl PolicyEngine {
    pub(super) fn source_startup<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        env.protocol.reset_message_ids(Sop::Sop);
        self.caps_counter.reset();
        self.contract = None;

        Ok(Some(PolicyState::SourceSendCapabilities))
    }

    pub(super) fn source_discovery<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if self.entered() {
            if self.caps_counter.exhausted() {
                warn!("Partner never acknowledged source capabilities");
                return Ok(Some(PolicyState::Disabled));
            }

            // Not exhausted, so the increment cannot overflow.
            let _ = self.caps_counter.increment();
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::TypeCSendSourceCap);
        }

        if env.ctx.timers.is_expired(TimerId::NoResponse) && self.hard_reset_counter.exhausted() {
            env.ctx.timers.cancel(TimerId::NoResponse);
            return self.escalate(env).map(Some);
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            Ok(Some(PolicyState::SourceSendCapabilities))
        } else {
            Ok(None)
        }
    }

    pub(super) fn source_send_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        let was_sent = self.sent;
        let exchange = self.request_response(env, |protocol, config| {
            let capabilities = Capabilities(config.source_capabilities.clone());
            protocol.transmit_data(Sop::Sop, Data::SourceCapabilities(capabilities))
        });

        if !was_sent && self.sent {
            env.ctx.timers.cancel(TimerId::NoResponse);
            self.caps_counter.reset();
        }

        Ok(match exchange {
            Exchange::Pending => None,
            Exchange::Response(Message {
                payload: Some(Data::Request(request)),
                ..
            }) => {
                self.request = request;
                Some(PolicyState::SourceNegotiateCapability)
            }
            Exchange::Response(message) => {
                warn!("Expected request, got {:?}", message.header.message_type());
                Some(PolicyState::SendSoftReset)
            }
            Exchange::Timeout => {
                warn!("No request within tSenderResponse");
                Some(PolicyState::SourceHardReset)
            }
            Exchange::Failed if self.pd_connected => Some(PolicyState::SourceHardReset),
            Exchange::Failed => Some(PolicyState::SourceDiscovery),
        })
    }

    pub(super) fn source_negotiate_capability<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if request_is_acceptable(self.request, &env.config.source_capabilities) {
            debug!("Accepting request for object {}", self.request.object_position());
            Ok(Some(PolicyState::SourceTransitionAccept))
        } else {
            warn!("Cannot serve request {:?}", self.request);
            Ok(Some(PolicyState::SourceCapabilityResponse))
        }
    }

    pub(super) fn source_capability_response<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.contract.is_none() {
            return Ok(Some(PolicyState::SourceHardReset));
        }

        Ok(match self.send_control(env, ControlMessageType::Reject) {
            Tx::Pending => None,
            Tx::Sent => Some(PolicyState::SourceReady),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        })
    }

    pub(super) fn source_transition_accept<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        Ok(match self.send_control(env, ControlMessageType::Accept) {
            Tx::Pending => None,
            Tx::Sent => Some(PolicyState::SourceTransitionSupply),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        })
    }

    pub(super) fn source_transition_supply<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SnkTransition);
        }

        if !env.ctx.timers.is_expired(TimerId::PolicyState) {
            return Ok(None);
        }

        self.target_rail = rail_for(self.request, &env.config.source_capabilities);
        if self.source_rail == Some(self.target_rail) {
            Ok(Some(PolicyState::SourceSendPsRdy))
        } else {
            Ok(Some(PolicyState::SourceSwitchSupply))
        }
    }

    /// Break before make, the two regulators must never be connected at the same time.
    pub(super) fn source_switch_supply<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            if let Some(rail) = self.source_rail.take() {
                env.ctx.device.hw().enable_vbus(rail, false);
            }
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::VbusSwitchDelay);
            return Ok(None);
        }

        if !env.ctx.timers.is_expired(TimerId::PolicyState) {
            return Ok(None);
        }

        debug!("Switching VBUS to {:?}", self.target_rail);
        env.ctx.device.hw().enable_vbus(self.target_rail, true);
        self.source_rail = Some(self.target_rail);
        Ok(Some(PolicyState::SourceSettleSupply))
    }

    pub(super) fn source_settle_supply<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SourceSettle);
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            Ok(Some(PolicyState::SourceSendPsRdy))
        } else {
            Ok(None)
        }
    }

    pub(super) fn source_send_ps_rdy<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        Ok(match self.send_control(env, ControlMessageType::PsRdy) {
            Tx::Pending => None,
            Tx::Sent => {
                info!("Contract established for object {}", self.request.object_position());
                self.contract = Some(self.request);
                self.ever_contracted = true;
                env.ctx.timers.cancel(TimerId::NoResponse);
                env.dpm.contract_established(self.request);
                Some(PolicyState::SourceReady)
            }
            Tx::Failed => Some(PolicyState::SourceHardReset),
        })
    }

    pub(super) fn source_ready<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if self.entered() {
            self.hard_reset_counter.reset();
            self.caps_counter.reset();
        }

        Ok(self.ready(env))
    }

    pub(super) fn source_transition_default<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            self.contract = None;
            self.pd_connected = false;
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsHardReset);
            return Ok(None);
        }

        if !env.ctx.timers.is_expired(TimerId::PolicyState) {
            return Ok(None);
        }

        if let Some(rail) = self.source_rail.take() {
            env.ctx.device.hw().enable_vbus(rail, false);
        }

        self.data_role = DataRole::Dfp;
        env.protocol.set_roles(env.ctx, PowerRole::Source, DataRole::Dfp)?;
        Ok(Some(PolicyState::SourceRecover))
    }

    pub(super) fn source_recover<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SrcRecover);
        }

        if !env.ctx.timers.is_expired(TimerId::PolicyState) {
            return Ok(None);
        }

        env.ctx.device.hw().enable_vbus(VbusRail::V5, true);
        self.source_rail = Some(VbusRail::V5);
        Ok(Some(PolicyState::SourceStartup))
    }
}
