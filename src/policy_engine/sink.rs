//! Sink states of the policy engine.
use fusb302_traits::Hardware;

use super::{Env, Exchange, Next, PolicyEngine, PolicyState, control_type};
use crate::device_policy_manager::DevicePolicyManager;
use crate::protocol_layer::Sop;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::header::ControlMessageType;
use crate::timers::{TimerId, TimerType};
use crate::{DataRole, PowerRole};

impl PolicyEngine {
    pub(super) fn sink_startup<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        env.protocol.reset_message_ids(Sop::Sop);
        self.contract = None;
        self.rerequest = false;

        Ok(Some(PolicyState::SinkDiscovery))
    }

    pub(super) fn sink_discovery<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if env.ctx.device.status0()?.vbusok() {
            Ok(Some(PolicyState::SinkWaitCapabilities))
        } else {
            Ok(None)
        }
    }

    pub(super) fn sink_wait_capabilities<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::TypeCSinkWaitCap);
        }

        match self.inbox.take() {
            Some(Message {
                payload: Some(Data::SourceCapabilities(capabilities)),
                ..
            }) => {
                trace!("Source capabilities: {:?}", capabilities);
                env.ctx.timers.cancel(TimerId::NoResponse);
                env.dpm.source_capabilities_received(&capabilities);
                self.partner_source_capabilities = Some(capabilities);
                self.caps_updated = true;
                return Ok(Some(PolicyState::SinkEvaluateCapability));
            }
            Some(message) => debug!("Waiting for capabilities, ignoring {:?}", message.header.message_type()),
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("No source capabilities within tTypeCSinkWaitCap");
            Ok(Some(PolicyState::SinkHardReset))
        } else {
            Ok(None)
        }
    }

    pub(super) fn sink_evaluate_capability<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        self.hard_reset_counter.reset();

        let Some(capabilities) = self.partner_source_capabilities.as_ref() else {
            return Ok(Some(PolicyState::SinkWaitCapabilities));
        };

        self.request = env.dpm.request(capabilities, &env.config.sink_request);
        debug!("Requesting object {}", self.request.object_position());
        Ok(Some(PolicyState::SinkSelectCapability))
    }

    pub(super) fn sink_select_capability<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        let request = self.request;
        let exchange = self.request_response(env, |protocol, _| {
            protocol.transmit_data(Sop::Sop, Data::Request(request))
        });

        Ok(match exchange {
            Exchange::Pending => None,
            Exchange::Response(message) => match control_type(&message) {
                Some(ControlMessageType::Accept) => Some(PolicyState::SinkTransitionSink),
                Some(ControlMessageType::Reject) if self.contract.is_some() => Some(PolicyState::SinkReady),
                Some(ControlMessageType::Wait) if self.contract.is_some() => {
                    self.rerequest = true;
                    Some(PolicyState::SinkReady)
                }
                Some(ControlMessageType::Reject | ControlMessageType::Wait) => Some(PolicyState::SinkWaitCapabilities),
                _ => {
                    warn!("Request answered with {:?}", message.header.message_type());
                    Some(PolicyState::SendSoftReset)
                }
            },
            Exchange::Timeout => Some(PolicyState::SinkHardReset),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        })
    }

    pub(super) fn sink_transition_sink<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsTransition);
        }

        match self.inbox.take() {
            Some(message) if message.header.is_control(ControlMessageType::PsRdy) => {
                info!("Contract established for object {}", self.request.object_position());
                self.contract = Some(self.request);
                self.ever_contracted = true;
                self.rerequest = false;
                env.ctx.timers.cancel(TimerId::NoResponse);
                env.dpm.contract_established(self.request);
                return Ok(Some(PolicyState::SinkReady));
            }
            Some(message) => {
                warn!("Expected PS_RDY, got {:?}", message.header.message_type());
                return Ok(Some(PolicyState::SinkHardReset));
            }
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("No PS_RDY within tPSTransition");
            Ok(Some(PolicyState::SinkHardReset))
        } else {
            Ok(None)
        }
    }

    pub(super) fn sink_ready<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        if self.entered() && self.rerequest {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SinkRequest);
        }

        if let Some(next) = self.ready(env) {
            return Ok(Some(next));
        }

        if self.rerequest && env.ctx.timers.is_expired(TimerId::PolicyState) {
            self.rerequest = false;
            return Ok(Some(PolicyState::SinkEvaluateCapability));
        }

        Ok(None)
    }

    /// The source restores vSafe0V and then vSafe5V. Losing VBUS meanwhile is no detach.
    pub(super) fn sink_transition_default<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            self.suppress_vbus_detach = true;
            self.contract = None;
            self.pd_connected = false;
            self.rerequest = false;
            self.data_role = DataRole::Ufp;
            env.protocol.set_roles(env.ctx, PowerRole::Sink, DataRole::Ufp)?;
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsSourceOff);
            return Ok(None);
        }

        if !env.ctx.device.status0()?.vbusok() {
            debug!("Source removed VBUS");
            Ok(Some(PolicyState::SinkWaitSourceOn))
        } else if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("VBUS was not removed within tPSSourceOff");
            Ok(Some(PolicyState::SinkWaitSourceOn))
        } else {
            Ok(None)
        }
    }

    pub(super) fn sink_wait_source_on<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsSourceOn);
        }

        if env.ctx.device.status0()?.vbusok() {
            self.suppress_vbus_detach = false;
            Ok(Some(PolicyState::SinkStartup))
        } else if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("VBUS did not return within tPSSourceOn");
            self.suppress_vbus_detach = false;
            Ok(Some(PolicyState::SinkStartup))
        } else {
            Ok(None)
        }
    }
}
