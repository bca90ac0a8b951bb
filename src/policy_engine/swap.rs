//! Data role, power role and VCONN swaps.
//!
//! Each swap is either requested by us (`*Send`) or by the partner (`*Evaluate`), and continues
//! in the same states after the Accept. A power role swap is bounded by the `PrSwap` timer.
use fusb302_traits::{Hardware, VbusRail};

use super::{Env, Exchange, Next, PolicyEngine, PolicyState, Tx, control_type};
use crate::device_policy_manager::DevicePolicyManager;
use crate::port::PortContext;
use crate::protocol_layer::Sop;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::ControlMessageType;
use crate::timers::{TimerId, TimerType};
use crate::typec::PortRole;
use crate::{DataRole, Error, PowerRole};

impl PolicyEngine {
    /// The partner answered a swap request with something other than Accept.
    fn swap_refused(&self, message: &Message) -> PolicyState {
        match control_type(message) {
            Some(ControlMessageType::Reject | ControlMessageType::Wait | ControlMessageType::NotSupported) => {
                info!("Swap refused with {:?}", message.header.message_type());
                self.ready_state()
            }
            _ => PolicyState::SendSoftReset,
        }
    }

    fn swap_data_role<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Result<(), Error> {
        self.data_role = match self.data_role {
            DataRole::Ufp => DataRole::Dfp,
            DataRole::Dfp => DataRole::Ufp,
        };
        info!("Data role is now {:?}", self.data_role);

        env.protocol.set_roles(env.ctx, self.power_role, self.data_role)?;
        env.vdm.reset(env.ctx, env.config.auto_discovery);
        Ok(())
    }

    pub(super) fn dr_swap_send<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        Ok(match self.request_control(env, ControlMessageType::DrSwap) {
            Exchange::Pending => None,
            Exchange::Response(message) if message.header.is_control(ControlMessageType::Accept) => {
                self.swap_data_role(env)?;
                Some(self.ready_state())
            }
            Exchange::Response(message) => Some(self.swap_refused(&message)),
            Exchange::Timeout => Some(self.ready_state()),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        })
    }

    /// A data role swap during an active mode would break the mode.
    pub(super) fn dr_swap_evaluate<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        if env.config.accept_dr_swap && !env.vdm.mode_active() && env.dpm.accept_dr_swap() {
            Some(PolicyState::DrSwapAccept)
        } else {
            Some(PolicyState::SendControl(ControlMessageType::Reject))
        }
    }

    pub(super) fn dr_swap_accept<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> Next {
        Ok(match self.send_control(env, ControlMessageType::Accept) {
            Tx::Pending => None,
            Tx::Sent => {
                self.swap_data_role(env)?;
                Some(self.ready_state())
            }
            Tx::Failed => Some(PolicyState::SendSoftReset),
        })
    }

    /// Both sides accepted a power role swap. The contract ends here.
    fn pr_swap_accepted<HW: Hardware, DPM: DevicePolicyManager>(&mut self, env: &mut Env<'_, HW, DPM>) -> PolicyState {
        info!("Power role swap from {:?}", self.power_role);
        env.ctx.timers.arm(TimerId::PrSwap, TimerType::PrSwapBailout);
        self.contract = None;
        self.suppress_vbus_detach = true;

        match self.power_role {
            PowerRole::Source => PolicyState::PrSwapTransitionToOff,
            PowerRole::Sink => PolicyState::PrSwapWaitSourceOff,
        }
    }

    fn pr_swap_completed<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) {
        info!("Power role swap completed, now {:?}", self.power_role);
        ctx.timers.cancel(TimerId::PrSwap);
        self.suppress_vbus_detach = false;
    }

    pub(super) fn pr_swap_send<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.request_control(env, ControlMessageType::PrSwap) {
            Exchange::Pending => None,
            Exchange::Response(message) if message.header.is_control(ControlMessageType::Accept) => {
                Some(self.pr_swap_accepted(env))
            }
            Exchange::Response(message) => Some(self.swap_refused(&message)),
            Exchange::Timeout => Some(self.ready_state()),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    pub(super) fn pr_swap_evaluate<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        if env.config.role.role == PortRole::Drp && env.config.accept_pr_swap && env.dpm.accept_pr_swap() {
            Some(PolicyState::PrSwapAccept)
        } else {
            Some(PolicyState::SendControl(ControlMessageType::Reject))
        }
    }

    pub(super) fn pr_swap_accept<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.send_control(env, ControlMessageType::Accept) {
            Tx::Pending => None,
            Tx::Sent => Some(self.pr_swap_accepted(env)),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    /// Source side: remove VBUS after tSnkTransition, then present Rd.
    pub(super) fn pr_swap_transition_to_off<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SnkTransition);
        }

        if !env.ctx.timers.is_expired(TimerId::PolicyState) {
            return Ok(None);
        }

        if let Some(rail) = self.source_rail.take() {
            env.ctx.device.hw().enable_vbus(rail, false);
        }

        env.typec.role_swap_to_attached_sink(env.ctx)?;
        self.power_role = PowerRole::Sink;
        env.protocol.set_roles(env.ctx, PowerRole::Sink, self.data_role)?;
        Ok(Some(PolicyState::PrSwapSourceOffPsRdy))
    }

    pub(super) fn pr_swap_source_off_ps_rdy<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        match self.send_control(env, ControlMessageType::PsRdy) {
            Tx::Pending => Ok(None),
            Tx::Sent => Ok(Some(PolicyState::PrSwapWaitSourceOn)),
            Tx::Failed => self.error_recovery(env).map(Some),
        }
    }

    pub(super) fn pr_swap_wait_source_on<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsSourceOn);
        }

        match self.inbox.take() {
            Some(message) if message.header.is_control(ControlMessageType::PsRdy) => {
                self.pr_swap_completed(env.ctx);
                return Ok(Some(PolicyState::SinkStartup));
            }
            Some(message) => debug!("Waiting for PS_RDY, ignoring {:?}", message.header.message_type()),
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("New source did not turn on");
            self.error_recovery(env).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Sink side: the old source reports PS_RDY once VBUS is off and Rd is presented.
    pub(super) fn pr_swap_wait_source_off<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::PsSourceOff);
        }

        match self.inbox.take() {
            Some(message) if message.header.is_control(ControlMessageType::PsRdy) => {
                env.typec.role_swap_to_attached_source(env.ctx)?;
                self.power_role = PowerRole::Source;
                env.protocol.set_roles(env.ctx, PowerRole::Source, self.data_role)?;

                env.ctx.device.hw().enable_vbus(VbusRail::V5, true);
                self.source_rail = Some(VbusRail::V5);
                return Ok(Some(PolicyState::PrSwapSourceOn));
            }
            Some(message) => debug!("Waiting for PS_RDY, ignoring {:?}", message.header.message_type()),
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("Old source did not turn off");
            self.error_recovery(env).map(Some)
        } else {
            Ok(None)
        }
    }

    pub(super) fn pr_swap_source_on<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::SourceSettle);
        }

        env.ctx
            .timers
            .is_expired(TimerId::PolicyState)
            .then_some(PolicyState::PrSwapSendPsRdy)
    }

    pub(super) fn pr_swap_send_ps_rdy<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        match self.send_control(env, ControlMessageType::PsRdy) {
            Tx::Pending => Ok(None),
            Tx::Sent => {
                self.pr_swap_completed(env.ctx);
                Ok(Some(PolicyState::SourceStartup))
            }
            Tx::Failed => self.error_recovery(env).map(Some),
        }
    }

    /// Both sides accepted a VCONN swap. The current VCONN source waits for the other side to
    /// turn VCONN on, the other side turns it on.
    fn vconn_swap_accepted<HW: Hardware, DPM: DevicePolicyManager>(&self, env: &Env<'_, HW, DPM>) -> PolicyState {
        if env.typec.vconn_source() {
            PolicyState::VconnSwapWaitPsRdy
        } else {
            PolicyState::VconnSwapTurnOn
        }
    }

    pub(super) fn vconn_swap_send<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.request_control(env, ControlMessageType::VconnSwap) {
            Exchange::Pending => None,
            Exchange::Response(message) if message.header.is_control(ControlMessageType::Accept) => {
                Some(self.vconn_swap_accepted(env))
            }
            Exchange::Response(message) => Some(self.swap_refused(&message)),
            Exchange::Timeout => Some(self.ready_state()),
            Exchange::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    pub(super) fn vconn_swap_evaluate<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        if env.config.accept_vconn_swap && env.dpm.accept_vconn_swap() {
            Some(PolicyState::VconnSwapAccept)
        } else {
            Some(PolicyState::SendControl(ControlMessageType::Reject))
        }
    }

    pub(super) fn vconn_swap_accept<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Option<PolicyState> {
        match self.send_control(env, ControlMessageType::Accept) {
            Tx::Pending => None,
            Tx::Sent => Some(self.vconn_swap_accepted(env)),
            Tx::Failed => Some(PolicyState::SendSoftReset),
        }
    }

    pub(super) fn vconn_swap_wait_ps_rdy<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::VconnSourceOn);
        }

        match self.inbox.take() {
            Some(message) if message.header.is_control(ControlMessageType::PsRdy) => {
                env.typec.set_vconn(env.ctx, false)?;
                env.protocol.enable_cable_communication(env.ctx, false)?;
                info!("No longer VCONN source");
                return Ok(Some(self.ready_state()));
            }
            Some(message) => debug!("Waiting for PS_RDY, ignoring {:?}", message.header.message_type()),
            None => (),
        }

        if env.ctx.timers.is_expired(TimerId::PolicyState) {
            warn!("Partner did not turn on VCONN");
            Ok(Some(self.hard_reset_state()))
        } else {
            Ok(None)
        }
    }

    pub(super) fn vconn_swap_turn_on<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        if self.entered() {
            env.typec.set_vconn(env.ctx, true)?;
            env.ctx.timers.arm(TimerId::PolicyState, TimerType::VconnSourceOn);
        }

        Ok(env
            .ctx
            .timers
            .is_expired(TimerId::PolicyState)
            .then_some(PolicyState::VconnSwapSendPsRdy))
    }

    pub(super) fn vconn_swap_send_ps_rdy<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        env: &mut Env<'_, HW, DPM>,
    ) -> Next {
        Ok(match self.send_control(env, ControlMessageType::PsRdy) {
            Tx::Pending => None,
            Tx::Sent => {
                info!("Now VCONN source");
                env.protocol.enable_cable_communication(env.ctx, true)?;
                env.vdm.start_discovery(Sop::SopPrime);
                Some(self.ready_state())
            }
            Tx::Failed => Some(PolicyState::SendSoftReset),
        })
    }
}
