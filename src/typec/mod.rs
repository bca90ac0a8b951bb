//! The Type-C connection state machine.
//!
//! Detects attach and detach, resolves orientation and power role, and debounces the CC
//! terminations in two stages. A measured value that changes restarts `Debounce1`. Once it was
//! stable for `Debounce1`, it is copied to the debounced value, and a changed debounced value
//! restarts `Debounce2`. Attached states are only reached after `Debounce2` expired.
pub mod cc;

use fusb302_traits::{CcPin, Hardware, VbusRail};

use crate::port::PortContext;
use crate::registers::{Control2, InterruptSnapshot, Measure, Status0, Switches0, ToggleMode, ToggleResult};
use crate::timers::{TimerId, TimerType};
use crate::{DataRole, Error, PowerRole};
use cc::{CcTermination, SourceCurrent};

/// Roles that the port may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortRole {
    /// Sink only.
    Sink,
    /// Source only.
    Source,
    /// Dual-role power.
    Drp,
}

/// Role configuration of the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortRoleConfig {
    /// The role.
    pub role: PortRole,
    /// Detect audio, debug and powered accessories.
    pub accessory_support: bool,
    /// As dual-role port, try to become source (Try.SRC).
    pub source_preferred: bool,
}

impl Default for PortRoleConfig {
    fn default() -> Self {
        Self {
            role: PortRole::Sink,
            accessory_support: false,
            source_preferred: false,
        }
    }
}

impl PortRoleConfig {
    fn can_source(&self) -> bool {
        matches!(self.role, PortRole::Source | PortRole::Drp)
    }

    fn can_sink(&self) -> bool {
        matches!(self.role, PortRole::Sink | PortRole::Drp)
    }

    fn tries_source(&self) -> bool {
        self.role == PortRole::Drp && self.source_preferred
    }

    fn toggle_mode(&self) -> ToggleMode {
        match self.role {
            PortRole::Drp => ToggleMode::Drp,
            PortRole::Sink if self.accessory_support => ToggleMode::Drp,
            PortRole::Sink => ToggleMode::Sink,
            PortRole::Source => ToggleMode::Source,
        }
    }
}

/// Connection states.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disabled,
    ErrorRecovery,
    Unattached,
    DelayUnattached,
    AttachWaitSink,
    AttachWaitSource,
    AttachWaitAccessory,
    AttachedSink,
    AttachedSource,
    TrySource,
    TryWaitSink,
    AudioAccessory,
    DebugAccessory,
    PoweredAccessory,
    UnsupportedAccessory,
}

impl ConnectionState {
    fn is_sourcing(self) -> bool {
        matches!(
            self,
            ConnectionState::AttachWaitSource
                | ConnectionState::AttachWaitAccessory
                | ConnectionState::AttachedSource
                | ConnectionState::TrySource
                | ConnectionState::AudioAccessory
                | ConnectionState::DebugAccessory
                | ConnectionState::PoweredAccessory
                | ConnectionState::UnsupportedAccessory
        )
    }

    fn is_attached(self) -> bool {
        matches!(self, ConnectionState::AttachedSink | ConnectionState::AttachedSource)
    }

    fn is_accessory(self) -> bool {
        matches!(
            self,
            ConnectionState::AudioAccessory
                | ConnectionState::DebugAccessory
                | ConnectionState::PoweredAccessory
                | ConnectionState::UnsupportedAccessory
        )
    }
}

/// Events that the state machine reports to the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TypeCEvent {
    /// A partner attached. PD can start.
    Attached {
        /// Our power role.
        power_role: PowerRole,
        /// Our initial data role.
        data_role: DataRole,
        /// The CC line that carries PD.
        orientation: CcPin,
    },
    /// The partner detached, or the connection was torn down. PD must stop.
    Detached,
}

/// The Type-C connection state machine.
#[derive(Debug)]
pub struct TypeC {
    state: ConnectionState,
    config: PortRoleConfig,
    source_current: SourceCurrent,
    active: [CcTermination; 2],
    debounced: [Option<CcTermination>; 2],
    measured: CcPin,
    orientation: Option<CcPin>,
    sink_current: Option<SourceCurrent>,
    vconn: bool,
    mode_entered: bool,
    event: Option<TypeCEvent>,
}

impl TypeC {
    /// Create a disabled state machine.
    pub fn new(config: PortRoleConfig, source_current: SourceCurrent) -> Self {
        Self {
            state: ConnectionState::Disabled,
            config,
            source_current,
            active: [CcTermination::Open; 2],
            debounced: [None; 2],
            measured: CcPin::Cc1,
            orientation: None,
            sink_current: None,
            vconn: false,
            mode_entered: false,
            event: None,
        }
    }

    /// The connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The role configuration.
    pub fn config(&self) -> PortRoleConfig {
        self.config
    }

    /// The CC line of the attached partner.
    pub fn orientation(&self) -> Option<CcPin> {
        self.orientation
    }

    /// The debounced termination on both CC lines.
    pub fn cc_terminations(&self) -> [Option<CcTermination>; 2] {
        self.debounced
    }

    /// The current advertised by the attached source, while sinking.
    pub fn sink_current(&self) -> Option<SourceCurrent> {
        self.sink_current
    }

    /// The current we advertise while sourcing.
    pub fn source_current(&self) -> SourceCurrent {
        self.source_current
    }

    /// Whether we source VCONN.
    pub fn vconn_source(&self) -> bool {
        self.vconn
    }

    /// Whether a partner is attached with a power role.
    pub fn is_attached(&self) -> bool {
        self.state.is_attached()
    }

    /// Our power role while attached.
    pub fn power_role(&self) -> Option<PowerRole> {
        match self.state {
            ConnectionState::AttachedSink => Some(PowerRole::Sink),
            ConnectionState::AttachedSource => Some(PowerRole::Source),
            _ => None,
        }
    }

    /// Take the pending event, if any.
    pub fn take_event(&mut self) -> Option<TypeCEvent> {
        self.event.take()
    }

    /// Record that an alternate mode was entered, which keeps a powered accessory supported.
    pub fn notify_mode_entered(&mut self) {
        self.mode_entered = true;
    }

    /// Apply a new role configuration. Leaves the state machine disabled.
    pub fn configure<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        config: PortRoleConfig,
        source_current: SourceCurrent,
    ) -> Result<(), Error> {
        self.config = config;
        self.source_current = source_current;
        self.enter(ctx, ConnectionState::Disabled)
    }

    /// Start looking for a partner.
    pub fn enable<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        self.enter(ctx, ConnectionState::Unattached)
    }

    /// Tear down the connection and start over after tErrorRecovery.
    pub fn enter_error_recovery<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        self.enter(ctx, ConnectionState::ErrorRecovery)
    }

    /// Complete a power role swap from source to sink.
    pub fn role_swap_to_attached_sink<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        let Some(orientation) = self.orientation else {
            return Ok(());
        };

        let switches0 = Switches0(0)
            .with_pdwn1(true)
            .with_pdwn2(true)
            .with_measure(orientation)
            .with_vconn(self.vconn_pin(ctx));
        ctx.device.set_switches0(switches0)?;
        self.restart_line_debounce(ctx, orientation);

        trace!("Type-C role swap: {:?} -> AttachedSink", self.state);
        self.state = ConnectionState::AttachedSink;
        Ok(())
    }

    /// Complete a power role swap from sink to source.
    pub fn role_swap_to_attached_source<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        let Some(orientation) = self.orientation else {
            return Ok(());
        };

        self.set_source_current(ctx)?;
        let switches0 = Switches0(0)
            .with_pu_en1(orientation == CcPin::Cc1)
            .with_pu_en2(orientation == CcPin::Cc2)
            .with_measure(orientation)
            .with_vconn(self.vconn_pin(ctx));
        ctx.device.set_switches0(switches0)?;
        self.restart_line_debounce(ctx, orientation);

        trace!("Type-C role swap: {:?} -> AttachedSource", self.state);
        self.state = ConnectionState::AttachedSource;
        Ok(())
    }

    /// Switch VCONN onto the line opposite to the partner.
    pub fn set_vconn<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, on: bool) -> Result<(), Error> {
        let Some(orientation) = self.orientation else {
            return Ok(());
        };

        let pin = orientation.other();
        let switches0 = ctx.device.switches0().with_vconn(on.then_some(pin));
        ctx.device.set_switches0(switches0)?;
        ctx.device.hw().enable_vconn(pin, on);

        debug!("VCONN {} on {:?}", on, pin);
        self.vconn = on;
        Ok(())
    }

    fn vconn_pin<HW: Hardware>(&self, ctx: &PortContext<HW>) -> Option<CcPin> {
        let switches0 = ctx.device.switches0();
        match (switches0.vconn_cc1(), switches0.vconn_cc2()) {
            (true, _) => Some(CcPin::Cc1),
            (_, true) => Some(CcPin::Cc2),
            _ => None,
        }
    }

    fn restart_line_debounce<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, pin: CcPin) {
        self.active[pin.index()] = CcTermination::Open;
        self.debounced[pin.index()] = None;
        self.sink_current = None;
        ctx.timers.arm(TimerId::Debounce1, TimerType::PdDebounce);
    }

    fn set_source_current<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<(), Error> {
        let control0 = ctx.device.control0().with_host_cur(self.source_current.into());
        ctx.device.set_control0(control0)?;

        let measure = Measure(0).with_mdac(self.source_current.rd_threshold());
        ctx.device.set_measure(measure)
    }

    /// Run the state machine once.
    ///
    /// `suppress_vbus_detach` is set by the policy engine while VBUS is expected to drop.
    pub fn step<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        irq: &InterruptSnapshot,
        suppress_vbus_detach: bool,
    ) -> Result<(), Error> {
        let new_state = match self.state {
            ConnectionState::Disabled => None,
            ConnectionState::ErrorRecovery | ConnectionState::DelayUnattached => ctx
                .timers
                .is_expired(TimerId::State)
                .then_some(ConnectionState::Unattached),
            ConnectionState::Unattached => self.unattached(ctx, irq)?,
            ConnectionState::AttachWaitSink | ConnectionState::TryWaitSink => {
                let status0 = self.sample(ctx, true)?;
                self.attach_wait_sink(status0, Self::stable(ctx))
            }
            ConnectionState::AttachWaitSource => {
                self.sample(ctx, true)?;
                self.attach_wait_source(Self::stable(ctx))
            }
            ConnectionState::AttachWaitAccessory => {
                self.sample(ctx, true)?;
                self.attach_wait_accessory(Self::stable(ctx))
            }
            ConnectionState::TrySource => {
                self.sample(ctx, true)?;
                let stable = Self::stable(ctx);
                self.try_source(ctx, stable)
            }
            ConnectionState::AttachedSink => {
                let status0 = self.sample(ctx, false)?;
                self.attached_sink(ctx, status0, suppress_vbus_detach)
            }
            ConnectionState::AttachedSource => {
                self.sample(ctx, false)?;
                self.attached_source(ctx)
            }
            ConnectionState::AudioAccessory
            | ConnectionState::DebugAccessory
            | ConnectionState::PoweredAccessory
            | ConnectionState::UnsupportedAccessory => {
                self.sample(ctx, true)?;
                self.accessory(ctx)
            }
        };

        if let Some(state) = new_state {
            self.enter(ctx, state)?;
        }

        Ok(())
    }

    /// Measure the CC line and run the debounce stages.
    ///
    /// With `ping_pong`, the measured line alternates every tDeviceToggle.
    fn sample<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, ping_pong: bool) -> Result<Status0, Error> {
        if ping_pong && ctx.timers.is_expired(TimerId::Toggle) {
            self.measured = self.measured.other();
            let switches0 = ctx.device.switches0().with_measure(self.measured);
            ctx.device.set_switches0(switches0)?;
            ctx.timers.arm(TimerId::Toggle, TimerType::DeviceToggle);
        }

        let status0 = ctx.device.status0()?;
        let termination = if self.state.is_sourcing() {
            CcTermination::decode_as_source(status0)
        } else {
            CcTermination::decode_as_sink(status0)
        };

        let pin = self.measured.index();
        if termination != self.active[pin] {
            trace!("CC{} changed: {:?} -> {:?}", pin + 1, self.active[pin], termination);
            self.active[pin] = termination;
            ctx.timers.arm(TimerId::Debounce1, TimerType::PdDebounce);
        }

        if ctx.timers.is_expired(TimerId::Debounce1) {
            ctx.timers.cancel(TimerId::Debounce1);

            let mut changed = false;
            for pin in [CcPin::Cc1, CcPin::Cc2] {
                // In attached states, only the partner's line is tracked.
                if !ping_pong && Some(pin) != self.orientation {
                    continue;
                }

                let value = Some(self.active[pin.index()]);
                if self.debounced[pin.index()] != value {
                    self.debounced[pin.index()] = value;
                    changed = true;
                }
            }

            if changed {
                trace!("CC debounced: {:?}", self.debounced);
                let timeout = match self.state {
                    ConnectionState::TrySource => TimerType::TryCcDebounce,
                    _ => TimerType::CcDebounce,
                };
                ctx.timers.arm(TimerId::Debounce2, timeout);
            }
        }

        Ok(status0)
    }

    /// Whether the debounced terminations held for `Debounce2`.
    ///
    /// Only valid after [`Self::sample`] ran in the same cycle, which may restart the timer.
    fn stable<HW: Hardware>(ctx: &PortContext<HW>) -> bool {
        ctx.timers.is_expired(TimerId::Debounce2)
    }

    /// Debounced terminations, once both lines were observed.
    fn settled(&self) -> Option<[CcTermination; 2]> {
        match self.debounced {
            [Some(cc1), Some(cc2)] => Some([cc1, cc2]),
            _ => None,
        }
    }

    /// The single line for which `predicate` holds.
    fn exactly_one(terminations: [CcTermination; 2], predicate: impl Fn(&CcTermination) -> bool) -> Option<CcPin> {
        match (predicate(&terminations[0]), predicate(&terminations[1])) {
            (true, false) => Some(CcPin::Cc1),
            (false, true) => Some(CcPin::Cc2),
            _ => None,
        }
    }

    fn unattached<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        irq: &InterruptSnapshot,
    ) -> Result<Option<ConnectionState>, Error> {
        if !irq.interrupt_a.i_togdone() {
            return Ok(None);
        }

        let result = irq.status1a.togss();
        debug!("Toggle result: {:?}", result);

        let next = match result {
            ToggleResult::Sink(pin) if self.config.can_sink() => Some((ConnectionState::AttachWaitSink, pin)),
            ToggleResult::Source(pin) if self.config.can_source() => Some((ConnectionState::AttachWaitSource, pin)),
            ToggleResult::Source(pin) if self.config.accessory_support => {
                Some((ConnectionState::AttachWaitAccessory, pin))
            }
            ToggleResult::AudioAccessory if self.config.accessory_support => {
                Some((ConnectionState::AttachWaitAccessory, CcPin::Cc1))
            }
            _ => None,
        };

        match next {
            Some((state, pin)) => {
                self.measured = pin;
                Ok(Some(state))
            }
            None => {
                warn!("Unusable toggle result {:?}, restarting toggle", result);
                let control2 = ctx.device.control2();
                ctx.device.set_control2(control2.with_toggle(false))?;
                ctx.device.set_control2(control2.with_toggle(true))?;
                Ok(None)
            }
        }
    }

    fn attach_wait_sink(&mut self, status0: Status0, stable: bool) -> Option<ConnectionState> {
        let terminations = self.settled()?;

        if terminations == [CcTermination::Open; 2] {
            return Some(ConnectionState::DelayUnattached);
        }

        if !stable {
            return None;
        }

        let pin = Self::exactly_one(terminations, CcTermination::is_rd)?;
        if !status0.vbusok() {
            return None;
        }

        self.orientation = Some(pin);
        if self.state == ConnectionState::AttachWaitSink && self.config.tries_source() {
            Some(ConnectionState::TrySource)
        } else {
            Some(ConnectionState::AttachedSink)
        }
    }

    fn attach_wait_source(&mut self, stable: bool) -> Option<ConnectionState> {
        let terminations = self.settled()?;
        let rd_count = terminations.iter().filter(|t| t.is_rd()).count();
        let ra_count = terminations.iter().filter(|t| **t == CcTermination::Ra).count();

        if rd_count == 0 && !(ra_count == 2 && self.config.accessory_support) {
            return Some(ConnectionState::DelayUnattached);
        }

        if !stable {
            return None;
        }

        if rd_count == 1 {
            self.orientation = Self::exactly_one(terminations, CcTermination::is_rd);
            Some(ConnectionState::AttachedSource)
        } else if self.config.accessory_support {
            Some(ConnectionState::AttachWaitAccessory)
        } else {
            None
        }
    }

    fn attach_wait_accessory(&mut self, stable: bool) -> Option<ConnectionState> {
        let terminations = self.settled()?;

        if !stable {
            return None;
        }

        match terminations {
            [CcTermination::Ra, CcTermination::Ra] => Some(ConnectionState::AudioAccessory),
            [a, b] if a.is_rd() && b.is_rd() => Some(ConnectionState::DebugAccessory),
            [a, CcTermination::Ra] if a.is_rd() => {
                self.orientation = Some(CcPin::Cc1);
                Some(ConnectionState::PoweredAccessory)
            }
            [CcTermination::Ra, b] if b.is_rd() => {
                self.orientation = Some(CcPin::Cc2);
                Some(ConnectionState::PoweredAccessory)
            }
            _ => Some(ConnectionState::DelayUnattached),
        }
    }

    fn try_source<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, stable: bool) -> Option<ConnectionState> {
        let rd_line = self
            .settled()
            .filter(|_| stable)
            .and_then(|terminations| Self::exactly_one(terminations, CcTermination::is_rd));

        if let Some(pin) = rd_line {
            self.orientation = Some(pin);
            return Some(ConnectionState::AttachedSource);
        }

        ctx.timers
            .is_expired(TimerId::State)
            .then_some(ConnectionState::TryWaitSink)
    }

    fn attached_sink<HW: Hardware>(
        &mut self,
        ctx: &mut PortContext<HW>,
        status0: Status0,
        suppress_vbus_detach: bool,
    ) -> Option<ConnectionState> {
        let orientation = self.orientation?;
        let debounced = self.debounced[orientation.index()];
        let swapping = ctx.timers.is_running(TimerId::PrSwap);

        let current = debounced.and_then(|t| t.source_current());
        if current.is_some() && self.sink_current != current {
            debug!("Source current changed to {:?}", current);
            self.sink_current = current;
        }

        if swapping {
            return None;
        }

        if debounced == Some(CcTermination::Open) {
            info!("CC open, detaching");
            return Some(ConnectionState::DelayUnattached);
        }

        if !status0.vbusok() && !suppress_vbus_detach {
            info!("VBUS lost, detaching");
            return Some(ConnectionState::DelayUnattached);
        }

        None
    }

    fn attached_source<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Option<ConnectionState> {
        let orientation = self.orientation?;

        if ctx.timers.is_running(TimerId::PrSwap) {
            return None;
        }

        if self.debounced[orientation.index()] == Some(CcTermination::Open) {
            info!("CC open, detaching");
            if self.config.tries_source() {
                Some(ConnectionState::TryWaitSink)
            } else {
                Some(ConnectionState::DelayUnattached)
            }
        } else {
            None
        }
    }

    fn accessory<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Option<ConnectionState> {
        let terminations = self.settled()?;
        let rd_count = terminations.iter().filter(|t| t.is_rd()).count();

        let present = match self.state {
            ConnectionState::AudioAccessory => terminations == [CcTermination::Ra; 2],
            ConnectionState::DebugAccessory => rd_count == 2,
            _ => rd_count > 0,
        };

        if !present {
            return Some(ConnectionState::DelayUnattached);
        }

        (self.state == ConnectionState::PoweredAccessory
            && !self.mode_entered
            && ctx.timers.is_expired(TimerId::State))
        .then_some(ConnectionState::UnsupportedAccessory)
    }

    fn enter<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, state: ConnectionState) -> Result<(), Error> {
        trace!("Type-C state transition: {:?} -> {:?}", self.state, state);

        let was_attached = self.state.is_attached();
        let was_accessory = self.state.is_accessory();
        self.state = state;

        if was_attached && !state.is_attached() {
            self.event = Some(TypeCEvent::Detached);
        }

        if was_accessory && !state.is_accessory() {
            if self.vconn {
                self.set_vconn(ctx, false)?;
            }
            ctx.device.hw().select_audio_switch(false);
        }

        match state {
            ConnectionState::Disabled => {
                self.reset_lines(ctx);
                ctx.device.set_control2(Control2::default())?;
                ctx.device.set_switches0(Switches0(0))?;
                self.power_off(ctx);
            }
            ConnectionState::ErrorRecovery | ConnectionState::DelayUnattached => {
                self.reset_lines(ctx);
                ctx.device.set_control2(ctx.device.control2().with_toggle(false))?;
                ctx.device.set_switches0(Switches0(0))?;
                self.power_off(ctx);

                let timeout = match state {
                    ConnectionState::ErrorRecovery => TimerType::ErrorRecovery,
                    _ => TimerType::DelayUnattached,
                };
                ctx.timers.arm(TimerId::State, timeout);
            }
            ConnectionState::Unattached => {
                self.reset_lines(ctx);
                self.mode_entered = false;
                self.power_off(ctx);
                self.set_source_current(ctx)?;

                ctx.device.set_switches0(Switches0(0))?;
                ctx.device.set_mask_a(ctx.device.mask_a().with_m_togdone(false))?;
                ctx.device.set_power(ctx.device.power().with_pwr(0b0111))?;

                let control2 = Control2::default().with_mode(self.config.toggle_mode());
                ctx.device.set_control2(control2)?;
                ctx.device.set_control2(control2.with_toggle(true))?;
            }
            ConnectionState::AttachWaitSink | ConnectionState::TryWaitSink => {
                self.enter_wait(ctx, false)?;
            }
            ConnectionState::AttachWaitSource | ConnectionState::AttachWaitAccessory => {
                self.enter_wait(ctx, true)?;
            }
            ConnectionState::TrySource => {
                self.enter_wait(ctx, true)?;
                ctx.timers.arm(TimerId::State, TimerType::DrpTry);
            }
            ConnectionState::AttachedSink => {
                let orientation = self.attach_line(ctx)?;
                ctx.device.set_switches0(
                    Switches0(0)
                        .with_pdwn1(true)
                        .with_pdwn2(true)
                        .with_measure(orientation),
                )?;
                self.sink_current = self.debounced[orientation.index()].and_then(|t| t.source_current());

                self.event = Some(TypeCEvent::Attached {
                    power_role: PowerRole::Sink,
                    data_role: DataRole::Ufp,
                    orientation,
                });
            }
            ConnectionState::AttachedSource => {
                let orientation = self.attach_line(ctx)?;
                ctx.device.set_switches0(
                    Switches0(0)
                        .with_pu_en1(orientation == CcPin::Cc1)
                        .with_pu_en2(orientation == CcPin::Cc2)
                        .with_measure(orientation),
                )?;
                ctx.device.hw().enable_vbus(VbusRail::V5, true);

                if self.debounced[orientation.other().index()] == Some(CcTermination::Ra) {
                    self.set_vconn(ctx, true)?;
                }

                self.event = Some(TypeCEvent::Attached {
                    power_role: PowerRole::Source,
                    data_role: DataRole::Dfp,
                    orientation,
                });
            }
            ConnectionState::AudioAccessory => {
                ctx.timers.cancel(TimerId::Debounce2);
                ctx.device.hw().select_audio_switch(true);
            }
            ConnectionState::DebugAccessory => {
                ctx.timers.cancel(TimerId::Debounce2);
            }
            ConnectionState::PoweredAccessory => {
                ctx.timers.cancel(TimerId::Debounce2);
                self.mode_entered = false;
                self.set_vconn(ctx, true)?;
                ctx.timers.arm(TimerId::State, TimerType::AmeTimeout);
            }
            ConnectionState::UnsupportedAccessory => {
                ctx.timers.cancel(TimerId::Debounce2);
                self.set_vconn(ctx, false)?;
            }
        }

        Ok(())
    }

    fn reset_lines<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) {
        self.active = [CcTermination::Open; 2];
        self.debounced = [None; 2];
        self.orientation = None;
        self.sink_current = None;

        for id in [TimerId::State, TimerId::Debounce1, TimerId::Debounce2, TimerId::Toggle] {
            ctx.timers.cancel(id);
        }
    }

    fn power_off<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) {
        let hw = ctx.device.hw();
        hw.enable_vbus(VbusRail::V5, false);
        hw.enable_vbus(VbusRail::V12, false);
        hw.select_superspeed_mux(None);
        hw.select_audio_switch(false);

        if self.vconn {
            for pin in [CcPin::Cc1, CcPin::Cc2] {
                hw.enable_vconn(pin, false);
            }
            self.vconn = false;
        }
    }

    fn enter_wait<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, sourcing: bool) -> Result<(), Error> {
        self.active = [CcTermination::Open; 2];
        self.debounced = [None; 2];
        self.orientation = None;

        ctx.device.set_control2(ctx.device.control2().with_toggle(false))?;
        if sourcing {
            self.set_source_current(ctx)?;
        }

        let switches0 = Switches0(0)
            .with_pu_en1(sourcing)
            .with_pu_en2(sourcing)
            .with_pdwn1(!sourcing)
            .with_pdwn2(!sourcing)
            .with_measure(self.measured);
        ctx.device.set_switches0(switches0)?;

        ctx.timers.arm(TimerId::Debounce1, TimerType::PdDebounce);
        ctx.timers.cancel(TimerId::Debounce2);
        ctx.timers.arm(TimerId::Toggle, TimerType::DeviceToggle);
        Ok(())
    }

    fn attach_line<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>) -> Result<CcPin, Error> {
        let orientation = self.orientation.unwrap_or(self.measured);
        self.orientation = Some(orientation);
        self.measured = orientation;

        for id in [TimerId::Toggle, TimerId::Debounce2, TimerId::State] {
            ctx.timers.cancel(id);
        }

        ctx.device.hw().select_superspeed_mux(Some(orientation));
        info!("Attached on {:?}", orientation);
        Ok(orientation)
    }
}
