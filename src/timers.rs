//! Timers that are used by the Type-C state machine, the protocol layer and the policy engine.
//!
//! All timers are single-shot countdowns against the port's monotonic millisecond clock.
//! Arming a running timer replaces its deadline, and an expiry is reported exactly once by
//! [`Timers::poll_expired`]. An expired timer stays expired until it is armed again or cancelled.
use core::future::Future;

use heapless::Vec;

/// The timer trait to implement by the user application.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;
}

/// Named timer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Per-state timeout of the Type-C state machine.
    State,
    /// CC debounce, first stage (tPDDebounce).
    Debounce1,
    /// CC debounce, second stage (tCCDebounce).
    Debounce2,
    /// Ping-pong of the measured CC line.
    Toggle,
    /// Protocol layer guard (tBMCTimeout).
    Protocol,
    /// Per-state timeout of the policy engine.
    PolicyState,
    /// NoResponseTimer.
    NoResponse,
    /// Bounds a power role swap. CC-open and VBUS loss are no detach while it runs.
    PrSwap,
    /// Response guard of a VDM initiator.
    VdmResponse,
}

impl TimerId {
    /// Number of timer slots.
    pub const COUNT: usize = 9;

    const ALL: [TimerId; Self::COUNT] = [
        TimerId::State,
        TimerId::Debounce1,
        TimerId::Debounce2,
        TimerId::Toggle,
        TimerId::Protocol,
        TimerId::PolicyState,
        TimerId::NoResponse,
        TimerId::PrSwap,
        TimerId::VdmResponse,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Types of timeouts, with durations given by the USB Type-C and USB PD specifications.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    PdDebounce,
    CcDebounce,
    TryCcDebounce,
    DeviceToggle,
    DrpTry,
    ErrorRecovery,
    DelayUnattached,
    AmeTimeout,
    BmcTimeout,
    SenderResponse,
    TypeCSendSourceCap,
    TypeCSinkWaitCap,
    SnkTransition,
    PsTransition,
    PsSourceOff,
    PsSourceOn,
    PsHardReset,
    SrcRecover,
    NoResponse,
    PrSwapBailout,
    VconnSourceOn,
    VbusSwitchDelay,
    SourceSettle,
    SinkRequest,
    VdmResponse,
}

impl TimerType {
    /// The duration of the timeout in milliseconds.
    pub fn duration_millis(self) -> u64 {
        match self {
            TimerType::PdDebounce => 10,
            TimerType::CcDebounce => 120,
            TimerType::TryCcDebounce => 15,
            TimerType::DeviceToggle => 10,
            TimerType::DrpTry => 125,
            TimerType::ErrorRecovery => 30,
            TimerType::DelayUnattached => 50,
            TimerType::AmeTimeout => 1000,
            TimerType::BmcTimeout => 5,
            TimerType::SenderResponse => 30,
            TimerType::TypeCSendSourceCap => 150,
            TimerType::TypeCSinkWaitCap => 465,
            TimerType::SnkTransition => 35,
            TimerType::PsTransition => 500,
            TimerType::PsSourceOff => 835,
            TimerType::PsSourceOn => 435,
            TimerType::PsHardReset => 30,
            TimerType::SrcRecover => 700,
            TimerType::NoResponse => 5000,
            TimerType::PrSwapBailout => 5000,
            TimerType::VconnSourceOn => 100,
            TimerType::VbusSwitchDelay => 5,
            TimerType::SourceSettle => 30,
            TimerType::SinkRequest => 100,
            TimerType::VdmResponse => 30,
        }
    }

    /// Create a future that times out after the duration of this timer type.
    pub fn after<TIMER: Timer>(self) -> impl Future<Output = ()> {
        TIMER::after_millis(self.duration_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Disabled,
    Running(u64),
    Expired,
}

/// The timer service, holding one slot per [`TimerId`].
#[derive(Debug, Clone)]
pub struct Timers {
    now: u64,
    slots: [Slot; TimerId::COUNT],
    fresh: [bool; TimerId::COUNT],
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers {
    /// Create a timer service with all timers disabled.
    pub fn new() -> Self {
        Self {
            now: 0,
            slots: [Slot::Disabled; TimerId::COUNT],
            fresh: [false; TimerId::COUNT],
        }
    }

    /// The time of the last update, in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance to `now`, expiring all timers whose deadline has passed.
    pub fn update(&mut self, now: u64) {
        self.now = now;

        for id in TimerId::ALL {
            match self.slots[id.index()] {
                Slot::Running(deadline) if deadline <= now => {
                    self.slots[id.index()] = Slot::Expired;
                    self.fresh[id.index()] = true;
                }
                _ => (),
            }
        }
    }

    /// Arm a timer for a number of milliseconds, replacing any pending deadline.
    pub fn arm_millis(&mut self, id: TimerId, milliseconds: u64) {
        self.slots[id.index()] = Slot::Running(self.now + milliseconds);
        self.fresh[id.index()] = false;
    }

    /// Arm a timer with the duration of a timer type.
    pub fn arm(&mut self, id: TimerId, timer_type: TimerType) {
        self.arm_millis(id, timer_type.duration_millis());
    }

    /// Disable a timer.
    pub fn cancel(&mut self, id: TimerId) {
        self.slots[id.index()] = Slot::Disabled;
        self.fresh[id.index()] = false;
    }

    /// Whether the timer has counted down, and was not armed or cancelled since.
    pub fn is_expired(&self, id: TimerId) -> bool {
        self.slots[id.index()] == Slot::Expired
    }

    /// Whether the timer is counting down.
    pub fn is_running(&self, id: TimerId) -> bool {
        matches!(self.slots[id.index()], Slot::Running(_))
    }

    /// Timers that expired since the last poll. Every expiry is reported once.
    pub fn poll_expired(&mut self) -> Vec<TimerId, { TimerId::COUNT }> {
        let mut expired = Vec::new();

        for id in TimerId::ALL {
            if core::mem::take(&mut self.fresh[id.index()]) {
                // Cannot overflow, there is one entry per slot.
                let _ = expired.push(id);
            }
        }

        expired
    }

    /// The earliest pending deadline, if any timer is running.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Running(deadline) => Some(*deadline),
                _ => None,
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerId, TimerType, Timers};

    #[test]
    fn expiry_is_reported_once() {
        let mut timers = Timers::new();
        timers.arm(TimerId::Debounce1, TimerType::PdDebounce);
        assert!(timers.is_running(TimerId::Debounce1));

        timers.update(9);
        assert!(timers.poll_expired().is_empty());

        timers.update(10);
        assert!(timers.is_expired(TimerId::Debounce1));
        assert_eq!(timers.poll_expired().as_slice(), &[TimerId::Debounce1]);
        assert!(timers.poll_expired().is_empty());
        assert!(timers.is_expired(TimerId::Debounce1));
    }

    #[test]
    fn rearm_cancels_pending_deadline() {
        let mut timers = Timers::new();
        timers.arm_millis(TimerId::State, 5);
        timers.update(3);
        timers.arm_millis(TimerId::State, 5);
        timers.update(6);
        assert!(!timers.is_expired(TimerId::State));
        assert_eq!(timers.next_deadline(), Some(8));

        timers.cancel(TimerId::State);
        timers.update(100);
        assert!(!timers.is_expired(TimerId::State));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn next_deadline_is_earliest() {
        let mut timers = Timers::new();
        timers.arm(TimerId::NoResponse, TimerType::NoResponse);
        timers.arm(TimerId::Toggle, TimerType::DeviceToggle);
        assert_eq!(timers.next_deadline(), Some(10));
    }
}
