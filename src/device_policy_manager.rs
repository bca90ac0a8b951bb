//! The device policy manager (DPM) allows a device to control the policy engine, and be informed about status changes.
//!
//! For example, through the DPM, a device defines its identity and alternate modes, decides which
//! swaps to accept, or selects the source capability to request.
use heapless::Vec;
use uom::si::electric_potential::volt;
use uom::si::power::watt;

use crate::protocol_layer::Sop;
use crate::protocol_layer::message::data::pdo::{
    Capabilities, FixedSupply, PowerDataObject, to_milliamperes, to_millivolts, to_milliwatts,
};
use crate::protocol_layer::message::data::request::{FixedVariableSupply, RawDataObject};
use crate::protocol_layer::message::data::vendor_defined::{VdmCommand, VdmHeaderUnstructured};
use crate::typec::PortRoleConfig;
use crate::typec::cc::SourceCurrent;
use crate::units::{ElectricPotential, Power};
use crate::vdm::identity::Identity;

/// How a sink selects among the capabilities of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkRequestPolicy {
    /// Objects above this voltage are never requested.
    pub max_voltage: ElectricPotential,
    /// The power that the sink draws in normal operation.
    pub operating_power: Power,
    /// The power that the sink would like to draw.
    ///
    /// A source that offers less is informed with the capability mismatch flag.
    pub max_power: Power,
    /// The sink can give back power on request.
    pub giveback: bool,
    /// The sink has USB communication.
    pub usb_communications_capable: bool,
    /// The sink does not suspend when USB suspends.
    pub no_usb_suspend: bool,
}

impl Default for SinkRequestPolicy {
    fn default() -> Self {
        Self {
            max_voltage: ElectricPotential::new::<volt>(20.0),
            operating_power: Power::new::<watt>(15.0),
            max_power: Power::new::<watt>(15.0),
            giveback: false,
            usb_communications_capable: false,
            no_usb_suspend: false,
        }
    }
}

/// Static configuration of a port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Role and accessory configuration of the Type-C layer.
    pub role: PortRoleConfig,
    /// The current that is advertised with Rp.
    pub source_current: SourceCurrent,
    /// Capabilities advertised as source. The first object must be vSafe5V.
    pub source_capabilities: Vec<PowerDataObject, 7>,
    /// Capabilities reported as sink.
    pub sink_capabilities: Vec<PowerDataObject, 7>,
    /// Capability selection as sink.
    pub sink_request: SinkRequestPolicy,
    /// Accept power role swap requests.
    pub accept_pr_swap: bool,
    /// Accept data role swap requests.
    pub accept_dr_swap: bool,
    /// Accept VCONN swap requests.
    pub accept_vconn_swap: bool,
    /// As DFP, discover identity, SVIDs and modes of the partner after a contract.
    pub auto_discovery: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        let mut source_capabilities = Vec::new();
        let mut sink_capabilities = Vec::new();

        // The vectors are empty and have room for seven objects.
        let _ = source_capabilities.push(PowerDataObject::FixedSupply(FixedSupply::new(5_000, 1_500)));
        let _ = source_capabilities.push(PowerDataObject::FixedSupply(FixedSupply::new(12_000, 1_500)));
        let _ = sink_capabilities.push(PowerDataObject::FixedSupply(FixedSupply::new(5_000, 3_000)));

        Self {
            role: PortRoleConfig::default(),
            source_current: SourceCurrent::Default,
            source_capabilities,
            sink_capabilities,
            sink_request: SinkRequestPolicy::default(),
            accept_pr_swap: false,
            accept_dr_swap: false,
            accept_vconn_swap: false,
            auto_discovery: true,
        }
    }
}

/// Trait for the device policy manager.
///
/// This entity enforces device policy. All methods have defaults, which decline alternate modes
/// and select the highest power capability.
pub trait DevicePolicyManager {
    /// Select a capability of the source.
    fn request(&mut self, source_capabilities: &Capabilities, policy: &SinkRequestPolicy) -> RawDataObject {
        RawDataObject(select_capability(source_capabilities, policy).0)
    }

    /// The source sent new capabilities.
    fn source_capabilities_received(&mut self, _source_capabilities: &Capabilities) {}

    /// The sink reported its capabilities.
    fn sink_capabilities_received(&mut self, _sink_capabilities: &Capabilities) {}

    /// An explicit contract was established, either as source or as sink.
    fn contract_established(&mut self, _request: RawDataObject) {}

    /// Accept a power role swap that the partner requests.
    fn accept_pr_swap(&mut self) -> bool {
        true
    }

    /// Accept a data role swap that the partner requests.
    fn accept_dr_swap(&mut self) -> bool {
        true
    }

    /// Accept a VCONN swap that the partner requests.
    fn accept_vconn_swap(&mut self) -> bool {
        true
    }

    /// The local identity, as reported in Discover Identity responses.
    ///
    /// Without identity, requests are NAKed.
    fn identity(&self) -> Option<Identity> {
        None
    }

    /// The SVIDs that the device supports as responder.
    fn svids(&self) -> &[u16] {
        &[]
    }

    /// The modes of a supported SVID.
    fn modes(&self, _svid: u16) -> &[u32] {
        &[]
    }

    /// Whether a mode may be entered, as requested by the partner.
    fn can_enter_mode(&mut self, _svid: u16, _mode_index: u8) -> bool {
        false
    }

    /// Whether an entered mode may be exited, as requested by the partner.
    fn can_exit_mode(&mut self, _svid: u16, _mode_index: u8) -> bool {
        true
    }

    /// The partner's identity was discovered.
    fn identity_discovered(&mut self, _sop: Sop, _identity: &Identity) {}

    /// The partner's SVIDs were discovered.
    fn svids_discovered(&mut self, _sop: Sop, _svids: &[u16]) {}

    /// The modes of one of the partner's SVIDs were discovered.
    fn modes_discovered(&mut self, _sop: Sop, _svid: u16, _modes: &[u32]) {}

    /// A discovery request failed with NAK, busy or timeout.
    fn discovery_failed(&mut self, _sop: Sop, _command: VdmCommand) {}

    /// A mode entry that we initiated completed. The mode is only entered on `true`.
    fn mode_entered(&mut self, _svid: u16, _mode_index: u8, _entered: bool) {}

    /// A mode exit that we initiated completed.
    fn mode_exited(&mut self, _svid: u16, _mode_index: u8, _exited: bool) {}

    /// The partner sent an attention message.
    fn attention(&mut self, _svid: u16, _vdos: &[u32]) {}

    /// The partner sent an unstructured VDM.
    fn unstructured_vdm(&mut self, _header: VdmHeaderUnstructured, _vdos: &[u32]) {}
}

/// A device policy manager that keeps all defaults.
#[derive(Debug, Default)]
pub struct DefaultPolicy;

impl DevicePolicyManager for DefaultPolicy {}

/// Select the fixed or variable supply with the highest power, at most at the maximum voltage.
///
/// Of two objects with equal power, the first one is kept. Without a usable object, vSafe5V is
/// requested with the capability mismatch flag set.
pub fn select_capability(source_capabilities: &Capabilities, policy: &SinkRequestPolicy) -> FixedVariableSupply {
    let max_millivolts = to_millivolts(policy.max_voltage);
    let mut choice: Option<(usize, u32, u32)> = None;

    for (index, pdo) in source_capabilities.pdos().iter().enumerate() {
        let Some((voltage, current)) = pdo.voltage_and_current() else {
            continue;
        };

        let millivolts = to_millivolts(voltage);
        let milliamperes = to_milliamperes(current);
        if millivolts == 0 || millivolts > max_millivolts {
            continue;
        }

        let better = match choice {
            None => true,
            Some((_, chosen_millivolts, chosen_milliamperes)) => {
                millivolts as u64 * milliamperes as u64 > chosen_millivolts as u64 * chosen_milliamperes as u64
            }
        };

        if better {
            choice = Some((index, millivolts, milliamperes));
        }
    }

    let request = FixedVariableSupply(0)
        .with_giveback_flag(policy.giveback)
        .with_usb_communications_capable(policy.usb_communications_capable)
        .with_no_usb_suspend(policy.no_usb_suspend);

    let Some((index, millivolts, milliamperes)) = choice else {
        warn!("No capability within policy, requesting vSafe5V");
        return request.with_object_position(1).with_capability_mismatch(true);
    };

    let current_for = |power: Power| {
        let milliamperes_for_power = (to_milliwatts(power) as u64 * 1000 / millivolts as u64) as u32;
        (milliamperes_for_power.min(milliamperes) / 10).min(0x3ff) as u16
    };

    let available_milliwatts = millivolts as u64 * milliamperes as u64 / 1000;
    let mismatch = available_milliwatts < to_milliwatts(policy.max_power) as u64;

    debug!(
        "Selected object {} ({} mV, {} mA), mismatch {}",
        index + 1,
        millivolts,
        milliamperes,
        mismatch
    );

    request
        .with_object_position(index as u8 + 1)
        .with_raw_operating_current(current_for(policy.operating_power))
        .with_raw_max_operating_current(current_for(policy.max_power))
        .with_capability_mismatch(mismatch)
}

#[cfg(test)]
mod tests {
    use uom::si::electric_potential::volt;
    use uom::si::power::milliwatt;

    use super::{SinkRequestPolicy, select_capability};
    use crate::protocol_layer::message::data::pdo::{Capabilities, FixedSupply, PowerDataObject};
    use crate::units::{ElectricPotential, Power};

    fn caps(supplies: &[(u32, u32)]) -> Capabilities {
        Capabilities(
            supplies
                .iter()
                .map(|(mv, ma)| PowerDataObject::FixedSupply(FixedSupply::new(*mv, *ma)))
                .collect(),
        )
    }

    fn policy(max_volts: f32, max_milliwatts: f32) -> SinkRequestPolicy {
        SinkRequestPolicy {
            max_voltage: ElectricPotential::new::<volt>(max_volts),
            operating_power: Power::new::<milliwatt>(max_milliwatts),
            max_power: Power::new::<milliwatt>(max_milliwatts),
            ..Default::default()
        }
    }

    #[test]
    fn highest_power_within_voltage_limit() {
        let request = select_capability(&caps(&[(5_000, 1_000), (12_000, 500)]), &policy(12.0, 1_000.0));

        assert_eq!(request.object_position(), 2);
        assert!(!request.capability_mismatch());
        // 1 W at 12 V
        assert_eq!(request.raw_operating_current(), 8);
    }

    #[test]
    fn voltage_limit_excludes_objects() {
        let request = select_capability(&caps(&[(5_000, 3_000), (20_000, 3_000)]), &policy(12.0, 15_000.0));

        assert_eq!(request.object_position(), 1);
        assert_eq!(request.raw_operating_current(), 300);
        assert!(!request.capability_mismatch());
    }

    #[test]
    fn first_object_wins_ties() {
        let request = select_capability(&caps(&[(5_000, 1_200), (6_000, 1_000), (12_000, 500)]), &policy(20.0, 1_000.0));
        assert_eq!(request.object_position(), 1);
    }

    #[test]
    fn mismatch_when_power_is_short() {
        let request = select_capability(&caps(&[(5_000, 900)]), &policy(20.0, 10_000.0));

        assert!(request.capability_mismatch());
        assert_eq!(request.raw_max_operating_current(), 90);
    }
}
