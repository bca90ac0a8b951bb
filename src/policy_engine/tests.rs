use fusb302_traits::{CcPin, VbusRail};
use uom::si::electric_potential::volt;
use uom::si::power::milliwatt;

use super::{DpmRequest, PolicyState};
use crate::device_policy_manager::{DefaultPolicy, DevicePolicyManager, PortConfig, SinkRequestPolicy};
use crate::dummy::{self, DummyHardware, DummyTimer, PartnerCc};
use crate::port::{Port, PortStatus};
use crate::protocol_layer::Sop;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::pdo::FixedSupply;
use crate::protocol_layer::message::data::request::{FixedVariableSupply, RawDataObject};
use crate::protocol_layer::message::data::vendor_defined::{VdmCommand, VdmCommandType, VdmHeaderStructured};
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType, MessageType};
use crate::typec::cc::SourceCurrent;
use crate::typec::{ConnectionState, PortRole, PortRoleConfig};
use crate::units::{ElectricPotential, Power};
use crate::{DataRole, PowerRole};

type TestPort = Port<DummyHardware, DefaultPolicy>;

fn config(role: PortRole) -> PortConfig {
    PortConfig {
        role: PortRoleConfig {
            role,
            ..Default::default()
        },
        sink_request: SinkRequestPolicy {
            max_voltage: ElectricPotential::new::<volt>(12.0),
            operating_power: Power::new::<milliwatt>(1_000.0),
            max_power: Power::new::<milliwatt>(1_000.0),
            ..Default::default()
        },
        accept_dr_swap: true,
        auto_discovery: false,
        ..Default::default()
    }
}

fn port_with(config: PortConfig) -> TestPort {
    dummy::set_time(0);

    let mut port = Port::new(DummyHardware::new(), config, DefaultPolicy);
    port.initialize().unwrap();
    port
}

fn port(role: PortRole) -> TestPort {
    port_with(config(role))
}

/// A dual-role port that accepts power role and VCONN swaps.
fn dual_role_port() -> TestPort {
    port_with(PortConfig {
        accept_pr_swap: true,
        accept_vconn_swap: true,
        ..config(PortRole::Drp)
    })
}

fn run_for<DPM: DevicePolicyManager>(port: &mut Port<DummyHardware, DPM>, milliseconds: u64) {
    for _ in 0..milliseconds {
        dummy::advance(1);
        port.process().unwrap();
    }
}

/// Run until the condition holds. Panics after `limit` milliseconds.
fn run_until<DPM: DevicePolicyManager>(
    port: &mut Port<DummyHardware, DPM>,
    limit: u64,
    condition: impl Fn(&PortStatus) -> bool,
) {
    for _ in 0..limit {
        dummy::advance(1);
        port.process().unwrap();
        if condition(&port.status()) {
            return;
        }
    }

    panic!("Condition not reached, status {:?}", port.status());
}

fn inject_control(port: &mut TestPort, message_type: ControlMessageType) {
    port.hw().inject(Sop::Sop, MessageType::Control(message_type), &[]);
}

fn inject_data(port: &mut TestPort, message_type: DataMessageType, objects: &[u32]) {
    port.hw().inject(Sop::Sop, MessageType::Data(message_type), objects);
}

fn sent_controls(port: &mut TestPort) -> Vec<ControlMessageType> {
    port.hw()
        .take_transmitted()
        .into_iter()
        .filter_map(|(_, message)| match message.header.message_type() {
            MessageType::Control(message_type) => Some(message_type),
            MessageType::Data(_) => None,
        })
        .collect()
}

fn fixed_request(position: u8, centiamperes: u16) -> RawDataObject {
    RawDataObject(
        FixedVariableSupply(0)
            .with_object_position(position)
            .with_raw_operating_current(centiamperes)
            .with_raw_max_operating_current(centiamperes)
            .0,
    )
}

/// A source that advertised its capabilities to an attached sink.
fn source_waiting_for_request() -> TestPort {
    let mut port = port(PortRole::Source);
    port.hw().attach_sink(CcPin::Cc1);
    advertised(port)
}

/// Wait until the capabilities went out to the sink that is present.
fn advertised(mut port: TestPort) -> TestPort {
    run_until(&mut port, 500, |status| status.policy == PolicyState::SourceSendCapabilities);

    let transmitted = port.hw().take_transmitted();
    assert!(matches!(
        transmitted.last(),
        Some((Sop::Sop, Message { payload: Some(Data::SourceCapabilities(_)), .. }))
    ));
    port
}

/// Agree on vSafe5V with the sink that is present.
fn contract_as_source(port: TestPort) -> TestPort {
    let mut port = advertised(port);
    inject_data(&mut port, DataMessageType::Request, &[fixed_request(1, 100).0]);
    run_for(&mut port, 100);

    assert_eq!(port.status().policy, PolicyState::SourceReady);
    let _ = port.hw().take_transmitted();
    port
}

/// A sink that waits for source capabilities.
fn attached_sink() -> TestPort {
    waiting_for_capabilities(port(PortRole::Sink))
}

fn waiting_for_capabilities(mut port: TestPort) -> TestPort {
    port.hw().attach_source(CcPin::Cc1, SourceCurrent::Default);
    run_until(&mut port, 500, |status| status.policy == PolicyState::SinkWaitCapabilities);
    port
}

fn sink_with_contract() -> TestPort {
    contract_as_sink(attached_sink())
}

fn contract_as_sink(mut port: TestPort) -> TestPort {
    inject_data(
        &mut port,
        DataMessageType::SourceCapabilities,
        &[FixedSupply::new(5_000, 1_000).0, FixedSupply::new(12_000, 500).0],
    );
    run_for(&mut port, 1);
    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 1);
    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);

    assert_eq!(port.status().policy, PolicyState::SinkReady);
    let _ = port.hw().take_transmitted();
    port
}

#[test]
fn unanswered_capabilities_escalate_to_disabled() {
    let mut port = source_waiting_for_request();

    run_for(&mut port, 4_000);

    assert_eq!(port.status().policy, PolicyState::Disabled);
    assert_eq!(port.hw().hard_resets_sent(), 2);
    // The Type-C connection stays.
    assert_eq!(port.status().connection, ConnectionState::AttachedSource);
}

#[test]
fn request_beyond_capabilities_without_contract_is_hard_reset() {
    let mut port = source_waiting_for_request();

    inject_data(&mut port, DataMessageType::Request, &[fixed_request(3, 10).0]);
    run_for(&mut port, 2);

    assert_eq!(port.hw().hard_resets_sent(), 1);
    assert!(!sent_controls(&mut port).contains(&ControlMessageType::Reject));
    assert_eq!(port.status().contract, None);
}

#[test]
fn source_contract_switches_rail_before_ps_rdy() {
    let mut port = source_waiting_for_request();

    inject_data(&mut port, DataMessageType::Request, &[fixed_request(2, 50).0]);
    run_for(&mut port, 20);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert!(port.hw().vbus(VbusRail::V5));

    run_for(&mut port, 100);
    assert_eq!(port.status().policy, PolicyState::SourceReady);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::PsRdy]);
    assert_eq!(port.status().contract.map(|contract| contract.object_position()), Some(2));
    assert!(port.hw().vbus(VbusRail::V12));
    assert!(!port.hw().vbus(VbusRail::V5));

    // With a contract, an unserviceable request is rejected and the contract is kept.
    inject_data(&mut port, DataMessageType::Request, &[fixed_request(3, 10).0]);
    run_for(&mut port, 2);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Reject]);
    assert_eq!(port.status().policy, PolicyState::SourceReady);
    assert_eq!(port.status().contract.map(|contract| contract.object_position()), Some(2));
}

#[test]
fn sink_requests_highest_power_within_voltage() {
    let mut port = attached_sink();

    inject_data(
        &mut port,
        DataMessageType::SourceCapabilities,
        &[FixedSupply::new(5_000, 1_000).0, FixedSupply::new(12_000, 500).0],
    );
    run_for(&mut port, 1);

    let transmitted = port.hw().take_transmitted();
    let Some((_, Message { payload: Some(Data::Request(request)), .. })) = transmitted.last() else {
        panic!("No request sent: {:?}", transmitted);
    };
    assert_eq!(request.object_position(), 2);
    assert_eq!(port.status().policy, PolicyState::SinkSelectCapability);

    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::SinkTransitionSink);

    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::SinkReady);
    assert_eq!(port.status().contract.map(|contract| contract.object_position()), Some(2));
    assert_eq!(port.status_overview() & 0b1_0000, 0b1_0000);
}

#[test]
fn sink_without_ps_rdy_sends_hard_reset() {
    let mut port = attached_sink();

    inject_data(&mut port, DataMessageType::SourceCapabilities, &[FixedSupply::new(5_000, 1_000).0]);
    run_for(&mut port, 1);
    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 510);

    assert_eq!(port.hw().hard_resets_sent(), 1);
    assert_eq!(port.status().contract, None);
}

#[test]
fn contracted_sink_escalates_to_error_recovery() {
    let mut port = sink_with_contract();

    // New capabilities, whose request is never answered.
    inject_data(&mut port, DataMessageType::SourceCapabilities, &[FixedSupply::new(5_000, 1_000).0]);
    run_until(&mut port, 6_000, |status| status.policy == PolicyState::ErrorRecovery);

    assert_eq!(port.hw().hard_resets_sent(), 2);
    assert_eq!(port.status().connection, ConnectionState::ErrorRecovery);
}

#[test]
fn unexpected_message_in_ready_starts_soft_reset() {
    let mut port = sink_with_contract();

    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::SoftReset]);
    assert_eq!(port.status().policy, PolicyState::SendSoftReset);

    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::SinkWaitCapabilities);
    assert_eq!(port.hw().hard_resets_sent(), 0);
}

#[test]
fn soft_reset_is_accepted() {
    let mut port = sink_with_contract();

    inject_control(&mut port, ControlMessageType::SoftReset);
    run_for(&mut port, 1);

    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert_eq!(port.status().policy, PolicyState::SinkWaitCapabilities);
}

#[test]
fn sink_gives_sink_capabilities_and_rejects_power_role_swap() {
    let mut port = sink_with_contract();

    inject_control(&mut port, ControlMessageType::GetSinkCap);
    run_for(&mut port, 1);
    let transmitted = port.hw().take_transmitted();
    assert!(matches!(
        transmitted.as_slice(),
        [(Sop::Sop, Message { payload: Some(Data::SinkCapabilities(_)), .. })]
    ));

    // Not dual-role, and revision 2.0.
    inject_control(&mut port, ControlMessageType::PrSwap);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Reject]);
    assert_eq!(port.status().policy, PolicyState::SinkReady);
}

#[test]
fn data_role_swap_as_source() {
    let mut port = source_waiting_for_request();
    inject_data(&mut port, DataMessageType::Request, &[fixed_request(1, 100).0]);
    run_for(&mut port, 100);
    assert_eq!(port.status().policy, PolicyState::SourceReady);
    assert_eq!(port.status().data_role, Some(DataRole::Dfp));
    let _ = port.hw().take_transmitted();

    inject_control(&mut port, ControlMessageType::DrSwap);
    run_for(&mut port, 1);

    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert_eq!(port.status().data_role, Some(DataRole::Ufp));
    assert_eq!(port.status().power_role, Some(PowerRole::Source));
}

#[test]
fn sink_without_capabilities_gives_up() {
    let mut port = attached_sink();

    run_until(&mut port, 6_000, |status| status.policy == PolicyState::Disabled);

    assert_eq!(port.hw().hard_resets_sent(), 2);
    assert_eq!(port.status().connection, ConnectionState::AttachedSink);
}

#[test]
fn source_hands_over_power_to_partner() {
    let mut port = dual_role_port();
    port.hw().attach_sink(CcPin::Cc1);
    let mut port = contract_as_source(port);

    inject_control(&mut port, ControlMessageType::PrSwap);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert_eq!(port.status().policy, PolicyState::PrSwapTransitionToOff);
    assert!(port.hw().vbus(VbusRail::V5));

    // VBUS goes off after tSnkTransition, then PS_RDY reports Rd.
    run_for(&mut port, 40);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::PsRdy]);
    assert_eq!(port.status().policy, PolicyState::PrSwapWaitSourceOn);
    assert!(!port.hw().vbus(VbusRail::V5));
    assert_eq!(port.status().connection, ConnectionState::AttachedSink);
    assert_eq!(port.status().power_role, Some(PowerRole::Sink));

    port.hw().set_partner(PartnerCc::Rp(SourceCurrent::Default), PartnerCc::Open);
    port.hw().set_partner_vbus(true);
    run_for(&mut port, 20);
    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::SinkWaitCapabilities);

    run_for(&mut port, 50);
    let status = port.status();
    assert_eq!(status.connection, ConnectionState::AttachedSink);
    assert_eq!(status.power_role, Some(PowerRole::Sink));
    assert_eq!(status.data_role, Some(DataRole::Dfp));
}

#[test]
fn sink_takes_over_power_after_requested_swap() {
    let mut port = contract_as_sink(waiting_for_capabilities(dual_role_port()));

    port.request(DpmRequest::PrSwap).unwrap();
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::PrSwap]);

    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::PrSwapWaitSourceOff);
    assert_eq!(port.status().contract, None);

    port.hw().set_partner_vbus(false);
    port.hw().set_partner(PartnerCc::Rd, PartnerCc::Open);
    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::PrSwapSourceOn);
    assert_eq!(port.status().connection, ConnectionState::AttachedSource);
    assert!(port.hw().vbus(VbusRail::V5));

    // PS_RDY after tSourceSettle, then capabilities as the new source.
    run_for(&mut port, 35);
    let transmitted = port.hw().take_transmitted();
    assert!(matches!(
        transmitted.first(),
        Some((Sop::Sop, message)) if message.header.is_control(ControlMessageType::PsRdy)
    ));
    assert!(matches!(
        transmitted.last(),
        Some((Sop::Sop, Message { payload: Some(Data::SourceCapabilities(_)), .. }))
    ));
    assert_eq!(port.status().policy, PolicyState::SourceSendCapabilities);
    assert_eq!(port.status().power_role, Some(PowerRole::Source));
}

#[test]
fn power_role_swap_without_ps_rdy_ends_in_error_recovery() {
    let mut port = contract_as_sink(waiting_for_capabilities(dual_role_port()));

    port.request(DpmRequest::PrSwap).unwrap();
    run_for(&mut port, 1);
    inject_control(&mut port, ControlMessageType::Accept);
    run_for(&mut port, 800);
    assert_eq!(port.status().policy, PolicyState::PrSwapWaitSourceOff);
    assert_eq!(port.status().connection, ConnectionState::AttachedSink);

    run_until(&mut port, 100, |status| status.policy == PolicyState::ErrorRecovery);
    assert_eq!(port.status().connection, ConnectionState::ErrorRecovery);
}

#[test]
fn vconn_swap_turns_vconn_on_and_discovers_cable() {
    let mut port = dual_role_port();
    port.hw().attach_sink(CcPin::Cc1);
    let mut port = contract_as_source(port);
    assert!(!port.hw().vconn(CcPin::Cc2));

    inject_control(&mut port, ControlMessageType::VconnSwap);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert_eq!(port.status().policy, PolicyState::VconnSwapTurnOn);
    assert!(port.hw().vconn(CcPin::Cc2));

    run_for(&mut port, 110);
    let transmitted = port.hw().take_transmitted();
    assert!(transmitted.iter().any(|(sop, message)| *sop == Sop::Sop
        && message.header.is_control(ControlMessageType::PsRdy)));
    assert!(transmitted.iter().any(|(sop, message)| *sop == Sop::SopPrime
        && matches!(message.payload, Some(Data::VendorDefined(_)))));
    assert_eq!(port.status().policy, PolicyState::SourceReady);
}

/// A source with a contract that supplies VCONN to a cable on CC2.
fn vconn_source_with_contract() -> TestPort {
    let mut port = dual_role_port();
    port.hw().set_partner(PartnerCc::Rd, PartnerCc::Ra);
    let mut port = contract_as_source(port);
    assert!(port.hw().vconn(CcPin::Cc2));
    port
}

#[test]
fn vconn_swap_hands_over_vconn() {
    let mut port = vconn_source_with_contract();

    inject_control(&mut port, ControlMessageType::VconnSwap);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Accept]);
    assert_eq!(port.status().policy, PolicyState::VconnSwapWaitPsRdy);

    inject_control(&mut port, ControlMessageType::PsRdy);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::SourceReady);
    assert!(!port.hw().vconn(CcPin::Cc2));
}

#[test]
fn vconn_swap_without_ps_rdy_is_hard_reset() {
    let mut port = vconn_source_with_contract();

    inject_control(&mut port, ControlMessageType::VconnSwap);
    run_for(&mut port, 1);
    assert_eq!(port.status().policy, PolicyState::VconnSwapWaitPsRdy);

    run_for(&mut port, 95);
    assert_eq!(port.hw().hard_resets_sent(), 0);

    run_for(&mut port, 10);
    assert_eq!(port.hw().hard_resets_sent(), 1);
    assert_eq!(port.status().contract, None);
}

#[test]
fn data_role_swap_is_rejected_during_mode() {
    let mut port = source_waiting_for_request();
    inject_data(&mut port, DataMessageType::Request, &[fixed_request(1, 100).0]);
    run_for(&mut port, 100);
    let _ = port.hw().take_transmitted();

    port.enter_mode(0xFF01, 1).unwrap();
    run_for(&mut port, 1);
    let transmitted = port.hw().take_transmitted();
    assert!(matches!(
        transmitted.as_slice(),
        [(Sop::Sop, Message { payload: Some(Data::VendorDefined(_)), .. })]
    ));

    let ack = VdmHeaderStructured::request(0xFF01, VdmCommand::EnterMode, 1).response(VdmCommandType::ResponderAck);
    inject_data(&mut port, DataMessageType::VendorDefined, &[ack.0]);
    run_for(&mut port, 1);

    inject_control(&mut port, ControlMessageType::DrSwap);
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::Reject]);
    assert_eq!(port.status().data_role, Some(DataRole::Dfp));
    assert_eq!(port.status().policy, PolicyState::SourceReady);
}

#[test]
fn device_policy_manager_requests_are_served_in_ready() {
    let mut port = sink_with_contract();

    port.request(DpmRequest::GetSourceCap).unwrap();
    run_for(&mut port, 1);
    assert_eq!(sent_controls(&mut port), [ControlMessageType::GetSourceCap]);
    assert_eq!(port.status().policy, PolicyState::GetSourceCap);

    // No answer within tSenderResponse.
    run_for(&mut port, 40);
    assert_eq!(port.status().policy, PolicyState::SinkReady);
}

#[test]
fn request_queue_is_bounded() {
    let mut port = port(PortRole::Sink);

    for _ in 0..4 {
        port.request(DpmRequest::GetSinkCap).unwrap();
    }
    assert_eq!(port.request(DpmRequest::GetSinkCap), Err(crate::Error::QueueFull));
}

#[tokio::test]
async fn run_once_attaches_with_timer_wakes() {
    let mut port = port(PortRole::Sink);
    port.hw().attach_source(CcPin::Cc2, SourceCurrent::Current1A5);

    port.run_once::<DummyTimer>().await.unwrap();
    assert_eq!(port.status().connection, ConnectionState::AttachWaitSink);

    for _ in 0..50 {
        if port.status().policy == PolicyState::SinkWaitCapabilities {
            break;
        }
        port.run_once::<DummyTimer>().await.unwrap();
    }

    let status = port.status();
    assert_eq!(status.connection, ConnectionState::AttachedSink);
    assert_eq!(status.orientation, Some(CcPin::Cc2));
    assert_eq!(status.sink_current, Some(SourceCurrent::Current1A5));
    assert_eq!(status.policy, PolicyState::SinkWaitCapabilities);
}
