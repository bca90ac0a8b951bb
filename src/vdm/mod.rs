//! Structured VDM exchanges: discovery of identity, SVIDs and modes, and mode entry and exit.
//!
//! The manager acts as responder for requests of the partner, and as initiator for discovery and
//! mode requests. It never transmits on its own. Messages to send are queued and picked up by the
//! policy engine, which reports back whether they were sent.
//!
//! Only one initiator request is in flight at a time, guarded by the `VdmResponse` timer.
//! Failed requests are reported to the device policy manager and not retried.
pub mod identity;

use fusb302_traits::Hardware;
use heapless::{Deque, Vec};

use crate::device_policy_manager::DevicePolicyManager;
use crate::port::PortContext;
use crate::protocol_layer::Sop;
use crate::protocol_layer::message::data::vendor_defined::{
    MAX_MODES_PER_MESSAGE, MAX_SVIDS_PER_MESSAGE, PD_SID, VdmCommand, VdmCommandType, VdmHeader, VdmHeaderStructured,
};
use crate::timers::{TimerId, TimerType};
use identity::Identity;

/// Number of SVIDs that are kept per SOP type.
pub const MAX_DISCOVERED_SVIDS: usize = 32;

/// Number of SVIDs per SOP type for which modes are kept.
pub const MAX_DISCOVERED_MODE_SETS: usize = 8;

/// Number of modes that can be entered at the same time.
pub const MAX_ENTERED_MODES: usize = 4;

/// A VDM that waits for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutgoingVdm {
    /// The recipient.
    pub sop: Sop,
    /// The VDM header.
    pub header: VdmHeader,
    /// Up to six VDOs.
    pub vdos: Vec<u32, 6>,
}

/// What was discovered about a port partner or cable plug.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Identity, once discovered.
    pub identity: Option<Identity>,
    /// SVIDs, in the order of discovery.
    pub svids: Vec<u16, MAX_DISCOVERED_SVIDS>,
    /// Modes per SVID.
    pub modes: Vec<(u16, Vec<u32, MAX_MODES_PER_MESSAGE>), MAX_DISCOVERED_MODE_SETS>,
}

impl Discovery {
    /// The modes of an SVID.
    pub fn modes_of(&self, svid: u16) -> Option<&[u32]> {
        self.modes
            .iter()
            .find(|(mode_svid, _)| *mode_svid == svid)
            .map(|(_, modes)| modes.as_slice())
    }
}

/// Progress of the automatic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Stage {
    Identity,
    Svids,
    /// Modes of the SVID at this index.
    Modes(usize),
    Done,
}

/// The VDM manager.
#[derive(Debug)]
pub struct VdmManager {
    discovery: [Discovery; 3],
    stage: [Stage; 3],
    /// Request that waits for a response.
    pending: Option<(Sop, VdmHeaderStructured)>,
    outgoing: Deque<OutgoingVdm, 2>,
    /// Index of the next SVID to report in a Discover SVIDs response.
    next_svid: usize,
    /// Modes that we entered as initiator.
    entered: Vec<(u16, u8), MAX_ENTERED_MODES>,
    /// Modes that the partner entered on us.
    entered_as_responder: Vec<(u16, u8), MAX_ENTERED_MODES>,
}

impl Default for VdmManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VdmManager {
    /// Create a manager without discovery results.
    pub fn new() -> Self {
        Self {
            discovery: Default::default(),
            stage: [Stage::Done; 3],
            pending: None,
            outgoing: Deque::new(),
            next_svid: 0,
            entered: Vec::new(),
            entered_as_responder: Vec::new(),
        }
    }

    /// Forget all discovery results and entered modes, e.g. on attach, detach or data role swap.
    ///
    /// With `auto_discovery`, discovery of the port partner and the cable plug is scheduled.
    pub fn reset<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, auto_discovery: bool) {
        self.discovery = Default::default();
        self.pending = None;
        self.outgoing.clear();
        self.next_svid = 0;
        self.entered.clear();
        self.entered_as_responder.clear();
        ctx.timers.cancel(TimerId::VdmResponse);

        let stage = if auto_discovery { Stage::Identity } else { Stage::Done };
        self.stage = [stage, stage, Stage::Done];
    }

    /// What was discovered about the recipient of an SOP type.
    pub fn discovery(&self, sop: Sop) -> &Discovery {
        &self.discovery[sop.index()]
    }

    /// Modes that we entered as initiator, as `(svid, mode index)`.
    pub fn entered_modes(&self) -> &[(u16, u8)] {
        &self.entered
    }

    /// Whether any alternate mode is active, in either direction.
    pub fn mode_active(&self) -> bool {
        !self.entered.is_empty() || !self.entered_as_responder.is_empty()
    }

    /// Whether an initiator request waits for its response.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// The next VDM to send.
    pub fn peek_outgoing(&self) -> Option<&OutgoingVdm> {
        self.outgoing.front()
    }

    /// Take the next VDM to send.
    pub fn take_outgoing(&mut self) -> Option<OutgoingVdm> {
        self.outgoing.pop_front()
    }

    /// Start discovery of identity, SVIDs and modes of the recipient.
    pub fn start_discovery(&mut self, sop: Sop) {
        self.discovery[sop.index()] = Discovery::default();
        self.stage[sop.index()] = Stage::Identity;
    }

    /// Request to enter a mode of the port partner. `mode_index` is 1-based.
    pub fn enter_mode(&mut self, svid: u16, mode_index: u8) -> Result<(), crate::Error> {
        self.queue_request(Sop::Sop, VdmHeaderStructured::request(svid, VdmCommand::EnterMode, mode_index))
    }

    /// Request to exit a mode of the port partner. `mode_index` is 1-based.
    pub fn exit_mode(&mut self, svid: u16, mode_index: u8) -> Result<(), crate::Error> {
        self.queue_request(Sop::Sop, VdmHeaderStructured::request(svid, VdmCommand::ExitMode, mode_index))
    }

    /// Queue a VDM as is, e.g. an unstructured VDM of the device.
    pub fn queue(&mut self, vdm: OutgoingVdm) -> Result<(), crate::Error> {
        self.outgoing.push_back(vdm).map_err(|_| crate::Error::QueueFull)
    }

    fn queue_request(&mut self, sop: Sop, header: VdmHeaderStructured) -> Result<(), crate::Error> {
        self.queue(OutgoingVdm {
            sop,
            header: VdmHeader::Structured(header),
            vdos: Vec::new(),
        })
    }

    fn respond(&mut self, sop: Sop, header: VdmHeaderStructured, vdos: Vec<u32, 6>) {
        trace!("VDM response {:?} to {:?}", header.command_type(), header.command());

        if self
            .queue(OutgoingVdm {
                sop,
                header: VdmHeader::Structured(header),
                vdos,
            })
            .is_err()
        {
            warn!("VDM queue full, dropping response");
        }
    }

    fn nak(&mut self, sop: Sop, request: VdmHeaderStructured) {
        self.respond(sop, request.response(VdmCommandType::ResponderNak), Vec::new());
    }

    /// The policy engine sent a VDM.
    pub fn sent<HW: Hardware>(&mut self, ctx: &mut PortContext<HW>, vdm: &OutgoingVdm) {
        let VdmHeader::Structured(header) = vdm.header else {
            return;
        };

        if header.command_type() == VdmCommandType::InitiatorReq && header.command() != VdmCommand::Attention {
            self.pending = Some((vdm.sop, header));
            ctx.timers.arm(TimerId::VdmResponse, TimerType::VdmResponse);
        }
    }

    /// The policy engine failed to send a VDM.
    pub fn send_failed<DPM: DevicePolicyManager>(&mut self, dpm: &mut DPM, vdm: &OutgoingVdm) {
        warn!("Failed to send VDM {:?}", vdm.header);

        match vdm.header {
            VdmHeader::Structured(header) if header.command_type() == VdmCommandType::InitiatorReq => {
                self.request_failed(dpm, vdm.sop, header)
            }
            _ => (),
        }
    }

    /// Check for response timeouts, and queue the next discovery request.
    ///
    /// Discovery only runs while `may_initiate` holds, i.e. as DFP with an explicit contract.
    /// Cable plugs are only addressed as VCONN source.
    pub fn step<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        ctx: &mut PortContext<HW>,
        dpm: &mut DPM,
        may_initiate: bool,
        vconn_source: bool,
    ) {
        if ctx.timers.is_expired(TimerId::VdmResponse) {
            ctx.timers.cancel(TimerId::VdmResponse);

            if let Some((sop, header)) = self.pending.take() {
                warn!("No response to VDM {:?}", header.command());
                self.request_failed(dpm, sop, header);
            }
        }

        if !may_initiate || self.pending.is_some() || !self.outgoing.is_empty() {
            return;
        }

        for sop in [Sop::Sop, Sop::SopPrime] {
            if sop == Sop::SopPrime && !vconn_source {
                continue;
            }

            if let Some(header) = self.next_discovery_request(sop) {
                debug!("Discovery on {:?}: {:?}", sop, header.command());
                self.queue_request(sop, header).ok();
                return;
            }
        }
    }

    fn next_discovery_request(&mut self, sop: Sop) -> Option<VdmHeaderStructured> {
        let discovery = &self.discovery[sop.index()];

        loop {
            match self.stage[sop.index()] {
                Stage::Identity => return Some(VdmHeaderStructured::request(PD_SID, VdmCommand::DiscoverIdentity, 0)),
                Stage::Svids => return Some(VdmHeaderStructured::request(PD_SID, VdmCommand::DiscoverSvids, 0)),
                Stage::Modes(index) => match discovery.svids.get(index) {
                    Some(svid) => return Some(VdmHeaderStructured::request(*svid, VdmCommand::DiscoverModes, 0)),
                    None => self.stage[sop.index()] = Stage::Done,
                },
                Stage::Done => return None,
            }
        }
    }

    fn request_failed<DPM: DevicePolicyManager>(&mut self, dpm: &mut DPM, sop: Sop, header: VdmHeaderStructured) {
        match header.command() {
            VdmCommand::EnterMode => dpm.mode_entered(header.standard_or_vid(), header.object_position(), false),
            VdmCommand::ExitMode => dpm.mode_exited(header.standard_or_vid(), header.object_position(), false),
            command @ (VdmCommand::DiscoverIdentity | VdmCommand::DiscoverSvids) => {
                self.stage[sop.index()] = Stage::Done;
                dpm.discovery_failed(sop, command);
            }
            command @ VdmCommand::DiscoverModes => {
                // Continue with the next SVID.
                if let Stage::Modes(index) = self.stage[sop.index()] {
                    self.stage[sop.index()] = Stage::Modes(index + 1);
                }
                dpm.discovery_failed(sop, command);
            }
            _ => (),
        }
    }

    /// Handle a received VDM.
    pub fn handle<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        ctx: &mut PortContext<HW>,
        dpm: &mut DPM,
        sop: Sop,
        header: VdmHeader,
        vdos: &[u32],
    ) {
        match header {
            VdmHeader::Unstructured(header) => dpm.unstructured_vdm(header, vdos),
            VdmHeader::Structured(header) if header.command_type() == VdmCommandType::InitiatorReq => {
                self.handle_request(dpm, sop, header, vdos)
            }
            VdmHeader::Structured(header) => self.handle_response(ctx, dpm, sop, header, vdos),
        }
    }

    fn handle_request<DPM: DevicePolicyManager>(
        &mut self,
        dpm: &mut DPM,
        sop: Sop,
        request: VdmHeaderStructured,
        vdos: &[u32],
    ) {
        let svid = request.standard_or_vid();
        trace!("VDM request {:?} for SVID {}", request.command(), svid);

        match request.command() {
            VdmCommand::DiscoverIdentity => match dpm.identity() {
                Some(identity) => self.respond(sop, request.response(VdmCommandType::ResponderAck), identity.to_vdos()),
                None => self.nak(sop, request),
            },
            VdmCommand::DiscoverSvids => {
                let vdos = self.svid_response(dpm.svids());
                match vdos {
                    Some(vdos) => self.respond(sop, request.response(VdmCommandType::ResponderAck), vdos),
                    None => self.nak(sop, request),
                }
            }
            VdmCommand::DiscoverModes => {
                let modes = dpm.modes(svid);
                if dpm.svids().contains(&svid) && !modes.is_empty() {
                    let vdos = modes.iter().copied().take(MAX_MODES_PER_MESSAGE).collect();
                    self.respond(sop, request.response(VdmCommandType::ResponderAck), vdos);
                } else {
                    self.nak(sop, request);
                }
            }
            VdmCommand::EnterMode => {
                let mode_index = request.object_position();
                let known = dpm.svids().contains(&svid) && (1..=dpm.modes(svid).len()).contains(&(mode_index as usize));

                if known && dpm.can_enter_mode(svid, mode_index) && self.entered_as_responder.push((svid, mode_index)).is_ok() {
                    info!("Partner entered mode {} of SVID {}", mode_index, svid);
                    self.respond(sop, request.response(VdmCommandType::ResponderAck), Vec::new());
                } else {
                    self.nak(sop, request);
                }
            }
            VdmCommand::ExitMode => {
                let mode_index = request.object_position();
                let entered = self
                    .entered_as_responder
                    .iter()
                    .position(|(entered_svid, index)| *entered_svid == svid && *index == mode_index);

                match entered {
                    Some(position) if dpm.can_exit_mode(svid, mode_index) => {
                        self.entered_as_responder.swap_remove(position);
                        self.respond(sop, request.response(VdmCommandType::ResponderAck), Vec::new());
                    }
                    _ => self.nak(sop, request),
                }
            }
            VdmCommand::Attention => dpm.attention(svid, vdos),
            VdmCommand::Other(command) => {
                debug!("NAK for unknown VDM command {}", command);
                self.nak(sop, request);
            }
        }
    }

    /// Pack the next chunk of SVIDs, two per object.
    ///
    /// A response with fewer than twelve SVIDs is the last one. It ends with an odd count, or with
    /// a zero SVID. After a full chunk, the next request continues where it left off.
    fn svid_response(&mut self, svids: &[u16]) -> Option<Vec<u32, 6>> {
        if svids.is_empty() {
            return None;
        }

        let start = self.next_svid.min(svids.len());
        let end = (start + MAX_SVIDS_PER_MESSAGE).min(svids.len());
        let chunk = &svids[start..end];

        let mut vdos: Vec<u32, 6> = chunk
            .chunks(2)
            .map(|pair| ((pair[0] as u32) << 16) | pair.get(1).copied().unwrap_or(0) as u32)
            .collect();

        if chunk.len() < MAX_SVIDS_PER_MESSAGE {
            if chunk.len() % 2 == 0 {
                // Holds at most five objects here.
                let _ = vdos.push(0);
            }
            self.next_svid = 0;
        } else {
            self.next_svid = end;
        }

        Some(vdos)
    }

    fn handle_response<HW: Hardware, DPM: DevicePolicyManager>(
        &mut self,
        ctx: &mut PortContext<HW>,
        dpm: &mut DPM,
        sop: Sop,
        response: VdmHeaderStructured,
        vdos: &[u32],
    ) {
        let Some((pending_sop, request)) = self.pending else {
            debug!("Unexpected VDM response {:?}", response.command());
            return;
        };

        if pending_sop != sop
            || request.command() != response.command()
            || request.standard_or_vid() != response.standard_or_vid()
        {
            debug!("VDM response {:?} does not match request", response.command());
            return;
        }

        self.pending = None;
        ctx.timers.cancel(TimerId::VdmResponse);

        if response.command_type() != VdmCommandType::ResponderAck {
            debug!("VDM {:?} answered with {:?}", request.command(), response.command_type());
            self.request_failed(dpm, sop, request);
            return;
        }

        let svid = request.standard_or_vid();
        let mode_index = request.object_position();
        let index = sop.index();

        match request.command() {
            VdmCommand::DiscoverIdentity => match Identity::from_vdos(vdos) {
                Some(identity) => {
                    debug!("Identity on {:?}: {:?}", sop, identity);
                    self.discovery[index].identity = Some(identity);
                    dpm.identity_discovered(sop, &identity);

                    self.stage[index] = if sop == Sop::Sop && identity.id_header.modal_supported() {
                        Stage::Svids
                    } else {
                        Stage::Done
                    };
                }
                None => self.request_failed(dpm, sop, request),
            },
            VdmCommand::DiscoverSvids => {
                let mut complete = vdos.len() < MAX_SVIDS_PER_MESSAGE / 2;

                'objects: for vdo in vdos {
                    for svid in [(vdo >> 16) as u16, *vdo as u16] {
                        if svid == 0 {
                            complete = true;
                            break 'objects;
                        }

                        if self.discovery[index].svids.push(svid).is_err() {
                            warn!("Too many SVIDs, ignoring the rest");
                            complete = true;
                            break 'objects;
                        }
                    }
                }

                if complete {
                    dpm.svids_discovered(sop, &self.discovery[index].svids);
                    self.stage[index] = Stage::Modes(0);
                }
            }
            VdmCommand::DiscoverModes => {
                let modes: Vec<u32, MAX_MODES_PER_MESSAGE> = vdos.iter().copied().take(MAX_MODES_PER_MESSAGE).collect();
                dpm.modes_discovered(sop, svid, &modes);

                if self.discovery[index].modes.push((svid, modes)).is_err() {
                    warn!("No room for modes of SVID {}", svid);
                }

                if let Stage::Modes(position) = self.stage[index] {
                    self.stage[index] = Stage::Modes(position + 1);
                }
            }
            VdmCommand::EnterMode => {
                if self.entered.push((svid, mode_index)).is_err() {
                    warn!("Too many entered modes");
                }
                info!("Entered mode {} of SVID {}", mode_index, svid);
                dpm.mode_entered(svid, mode_index, true);
            }
            VdmCommand::ExitMode => {
                self.entered.retain(|(entered_svid, index)| *entered_svid != svid || *index != mode_index);
                dpm.mode_exited(svid, mode_index, true);
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutgoingVdm, VdmManager};
    use crate::device_policy_manager::DevicePolicyManager;
    use crate::dummy::DummyHardware;
    use crate::log_buffer::MessageLog;
    use crate::port::PortContext;
    use crate::protocol_layer::Sop;
    use crate::protocol_layer::message::data::vendor_defined::{
        VdmCommand, VdmCommandType, VdmHeader, VdmHeaderStructured,
    };
    use crate::registers::Device;
    use crate::timers::{TimerId, Timers};

    #[derive(Default)]
    struct Responder {
        svids: std::vec::Vec<u16>,
        entered: std::vec::Vec<(u16, u8, bool)>,
        failed: std::vec::Vec<VdmCommand>,
        discovered_svids: std::vec::Vec<u16>,
    }

    impl DevicePolicyManager for Responder {
        fn svids(&self) -> &[u16] {
            &self.svids
        }

        fn modes(&self, svid: u16) -> &[u32] {
            if svid == 0xFF01 { &[0x0000_0405] } else { &[] }
        }

        fn mode_entered(&mut self, svid: u16, mode_index: u8, entered: bool) {
            self.entered.push((svid, mode_index, entered));
        }

        fn discovery_failed(&mut self, _sop: Sop, command: VdmCommand) {
            self.failed.push(command);
        }

        fn svids_discovered(&mut self, _sop: Sop, svids: &[u16]) {
            self.discovered_svids = svids.to_vec();
        }
    }

    fn context() -> PortContext<DummyHardware> {
        PortContext {
            device: Device::new(DummyHardware::new()),
            timers: Timers::new(),
            log: MessageLog::new(),
        }
    }

    fn request(command: VdmCommand, svid: u16, object_position: u8) -> VdmHeader {
        VdmHeader::Structured(VdmHeaderStructured::request(svid, command, object_position))
    }

    /// Request SVIDs until the response terminates, returning the number of responses.
    fn count_svid_responses(count: usize) -> usize {
        let mut ctx = context();
        let mut dpm = Responder {
            svids: (1..=count as u16).collect(),
            ..Default::default()
        };
        let mut manager = VdmManager::new();

        for responses in 1..10 {
            manager.handle(&mut ctx, &mut dpm, Sop::Sop, request(VdmCommand::DiscoverSvids, 0xFF00, 0), &[]);
            let response = manager.take_outgoing().unwrap();

            let last = response.vdos.len() < 6
                || response
                    .vdos
                    .iter()
                    .any(|vdo| (*vdo >> 16) == 0 || (*vdo & 0xFFFF) == 0);
            if last {
                return responses;
            }
        }

        panic!("SVID responses do not terminate");
    }

    #[test]
    fn svid_pagination() {
        assert_eq!(count_svid_responses(5), 1);
        assert_eq!(count_svid_responses(12), 2);
        assert_eq!(count_svid_responses(13), 2);
        assert_eq!(count_svid_responses(24), 3);
    }

    #[test]
    fn exact_multiple_ends_with_zero_object() {
        let mut ctx = context();
        let mut dpm = Responder {
            svids: (1..=12).collect(),
            ..Default::default()
        };
        let mut manager = VdmManager::new();

        manager.handle(&mut ctx, &mut dpm, Sop::Sop, request(VdmCommand::DiscoverSvids, 0xFF00, 0), &[]);
        let first = manager.take_outgoing().unwrap();
        assert_eq!(first.vdos.len(), 6);
        assert_eq!(first.vdos[0], 0x0001_0002);

        manager.handle(&mut ctx, &mut dpm, Sop::Sop, request(VdmCommand::DiscoverSvids, 0xFF00, 0), &[]);
        let second = manager.take_outgoing().unwrap();
        assert_eq!(second.vdos.as_slice(), &[0]);
    }

    #[test]
    fn enter_mode_is_naked_without_consent() {
        let mut ctx = context();
        let mut dpm = Responder {
            svids: std::vec![0xFF01],
            ..Default::default()
        };
        let mut manager = VdmManager::new();

        manager.handle(&mut ctx, &mut dpm, Sop::Sop, request(VdmCommand::EnterMode, 0xFF01, 1), &[]);
        let response = manager.take_outgoing().unwrap();

        let VdmHeader::Structured(header) = response.header else {
            panic!("unstructured response");
        };
        assert_eq!(header.command_type(), VdmCommandType::ResponderNak);
        assert_eq!(header.standard_or_vid(), 0xFF01);
        assert_eq!(header.object_position(), 1);
        assert!(!manager.mode_active());
    }

    #[test]
    fn unknown_command_is_naked_with_echo() {
        let mut ctx = context();
        let mut dpm = Responder::default();
        let mut manager = VdmManager::new();

        manager.handle(&mut ctx, &mut dpm, Sop::Sop, request(VdmCommand::Other(0x10), 0xFF01, 2), &[]);
        let VdmHeader::Structured(header) = manager.take_outgoing().unwrap().header else {
            panic!("unstructured response");
        };

        assert_eq!(header.command(), VdmCommand::Other(0x10));
        assert_eq!(header.command_type(), VdmCommandType::ResponderNak);
        assert_eq!(header.standard_or_vid(), 0xFF01);
    }

    #[test]
    fn discovery_collects_paginated_svids() {
        let mut ctx = context();
        let mut dpm = Responder::default();
        let mut manager = VdmManager::new();
        manager.reset(&mut ctx, true);
        let id_header = crate::protocol_layer::message::data::vendor_defined::IdHeaderVdo(0).with_modal_supported(true);

        let mut exchange = |manager: &mut VdmManager, dpm: &mut Responder, vdos: &[u32]| {
            manager.step(&mut ctx, dpm, true, false);
            let outgoing = manager.take_outgoing().unwrap();
            manager.sent(&mut ctx, &outgoing);

            let VdmHeader::Structured(header) = outgoing.header else {
                panic!("unstructured request");
            };
            let response = VdmHeader::Structured(header.response(VdmCommandType::ResponderAck));
            manager.handle(&mut ctx, dpm, Sop::Sop, response, vdos);
            header.command()
        };

        assert_eq!(exchange(&mut manager, &mut dpm, &[id_header.0, 0]), VdmCommand::DiscoverIdentity);
        let full: std::vec::Vec<u32> = (0..6).map(|i| ((2 * i + 1) << 16) | (2 * i + 2)).collect();
        assert_eq!(exchange(&mut manager, &mut dpm, &full), VdmCommand::DiscoverSvids);
        assert_eq!(exchange(&mut manager, &mut dpm, &[0x00FF_0000]), VdmCommand::DiscoverSvids);

        assert_eq!(dpm.discovered_svids.len(), 13);
        assert_eq!(manager.discovery(Sop::Sop).svids[12], 0x00FF);
        assert_eq!(exchange(&mut manager, &mut dpm, &[0x0000_0405]), VdmCommand::DiscoverModes);
    }

    #[test]
    fn response_timeout_is_reported_once() {
        let mut ctx = context();
        let mut dpm = Responder::default();
        let mut manager = VdmManager::new();

        manager.enter_mode(0xFF01, 1).unwrap();
        let outgoing: OutgoingVdm = manager.take_outgoing().unwrap();
        manager.sent(&mut ctx, &outgoing);
        assert!(manager.is_busy());

        ctx.timers.update(100);
        assert!(ctx.timers.is_expired(TimerId::VdmResponse));
        manager.step(&mut ctx, &mut dpm, false, false);
        manager.step(&mut ctx, &mut dpm, false, false);

        assert_eq!(dpm.entered, std::vec![(0xFF01, 1, false)]);
        assert!(!manager.is_busy());
        assert!(manager.entered_modes().is_empty());
    }
}
