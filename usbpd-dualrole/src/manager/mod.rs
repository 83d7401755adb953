//! The manager makes policy decisions on behalf of the policy engine.
//!
//! It evaluates source capabilities and requests, decides about swaps, keeps track of the
//! partner's identity and alternate modes, and holds the commands that the device posted.
pub mod accessory;
pub mod command;

pub use command::{Command, CommandArgs, Event};
use heapless::Vec;
use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;

use crate::config::{MAX_SVIDS, PortConfig, PpsTarget, SinkPolicy};
use crate::device_policy_manager::Contract;
use crate::protocol_layer::message::data::MAX_VDOS;
use crate::protocol_layer::message::data::request::{FixedVariableSupply, PowerSource, Pps, RawDataObject};
use crate::protocol_layer::message::data::sink_capabilities::SinkCapabilities;
use crate::protocol_layer::message::data::source_capabilities::{FixedSupply, PowerDataObject, SourceCapabilities};
use crate::protocol_layer::message::data::vendor_defined::{
    DISPLAYPORT_SID, DisplayPortCapabilities, DisplayPortConfigure, DisplayPortStatus, Identity, VdmCommand,
    VdmCommandType, VdmHeaderStructured,
};
use crate::units::ElectricCurrent;
use crate::{DataRole, PowerRole};
use accessory::{AttachedDevice, PartnerInfo};

/// Convert a current to 10 mA units, saturating at the 10-bit field maximum.
fn to_10ma(current: ElectricCurrent) -> u16 {
    (current.get::<milliampere>() / 10).min(0x3FF) as u16
}

/// Policy decisions and session bookkeeping of one port.
#[derive(Debug)]
pub struct Manager {
    config: PortConfig,
    commands: Command,
    args: CommandArgs,
    last_command: Option<Command>,
    /// Commands that were posted on the manager's own initiative during this session.
    initiated: Command,
    partner_source_capabilities: Option<SourceCapabilities>,
    partner_sink_capabilities: Option<SinkCapabilities>,
    contract: Option<Contract>,
    pd_capable: bool,
    identity: Option<Identity>,
    svids: Vec<u16, MAX_SVIDS>,
    modes_svid: Option<u16>,
    modes: Vec<u32, MAX_VDOS>,
    active_mode: Option<(u16, u8)>,
    modal_operation: bool,
    displayport_status: Option<DisplayPortStatus>,
    displayport_configured: Option<DisplayPortConfigure>,
    attached_device: AttachedDevice,
}

impl Manager {
    /// Create a manager for a port configuration.
    pub fn new(config: PortConfig) -> Self {
        Self {
            config,
            commands: Command::empty(),
            args: Default::default(),
            last_command: None,
            initiated: Command::empty(),
            partner_source_capabilities: None,
            partner_sink_capabilities: None,
            contract: None,
            pd_capable: false,
            identity: None,
            svids: Vec::new(),
            modes_svid: None,
            modes: Vec::new(),
            active_mode: None,
            modal_operation: false,
            displayport_status: None,
            displayport_configured: None,
            attached_device: AttachedDevice::None,
        }
    }

    /// The port configuration.
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Forget everything about the partner and all pending commands.
    pub fn clear_session(&mut self) {
        debug!("Clear manager session");
        *self = Self::new(self.config.clone());
    }

    /// Post an event of the device policy manager.
    pub fn post(&mut self, event: Event) {
        let (command, policy) = self.args.take_event(event);
        if let Some(policy) = policy {
            self.config.sink = policy;
        }
        self.post_command(command);
    }

    /// Post commands without arguments.
    pub fn post_command(&mut self, command: Command) {
        debug!("Post command {:?}", command);
        self.commands |= command;
    }

    /// Commands that are still pending.
    pub fn pending(&self) -> Command {
        self.commands
    }

    /// Take the pending command with the highest priority.
    pub fn next_command(&mut self) -> Option<Command> {
        let command = self.commands.highest_priority()?;
        self.commands.remove(command);
        self.last_command = Some(command);
        trace!("Service command {:?}", command);
        Some(command)
    }

    /// The command that was serviced last.
    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    /// Arguments of pending commands.
    pub fn args(&self) -> &CommandArgs {
        &self.args
    }

    /// Take the mode that the device asked to enter. Each request is used once.
    pub fn take_mode(&mut self) -> Option<(u16, u8)> {
        self.args.mode.take()
    }

    /// Choose a request for the offered source capabilities.
    ///
    /// A configured PPS target is requested if an APDO covers it. Otherwise, among the fixed
    /// supplies up to the maximum voltage, the highest voltage that provides the maximum operating
    /// current is chosen. If none does, the supply with the highest current is requested with the
    /// capability mismatch flag set. With no fixed supply in range at all, vSafe5V is requested
    /// at a mismatch.
    pub fn evaluate_capability(&mut self, capabilities: &SourceCapabilities) -> Option<PowerSource> {
        self.partner_source_capabilities = Some(capabilities.clone());
        self.pd_capable = true;

        let policy = self.config.sink;
        let request = policy
            .pps
            .and_then(|target| Self::select_pps(capabilities, &target))
            .or_else(|| Self::select_fixed(capabilities, &policy));

        match &request {
            Some(request) if request.capability_mismatch() => {
                warn!("Capability mismatch, requesting position {}", request.object_position())
            }
            Some(request) => debug!("Requesting position {}", request.object_position()),
            None => warn!("No usable source capability"),
        }
        request
    }

    fn select_pps(capabilities: &SourceCapabilities, target: &PpsTarget) -> Option<PowerSource> {
        let voltage_20mv = (target.voltage.get::<millivolt>() / 20) as u16;
        let current_50ma = (target.current.get::<milliampere>() / 50) as u16;

        capabilities.positions().find_map(|(position, pdo)| match pdo {
            PowerDataObject::Pps(apdo)
                if apdo.covers_raw_voltage_20mv(voltage_20mv) && u16::from(apdo.raw_max_current()) >= current_50ma =>
            {
                Some(PowerSource::Pps(Pps::for_position(position, voltage_20mv, current_50ma)))
            }
            _ => None,
        })
    }

    fn select_fixed(capabilities: &SourceCapabilities, policy: &SinkPolicy) -> Option<PowerSource> {
        let max_voltage_mv = policy.max_voltage.get::<millivolt>();
        let required = to_10ma(policy.max_operating_current);

        let mut satisfying: Option<(u8, FixedSupply)> = None;
        let mut highest_current: Option<(u8, FixedSupply)> = None;

        for (position, pdo) in capabilities.positions() {
            let PowerDataObject::FixedSupply(supply) = pdo else {
                continue;
            };
            if u32::from(supply.raw_voltage()) * 50 > max_voltage_mv {
                continue;
            }

            if supply.raw_max_current() >= required
                && satisfying.is_none_or(|(_, best)| supply.raw_voltage() > best.raw_voltage())
            {
                satisfying = Some((position, *supply));
            }
            if highest_current.is_none_or(|(_, best)| supply.raw_max_current() > best.raw_max_current()) {
                highest_current = Some((position, *supply));
            }
        }

        // Without any fixed supply in range, vSafe5V is still acceptable, at a mismatch.
        let (position, supply, mismatch) = match (satisfying, highest_current) {
            (Some((position, supply)), _) => (position, supply, false),
            (None, Some((position, supply))) => (position, supply, true),
            (None, None) => (1, *capabilities.vsafe_5v()?, true),
        };

        let operating = to_10ma(policy.operating_current).min(supply.raw_max_current());
        Some(PowerSource::FixedVariableSupply(
            FixedVariableSupply::for_position(position, operating, required)
                .with_capability_mismatch(mismatch)
                .with_giveback_flag(policy.give_back),
        ))
    }

    fn build_contract(power_role: PowerRole, capabilities: &SourceCapabilities, request: &PowerSource) -> Option<Contract> {
        let (voltage, current, pps) = match (capabilities.at_object_position(request.object_position())?, request) {
            (PowerDataObject::FixedSupply(supply), PowerSource::FixedVariableSupply(rdo)) => {
                (supply.voltage(), rdo.operating_current(), false)
            }
            (PowerDataObject::VariableSupply(supply), PowerSource::FixedVariableSupply(rdo)) => {
                (supply.min_voltage(), rdo.operating_current(), false)
            }
            (PowerDataObject::Battery(supply), PowerSource::Battery(rdo)) => {
                let millivolts = u32::from(supply.raw_min_voltage()) * 50;
                let milliwatts = u32::from(rdo.raw_operating_power()) * 250;
                let milliamperes = (milliwatts * 1000).checked_div(millivolts).unwrap_or_default();
                (
                    supply.min_voltage(),
                    ElectricCurrent::new::<milliampere>(milliamperes),
                    false,
                )
            }
            (PowerDataObject::Pps(_), PowerSource::Pps(rdo)) => (rdo.output_voltage(), rdo.operating_current(), true),
            _ => return None,
        };

        Some(Contract {
            power_role,
            object_position: request.object_position(),
            voltage,
            current,
            pps,
            capability_mismatch: request.capability_mismatch(),
        })
    }

    /// The contract that results from a request of this sink, once it is accepted.
    pub fn contract_for(&self, request: &PowerSource) -> Option<Contract> {
        Self::build_contract(PowerRole::Sink, self.partner_source_capabilities.as_ref()?, request)
    }

    /// Check a sink's request against the advertised source capabilities.
    ///
    /// Returns the resulting contract, or `None` if the request must be rejected.
    pub fn evaluate_request(&mut self, raw: RawDataObject) -> Option<Contract> {
        let capabilities = &self.config.source_capabilities;
        let request = PowerSource::interpret(raw, capabilities);

        let acceptable = match (capabilities.at_object_position(raw.object_position()), &request) {
            (Some(PowerDataObject::FixedSupply(supply)), PowerSource::FixedVariableSupply(rdo)) => {
                rdo.raw_operating_current() <= supply.raw_max_current()
                    && (rdo.capability_mismatch()
                        || rdo.giveback_flag()
                        || rdo.raw_max_operating_current() <= supply.raw_max_current())
            }
            (Some(PowerDataObject::VariableSupply(supply)), PowerSource::FixedVariableSupply(rdo)) => {
                rdo.raw_operating_current() <= supply.raw_max_current()
            }
            (Some(PowerDataObject::Battery(supply)), PowerSource::Battery(rdo)) => {
                rdo.raw_operating_power() <= supply.raw_max_power()
            }
            (Some(PowerDataObject::Pps(supply)), PowerSource::Pps(rdo)) => {
                supply.covers_raw_voltage_20mv(rdo.raw_output_voltage())
                    && rdo.raw_operating_current() <= u16::from(supply.raw_max_current())
            }
            _ => false,
        };

        if !acceptable {
            debug!("Rejecting request for position {}", raw.object_position());
            return None;
        }

        self.pd_capable = true;
        Self::build_contract(PowerRole::Source, capabilities, &request)
    }

    /// Record an explicit contract.
    pub fn set_contract(&mut self, contract: Option<Contract>) {
        self.contract = contract;
    }

    /// The explicit contract, if any.
    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref()
    }

    /// The partner's source capabilities, if it sent any.
    pub fn partner_source_capabilities(&self) -> Option<&SourceCapabilities> {
        self.partner_source_capabilities.as_ref()
    }

    /// Record the partner's sink capabilities.
    pub fn sink_capabilities_received(&mut self, capabilities: SinkCapabilities) {
        self.partner_sink_capabilities = Some(capabilities);
    }

    /// The partner's sink capabilities, if it sent any.
    pub fn partner_sink_capabilities(&self) -> Option<&SinkCapabilities> {
        self.partner_sink_capabilities.as_ref()
    }

    /// Whether to accept a power role swap while in `power_role`.
    pub fn accept_pr_swap(&self, power_role: PowerRole) -> bool {
        let swap = &self.config.swap;
        swap.accept_pr_swap && swap.preferred_power_role != Some(power_role)
    }

    /// Whether to accept a data role swap while in `data_role`.
    pub fn accept_dr_swap(&self, data_role: DataRole) -> bool {
        let swap = &self.config.swap;
        swap.accept_dr_swap && swap.preferred_data_role != Some(data_role)
    }

    /// Whether to accept a VCONN swap.
    pub fn accept_vconn_swap(&self) -> bool {
        self.config.swap.accept_vconn_swap
    }

    /// Post the commands that follow an explicit contract: swaps towards the preferred roles, and discovery.
    ///
    /// Each of them is posted at most once per session.
    pub fn after_contract(&mut self, power_role: PowerRole, data_role: DataRole) {
        let swap = self.config.swap;

        let (partner_dual_role_power, partner_dual_role_data) = match power_role {
            PowerRole::Sink => self
                .partner_source_capabilities
                .as_ref()
                .map(|caps| (caps.dual_role_power(), caps.dual_role_data()))
                .unwrap_or_default(),
            PowerRole::Source => match &self.partner_sink_capabilities {
                Some(caps) => (caps.dual_role_power(), true),
                None => {
                    if swap.preferred_power_role == Some(PowerRole::Sink) {
                        self.initiate(Command::GET_SINK_CAP);
                    }
                    (false, true)
                }
            },
        };

        if partner_dual_role_power && swap.preferred_power_role.is_some_and(|role| role != power_role) {
            self.initiate(Command::PR_SWAP);
        }

        if partner_dual_role_data && swap.preferred_data_role.is_some_and(|role| role != data_role) {
            self.initiate(Command::DR_SWAP);
        }

        if self.config.vdm.auto_discover && data_role == DataRole::Dfp {
            self.initiate(Command::VDM_DISCOVER_IDENTITY);
        }
    }

    fn initiate(&mut self, command: Command) {
        if !self.initiated.contains(command) {
            self.initiated |= command;
            self.post_command(command);
        }
    }

    /// Record the partner's identity.
    pub fn identity_received(&mut self, identity: Identity) {
        debug!("Partner identity VID {:#06x} PID {:#06x}", identity.vid(), identity.pid());
        self.identity = Some(identity);
    }

    /// The partner's identity.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Record SVIDs from a Discover SVIDs response, two per object, up to the first zero.
    pub fn svids_received(&mut self, vdos: &[u32]) {
        let svids = vdos
            .iter()
            .flat_map(|vdo| [(vdo >> 16) as u16, *vdo as u16])
            .take_while(|svid| *svid != 0);

        for svid in svids {
            if !self.svids.contains(&svid) && self.svids.push(svid).is_err() {
                warn!("Dropping SVID {:#06x}", svid);
            }
        }
    }

    /// SVIDs of the partner.
    pub fn svids(&self) -> &[u16] {
        &self.svids
    }

    /// Record the modes from a Discover Modes response.
    pub fn modes_received(&mut self, svid: u16, vdos: &[u32]) {
        self.modes_svid = Some(svid);
        self.modes = vdos.iter().copied().collect();
    }

    /// The SVID whose modes to discover next.
    pub fn svid_to_discover(&self) -> Option<u16> {
        let wanted = self.config.vdm.enter_displayport && self.svids.contains(&DISPLAYPORT_SID);
        (wanted && self.modes_svid != Some(DISPLAYPORT_SID)).then_some(DISPLAYPORT_SID)
    }

    /// The DisplayPort mode to enter, with its object position.
    ///
    /// A mode qualifies if the partner can act as UFP_D with pin assignment C, D or E.
    pub fn displayport_mode(&self) -> Option<(u16, u8)> {
        if !self.config.vdm.enter_displayport || self.modes_svid != Some(DISPLAYPORT_SID) {
            return None;
        }

        self.modes
            .iter()
            .position(|vdo| {
                let capabilities = DisplayPortCapabilities(*vdo);
                DisplayPortConfigure::ufp_d(capabilities.ufp_pin_assignments(), false).is_some()
            })
            .map(|index| (DISPLAYPORT_SID, index as u8 + 1))
    }

    /// The configuration to request for the active DisplayPort mode.
    pub fn displayport_configuration(&self) -> Option<DisplayPortConfigure> {
        let (svid, position) = self.active_mode?;
        if svid != DISPLAYPORT_SID {
            return None;
        }

        let capabilities = DisplayPortCapabilities(*self.modes.get(usize::from(position).checked_sub(1)?)?);
        let multi_function = self.config.vdm.displayport_multi_function
            || self
                .displayport_status
                .is_some_and(|status| status.multi_function_preferred());

        DisplayPortConfigure::ufp_d(capabilities.ufp_pin_assignments(), multi_function)
    }

    /// Record the partner's DisplayPort status.
    pub fn set_displayport_status(&mut self, status: DisplayPortStatus) {
        self.displayport_status = Some(status);
    }

    /// Record the configuration that the partner accepted.
    pub fn set_displayport_configured(&mut self, configuration: Option<DisplayPortConfigure>) {
        self.displayport_configured = configuration;
    }

    /// The DisplayPort configuration that is in effect.
    pub fn displayport_configured(&self) -> Option<DisplayPortConfigure> {
        self.displayport_configured
    }

    /// Record that a mode was entered.
    pub fn mode_entered(&mut self, svid: u16, object_position: u8) {
        info!("Entered mode {} of SVID {:#06x}", object_position, svid);
        self.active_mode = Some((svid, object_position));
        self.modal_operation = true;
    }

    /// Record that the active mode was exited.
    pub fn mode_exited(&mut self) {
        self.active_mode = None;
        self.displayport_configured = None;
        self.modal_operation = false;
    }

    /// The active alternate mode.
    pub fn active_mode(&self) -> Option<(u16, u8)> {
        self.active_mode
    }

    /// Whether an alternate mode is active.
    pub fn modal_operation(&self) -> bool {
        self.modal_operation
    }

    /// Mark discovery as finished without entering a mode.
    pub fn set_modal_operation(&mut self, modal_operation: bool) {
        self.modal_operation = modal_operation;
    }

    /// Answer a structured VDM request from the port partner, from the configuration.
    pub fn vdm_response(&mut self, request: VdmHeaderStructured) -> (VdmHeaderStructured, Vec<u32, MAX_VDOS>) {
        let vdm = &self.config.vdm;
        let svid = request.standard_or_vid();
        let mut objects = Vec::<u32, MAX_VDOS>::new();

        let ack = match request.command() {
            VdmCommand::DiscoverIdentity => match &vdm.identity {
                Some(identity) => {
                    objects.extend(identity.to_vdos());
                    true
                }
                None => false,
            },
            VdmCommand::DiscoverSvids => {
                for pair in vdm.svids.chunks(2) {
                    let upper = u32::from(pair[0]) << 16;
                    let lower = pair.get(1).copied().map(u32::from).unwrap_or_default();
                    objects.push(upper | lower).ok();
                }
                if vdm.svids.len() % 2 == 0 {
                    objects.push(0).ok();
                }
                !vdm.svids.is_empty()
            }
            VdmCommand::DiscoverModes => {
                objects.extend(
                    vdm.modes
                        .iter()
                        .filter(|(mode_svid, _)| *mode_svid == svid)
                        .map(|(_, mode)| *mode),
                );
                !objects.is_empty()
            }
            VdmCommand::EnterMode => {
                let exists = vdm
                    .modes
                    .iter()
                    .filter(|(mode_svid, _)| *mode_svid == svid)
                    .nth(usize::from(request.object_position()).wrapping_sub(1))
                    .is_some();
                if exists {
                    self.mode_entered(svid, request.object_position());
                }
                exists
            }
            VdmCommand::ExitMode => {
                let active = self.active_mode.is_some_and(|(active_svid, _)| active_svid == svid);
                if active {
                    self.mode_exited();
                }
                active
            }
            VdmCommand::DisplayPortStatus | VdmCommand::DisplayPortConfigure => {
                let active = self
                    .active_mode
                    .is_some_and(|(active_svid, _)| active_svid == DISPLAYPORT_SID && svid == DISPLAYPORT_SID);
                if active && request.command() == VdmCommand::DisplayPortStatus {
                    objects
                        .push(DisplayPortStatus::default().with_enabled(true).with_connected(0b10).0)
                        .ok();
                }
                active
            }
            VdmCommand::Attention | VdmCommand::Other(_) => false,
        };

        let command_type = if ack {
            VdmCommandType::ResponderAck
        } else {
            objects.clear();
            VdmCommandType::ResponderNak
        };
        (request.response(command_type), objects)
    }

    /// Classify the partner anew, returning the classification if it changed.
    ///
    /// `partner_sink` tells whether the partner is the sink.
    pub fn classify(&mut self, partner_sink: bool) -> Option<AttachedDevice> {
        let device = accessory::classify(&PartnerInfo {
            identity: self.identity.as_ref(),
            svids: &self.svids,
            source_capabilities: self.partner_source_capabilities.as_ref(),
            pd_capable: self.pd_capable,
            sink: partner_sink,
        });

        if device == self.attached_device {
            return None;
        }
        info!("Attached device {:?}", device);
        self.attached_device = device;
        Some(device)
    }

    /// The current classification of the partner.
    pub fn attached_device(&self) -> AttachedDevice {
        self.attached_device
    }
}
