//! Policy engine of a dual-role port.
//!
//! The engine is a single state machine over several state families: source, sink, the three swaps,
//! structured VDMs, PD 3.0 information exchange and BIST. Each call of [`PolicyEngine::run_step`]
//! performs one transition. Timers that a state started are cancelled when the state is left.
use bitflags::bitflags;
use embassy_futures::select::{Either3, select3};
use usbpd_dualrole_traits::Attach;

use crate::config::PortConfig;
use crate::counters::{Counter, CounterType};
use crate::device_policy_manager::{Contract, DevicePolicyManager, InfoRequest, Notification, SupplyLevel};
use crate::manager::{Command, Manager};
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::bist::BistMode;
use crate::protocol_layer::message::data::request::{PowerSource, RawDataObject};
use crate::protocol_layer::message::data::source_capabilities::SourceCapabilities;
use crate::protocol_layer::message::data::status::AlertDataObject;
use crate::protocol_layer::message::data::vendor_defined::{
    DISPLAYPORT_SID, DisplayPortStatus, VdmCommand, VdmCommandType, VdmHeaderStructured,
};
use crate::protocol_layer::message::header::{ControlMessageType, ExtendedMessageType, Header, MessageType};
use crate::protocol_layer::{ProtocolError, ProtocolLayer, RxError, TxError};
use crate::timers::{Timer, TimerId, Timers};
use crate::{DataRole, Driver, PowerRole};

mod info;
mod sink;
mod source;
mod swap;
mod vdm;

#[cfg(test)]
mod tests;

/// States of the source family.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum SourceState {
    Startup,
    Discovery,
    SendCapabilities,
    WaitForRequest,
    NegotiateCapability(RawDataObject),
    /// Answer a request with `Reject` or `Wait`.
    CapabilityResponse(ControlMessageType),
    WaitNewCapabilities,
    TransitionSupply(Contract),
    Ready,
    /// No sink answered the capabilities.
    Disabled,
    GetSinkCap,
    GiveSourceCap,
    /// A dual-role source reports its sink capabilities.
    GiveSinkCap,
    HardReset,
    TransitionToDefault,
    SendSoftReset,
    SoftReset,
    SendNotSupported,
    NotSupportedReceived,
}

/// States of the sink family.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum SinkState {
    Startup,
    Discovery,
    WaitForCapabilities,
    EvaluateCapability(SourceCapabilities),
    SelectCapability(PowerSource),
    TransitionSink(PowerSource),
    Ready,
    GiveSinkCap,
    GetSourceCap,
    /// A dual-role sink reports its source capabilities.
    GiveSourceCap,
    HardReset,
    TransitionToDefault,
    SendSoftReset,
    SoftReset,
    SendNotSupported,
    NotSupportedReceived,
}

/// States of a data role swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum DataRoleSwapState {
    EvaluateSwap,
    AcceptSwap,
    RejectSwap,
    SendSwap,
    ChangeRole,
}

/// States of a power role swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum PowerRoleSwapState {
    Evaluate,
    Accept,
    Reject,
    Send,
    /// The initial source turns its supply off.
    SrcTransitionToOff,
    SrcAssertRd,
    SrcWaitSourceOn,
    /// The initial sink waits for the supply to go off.
    SnkTransitionToOff,
    SnkAssertRp,
    SnkSourceOn,
}

impl PowerRoleSwapState {
    /// Whether the swap has gone past the point of no return.
    fn in_transition(self) -> bool {
        !matches!(
            self,
            PowerRoleSwapState::Evaluate
                | PowerRoleSwapState::Accept
                | PowerRoleSwapState::Reject
                | PowerRoleSwapState::Send
        )
    }
}

/// States of a VCONN swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum VconnSwapState {
    Evaluate,
    Accept,
    Reject,
    Send,
    WaitForVconn,
    TurnOffVconn,
    TurnOnVconn,
    SendPsRdy,
}

/// States of structured VDM exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum VdmState {
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes(u16),
    /// Enter the mode at an object position of an SVID.
    EnterMode(u16, u8),
    DisplayPortStatus,
    DisplayPortConfigure,
    ExitMode,
    /// Answer a request of the partner.
    Respond(VdmHeaderStructured),
}

/// States of the PD 3.0 information exchange.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum InfoState {
    /// Request information from the partner.
    Request(InfoRequest),
    /// Answer a request of the partner.
    Respond(InfoRequest),
    SendAlert(AlertDataObject),
    AlertReceived(AlertDataObject),
}

/// BIST test modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum BistState {
    CarrierMode,
    TestData,
}

/// Policy engine states.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum State {
    Source(SourceState),
    Sink(SinkState),
    DataRoleSwap(DataRoleSwapState),
    PowerRoleSwap(PowerRoleSwapState),
    VconnSwap(VconnSwapState),
    Vdm(VdmState),
    Info(InfoState),
    Bist(BistState),
    /// The port gives up, and hands over to Type-C error recovery.
    ErrorRecovery,
}

/// Session flags of the policy engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags(u16);

bitflags! {
    impl Flags: u16 {
        /// An explicit contract is in place.
        const EXPLICIT_CONTRACT = 1 << 0;
        /// The partner communicated over PD during this session.
        const PD_CONNECTED = 1 << 1;
        /// The contract refers to a programmable supply, and must be refreshed periodically.
        const PPS_ENABLED = 1 << 2;
        /// The source answered the last request with `Wait`.
        const SINK_REQUEST_WAIT = 1 << 3;
        /// The last hard reset was signaled by the partner.
        const HARD_RESET_RECEIVED = 1 << 4;
        /// The last soft reset was requested by the partner.
        const SOFT_RESET_RECEIVED = 1 << 5;
        /// This port just became source through a power role swap.
        const SWAP_SOURCE_START = 1 << 6;
    }
}

/// Errors that end the policy engine's run loop.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The port gave up, Type-C error recovery is required.
    #[error("error recovery required")]
    ErrorRecovery,
    /// A protocol error that no state handled.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl From<ProtocolError> for Error {
    fn from(protocol_error: ProtocolError) -> Self {
        Error::Protocol(protocol_error)
    }
}

/// What the engine waited for.
#[derive(Debug)]
enum PeEvent {
    Message(Message),
    /// Commands are pending in the manager.
    Command,
    Timer(TimerId),
}

/// The policy engine of a dual-role port.
#[derive(Debug)]
pub struct PolicyEngine<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> {
    protocol_layer: ProtocolLayer<DRIVER, TIMER>,
    device_policy_manager: DPM,
    manager: Manager,
    timers: Timers<TIMER>,
    caps_counter: Counter,
    hard_reset_counter: Counter,
    discover_identity_counter: Counter,
    swap_hard_reset_counter: Counter,
    power_role: PowerRole,
    data_role: DataRole,
    vconn_source: bool,
    flags: Flags,
    /// The last request of this sink.
    request: Option<PowerSource>,
    state: State,
}

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    /// Create a policy engine for a detached port.
    pub fn new(driver: DRIVER, device_policy_manager: DPM, config: PortConfig) -> Self {
        let header = Header::for_port(PowerRole::Sink, DataRole::Ufp, config.spec_revision);

        Self {
            protocol_layer: ProtocolLayer::new(driver, header),
            device_policy_manager,
            manager: Manager::new(config),
            timers: Timers::new(),
            caps_counter: Counter::new(CounterType::Caps),
            hard_reset_counter: Counter::new(CounterType::HardReset),
            discover_identity_counter: Counter::new(CounterType::DiscoverIdentity),
            swap_hard_reset_counter: Counter::new(CounterType::SwapHardReset),
            power_role: PowerRole::Sink,
            data_role: DataRole::Ufp,
            vconn_source: false,
            flags: Flags::empty(),
            request: None,
            state: State::Sink(SinkState::Startup),
        }
    }

    /// Start a session for a partner that the Type-C layer detected.
    pub async fn attach(&mut self, attach: Attach) {
        info!("Attach as {:?}", attach.power_role);

        self.timers.cancel_all();
        self.power_role = attach.power_role;
        self.data_role = attach.data_role();
        self.vconn_source = attach.vconn_source;
        self.flags = Flags::empty();
        self.request = None;
        self.caps_counter.reset();
        self.hard_reset_counter.reset();
        self.discover_identity_counter.reset();
        self.swap_hard_reset_counter.reset();

        let spec_revision = self.manager.config().spec_revision;
        self.protocol_layer.set_spec_revision(spec_revision);
        self.protocol_layer.set_roles(self.power_role, self.data_role);
        self.protocol_layer.reset();

        let driver = self.protocol_layer.driver();
        driver.set_power_role(attach.power_role).await;
        driver.set_data_role(attach.data_role()).await;
        driver.set_vconn_source(attach.vconn_source).await;

        self.state = self.startup_state();
    }

    /// End the session, because the partner was detached.
    ///
    /// Timers are cancelled before anything else, so that no expiry of this session can reach the next one.
    pub async fn detach(&mut self) {
        self.timers.cancel_all();
        info!("Detach");

        self.protocol_layer.reset();
        self.manager.clear_session();
        self.flags = Flags::empty();
        self.request = None;

        if self.power_role == PowerRole::Source {
            self.device_policy_manager.source_supply(SupplyLevel::Off).await;
        }
        if self.vconn_source {
            self.vconn_source = false;
            self.protocol_layer.driver().set_vconn_source(false).await;
        }

        self.state = self.startup_state();
        self.device_policy_manager.notify(Notification::Detached).await;
    }

    /// The current state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The current power role.
    pub fn power_role(&self) -> PowerRole {
        self.power_role
    }

    /// The current data role.
    pub fn data_role(&self) -> DataRole {
        self.data_role
    }

    /// Whether this port sources VCONN.
    pub fn vconn_source(&self) -> bool {
        self.vconn_source
    }

    /// Session flags.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The policy manager.
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// The device policy manager.
    pub fn device_policy_manager(&mut self) -> &mut DPM {
        &mut self.device_policy_manager
    }

    /// The protocol layer.
    pub fn protocol_layer(&mut self) -> &mut ProtocolLayer<DRIVER, TIMER> {
        &mut self.protocol_layer
    }

    /// Run a single step in the policy engine state machine.
    pub async fn run_step(&mut self) -> Result<(), Error> {
        let state = self.state.clone();
        let result = self.update_state(&state).await;

        let new_state = match result {
            Ok(new_state) => new_state,
            Err(Error::ErrorRecovery) => return Err(Error::ErrorRecovery),
            Err(Error::Protocol(protocol_error)) => match (&state, protocol_error) {
                // Handle when hard reset is signaled by the driver itself.
                (_, ProtocolError::RxError(RxError::HardReset) | ProtocolError::TxError(TxError::HardReset)) => {
                    self.protocol_layer.reset();
                    self.flags.insert(Flags::HARD_RESET_RECEIVED);
                    self.transition_to_default_state()
                }

                // Handle when soft reset is requested by the partner.
                (_, ProtocolError::RxError(RxError::SoftReset)) => {
                    self.flags.insert(Flags::SOFT_RESET_RECEIVED);
                    self.soft_reset_state()
                }

                // A failed soft reset escalates.
                (
                    State::Source(SourceState::SoftReset | SourceState::SendSoftReset)
                    | State::Sink(SinkState::SoftReset | SinkState::SendSoftReset),
                    ProtocolError::TransmitRetriesExceeded(_),
                ) => self.hard_reset_state(),

                // Any error during a power transition.
                (
                    State::Sink(SinkState::TransitionSink(_)) | State::Source(SourceState::TransitionSupply(_)),
                    _,
                ) => self.hard_reset_state(),

                (State::PowerRoleSwap(swap_state), error) if swap_state.in_transition() => {
                    warn!("Protocol error {:?} during power role swap", error);
                    self.swap_failure_state()
                }

                (_, ProtocolError::UnexpectedMessage) => self.send_soft_reset_state(),

                (
                    State::Source(SourceState::Ready) | State::Sink(SinkState::Ready),
                    ProtocolError::RxError(RxError::UnsupportedMessage),
                ) => self.send_not_supported_state(),

                (_, ProtocolError::TransmitRetriesExceeded(_)) => self.send_soft_reset_state(),

                // The partner's message takes precedence, and is received next.
                (_, ProtocolError::TxError(TxError::Discarded)) => {
                    if self.flags.contains(Flags::EXPLICIT_CONTRACT) {
                        self.ready_state()
                    } else {
                        self.send_soft_reset_state()
                    }
                }

                (_, error) => {
                    error!("Protocol error {:?} in state {:?}", error, state);
                    state.clone()
                }
            },
        };

        self.set_state(new_state);
        Ok(())
    }

    /// Run the state machine continuously.
    ///
    /// The loop is only broken when error recovery is required.
    pub async fn run(&mut self) -> Result<(), Error> {
        loop {
            self.run_step().await?;
        }
    }

    fn set_state(&mut self, state: State) {
        if state != self.state {
            trace!("{:?} -> {:?}", self.state, state);
            self.timers.cancel_all();
            self.state = state;
        }
    }

    async fn update_state(&mut self, state: &State) -> Result<State, Error> {
        match state {
            State::Source(state) => self.update_source_state(state).await,
            State::Sink(state) => self.update_sink_state(state).await,
            State::DataRoleSwap(state) => self.update_data_role_swap_state(*state).await,
            State::PowerRoleSwap(state) => self.update_power_role_swap_state(*state).await,
            State::VconnSwap(state) => self.update_vconn_swap_state(*state).await,
            State::Vdm(state) => self.update_vdm_state(*state).await,
            State::Info(state) => self.update_info_state(state).await,
            State::Bist(state) => self.update_bist_state(*state).await,
            State::ErrorRecovery => {
                warn!("Error recovery");
                self.device_policy_manager.notify(Notification::ErrorRecovery).await;
                Err(Error::ErrorRecovery)
            }
        }
    }

    fn startup_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::Startup),
            PowerRole::Sink => State::Sink(SinkState::Startup),
        }
    }

    fn ready_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::Ready),
            PowerRole::Sink => State::Sink(SinkState::Ready),
        }
    }

    fn hard_reset_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::HardReset),
            PowerRole::Sink => State::Sink(SinkState::HardReset),
        }
    }

    fn transition_to_default_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::TransitionToDefault),
            PowerRole::Sink => State::Sink(SinkState::TransitionToDefault),
        }
    }

    fn soft_reset_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::SoftReset),
            PowerRole::Sink => State::Sink(SinkState::SoftReset),
        }
    }

    fn send_soft_reset_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::SendSoftReset),
            PowerRole::Sink => State::Sink(SinkState::SendSoftReset),
        }
    }

    fn send_not_supported_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::SendNotSupported),
            PowerRole::Sink => State::Sink(SinkState::SendNotSupported),
        }
    }

    fn not_supported_received_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::Source(SourceState::NotSupportedReceived),
            PowerRole::Sink => State::Sink(SinkState::NotSupportedReceived),
        }
    }

    /// A failed power role swap ends in a hard reset, or in error recovery once swaps failed too often.
    fn swap_failure_state(&mut self) -> State {
        if self.swap_hard_reset_counter.increment_and_check() {
            State::ErrorRecovery
        } else {
            self.hard_reset_state()
        }
    }

    fn in_ready(&self) -> bool {
        matches!(self.state, State::Source(SourceState::Ready) | State::Sink(SinkState::Ready))
    }

    fn is_pd3(&self) -> bool {
        self.protocol_layer.spec_revision().has_pd3_messages()
    }

    /// Wait for a message, a command or a timer expiry.
    ///
    /// Commands are only reported if `accept_commands` is set. Otherwise, device events are still
    /// stored in the manager, and serviced in a later `Ready` pass.
    ///
    /// Outside of `Ready`, swap requests of the partner are rejected right away, and unsupported or
    /// malformed messages are dropped.
    async fn wait_event(&mut self, accept_commands: bool) -> Result<PeEvent, Error> {
        let ready = self.in_ready();

        loop {
            if let Some(id) = self.timers.take_expired() {
                trace!("Timer {:?} expired", id);
                return Ok(PeEvent::Timer(id));
            }

            if accept_commands && !self.manager.pending().is_empty() {
                return Ok(PeEvent::Command);
            }

            let timers_fut = self.timers.wait();
            let receive_fut = self.protocol_layer.receive_message();
            let event_fut = self.device_policy_manager.get_event();

            match select3(receive_fut, event_fut, timers_fut).await {
                // A message was received.
                Either3::First(Ok(message)) => {
                    let swap_request = matches!(
                        message.message_type(),
                        MessageType::Control(
                            ControlMessageType::PrSwap | ControlMessageType::DrSwap | ControlMessageType::VconnSwap
                        )
                    );

                    if swap_request && !ready {
                        debug!("Reject {:?} during an atomic sequence", message.message_type());
                        self.protocol_layer
                            .transmit_control_message(ControlMessageType::Reject)
                            .await?;
                        continue;
                    }

                    return Ok(PeEvent::Message(message));
                }
                Either3::First(Err(ProtocolError::RxError(RxError::UnsupportedMessage | RxError::ParseError(_))))
                    if !ready =>
                {
                    warn!("Dropping unsupported message");
                }
                Either3::First(Err(error)) => return Err(error.into()),
                // The device policy manager posted an event.
                Either3::Second(event) => self.manager.post(event),
                // A timer deadline passed.
                Either3::Third(()) => self.timers.update(),
            }
        }
    }

    /// Start a timer, and wait for the next message until it expires.
    ///
    /// Returns `None` on expiry.
    async fn wait_message(&mut self, timer: TimerId) -> Result<Option<Message>, Error> {
        self.timers.start(timer);

        loop {
            match self.wait_event(false).await? {
                PeEvent::Message(message) => return Ok(Some(message)),
                PeEvent::Timer(id) if id == timer => return Ok(None),
                _ => (),
            }
        }
    }

    /// Start a timer, and wait for its expiry. Messages that arrive meanwhile are dropped.
    async fn wait_timer(&mut self, timer: TimerId) -> Result<(), Error> {
        self.timers.start(timer);

        loop {
            match self.wait_event(false).await? {
                PeEvent::Timer(id) if id == timer => return Ok(()),
                PeEvent::Message(message) => {
                    debug!("Dropping {:?} while waiting for {:?}", message.message_type(), timer)
                }
                _ => (),
            }
        }
    }

    async fn notify(&mut self, notification: Notification) {
        self.device_policy_manager.notify(notification).await;
    }

    async fn classify(&mut self) {
        let partner_sink = self.power_role == PowerRole::Source;
        if let Some(device) = self.manager.classify(partner_sink) {
            self.notify(Notification::Attached(device)).await;
        }
    }

    /// The `Ready` state that both power roles share.
    async fn ready(&mut self) -> Result<State, Error> {
        if self.flags.contains(Flags::EXPLICIT_CONTRACT) {
            self.manager.after_contract(self.power_role, self.data_role);
        }
        self.classify().await;

        if let Some(command) = self.manager.next_command() {
            return self.ready_command(command).await;
        }

        if self.power_role == PowerRole::Sink {
            if self.flags.contains(Flags::SINK_REQUEST_WAIT) {
                self.timers.start_if_idle(TimerId::SinkRequest);
            }
            if self.flags.contains(Flags::PPS_ENABLED) {
                self.timers.start_if_idle(TimerId::SinkPpsPeriodic);
            }
        }

        match self.wait_event(true).await? {
            PeEvent::Command => Ok(self.ready_state()),
            PeEvent::Timer(TimerId::SinkRequest | TimerId::SinkPpsPeriodic) => {
                self.flags.remove(Flags::SINK_REQUEST_WAIT);
                Ok(match self.request {
                    Some(request) => State::Sink(SinkState::SelectCapability(request)),
                    None => State::Sink(SinkState::WaitForCapabilities),
                })
            }
            PeEvent::Timer(_) => Ok(self.ready_state()),
            PeEvent::Message(message) => self.handle_ready_message(message).await,
        }
    }

    /// Service a command of the device in `Ready`.
    async fn ready_command(&mut self, command: Command) -> Result<State, Error> {
        let source = self.power_role == PowerRole::Source;
        let mode = match command {
            Command::VDM_ENTER_MODE => self.manager.take_mode(),
            _ => None,
        };

        let info_request = match command {
            Command::GET_SOURCE_CAP_EXTENDED => Some(InfoRequest::SourceCapabilitiesExtended),
            Command::GET_STATUS => Some(InfoRequest::Status),
            Command::GET_PPS_STATUS => Some(InfoRequest::PpsStatus),
            Command::GET_BATTERY_CAP => Some(InfoRequest::BatteryCapabilities(self.manager.args().battery)),
            Command::GET_BATTERY_STATUS => Some(InfoRequest::BatteryStatus(self.manager.args().battery)),
            Command::GET_MANUFACTURER_INFO => {
                let (target, reference) = self.manager.args().manufacturer_info;
                Some(InfoRequest::ManufacturerInfo { target, reference })
            }
            Command::GET_COUNTRY_CODES => Some(InfoRequest::CountryCodes),
            Command::GET_COUNTRY_INFO => Some(InfoRequest::CountryInfo(self.manager.args().country_code)),
            Command::SECURITY_REQUEST => Some(InfoRequest::Security(self.manager.args().security.clone())),
            Command::FIRMWARE_UPDATE_REQUEST => {
                Some(InfoRequest::FirmwareUpdate(self.manager.args().firmware_update.clone()))
            }
            _ => None,
        };

        if let Some(request) = info_request {
            if !self.is_pd3() {
                debug!("Partner does not support {:?}", request);
                self.notify(Notification::NotSupported).await;
                return Ok(self.ready_state());
            }
            return Ok(State::Info(InfoState::Request(request)));
        }

        Ok(match command {
            Command::HARD_RESET => self.hard_reset_state(),
            Command::SOFT_RESET => self.send_soft_reset_state(),
            Command::PR_SWAP => State::PowerRoleSwap(PowerRoleSwapState::Send),
            Command::DR_SWAP if self.manager.modal_operation() => {
                warn!("No data role swap in modal operation");
                self.ready_state()
            }
            Command::DR_SWAP => State::DataRoleSwap(DataRoleSwapState::SendSwap),
            Command::VCONN_SWAP => State::VconnSwap(VconnSwapState::Send),
            Command::NEW_POWER_REQUEST if source => State::Source(SourceState::GiveSourceCap),
            Command::NEW_POWER_REQUEST => match self.manager.partner_source_capabilities() {
                Some(capabilities) => State::Sink(SinkState::EvaluateCapability(capabilities.clone())),
                None => State::Sink(SinkState::GetSourceCap),
            },
            Command::GET_SOURCE_CAP if !source => State::Sink(SinkState::GetSourceCap),
            Command::GET_SINK_CAP if source => State::Source(SourceState::GetSinkCap),
            Command::SEND_ALERT => State::Info(InfoState::SendAlert(self.manager.args().alert)),
            Command::VDM_DISCOVER_IDENTITY => {
                self.discover_identity_counter.reset();
                State::Vdm(VdmState::DiscoverIdentity)
            }
            Command::VDM_DISCOVER_SVIDS => State::Vdm(VdmState::DiscoverSvids),
            Command::VDM_DISCOVER_MODES => {
                let svid = self
                    .manager
                    .svid_to_discover()
                    .or_else(|| self.manager.svids().first().copied());
                match svid {
                    Some(svid) => State::Vdm(VdmState::DiscoverModes(svid)),
                    None => self.ready_state(),
                }
            }
            Command::VDM_ENTER_MODE if self.data_role == DataRole::Dfp => {
                match mode.or_else(|| self.manager.displayport_mode()) {
                    Some((svid, object_position)) => State::Vdm(VdmState::EnterMode(svid, object_position)),
                    None => self.ready_state(),
                }
            }
            Command::VDM_STATUS_UPDATE => State::Vdm(VdmState::DisplayPortStatus),
            Command::VDM_CONFIGURE if self.data_role == DataRole::Dfp => {
                State::Vdm(VdmState::DisplayPortConfigure)
            }
            Command::VDM_EXIT_MODE => State::Vdm(VdmState::ExitMode),
            _ => {
                warn!("Command {:?} is not applicable as {:?}", command, self.power_role);
                self.ready_state()
            }
        })
    }

    /// Dispatch a message that arrived in `Ready`, or interrupted an interruptible sequence.
    async fn handle_ready_message(&mut self, message: Message) -> Result<State, Error> {
        let source = self.power_role == PowerRole::Source;
        trace!("Ready: {:?}", message.message_type());

        let state = match message.message_type() {
            MessageType::Control(control) => match control {
                ControlMessageType::GetSourceCap if source => State::Source(SourceState::GiveSourceCap),
                ControlMessageType::GetSourceCap if self.manager.config().source_capabilities.dual_role_power() => {
                    State::Sink(SinkState::GiveSourceCap)
                }
                ControlMessageType::GetSinkCap if !source => State::Sink(SinkState::GiveSinkCap),
                ControlMessageType::GetSinkCap if self.manager.config().source_capabilities.dual_role_power() => {
                    State::Source(SourceState::GiveSinkCap)
                }
                ControlMessageType::DrSwap => State::DataRoleSwap(DataRoleSwapState::EvaluateSwap),
                ControlMessageType::PrSwap => State::PowerRoleSwap(PowerRoleSwapState::Evaluate),
                ControlMessageType::VconnSwap => State::VconnSwap(VconnSwapState::Evaluate),
                ControlMessageType::Ping => self.ready_state(),
                ControlMessageType::GotoMin if !source => match self.request {
                    Some(request) if self.manager.config().sink.give_back => {
                        State::Sink(SinkState::TransitionSink(request))
                    }
                    _ => self.send_not_supported_state(),
                },
                ControlMessageType::NotSupported => self.not_supported_received_state(),
                ControlMessageType::GetSourceCapExtended => {
                    State::Info(InfoState::Respond(InfoRequest::SourceCapabilitiesExtended))
                }
                ControlMessageType::GetStatus => State::Info(InfoState::Respond(InfoRequest::Status)),
                ControlMessageType::GetPpsStatus => State::Info(InfoState::Respond(InfoRequest::PpsStatus)),
                ControlMessageType::GetCountryCodes => State::Info(InfoState::Respond(InfoRequest::CountryCodes)),
                ControlMessageType::Accept
                | ControlMessageType::Reject
                | ControlMessageType::Wait
                | ControlMessageType::PsRdy => {
                    return Err(ProtocolError::UnexpectedMessage.into());
                }
                _ => self.send_not_supported_state(),
            },
            MessageType::Data(_) => match message.data() {
                Some(Data::SourceCapabilities(capabilities)) if !source => {
                    State::Sink(SinkState::EvaluateCapability(capabilities.clone()))
                }
                Some(Data::Request(raw)) if source => State::Source(SourceState::NegotiateCapability(*raw)),
                Some(Data::SourceCapabilities(_) | Data::Request(_)) => {
                    return Err(ProtocolError::UnexpectedMessage.into());
                }
                Some(Data::SinkCapabilities(capabilities)) => {
                    self.manager.sink_capabilities_received(capabilities.clone());
                    self.ready_state()
                }
                Some(Data::Bist(bist)) => match bist.mode() {
                    BistMode::CarrierMode2 => State::Bist(BistState::CarrierMode),
                    BistMode::TestData => State::Bist(BistState::TestData),
                    mode => {
                        debug!("Ignoring BIST mode {:?}", mode);
                        self.ready_state()
                    }
                },
                Some(Data::Alert(alert)) => State::Info(InfoState::AlertReceived(*alert)),
                Some(Data::GetCountryInfo(country)) => {
                    State::Info(InfoState::Respond(InfoRequest::CountryInfo(country.country_code())))
                }
                Some(Data::BatteryStatus(status)) => {
                    self.notify(Notification::BatteryStatusReceived(*status)).await;
                    self.ready_state()
                }
                Some(Data::VendorDefined((header, objects))) => match header.structured() {
                    Some(header)
                        if header.command_type() == VdmCommandType::InitiatorReq
                            && header.command() == VdmCommand::Attention =>
                    {
                        self.attention(header, objects.first().copied()).await;
                        self.ready_state()
                    }
                    Some(header) if header.command_type() == VdmCommandType::InitiatorReq => {
                        State::Vdm(VdmState::Respond(header))
                    }
                    Some(header) => {
                        debug!("Unsolicited VDM response {:?}", header);
                        self.ready_state()
                    }
                    None if self.is_pd3() => self.send_not_supported_state(),
                    None => self.ready_state(),
                },
                Some(Data::Unknown(_)) | None => self.send_not_supported_state(),
            },
            MessageType::Extended(extended_type) => {
                let data = message.extended().map(|payload| payload.data.clone()).unwrap_or_default();
                let byte = |index: usize| data.get(index).copied().unwrap_or_default();

                match extended_type {
                    ExtendedMessageType::GetBatteryCap => {
                        State::Info(InfoState::Respond(InfoRequest::BatteryCapabilities(byte(0))))
                    }
                    ExtendedMessageType::GetBatteryStatus => {
                        State::Info(InfoState::Respond(InfoRequest::BatteryStatus(byte(0))))
                    }
                    ExtendedMessageType::GetManufacturerInfo => {
                        State::Info(InfoState::Respond(InfoRequest::ManufacturerInfo {
                            target: byte(0),
                            reference: byte(1),
                        }))
                    }
                    ExtendedMessageType::SecurityRequest => State::Info(InfoState::Respond(InfoRequest::Security(data))),
                    ExtendedMessageType::FirmwareUpdateRequest => {
                        State::Info(InfoState::Respond(InfoRequest::FirmwareUpdate(data)))
                    }
                    ExtendedMessageType::SourceCapabilitiesExtended
                    | ExtendedMessageType::Status
                    | ExtendedMessageType::BatteryCapabilities
                    | ExtendedMessageType::ManufacturerInfo
                    | ExtendedMessageType::SecurityResponse
                    | ExtendedMessageType::FirmwareUpdateResponse
                    | ExtendedMessageType::PpsStatus
                    | ExtendedMessageType::CountryInfo
                    | ExtendedMessageType::CountryCodes
                    | ExtendedMessageType::SinkCapabilitiesExtended => {
                        self.notify(Notification::InfoReceived {
                            message_type: extended_type,
                            data,
                        })
                        .await;
                        self.ready_state()
                    }
                    _ => self.send_not_supported_state(),
                }
            }
        };

        Ok(state)
    }

    /// Handle an Attention VDM.
    async fn attention(&mut self, header: VdmHeaderStructured, vdo: Option<u32>) {
        let svid = header.standard_or_vid();
        debug!("Attention from SVID {:#06x}", svid);

        if svid == DISPLAYPORT_SID {
            if let Some(vdo) = vdo {
                let status = DisplayPortStatus(vdo);
                self.manager.set_displayport_status(status);
                self.notify(Notification::DisplayPortStatus(status)).await;
            }
        }

        self.notify(Notification::Attention { svid, vdo }).await;
    }

    /// Send Not_Supported, or Reject to a PD 2.0 partner.
    async fn send_not_supported(&mut self) -> Result<State, Error> {
        let message_type = if self.is_pd3() {
            ControlMessageType::NotSupported
        } else {
            ControlMessageType::Reject
        };
        self.protocol_layer.transmit_control_message(message_type).await?;

        Ok(self.ready_state())
    }
}
