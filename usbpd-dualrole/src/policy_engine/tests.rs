//! Tests for the policy engine.
use heapless::Vec;
use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;
use usbpd_dualrole_traits::{Attach, Sop};

use super::*;
use crate::dummy::{DummyDevicePolicyManager, DummyDriver, DummyTimer};
use crate::manager::Event;
use crate::manager::accessory::AttachedDevice;
use crate::protocol_layer::message::data::bist::BistDataObject;
use crate::protocol_layer::message::data::request::FixedVariableSupply;
use crate::protocol_layer::message::data::source_capabilities::{FixedSupply, PowerDataObject};
use crate::protocol_layer::message::data::status::BatteryStatusDataObject;
use crate::protocol_layer::message::data::vendor_defined::{
    CertStatVdo, DP_PIN_ASSIGNMENT_C, DP_PIN_ASSIGNMENT_D, DisplayPortCapabilities, DisplayPortConfigure, IdHeaderVdo,
    Identity, PD_SID, ProductVdo, VdmHeader,
};
use crate::protocol_layer::message::header::{DataMessageType, SpecificationRevision};

type TestEngine = PolicyEngine<DummyDriver, DummyTimer, DummyDevicePolicyManager>;

const MAX_STEPS: usize = 200;

fn engine(config: PortConfig) -> TestEngine {
    let mut policy_engine = PolicyEngine::new(DummyDriver::new(), DummyDevicePolicyManager::default(), config);
    policy_engine.protocol_layer.driver().set_auto_ack(true);
    policy_engine
}

/// The port partner, which builds messages with its own message IDs.
struct Partner {
    template: Header,
    message_id: u8,
}

impl Partner {
    fn source() -> Self {
        Self {
            template: Header::for_port(PowerRole::Source, DataRole::Dfp, SpecificationRevision::R3_X),
            message_id: 0,
        }
    }

    fn sink() -> Self {
        Self {
            template: Header::for_port(PowerRole::Sink, DataRole::Ufp, SpecificationRevision::R3_X),
            message_id: 0,
        }
    }

    fn next_message_id(&mut self) -> u8 {
        let message_id = self.message_id;
        self.message_id = (self.message_id + 1) % 8;
        message_id
    }

    fn control(&mut self, message_type: ControlMessageType) -> Message {
        Message::new(self.template.control_message(self.next_message_id(), message_type))
    }

    fn data(&mut self, data: Data) -> Message {
        let header = self
            .template
            .data_message(self.next_message_id(), data.message_type(), data.num_objects());
        Message::new_with_data(header, data)
    }
}

fn inject(policy_engine: &mut TestEngine, message: &Message) {
    policy_engine.protocol_layer.driver().inject_message(message);
}

/// A single fixed 5 V supply at 3 A.
fn five_volt_capabilities() -> SourceCapabilities {
    let mut pdos = Vec::new();
    pdos.push(PowerDataObject::FixedSupply(FixedSupply::new(100, 300)))
        .unwrap();
    SourceCapabilities::new(pdos)
}

async fn run_until(policy_engine: &mut TestEngine, state: State) {
    for _ in 0..MAX_STEPS {
        if *policy_engine.state() == state {
            return;
        }
        policy_engine.run_step().await.unwrap();
    }
    panic!("{:?} was not reached, stuck in {:?}", state, policy_engine.state());
}

async fn sink_in_ready(config: PortConfig) -> (TestEngine, Partner) {
    let mut policy_engine = engine(config);
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Sink,
            vconn_source: false,
        })
        .await;

    let mut partner = Partner::source();
    let capabilities = partner.data(Data::SourceCapabilities(five_volt_capabilities()));
    let accept = partner.control(ControlMessageType::Accept);
    let ps_rdy = partner.control(ControlMessageType::PsRdy);
    inject(&mut policy_engine, &capabilities);
    inject(&mut policy_engine, &accept);
    inject(&mut policy_engine, &ps_rdy);

    run_until(&mut policy_engine, State::Sink(SinkState::Ready)).await;
    policy_engine.protocol_layer.driver().clear_transmitted();
    (policy_engine, partner)
}

async fn source_waiting_for_request() -> TestEngine {
    let mut policy_engine = engine(PortConfig::default());
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Source,
            vconn_source: true,
        })
        .await;

    run_until(&mut policy_engine, State::Source(SourceState::WaitForRequest)).await;
    policy_engine
}

async fn source_in_ready(config: PortConfig) -> (TestEngine, Partner) {
    let mut policy_engine = engine(config);
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Source,
            vconn_source: true,
        })
        .await;
    run_until(&mut policy_engine, State::Source(SourceState::WaitForRequest)).await;

    let mut partner = Partner::sink();
    let request = partner.data(fixed_request(1, 100));
    inject(&mut policy_engine, &request);

    run_until(&mut policy_engine, State::Source(SourceState::Ready)).await;
    policy_engine.protocol_layer.driver().clear_transmitted();
    (policy_engine, partner)
}

/// An ACK from the partner to one of our structured VDM requests.
fn vdm_ack(partner: &mut Partner, svid: u16, command: VdmCommand, object_position: u8, objects: &[u32]) -> Message {
    let header = VdmHeaderStructured::request(svid, command, object_position).response(VdmCommandType::ResponderAck);
    partner.data(Data::VendorDefined((
        VdmHeader::Structured(header),
        Vec::from_slice(objects).unwrap(),
    )))
}

fn fixed_request(position: u8, current_10ma: u16) -> Data {
    let rdo = FixedVariableSupply::for_position(position, current_10ma, current_10ma);
    Data::Request(RawDataObject(rdo.0))
}

fn message_types(policy_engine: &mut TestEngine) -> std::vec::Vec<MessageType> {
    policy_engine
        .protocol_layer
        .driver()
        .transmitted_messages()
        .iter()
        .map(Message::message_type)
        .collect()
}

#[tokio::test]
async fn sink_negotiates_contract() {
    let mut policy_engine = engine(PortConfig::default());
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Sink,
            vconn_source: false,
        })
        .await;

    let mut partner = Partner::source();
    let capabilities = partner.data(Data::SourceCapabilities(five_volt_capabilities()));
    let accept = partner.control(ControlMessageType::Accept);
    let ps_rdy = partner.control(ControlMessageType::PsRdy);
    inject(&mut policy_engine, &capabilities);
    inject(&mut policy_engine, &accept);
    inject(&mut policy_engine, &ps_rdy);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Discovery));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::WaitForCapabilities));

    policy_engine.run_step().await.unwrap();
    assert!(matches!(
        policy_engine.state(),
        State::Sink(SinkState::EvaluateCapability(_))
    ));

    policy_engine.run_step().await.unwrap();
    assert!(matches!(policy_engine.state(), State::Sink(SinkState::SelectCapability(_))));

    policy_engine.run_step().await.unwrap();
    assert!(matches!(policy_engine.state(), State::Sink(SinkState::TransitionSink(_))));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));

    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Data(DataMessageType::Request)]
    );

    let contract = *policy_engine.manager().contract().unwrap();
    assert_eq!(contract.object_position, 1);
    assert_eq!(contract.voltage.get::<millivolt>(), 5000);
    assert_eq!(contract.current.get::<milliampere>(), 2000);
    assert!(!contract.pps);

    assert!(policy_engine.flags().contains(Flags::EXPLICIT_CONTRACT));
    let device_policy_manager = policy_engine.device_policy_manager();
    assert_eq!(device_policy_manager.contracts, [contract]);
    assert!(device_policy_manager.notified(&Notification::ContractEstablished(contract)));
}

#[tokio::test]
async fn sink_without_capabilities_ends_in_error_recovery() {
    let mut policy_engine = engine(PortConfig::default());
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Sink,
            vconn_source: false,
        })
        .await;

    run_until(&mut policy_engine, State::Sink(SinkState::WaitForCapabilities)).await;

    // The Type-C sink wait time elapses first, then the sink wait time.
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::HardReset));
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::TypeCFallback)
    );

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::TransitionToDefault));
    assert_eq!(policy_engine.hard_reset_counter.value(), 1);
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 1);

    let mut result = Ok(());
    for _ in 0..MAX_STEPS {
        result = policy_engine.run_step().await;
        if result.is_err() {
            break;
        }
    }

    assert_eq!(result, Err(Error::ErrorRecovery));
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 4);
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::ErrorRecovery)
    );
}

#[tokio::test]
async fn source_gives_up_without_sink() {
    let mut policy_engine = engine(PortConfig::default());
    policy_engine.protocol_layer.driver().set_auto_ack(false);
    policy_engine
        .attach(Attach {
            power_role: PowerRole::Source,
            vconn_source: true,
        })
        .await;

    run_until(&mut policy_engine, State::Source(SourceState::Disabled)).await;

    // Sixteen advertisements, each with three retries.
    let advertisements = message_types(&mut policy_engine)
        .into_iter()
        .filter(|message_type| *message_type == MessageType::Data(DataMessageType::SourceCapabilities))
        .count();
    assert_eq!(advertisements, 64);

    let device_policy_manager = policy_engine.device_policy_manager();
    assert!(device_policy_manager.notified(&Notification::SourceDisabled));
    assert_eq!(device_policy_manager.supply, [SupplyLevel::VSafe5V]);
}

#[tokio::test]
async fn source_negotiates_contract() {
    let mut policy_engine = source_waiting_for_request().await;
    let mut partner = Partner::sink();

    let request = partner.data(fixed_request(1, 100));
    inject(&mut policy_engine, &request);

    run_until(&mut policy_engine, State::Source(SourceState::Ready)).await;

    assert_eq!(
        message_types(&mut policy_engine),
        [
            MessageType::Data(DataMessageType::SourceCapabilities),
            MessageType::Control(ControlMessageType::Accept),
            MessageType::Control(ControlMessageType::PsRdy),
        ]
    );

    let contract = *policy_engine.manager().contract().unwrap();
    assert_eq!(contract.power_role, PowerRole::Source);
    assert_eq!(contract.voltage.get::<millivolt>(), 5000);
    assert_eq!(contract.current.get::<milliampere>(), 1000);

    let device_policy_manager = policy_engine.device_policy_manager();
    assert_eq!(
        device_policy_manager.supply.last(),
        Some(&SupplyLevel::Contract(contract))
    );
    assert!(device_policy_manager.notified(&Notification::ContractEstablished(contract)));
}

#[tokio::test]
async fn source_rejects_excessive_request() {
    let mut policy_engine = source_waiting_for_request().await;
    let mut partner = Partner::sink();

    // 3 A from a 1.5 A supply.
    let request = partner.data(fixed_request(1, 300));
    inject(&mut policy_engine, &request);

    run_until(&mut policy_engine, State::Source(SourceState::WaitNewCapabilities)).await;

    let transmitted = message_types(&mut policy_engine);
    assert_eq!(
        transmitted.last(),
        Some(&MessageType::Control(ControlMessageType::Reject))
    );
    assert!(policy_engine.manager().contract().is_none());
}

#[tokio::test]
async fn swap_requests_are_rejected_during_a_swap() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine
        .device_policy_manager()
        .events
        .push_back(Event::Command(Command::DR_SWAP));

    // The event is stored, and serviced in the next pass.
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::DataRoleSwap(DataRoleSwapState::SendSwap)
    );

    let pr_swap = partner.control(ControlMessageType::PrSwap);
    let accept = partner.control(ControlMessageType::Accept);
    inject(&mut policy_engine, &pr_swap);
    inject(&mut policy_engine, &accept);

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::DataRoleSwap(DataRoleSwapState::ChangeRole)
    );
    assert_eq!(
        message_types(&mut policy_engine),
        [
            MessageType::Control(ControlMessageType::DrSwap),
            MessageType::Control(ControlMessageType::Reject),
        ]
    );

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(policy_engine.data_role(), DataRole::Dfp);
    assert_eq!(policy_engine.power_role(), PowerRole::Sink);
    assert_eq!(
        policy_engine.protocol_layer.driver().data_roles().last(),
        Some(&DataRole::Dfp)
    );
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::DataRoleChanged(DataRole::Dfp))
    );
}

#[tokio::test]
async fn partner_data_role_swap_is_accepted() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    let dr_swap = partner.control(ControlMessageType::DrSwap);
    inject(&mut policy_engine, &dr_swap);

    run_until(&mut policy_engine, State::DataRoleSwap(DataRoleSwapState::ChangeRole)).await;
    run_until(&mut policy_engine, State::Sink(SinkState::Ready)).await;

    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::Accept)]
    );
    assert_eq!(policy_engine.data_role(), DataRole::Dfp);
}

#[tokio::test]
async fn partner_data_role_swap_is_rejected_by_policy() {
    let mut config = PortConfig::default();
    config.swap.accept_dr_swap = false;
    let (mut policy_engine, mut partner) = sink_in_ready(config).await;

    let dr_swap = partner.control(ControlMessageType::DrSwap);
    inject(&mut policy_engine, &dr_swap);

    policy_engine.run_step().await.unwrap();
    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::DataRoleSwap(DataRoleSwapState::RejectSwap)
    );

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::Reject)]
    );
    assert_eq!(policy_engine.data_role(), DataRole::Ufp);
}

#[tokio::test]
async fn sink_becomes_source_through_power_role_swap() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    let pr_swap = partner.control(ControlMessageType::PrSwap);
    inject(&mut policy_engine, &pr_swap);

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::PowerRoleSwap(PowerRoleSwapState::Evaluate)
    );

    let ps_rdy = partner.control(ControlMessageType::PsRdy);
    inject(&mut policy_engine, &ps_rdy);

    run_until(&mut policy_engine, State::Source(SourceState::Startup)).await;

    assert_eq!(
        message_types(&mut policy_engine),
        [
            MessageType::Control(ControlMessageType::Accept),
            MessageType::Control(ControlMessageType::PsRdy),
        ]
    );
    assert_eq!(policy_engine.power_role(), PowerRole::Source);
    assert!(policy_engine.flags().contains(Flags::SWAP_SOURCE_START));
    assert!(!policy_engine.flags().contains(Flags::EXPLICIT_CONTRACT));
    assert!(policy_engine.manager().contract().is_none());
    assert_eq!(
        policy_engine.protocol_layer.driver().power_roles().last(),
        Some(&PowerRole::Source)
    );

    let device_policy_manager = policy_engine.device_policy_manager();
    assert_eq!(device_policy_manager.supply, [SupplyLevel::VSafe5V]);
    assert!(device_policy_manager.notified(&Notification::PowerRoleChanged(PowerRole::Source)));
}

#[tokio::test]
async fn power_role_swap_without_source_off_resets() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    let pr_swap = partner.control(ControlMessageType::PrSwap);
    inject(&mut policy_engine, &pr_swap);

    run_until(
        &mut policy_engine,
        State::PowerRoleSwap(PowerRoleSwapState::SnkTransitionToOff),
    )
    .await;

    // The initial source never reports PS_RDY.
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::HardReset));
    assert_eq!(policy_engine.swap_hard_reset_counter.value(), 1);
}

#[tokio::test]
async fn hard_reset_from_partner_returns_to_default() {
    let (mut policy_engine, _partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine.protocol_layer.driver().inject_hard_reset();

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::TransitionToDefault));
    assert!(policy_engine.flags().contains(Flags::HARD_RESET_RECEIVED));
    assert_eq!(policy_engine.protocol_layer.tx_message_id(Sop::Sop), 0);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Startup));
    assert!(!policy_engine.flags().contains(Flags::EXPLICIT_CONTRACT));
    assert!(policy_engine.manager().contract().is_none());

    // Received hard resets do not count.
    assert_eq!(policy_engine.hard_reset_counter.value(), 0);
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 0);

    let device_policy_manager = policy_engine.device_policy_manager();
    assert_eq!(device_policy_manager.hard_resets, 1);
    assert!(device_policy_manager.notified(&Notification::HardReset));
}

#[tokio::test]
async fn soft_reset_from_partner_is_accepted() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    partner.message_id = 0;
    let soft_reset = partner.control(ControlMessageType::SoftReset);
    inject(&mut policy_engine, &soft_reset);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::SoftReset));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::WaitForCapabilities));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::Accept)]
    );
    assert!(!policy_engine.flags().contains(Flags::SOFT_RESET_RECEIVED));
}

#[tokio::test]
async fn discover_identity_gives_up_after_retries() {
    let (mut policy_engine, _partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine.manager.post_command(Command::VDM_DISCOVER_IDENTITY);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Vdm(VdmState::DiscoverIdentity));

    run_until(&mut policy_engine, State::Sink(SinkState::Ready)).await;

    let requests = message_types(&mut policy_engine)
        .into_iter()
        .filter(|message_type| *message_type == MessageType::Data(DataMessageType::VendorDefined))
        .count();
    assert_eq!(requests, 20);
    assert!(!policy_engine.manager().modal_operation());
    assert!(policy_engine.manager().identity().is_none());
}

#[tokio::test]
async fn discover_identity_request_is_answered() {
    let identity = Identity {
        id_header: IdHeaderVdo::default().with_vid(0x1234),
        cert_stat: CertStatVdo::default(),
        product: ProductVdo::default().with_pid(0x5678),
    };
    let mut config = PortConfig::default();
    config.vdm.identity = Some(identity);
    let (mut policy_engine, mut partner) = sink_in_ready(config).await;

    let request = VdmHeaderStructured::request(PD_SID, VdmCommand::DiscoverIdentity, 0);
    let message = partner.data(Data::VendorDefined((VdmHeader::Structured(request), Vec::new())));
    inject(&mut policy_engine, &message);

    policy_engine.run_step().await.unwrap();
    assert!(matches!(policy_engine.state(), State::Vdm(VdmState::Respond(_))));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));

    let transmitted = policy_engine.protocol_layer.driver().transmitted_messages();
    let [response] = transmitted.as_slice() else {
        panic!("expected a single response, got {:?}", transmitted);
    };
    let Some(Data::VendorDefined((VdmHeader::Structured(header), objects))) = response.data() else {
        panic!("expected a structured VDM");
    };
    assert_eq!(header.command(), VdmCommand::DiscoverIdentity);
    assert_eq!(header.command_type(), VdmCommandType::ResponderAck);
    assert_eq!(objects.as_slice(), identity.to_vdos());
}

#[tokio::test]
async fn status_request_is_answered() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    let get_status = partner.control(ControlMessageType::GetStatus);
    inject(&mut policy_engine, &get_status);

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::Info(InfoState::Respond(InfoRequest::Status))
    );

    // Nothing to report.
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::NotSupported)]
    );

    let status = Vec::from_slice(&[25, 0, 0, 0, 0, 0]).unwrap();
    policy_engine.device_policy_manager().info = Some(status);
    policy_engine.protocol_layer.driver().clear_transmitted();

    let get_status = partner.control(ControlMessageType::GetStatus);
    inject(&mut policy_engine, &get_status);

    policy_engine.run_step().await.unwrap();
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));

    let transmitted = policy_engine.protocol_layer.driver().transmitted_messages();
    let [response] = transmitted.as_slice() else {
        panic!("expected a single response, got {:?}", transmitted);
    };
    assert_eq!(
        response.message_type(),
        MessageType::Extended(ExtendedMessageType::Status)
    );
    assert_eq!(response.extended().unwrap().data.as_slice(), [25, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn bist_carrier_mode_returns_to_ready() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    let bist = partner.data(Data::Bist(BistDataObject::new(BistMode::CarrierMode2)));
    inject(&mut policy_engine, &bist);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Bist(BistState::CarrierMode));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(policy_engine.protocol_layer.driver().bist_carrier(), 1);
}

#[tokio::test]
async fn sink_classifies_charger() {
    let (policy_engine, _partner) = sink_in_ready(PortConfig::default()).await;

    assert_eq!(policy_engine.manager().attached_device(), AttachedDevice::PdCharger);
}

#[tokio::test]
async fn detach_clears_session() {
    let (mut policy_engine, _partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine.detach().await;

    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Startup));
    assert!(policy_engine.flags().is_empty());
    assert!(policy_engine.manager().contract().is_none());
    assert!(policy_engine.manager().partner_source_capabilities().is_none());
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::Detached)
    );
}

#[tokio::test]
async fn partner_vconn_swap_turns_vconn_on() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;
    assert!(!policy_engine.vconn_source());

    let vconn_swap = partner.control(ControlMessageType::VconnSwap);
    inject(&mut policy_engine, &vconn_swap);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::Evaluate));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::Accept));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::TurnOnVconn));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::SendPsRdy));
    assert!(policy_engine.vconn_source());

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [
            MessageType::Control(ControlMessageType::Accept),
            MessageType::Control(ControlMessageType::PsRdy),
        ]
    );
    assert_eq!(policy_engine.protocol_layer.driver().vconn().last(), Some(&true));
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::VconnSourceChanged(true))
    );
}

#[tokio::test]
async fn partner_vconn_swap_is_rejected_by_policy() {
    let mut config = PortConfig::default();
    config.swap.accept_vconn_swap = false;
    let (mut policy_engine, mut partner) = sink_in_ready(config).await;

    let vconn_swap = partner.control(ControlMessageType::VconnSwap);
    inject(&mut policy_engine, &vconn_swap);

    policy_engine.run_step().await.unwrap();
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::Reject));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::Reject)]
    );
    assert!(!policy_engine.vconn_source());
}

#[tokio::test]
async fn vconn_source_hands_vconn_over() {
    let (mut policy_engine, mut partner) = source_in_ready(PortConfig::default()).await;
    assert!(policy_engine.vconn_source());

    policy_engine.manager.post_command(Command::VCONN_SWAP);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::Send));

    let accept = partner.control(ControlMessageType::Accept);
    let ps_rdy = partner.control(ControlMessageType::PsRdy);
    inject(&mut policy_engine, &accept);
    inject(&mut policy_engine, &ps_rdy);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::WaitForVconn));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::TurnOffVconn));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::Ready));
    assert!(!policy_engine.vconn_source());
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::VconnSwap)]
    );
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::VconnSourceChanged(false))
    );
}

#[tokio::test]
async fn vconn_swap_without_partner_vconn_resets() {
    let (mut policy_engine, mut partner) = source_in_ready(PortConfig::default()).await;

    policy_engine.manager.post_command(Command::VCONN_SWAP);
    policy_engine.run_step().await.unwrap();

    let accept = partner.control(ControlMessageType::Accept);
    inject(&mut policy_engine, &accept);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::VconnSwap(VconnSwapState::WaitForVconn));

    // The partner never reports PS_RDY within tVCONNSourceOn.
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::HardReset));
    assert!(policy_engine.vconn_source());
}

#[tokio::test]
async fn battery_status_is_requested() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine
        .device_policy_manager()
        .events
        .push_back(Event::GetBatteryStatus(0));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::Info(InfoState::Request(InfoRequest::BatteryStatus(0)))
    );

    let status = BatteryStatusDataObject::default()
        .with_raw_present_capacity(120)
        .with_battery_present(true);
    let response = partner.data(Data::BatteryStatus(status));
    inject(&mut policy_engine, &response);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Extended(ExtendedMessageType::GetBatteryStatus)]
    );
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::BatteryStatusReceived(status))
    );
}

#[tokio::test]
async fn unsupported_info_request_is_reported() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;

    policy_engine.manager.post_command(Command::GET_STATUS);
    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::Info(InfoState::Request(InfoRequest::Status))
    );

    let not_supported = partner.control(ControlMessageType::NotSupported);
    inject(&mut policy_engine, &not_supported);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert_eq!(
        message_types(&mut policy_engine),
        [MessageType::Control(ControlMessageType::GetStatus)]
    );
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::NotSupported)
    );
}

#[tokio::test]
async fn info_request_needs_revision_3() {
    let mut config = PortConfig::default();
    config.spec_revision = SpecificationRevision::R2_0;
    let (mut policy_engine, _partner) = sink_in_ready(config).await;

    policy_engine.manager.post_command(Command::GET_STATUS);
    policy_engine.run_step().await.unwrap();

    assert_eq!(*policy_engine.state(), State::Sink(SinkState::Ready));
    assert!(message_types(&mut policy_engine).is_empty());
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::NotSupported)
    );
}

#[tokio::test]
async fn displayport_mode_is_entered_configured_and_exited() {
    let mut config = PortConfig::default();
    config.vdm.enter_displayport = true;
    let (mut policy_engine, mut partner) = source_in_ready(config).await;

    let capabilities = DisplayPortCapabilities::default()
        .with_receptacle_indication(true)
        .with_ufp_d_pin_assignments(DP_PIN_ASSIGNMENT_C | DP_PIN_ASSIGNMENT_D)
        .with_port_capability(0b01);
    policy_engine
        .manager
        .modes_received(DISPLAYPORT_SID, &[capabilities.0]);
    policy_engine.manager.post(Event::EnterMode {
        svid: DISPLAYPORT_SID,
        object_position: 1,
    });

    policy_engine.run_step().await.unwrap();
    assert_eq!(
        *policy_engine.state(),
        State::Vdm(VdmState::EnterMode(DISPLAYPORT_SID, 1))
    );
    assert_eq!(policy_engine.manager().args().mode, None);

    let ack = vdm_ack(&mut partner, DISPLAYPORT_SID, VdmCommand::EnterMode, 1, &[]);
    inject(&mut policy_engine, &ack);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Vdm(VdmState::DisplayPortStatus));
    assert_eq!(policy_engine.manager().active_mode(), Some((DISPLAYPORT_SID, 1)));
    assert!(policy_engine.manager().modal_operation());

    let partner_status = DisplayPortStatus::default().with_connected(0b10).with_hpd_state(true);
    let ack = vdm_ack(
        &mut partner,
        DISPLAYPORT_SID,
        VdmCommand::DisplayPortStatus,
        1,
        &[partner_status.0],
    );
    inject(&mut policy_engine, &ack);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Vdm(VdmState::DisplayPortConfigure));

    let ack = vdm_ack(&mut partner, DISPLAYPORT_SID, VdmCommand::DisplayPortConfigure, 1, &[]);
    inject(&mut policy_engine, &ack);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::Ready));

    // Pin assignment C is preferred without multi-function.
    let configuration = DisplayPortConfigure::ufp_d(DP_PIN_ASSIGNMENT_C, false).unwrap();
    assert_eq!(policy_engine.manager().displayport_configured(), Some(configuration));

    policy_engine.manager.post_command(Command::VDM_EXIT_MODE);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Vdm(VdmState::ExitMode));

    let ack = vdm_ack(&mut partner, DISPLAYPORT_SID, VdmCommand::ExitMode, 1, &[]);
    inject(&mut policy_engine, &ack);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::Ready));
    assert_eq!(policy_engine.manager().active_mode(), None);
    assert_eq!(policy_engine.manager().displayport_configured(), None);

    let commands: std::vec::Vec<_> = policy_engine
        .protocol_layer
        .driver()
        .transmitted_messages()
        .iter()
        .filter_map(|message| match message.data() {
            Some(Data::VendorDefined((VdmHeader::Structured(header), _))) => Some(header.command()),
            _ => None,
        })
        .collect();
    assert_eq!(
        commands,
        [
            VdmCommand::EnterMode,
            VdmCommand::DisplayPortStatus,
            VdmCommand::DisplayPortConfigure,
            VdmCommand::ExitMode,
        ]
    );

    let device_policy_manager = policy_engine.device_policy_manager();
    assert!(device_policy_manager.notified(&Notification::ModeEntered {
        svid: DISPLAYPORT_SID,
        object_position: 1,
    }));
    assert!(device_policy_manager.notified(&Notification::DisplayPortStatus(partner_status)));
    assert!(device_policy_manager.notified(&Notification::DisplayPortConfigured(configuration)));
    assert!(device_policy_manager.notified(&Notification::ModeExited { svid: DISPLAYPORT_SID }));
}

#[tokio::test]
async fn source_hard_reset_returns_to_default() {
    let (mut policy_engine, _partner) = source_in_ready(PortConfig::default()).await;
    let contract = *policy_engine.manager().contract().unwrap();

    policy_engine.manager.post_command(Command::HARD_RESET);
    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::HardReset));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::TransitionToDefault));
    assert_eq!(policy_engine.hard_reset_counter.value(), 1);
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 1);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Source(SourceState::Startup));
    assert!(policy_engine.manager().contract().is_none());
    assert!(!policy_engine.flags().contains(Flags::EXPLICIT_CONTRACT));
    assert_eq!(policy_engine.data_role(), DataRole::Dfp);
    assert!(policy_engine.vconn_source());

    let device_policy_manager = policy_engine.device_policy_manager();
    assert_eq!(
        device_policy_manager.supply,
        [
            SupplyLevel::VSafe5V,
            SupplyLevel::Contract(contract),
            SupplyLevel::Off,
            SupplyLevel::VSafe5V,
        ]
    );
    assert_eq!(device_policy_manager.hard_resets, 1);
    assert!(device_policy_manager.notified(&Notification::HardReset));

    // Capabilities are advertised again.
    run_until(&mut policy_engine, State::Source(SourceState::WaitForRequest)).await;
}

#[tokio::test]
async fn silent_sink_exhausts_hard_resets() {
    let mut policy_engine = source_waiting_for_request().await;

    let mut result = Ok(());
    for _ in 0..MAX_STEPS {
        result = policy_engine.run_step().await;
        if result.is_err() {
            break;
        }
    }

    assert_eq!(result, Err(Error::ErrorRecovery));
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 4);

    // The first advertisement, and one after each hard reset.
    let advertisements = message_types(&mut policy_engine)
        .into_iter()
        .filter(|message_type| *message_type == MessageType::Data(DataMessageType::SourceCapabilities))
        .count();
    assert_eq!(advertisements, 5);
    assert!(
        policy_engine
            .device_policy_manager()
            .notified(&Notification::ErrorRecovery)
    );
}

#[tokio::test]
async fn unacknowledged_messages_escalate_to_hard_reset() {
    let (mut policy_engine, mut partner) = sink_in_ready(PortConfig::default()).await;
    policy_engine.protocol_layer.driver().set_auto_ack(false);

    let get_sink_cap = partner.control(ControlMessageType::GetSinkCap);
    inject(&mut policy_engine, &get_sink_cap);

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::GiveSinkCap));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::SendSoftReset));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::HardReset));

    policy_engine.run_step().await.unwrap();
    assert_eq!(*policy_engine.state(), State::Sink(SinkState::TransitionToDefault));
    assert_eq!(policy_engine.protocol_layer.driver().hard_resets(), 1);

    // Each message is sent once, and retried three times.
    let transmitted = message_types(&mut policy_engine);
    let count = |message_type: MessageType| transmitted.iter().filter(|sent| **sent == message_type).count();
    assert_eq!(count(MessageType::Data(DataMessageType::SinkCapabilities)), 4);
    assert_eq!(count(MessageType::Control(ControlMessageType::SoftReset)), 4);
}
