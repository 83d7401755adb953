//! Sink states.
use super::*;

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    pub(super) async fn update_sink_state(&mut self, state: &SinkState) -> Result<State, Error> {
        let new_state = match state {
            SinkState::Startup => {
                self.protocol_layer.reset();
                self.flags
                    .remove(Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED | Flags::SINK_REQUEST_WAIT);
                self.manager.set_contract(None);
                self.request = None;
                SinkState::Discovery
            }
            SinkState::Discovery => {
                self.protocol_layer.wait_for_vbus().await;
                SinkState::WaitForCapabilities
            }
            SinkState::WaitForCapabilities => {
                self.timers.start_if_idle(TimerId::SinkWaitCap);
                self.timers.start_if_idle(TimerId::TypeCSinkWaitCap);

                loop {
                    match self.wait_event(false).await? {
                        PeEvent::Message(message) => match message.data() {
                            Some(Data::SourceCapabilities(capabilities)) => {
                                break SinkState::EvaluateCapability(capabilities.clone());
                            }
                            _ => debug!("Waiting for capabilities, dropping {:?}", message.message_type()),
                        },
                        PeEvent::Timer(TimerId::TypeCSinkWaitCap) => {
                            info!("No capabilities yet, Type-C current applies");
                            self.notify(Notification::TypeCFallback).await;
                            self.classify().await;
                        }
                        PeEvent::Timer(TimerId::SinkWaitCap) => {
                            if self.hard_reset_counter.exhausted() {
                                return Ok(State::ErrorRecovery);
                            }
                            break SinkState::HardReset;
                        }
                        PeEvent::Timer(_) | PeEvent::Command => (),
                    }
                }
            }
            SinkState::EvaluateCapability(capabilities) => {
                self.flags.insert(Flags::PD_CONNECTED);
                let request = self.manager.evaluate_capability(capabilities);
                self.classify().await;

                match request {
                    Some(request) => SinkState::SelectCapability(request),
                    None => {
                        warn!("No capability to request");
                        SinkState::WaitForCapabilities
                    }
                }
            }
            SinkState::SelectCapability(request) => {
                self.request = Some(*request);
                self.protocol_layer
                    .transmit_data_message(Data::Request(request.raw()))
                    .await?;

                let contract = self.flags.contains(Flags::EXPLICIT_CONTRACT);
                match self.wait_message(TimerId::SenderResponse).await? {
                    Some(message) => match message.message_type() {
                        MessageType::Control(ControlMessageType::Accept) => SinkState::TransitionSink(*request),
                        MessageType::Control(message_type @ (ControlMessageType::Reject | ControlMessageType::Wait)) => {
                            debug!("Request declined with {:?}", message_type);
                            self.notify(Notification::RequestDeclined).await;

                            if !contract {
                                SinkState::WaitForCapabilities
                            } else {
                                if message_type == ControlMessageType::Wait {
                                    self.flags.insert(Flags::SINK_REQUEST_WAIT);
                                }
                                SinkState::Ready
                            }
                        }
                        _ => return Err(ProtocolError::UnexpectedMessage.into()),
                    },
                    None => {
                        warn!("No answer to the request");
                        SinkState::HardReset
                    }
                }
            }
            SinkState::TransitionSink(request) => match self.wait_message(TimerId::PSTransition).await? {
                Some(message) if message.is_control(ControlMessageType::PsRdy) => {
                    let Some(contract) = self.manager.contract_for(request) else {
                        error!("Accepted request {:?} does not match the capabilities", request);
                        return Ok(State::Sink(SinkState::HardReset));
                    };

                    self.device_policy_manager.transition_power(&contract).await;
                    self.flags.insert(Flags::EXPLICIT_CONTRACT);
                    self.flags.set(Flags::PPS_ENABLED, contract.pps);
                    self.hard_reset_counter.reset();
                    self.manager.set_contract(Some(contract));
                    info!("Contract {:?}", contract);
                    self.notify(Notification::ContractEstablished(contract)).await;
                    SinkState::Ready
                }
                _ => SinkState::HardReset,
            },
            SinkState::Ready => return self.ready().await,
            SinkState::GiveSinkCap => {
                let capabilities = self.manager.config().sink_capabilities.clone();
                self.protocol_layer
                    .transmit_data_message(Data::SinkCapabilities(capabilities))
                    .await?;
                SinkState::Ready
            }
            SinkState::GetSourceCap => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::GetSourceCap)
                    .await?;

                match self.wait_message(TimerId::SenderResponse).await? {
                    Some(message) => match message.data() {
                        Some(Data::SourceCapabilities(capabilities)) => {
                            SinkState::EvaluateCapability(capabilities.clone())
                        }
                        _ if message.is_control(ControlMessageType::NotSupported)
                            || message.is_control(ControlMessageType::Reject) =>
                        {
                            SinkState::NotSupportedReceived
                        }
                        _ => return self.handle_ready_message(message).await,
                    },
                    None => SinkState::Ready,
                }
            }
            SinkState::GiveSourceCap => {
                let capabilities = self.manager.config().source_capabilities.clone();
                self.protocol_layer
                    .transmit_data_message(Data::SourceCapabilities(capabilities))
                    .await?;
                SinkState::Ready
            }
            SinkState::HardReset => {
                self.hard_reset_counter.increment();
                self.protocol_layer.hard_reset().await?;
                SinkState::TransitionToDefault
            }
            SinkState::TransitionToDefault => {
                self.notify(Notification::HardReset).await;
                self.device_policy_manager.hard_reset().await;
                self.flags.remove(
                    Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED | Flags::SINK_REQUEST_WAIT | Flags::HARD_RESET_RECEIVED,
                );
                self.manager.set_contract(None);
                self.manager.mode_exited();

                self.data_role = DataRole::Ufp;
                self.protocol_layer.set_roles(self.power_role, self.data_role);
                self.protocol_layer.driver().set_data_role(self.data_role).await;
                if self.vconn_source {
                    self.vconn_source = false;
                    self.protocol_layer.driver().set_vconn_source(false).await;
                }

                self.protocol_layer.reset();
                SinkState::Startup
            }
            SinkState::SendSoftReset => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::SoftReset)
                    .await?;

                match self.wait_message(TimerId::SenderResponse).await? {
                    Some(message) if message.is_control(ControlMessageType::Accept) => SinkState::WaitForCapabilities,
                    _ => SinkState::HardReset,
                }
            }
            SinkState::SoftReset => {
                self.flags.remove(Flags::SOFT_RESET_RECEIVED);
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Accept)
                    .await?;
                SinkState::WaitForCapabilities
            }
            SinkState::SendNotSupported => return self.send_not_supported().await,
            SinkState::NotSupportedReceived => {
                self.notify(Notification::NotSupported).await;
                SinkState::Ready
            }
        };

        Ok(State::Sink(new_state))
    }
}
