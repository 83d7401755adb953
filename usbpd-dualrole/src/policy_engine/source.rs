//! Source states.
use super::*;

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    pub(super) async fn update_source_state(&mut self, state: &SourceState) -> Result<State, Error> {
        let new_state = match state {
            SourceState::Startup => {
                self.caps_counter.reset();
                self.protocol_layer.reset();
                self.flags.remove(Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED);
                self.manager.set_contract(None);

                if self.flags.contains(Flags::SWAP_SOURCE_START) {
                    self.flags.remove(Flags::SWAP_SOURCE_START);
                    self.wait_timer(TimerId::SwapSourceStart).await?;
                }

                self.device_policy_manager.source_supply(SupplyLevel::VSafe5V).await;
                SourceState::Discovery
            }
            SourceState::Discovery => {
                self.wait_timer(TimerId::SourceCapability).await?;
                SourceState::SendCapabilities
            }
            SourceState::SendCapabilities => {
                let capabilities = self.manager.config().source_capabilities.clone();

                match self
                    .protocol_layer
                    .transmit_data_message(Data::SourceCapabilities(capabilities))
                    .await
                {
                    Ok(()) => {
                        self.caps_counter.reset();
                        self.flags.insert(Flags::PD_CONNECTED);
                        SourceState::WaitForRequest
                    }
                    Err(ProtocolError::TransmitRetriesExceeded(_)) if !self.flags.contains(Flags::PD_CONNECTED) => {
                        if self.caps_counter.increment_and_check() {
                            info!("No sink answered the source capabilities");
                            self.notify(Notification::SourceDisabled).await;
                            SourceState::Disabled
                        } else {
                            SourceState::Discovery
                        }
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            SourceState::WaitForRequest => match self.wait_message(TimerId::SenderResponseSrc).await? {
                Some(message) => match message.data() {
                    Some(Data::Request(raw)) => SourceState::NegotiateCapability(*raw),
                    _ => return Err(ProtocolError::UnexpectedMessage.into()),
                },
                None => {
                    warn!("No request within the sender response time");
                    SourceState::HardReset
                }
            },
            SourceState::NegotiateCapability(raw) => match self.manager.evaluate_request(*raw) {
                Some(contract) => {
                    self.protocol_layer
                        .transmit_control_message(ControlMessageType::Accept)
                        .await?;
                    SourceState::TransitionSupply(contract)
                }
                None => SourceState::CapabilityResponse(ControlMessageType::Reject),
            },
            SourceState::CapabilityResponse(message_type) => {
                self.protocol_layer.transmit_control_message(*message_type).await?;

                if self.flags.contains(Flags::EXPLICIT_CONTRACT) {
                    SourceState::Ready
                } else {
                    SourceState::WaitNewCapabilities
                }
            }
            SourceState::WaitNewCapabilities => match self.wait_event(true).await? {
                PeEvent::Command => match self.manager.next_command() {
                    Some(Command::HARD_RESET) => SourceState::HardReset,
                    Some(Command::NEW_POWER_REQUEST) => SourceState::SendCapabilities,
                    command => {
                        debug!("Dropping {:?} without contract", command);
                        SourceState::WaitNewCapabilities
                    }
                },
                PeEvent::Message(message) => match message.data() {
                    Some(Data::Request(raw)) => SourceState::NegotiateCapability(*raw),
                    _ => SourceState::WaitNewCapabilities,
                },
                PeEvent::Timer(_) => SourceState::WaitNewCapabilities,
            },
            SourceState::TransitionSupply(contract) => {
                self.wait_timer(TimerId::SrcTransition).await?;
                self.device_policy_manager
                    .source_supply(SupplyLevel::Contract(*contract))
                    .await;
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::PsRdy)
                    .await?;

                self.flags.insert(Flags::EXPLICIT_CONTRACT);
                self.flags.set(Flags::PPS_ENABLED, contract.pps);
                self.hard_reset_counter.reset();
                self.manager.set_contract(Some(*contract));
                info!("Contract {:?}", contract);
                self.notify(Notification::ContractEstablished(*contract)).await;
                SourceState::Ready
            }
            SourceState::Ready => return self.ready().await,
            SourceState::Disabled => {
                // Only a hard reset or detach leaves this state.
                match self.wait_event(false).await? {
                    PeEvent::Message(message) => debug!("Disabled, dropping {:?}", message.message_type()),
                    PeEvent::Command | PeEvent::Timer(_) => (),
                }
                SourceState::Disabled
            }
            SourceState::GetSinkCap => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::GetSinkCap)
                    .await?;

                match self.wait_message(TimerId::SenderResponse).await? {
                    Some(message) => match message.data() {
                        Some(Data::SinkCapabilities(capabilities)) => {
                            self.manager.sink_capabilities_received(capabilities.clone());
                            SourceState::Ready
                        }
                        _ if message.is_control(ControlMessageType::NotSupported)
                            || message.is_control(ControlMessageType::Reject) =>
                        {
                            SourceState::NotSupportedReceived
                        }
                        _ => return self.handle_ready_message(message).await,
                    },
                    None => SourceState::Ready,
                }
            }
            SourceState::GiveSourceCap => {
                let capabilities = self.manager.config().source_capabilities.clone();
                self.protocol_layer
                    .transmit_data_message(Data::SourceCapabilities(capabilities))
                    .await?;
                SourceState::WaitForRequest
            }
            SourceState::GiveSinkCap => {
                let capabilities = self.manager.config().sink_capabilities.clone();
                self.protocol_layer
                    .transmit_data_message(Data::SinkCapabilities(capabilities))
                    .await?;
                SourceState::Ready
            }
            SourceState::HardReset => {
                if self.hard_reset_counter.exhausted() {
                    return Ok(State::ErrorRecovery);
                }

                self.hard_reset_counter.increment();
                self.flags.remove(Flags::HARD_RESET_RECEIVED);
                self.protocol_layer.hard_reset().await?;
                self.wait_timer(TimerId::PSHardReset).await?;
                SourceState::TransitionToDefault
            }
            SourceState::TransitionToDefault => {
                self.notify(Notification::HardReset).await;
                self.device_policy_manager.hard_reset().await;
                self.flags
                    .remove(Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED | Flags::HARD_RESET_RECEIVED);
                self.manager.set_contract(None);
                self.manager.mode_exited();

                self.device_policy_manager.source_supply(SupplyLevel::Off).await;
                self.wait_timer(TimerId::SrcRecover).await?;

                self.data_role = DataRole::Dfp;
                self.protocol_layer.set_roles(self.power_role, self.data_role);
                self.protocol_layer.driver().set_data_role(self.data_role).await;
                if !self.vconn_source {
                    self.vconn_source = true;
                    self.protocol_layer.driver().set_vconn_source(true).await;
                }

                self.device_policy_manager.source_supply(SupplyLevel::VSafe5V).await;
                self.protocol_layer.reset();
                SourceState::Startup
            }
            SourceState::SendSoftReset => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::SoftReset)
                    .await?;

                match self.wait_message(TimerId::SenderResponse).await? {
                    Some(message) if message.is_control(ControlMessageType::Accept) => SourceState::SendCapabilities,
                    _ => SourceState::HardReset,
                }
            }
            SourceState::SoftReset => {
                self.flags.remove(Flags::SOFT_RESET_RECEIVED);
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Accept)
                    .await?;
                SourceState::SendCapabilities
            }
            SourceState::SendNotSupported => return self.send_not_supported().await,
            SourceState::NotSupportedReceived => {
                self.notify(Notification::NotSupported).await;
                SourceState::Ready
            }
        };

        Ok(State::Source(new_state))
    }
}
