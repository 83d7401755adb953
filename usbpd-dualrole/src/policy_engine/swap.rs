//! Data role, power role and VCONN swaps.
use super::*;

/// How the partner answered a swap request.
enum SwapReply {
    Accepted,
    Declined,
    /// Another message interrupted the request.
    Interrupted(Message),
}

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    /// Send a swap request, and wait for the answer.
    async fn request_swap(&mut self, message_type: ControlMessageType) -> Result<SwapReply, Error> {
        self.protocol_layer.transmit_control_message(message_type).await?;

        Ok(match self.wait_message(TimerId::SenderResponse).await? {
            Some(message) if message.is_control(ControlMessageType::Accept) => SwapReply::Accepted,
            Some(message)
                if message.is_control(ControlMessageType::Reject) || message.is_control(ControlMessageType::Wait) =>
            {
                debug!("{:?} declined with {:?}", message_type, message.message_type());
                self.notify(Notification::RequestDeclined).await;
                SwapReply::Declined
            }
            Some(message) => SwapReply::Interrupted(message),
            None => {
                debug!("No answer to {:?}", message_type);
                SwapReply::Declined
            }
        })
    }

    pub(super) async fn update_data_role_swap_state(&mut self, state: DataRoleSwapState) -> Result<State, Error> {
        let new_state = match state {
            DataRoleSwapState::EvaluateSwap => {
                if self.manager.modal_operation() {
                    warn!("Data role swap requested in modal operation");
                    return Ok(self.hard_reset_state());
                }

                if self.manager.accept_dr_swap(self.data_role) {
                    DataRoleSwapState::AcceptSwap
                } else {
                    DataRoleSwapState::RejectSwap
                }
            }
            DataRoleSwapState::AcceptSwap => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Accept)
                    .await?;
                DataRoleSwapState::ChangeRole
            }
            DataRoleSwapState::RejectSwap => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Reject)
                    .await?;
                return Ok(self.ready_state());
            }
            DataRoleSwapState::SendSwap => match self.request_swap(ControlMessageType::DrSwap).await? {
                SwapReply::Accepted => DataRoleSwapState::ChangeRole,
                SwapReply::Declined => return Ok(self.ready_state()),
                SwapReply::Interrupted(message) => return self.handle_ready_message(message).await,
            },
            DataRoleSwapState::ChangeRole => {
                self.data_role = self.data_role.swapped();
                info!("Data role is now {:?}", self.data_role);

                self.protocol_layer.set_roles(self.power_role, self.data_role);
                self.protocol_layer.driver().set_data_role(self.data_role).await;
                self.notify(Notification::DataRoleChanged(self.data_role)).await;
                return Ok(self.ready_state());
            }
        };

        Ok(State::DataRoleSwap(new_state))
    }

    pub(super) async fn update_power_role_swap_state(&mut self, state: PowerRoleSwapState) -> Result<State, Error> {
        let new_state = match state {
            PowerRoleSwapState::Evaluate => {
                if self.manager.accept_pr_swap(self.power_role) {
                    PowerRoleSwapState::Accept
                } else {
                    PowerRoleSwapState::Reject
                }
            }
            PowerRoleSwapState::Accept => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Accept)
                    .await?;
                self.power_role_swap_start()
            }
            PowerRoleSwapState::Reject => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Reject)
                    .await?;
                return Ok(self.ready_state());
            }
            PowerRoleSwapState::Send => match self.request_swap(ControlMessageType::PrSwap).await? {
                SwapReply::Accepted => self.power_role_swap_start(),
                SwapReply::Declined => return Ok(self.ready_state()),
                SwapReply::Interrupted(message) => return self.handle_ready_message(message).await,
            },
            PowerRoleSwapState::SrcTransitionToOff => {
                self.flags.remove(Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED);
                self.manager.set_contract(None);

                self.wait_timer(TimerId::SrcTransition).await?;
                self.device_policy_manager.source_supply(SupplyLevel::Off).await;
                PowerRoleSwapState::SrcAssertRd
            }
            PowerRoleSwapState::SrcAssertRd => {
                self.set_power_role(PowerRole::Sink).await;
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::PsRdy)
                    .await?;
                PowerRoleSwapState::SrcWaitSourceOn
            }
            PowerRoleSwapState::SrcWaitSourceOn => match self.wait_message(TimerId::PSSourceOn).await? {
                Some(message) if message.is_control(ControlMessageType::PsRdy) => {
                    self.swap_hard_reset_counter.reset();
                    self.notify(Notification::PowerRoleChanged(PowerRole::Sink)).await;
                    return Ok(State::Sink(SinkState::Startup));
                }
                _ => {
                    warn!("New source did not turn on");
                    return Ok(self.swap_failure_state());
                }
            },
            PowerRoleSwapState::SnkTransitionToOff => {
                self.flags
                    .remove(Flags::EXPLICIT_CONTRACT | Flags::PPS_ENABLED | Flags::SINK_REQUEST_WAIT);
                self.manager.set_contract(None);

                match self.wait_message(TimerId::PSSourceOff).await? {
                    Some(message) if message.is_control(ControlMessageType::PsRdy) => PowerRoleSwapState::SnkAssertRp,
                    _ => {
                        warn!("Initial source did not turn off");
                        return Ok(self.swap_failure_state());
                    }
                }
            }
            PowerRoleSwapState::SnkAssertRp => {
                self.set_power_role(PowerRole::Source).await;
                PowerRoleSwapState::SnkSourceOn
            }
            PowerRoleSwapState::SnkSourceOn => {
                self.device_policy_manager.source_supply(SupplyLevel::VSafe5V).await;
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::PsRdy)
                    .await?;

                self.swap_hard_reset_counter.reset();
                self.flags.insert(Flags::SWAP_SOURCE_START);
                self.notify(Notification::PowerRoleChanged(PowerRole::Source)).await;
                return Ok(State::Source(SourceState::Startup));
            }
        };

        Ok(State::PowerRoleSwap(new_state))
    }

    fn power_role_swap_start(&self) -> PowerRoleSwapState {
        match self.power_role {
            PowerRole::Source => PowerRoleSwapState::SrcTransitionToOff,
            PowerRole::Sink => PowerRoleSwapState::SnkTransitionToOff,
        }
    }

    async fn set_power_role(&mut self, power_role: PowerRole) {
        info!("Power role is now {:?}", power_role);
        self.power_role = power_role;
        self.protocol_layer.set_roles(self.power_role, self.data_role);
        self.protocol_layer.driver().set_power_role(power_role).await;
    }

    pub(super) async fn update_vconn_swap_state(&mut self, state: VconnSwapState) -> Result<State, Error> {
        let new_state = match state {
            VconnSwapState::Evaluate => {
                if self.manager.accept_vconn_swap() {
                    VconnSwapState::Accept
                } else {
                    VconnSwapState::Reject
                }
            }
            VconnSwapState::Accept => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Accept)
                    .await?;
                self.vconn_swap_start()
            }
            VconnSwapState::Reject => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::Reject)
                    .await?;
                return Ok(self.ready_state());
            }
            VconnSwapState::Send => match self.request_swap(ControlMessageType::VconnSwap).await? {
                SwapReply::Accepted => self.vconn_swap_start(),
                SwapReply::Declined => return Ok(self.ready_state()),
                SwapReply::Interrupted(message) => return self.handle_ready_message(message).await,
            },
            VconnSwapState::WaitForVconn => match self.wait_message(TimerId::VconnSourceOn).await? {
                Some(message) if message.is_control(ControlMessageType::PsRdy) => VconnSwapState::TurnOffVconn,
                _ => {
                    warn!("Partner did not turn VCONN on");
                    return Ok(self.hard_reset_state());
                }
            },
            VconnSwapState::TurnOffVconn => {
                self.set_vconn_source(false).await;
                return Ok(self.ready_state());
            }
            VconnSwapState::TurnOnVconn => {
                self.set_vconn_source(true).await;
                VconnSwapState::SendPsRdy
            }
            VconnSwapState::SendPsRdy => {
                self.protocol_layer
                    .transmit_control_message(ControlMessageType::PsRdy)
                    .await?;
                return Ok(self.ready_state());
            }
        };

        Ok(State::VconnSwap(new_state))
    }

    fn vconn_swap_start(&self) -> VconnSwapState {
        if self.vconn_source {
            VconnSwapState::WaitForVconn
        } else {
            VconnSwapState::TurnOnVconn
        }
    }

    async fn set_vconn_source(&mut self, enable: bool) {
        debug!("VCONN source {}", enable);
        self.vconn_source = enable;
        self.protocol_layer.driver().set_vconn_source(enable).await;
        self.notify(Notification::VconnSourceChanged(enable)).await;
    }
}
