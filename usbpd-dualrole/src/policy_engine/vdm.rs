//! Structured VDM exchanges: discovery, alternate modes and DisplayPort.
use heapless::Vec;

use super::*;
use crate::config::MAX_SVIDS;
use crate::protocol_layer::message::data::MAX_VDOS;
use crate::protocol_layer::message::data::vendor_defined::{Identity, PD_SID, VdmHeader};

/// Outcome of a VDM request.
enum VdmReply {
    Ack(Vec<u32, MAX_VDOS>),
    /// NAK or BUSY.
    Nak,
    Timeout,
    /// Another message interrupted the request.
    Interrupted(Message),
}

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    /// Send a structured VDM request, and wait for the matching response.
    async fn vdm_request(
        &mut self,
        request: VdmHeaderStructured,
        objects: &[u32],
        timer: TimerId,
    ) -> Result<VdmReply, Error> {
        trace!("VDM request {:?}", request.command());
        self.protocol_layer
            .transmit_vdm(VdmHeader::Structured(request), objects)
            .await?;
        self.timers.start(timer);

        loop {
            let message = match self.wait_event(false).await? {
                PeEvent::Message(message) => message,
                PeEvent::Timer(id) if id == timer => return Ok(VdmReply::Timeout),
                PeEvent::Timer(_) | PeEvent::Command => continue,
            };

            let response = match message.data() {
                Some(Data::VendorDefined((header, objects))) => header
                    .structured()
                    .filter(|header| {
                        header.command_type() != VdmCommandType::InitiatorReq
                            && header.command() == request.command()
                            && header.standard_or_vid() == request.standard_or_vid()
                    })
                    .map(|header| (header.command_type(), objects.clone())),
                _ => None,
            };

            return Ok(match response {
                Some((VdmCommandType::ResponderAck, objects)) => VdmReply::Ack(objects),
                Some(_) => VdmReply::Nak,
                None => VdmReply::Interrupted(message),
            });
        }
    }

    /// Discovery ends without entering a mode.
    fn discovery_finished(&mut self) -> State {
        if self.manager.active_mode().is_none() {
            self.manager.set_modal_operation(false);
        }
        self.ready_state()
    }

    pub(super) async fn update_vdm_state(&mut self, state: VdmState) -> Result<State, Error> {
        let new_state = match state {
            VdmState::DiscoverIdentity => {
                if self.discover_identity_counter.value() > 0 {
                    self.timers.start(TimerId::DiscoverIdentity);
                    loop {
                        match self.wait_event(false).await? {
                            PeEvent::Timer(TimerId::DiscoverIdentity) => break,
                            PeEvent::Message(message) => return self.handle_ready_message(message).await,
                            PeEvent::Timer(_) | PeEvent::Command => (),
                        }
                    }
                }

                let request = VdmHeaderStructured::request(PD_SID, VdmCommand::DiscoverIdentity, 0);
                match self.vdm_request(request, &[], TimerId::VdmSenderResponse).await? {
                    VdmReply::Ack(objects) => match Identity::from_vdos(&objects) {
                        Some(identity) => {
                            let modal = identity.id_header.modal_supported();
                            self.discover_identity_counter.reset();
                            self.manager.identity_received(identity);
                            self.classify().await;

                            if modal {
                                VdmState::DiscoverSvids
                            } else {
                                return Ok(self.discovery_finished());
                            }
                        }
                        None => {
                            warn!("Malformed identity");
                            return Ok(self.discovery_finished());
                        }
                    },
                    VdmReply::Nak => return Ok(self.discovery_finished()),
                    VdmReply::Timeout => {
                        if self.discover_identity_counter.increment_and_check() {
                            warn!("Partner does not answer Discover Identity");
                            return Ok(self.discovery_finished());
                        }
                        VdmState::DiscoverIdentity
                    }
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
            }
            VdmState::DiscoverSvids => {
                let request = VdmHeaderStructured::request(PD_SID, VdmCommand::DiscoverSvids, 0);
                match self.vdm_request(request, &[], TimerId::VdmSenderResponse).await? {
                    VdmReply::Ack(objects) => {
                        let known = self.manager.svids().len();
                        self.manager.svids_received(&objects);
                        self.classify().await;

                        // A full response without terminator announces more SVIDs.
                        let more = objects.len() == MAX_VDOS
                            && objects.last().is_some_and(|vdo| *vdo as u16 != 0)
                            && self.manager.svids().len() > known
                            && self.manager.svids().len() < MAX_SVIDS;

                        if more {
                            VdmState::DiscoverSvids
                        } else {
                            match self.manager.svid_to_discover() {
                                Some(svid) => VdmState::DiscoverModes(svid),
                                None => return Ok(self.discovery_finished()),
                            }
                        }
                    }
                    VdmReply::Nak | VdmReply::Timeout => return Ok(self.discovery_finished()),
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
            }
            VdmState::DiscoverModes(svid) => {
                let request = VdmHeaderStructured::request(svid, VdmCommand::DiscoverModes, 0);
                match self.vdm_request(request, &[], TimerId::VdmSenderResponse).await? {
                    VdmReply::Ack(objects) => {
                        self.manager.modes_received(svid, &objects);
                        match self.manager.displayport_mode() {
                            Some((svid, object_position)) if self.data_role == DataRole::Dfp => {
                                VdmState::EnterMode(svid, object_position)
                            }
                            _ => return Ok(self.discovery_finished()),
                        }
                    }
                    VdmReply::Nak | VdmReply::Timeout => return Ok(self.discovery_finished()),
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
            }
            VdmState::EnterMode(svid, object_position) => {
                let request = VdmHeaderStructured::request(svid, VdmCommand::EnterMode, object_position);
                match self.vdm_request(request, &[], TimerId::VdmWaitModeEntry).await? {
                    VdmReply::Ack(_) => {
                        self.manager.mode_entered(svid, object_position);
                        self.notify(Notification::ModeEntered { svid, object_position })
                            .await;

                        if svid == DISPLAYPORT_SID {
                            VdmState::DisplayPortStatus
                        } else {
                            return Ok(self.ready_state());
                        }
                    }
                    VdmReply::Nak | VdmReply::Timeout => {
                        warn!("Mode {} of SVID {:#06x} was not entered", object_position, svid);
                        return Ok(self.discovery_finished());
                    }
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
            }
            VdmState::DisplayPortStatus => {
                let Some((svid, object_position)) = self.manager.active_mode() else {
                    return Ok(self.ready_state());
                };

                // DFP_D connected.
                let status = DisplayPortStatus::default().with_connected(0b01);
                let request = VdmHeaderStructured::request(svid, VdmCommand::DisplayPortStatus, object_position);
                match self.vdm_request(request, &[status.0], TimerId::VdmSenderResponse).await? {
                    VdmReply::Ack(objects) => {
                        let partner_status = DisplayPortStatus(objects.first().copied().unwrap_or_default());
                        self.manager.set_displayport_status(partner_status);
                        self.notify(Notification::DisplayPortStatus(partner_status)).await;

                        if partner_status.exit_dp_mode_request() {
                            VdmState::ExitMode
                        } else if self.manager.displayport_configured().is_none() && self.data_role == DataRole::Dfp {
                            VdmState::DisplayPortConfigure
                        } else {
                            return Ok(self.ready_state());
                        }
                    }
                    VdmReply::Nak | VdmReply::Timeout => return Ok(self.ready_state()),
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
            }
            VdmState::DisplayPortConfigure => {
                let (Some((svid, object_position)), Some(configuration)) =
                    (self.manager.active_mode(), self.manager.displayport_configuration())
                else {
                    warn!("No DisplayPort configuration applies");
                    return Ok(self.ready_state());
                };

                let request = VdmHeaderStructured::request(svid, VdmCommand::DisplayPortConfigure, object_position);
                match self
                    .vdm_request(request, &[configuration.0], TimerId::VdmSenderResponse)
                    .await?
                {
                    VdmReply::Ack(_) => {
                        info!("DisplayPort pin assignment {:#04x}", configuration.pin_assignment());
                        self.manager.set_displayport_configured(Some(configuration));
                        self.notify(Notification::DisplayPortConfigured(configuration)).await;
                    }
                    VdmReply::Nak | VdmReply::Timeout => warn!("DisplayPort configuration failed"),
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
                return Ok(self.ready_state());
            }
            VdmState::ExitMode => {
                let Some((svid, object_position)) = self.manager.active_mode() else {
                    return Ok(self.ready_state());
                };

                let request = VdmHeaderStructured::request(svid, VdmCommand::ExitMode, object_position);
                match self.vdm_request(request, &[], TimerId::VdmWaitModeExit).await? {
                    VdmReply::Ack(_) => {
                        self.manager.mode_exited();
                        self.notify(Notification::ModeExited { svid }).await;
                    }
                    VdmReply::Nak | VdmReply::Timeout => warn!("Mode of SVID {:#06x} was not exited", svid),
                    VdmReply::Interrupted(message) => return self.handle_ready_message(message).await,
                }
                return Ok(self.ready_state());
            }
            VdmState::Respond(request) => {
                let active_mode = self.manager.active_mode();
                let (response, objects) = self.manager.vdm_response(request);
                self.protocol_layer
                    .transmit_vdm(VdmHeader::Structured(response), &objects)
                    .await?;

                let svid = request.standard_or_vid();
                match (active_mode, self.manager.active_mode()) {
                    (None, Some((svid, object_position))) => {
                        self.notify(Notification::ModeEntered { svid, object_position })
                            .await
                    }
                    (Some(_), None) => self.notify(Notification::ModeExited { svid }).await,
                    _ => (),
                }
                return Ok(self.ready_state());
            }
        };

        Ok(State::Vdm(new_state))
    }
}
