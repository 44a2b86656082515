//! Entry point for H4 traffic in both directions.
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::acl_data_channel::AclDataChannel;
use crate::channel_manager::L2capChannelManager;
use crate::codec::{Decode, FixedSize};
use crate::connection::Transport;
use crate::credits::SendCredit;
use crate::packet_pool::Allocator;
use crate::transport::HciTransport;
use crate::types::hci::*;
use crate::Error;

/// The proxy between a host stack and a controller.
///
/// The integrator feeds every H4 packet from either side into
/// [`ProxyHost::handle_h4_from_controller`] or [`ProxyHost::handle_h4_from_host`],
/// and the proxy passes them on through the [`HciTransport`] unless it consumes them.
pub struct ProxyHost<'d, M: RawMutex, T: HciTransport> {
    acl: AclDataChannel<'d, M, T>,
}

impl<'d, M: RawMutex, T: HciTransport> ProxyHost<'d, M, T> {
    pub fn new(
        transport: T,
        allocator: &'d dyn Allocator,
        channels: &'d dyn L2capChannelManager,
        le_acl_credits_to_reserve: u16,
        br_edr_acl_credits_to_reserve: u16,
    ) -> Self {
        Self {
            acl: AclDataChannel::new(
                transport,
                allocator,
                channels,
                le_acl_credits_to_reserve,
                br_edr_acl_credits_to_reserve,
            ),
        }
    }

    pub fn acl_data_channel(&self) -> &AclDataChannel<'d, M, T> {
        &self.acl
    }

    /// Process a packet coming from the controller.
    ///
    /// Events may be rewritten in place before they are forwarded to the host.
    pub fn handle_h4_from_controller(&self, kind: HciMessageType, packet: &mut [u8]) {
        match kind {
            HciMessageType::Event => self.handle_event(packet),
            HciMessageType::Data => self.acl.handle_acl_data(packet),
            _ => self.acl.transport().send_to_host(kind, packet),
        }
    }

    /// Process a packet coming from the host.
    pub fn handle_h4_from_host(&self, kind: HciMessageType, packet: &[u8]) {
        match kind {
            HciMessageType::Command => {
                if let Ok(header) = CommandHeader::decode(packet) {
                    if header.opcode == OPCODE_RESET {
                        info!("[proxy] host sent reset");
                        self.acl.reset();
                    }
                }
                self.acl.transport().send_to_controller(kind, packet);
            }
            HciMessageType::Data => self.acl.handle_acl_from_host(packet),
            _ => self.acl.transport().send_to_controller(kind, packet),
        }
    }

    /// The link to the controller failed. Every connection and reservation is dropped,
    /// they are rebuilt from the events that follow.
    pub fn on_transport_error(&self) {
        warn!("[proxy] transport error, resetting");
        self.acl.reset();
    }

    fn handle_event(&self, event: &mut [u8]) {
        let Ok((header, params)) = EventHeader::split(event) else {
            debug!("[proxy] forwarding malformed event");
            self.acl.transport().send_to_host(HciMessageType::Event, event);
            return;
        };
        let code = header.code;
        let subevent = params.first().copied();

        match code {
            EVENT_COMMAND_COMPLETE => self.handle_command_complete(event),
            EVENT_NUMBER_OF_COMPLETED_PACKETS => self.acl.handle_number_of_completed_packets_event(event),
            EVENT_DISCONNECTION_COMPLETE => self.acl.handle_disconnection_complete_event(event),
            EVENT_CONNECTION_COMPLETE => self.acl.handle_connection_complete_event(event),
            EVENT_LE_META => match subevent {
                Some(LE_CONNECTION_COMPLETE) => self.acl.handle_le_connection_complete_event(event),
                Some(LE_ENHANCED_CONNECTION_COMPLETE_V1) => {
                    self.acl.handle_le_enhanced_connection_complete_v1_event(event)
                }
                Some(LE_ENHANCED_CONNECTION_COMPLETE_V2) => {
                    self.acl.handle_le_enhanced_connection_complete_v2_event(event)
                }
                _ => self.acl.transport().send_to_host(HciMessageType::Event, event),
            },
            _ => self.acl.transport().send_to_host(HciMessageType::Event, event),
        }
    }

    fn handle_command_complete(&self, event: &mut [u8]) {
        let opcode = event
            .get(EventHeader::SIZE..)
            .and_then(|params| CommandComplete::decode(params).ok())
            .map(|complete| complete.opcode);
        let result = match opcode {
            Some(OPCODE_READ_BUFFER_SIZE) => self.acl.process_read_buffer_size_command_complete_event(event),
            Some(OPCODE_LE_READ_BUFFER_SIZE_V1) | Some(OPCODE_LE_READ_BUFFER_SIZE_V2) => {
                self.acl.process_le_read_buffer_size_command_complete_event(event)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("[proxy] unable to process command complete: {:?}", e);
        }
        self.acl.transport().send_to_host(HciMessageType::Event, event);
    }

    pub fn reserve_send_credit(&self, transport: Transport) -> Option<SendCredit<'_, M>> {
        self.acl.reserve_send_credit(transport)
    }

    pub fn send_acl(&self, packet: &[u8], credit: SendCredit<'_, M>) -> Result<(), Error> {
        self.acl.send_acl(packet, credit)
    }

    pub fn num_free_le_acl_packets(&self) -> u16 {
        self.acl.num_free_le_acl_packets()
    }

    pub fn num_free_br_edr_acl_packets(&self) -> u16 {
        self.acl.num_free_br_edr_acl_packets()
    }

    pub fn has_send_le_acl_capability(&self) -> bool {
        self.acl.has_send_le_acl_capability()
    }

    pub fn has_send_br_edr_acl_capability(&self) -> bool {
        self.acl.has_send_br_edr_acl_capability()
    }
}
