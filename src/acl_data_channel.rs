//! ACL data channel.
//!
//! Keeps the proxy's share of the controller's ACL buffers, tracks the ACL links it
//! sees being established and reassembles signaling PDUs so registered handlers get to
//! see them before the host does.
//!
//! The connection table and the credit pools have separate locks. When both are needed
//! the connection table is always locked first.
use core::cell::RefCell;
use core::ops::Range;

use bt_hci::param::ConnHandle;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::channel_manager::L2capChannelManager;
use crate::codec::{self, Decode, Encode, FixedSize};
use crate::config;
use crate::connection::{AclConnection, Direction, Transport};
use crate::credits::{CreditPools, Credits, SendCredit};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::fmt::Bytes;
use crate::packet_pool::{Allocator, Packet};
use crate::recombination::MultiBufWriter;
use crate::signaling::SignalingChannel;
use crate::transport::HciTransport;
use crate::types::hci::*;
use crate::types::l2cap::{write_c_frame, FlowControlCreditInd, L2capHeader, L2capSignalHeader};
use crate::Error;

type Connections<'d> = heapless::Vec<AclConnection<'d>, { config::MAX_CONNECTIONS }>;

/// What to do with an ACL fragment after recombination bookkeeping.
enum Fragment<'d> {
    /// Not ours, pass it on.
    Forward,
    /// Kept for recombination.
    Held,
    /// The fragment carries a whole signaling PDU.
    Complete(SignalingChannel),
    /// The last fragment of a signaling PDU arrived. The packet holds the PDU behind an
    /// ACL header describing it as a single fragment.
    Recombined(SignalingChannel, Packet<'d>),
    /// The fragment does not fit the PDU being reassembled. The fragments held so far
    /// are passed on first, then this one.
    Abandoned(Held<'d>),
}

/// Fragments of an unfinished PDU behind an ACL header covering just those bytes.
struct Held<'d> {
    pdu: Packet<'d>,
    len: usize,
}

impl Held<'_> {
    fn packet(&self) -> &[u8] {
        &self.pdu.as_ref()[..self.len]
    }
}

pub struct AclDataChannel<'d, M: RawMutex, T: HciTransport> {
    transport: T,
    allocator: &'d dyn Allocator,
    channels: &'d dyn L2capChannelManager,
    connections: Mutex<M, RefCell<Connections<'d>>>,
    credits: Mutex<M, RefCell<CreditPools>>,
}

impl<'d, M: RawMutex, T: HciTransport> AclDataChannel<'d, M, T> {
    /// Create a channel that claims up to `le_to_reserve` LE and `br_edr_to_reserve`
    /// BR/EDR buffers from the controller once it reports its buffer sizes.
    pub fn new(
        transport: T,
        allocator: &'d dyn Allocator,
        channels: &'d dyn L2capChannelManager,
        le_to_reserve: u16,
        br_edr_to_reserve: u16,
    ) -> Self {
        Self {
            transport,
            allocator,
            channels,
            connections: Mutex::new(RefCell::new(heapless::Vec::new())),
            credits: Mutex::new(RefCell::new(CreditPools::new(le_to_reserve, br_edr_to_reserve))),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Forget all connections and reservations.
    pub fn reset(&self) {
        let mut handles: heapless::Vec<ConnHandle, { config::MAX_CONNECTIONS }> = heapless::Vec::new();
        self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            for conn in connections.iter() {
                let _ = handles.push(conn.handle());
            }
            connections.clear();
            self.credits.lock(|credits| credits.borrow_mut().reset());
        });
        info!("[acl] reset, dropped {} connections", handles.len());
        for handle in handles {
            self.channels.disconnected(handle);
        }
    }

    /// Reserve BR/EDR credits from an HCI_Read_Buffer_Size Command Complete event and
    /// rewrite the event so the host only sees what is left.
    pub fn process_read_buffer_size_command_complete_event(&self, event: &mut [u8]) -> Result<(), Error> {
        let params = command_complete_return(event, &[OPCODE_READ_BUFFER_SIZE])?;
        let ret = ReadBufferSizeReturn::decode(&event[params.clone()])?;
        if ret.status != STATUS_SUCCESS {
            debug!("[acl] read buffer size failed with status {}", ret.status);
            return Ok(());
        }

        let controller_max = ret.total_num_acl_data_packets;
        let host_max = self
            .credits
            .lock(|credits| credits.borrow_mut().get_mut(Transport::BrEdr).reserve(controller_max));
        info!(
            "[acl] reserved {} of {} br/edr acl buffers",
            controller_max - host_max,
            controller_max
        );

        let at = params.start + ReadBufferSizeReturn::TOTAL_NUM_ACL_OFFSET;
        WriteCursor::new(&mut event[at..]).write(host_max)?;
        Ok(())
    }

    /// Reserve LE credits from an HCI_LE_Read_Buffer_Size (V1 or V2) Command Complete
    /// event and rewrite the event so the host only sees what is left.
    pub fn process_le_read_buffer_size_command_complete_event(&self, event: &mut [u8]) -> Result<(), Error> {
        let params = command_complete_return(
            event,
            &[OPCODE_LE_READ_BUFFER_SIZE_V1, OPCODE_LE_READ_BUFFER_SIZE_V2],
        )?;
        let ret = LeReadBufferSizeReturn::decode(&event[params.clone()])?;
        if ret.status != STATUS_SUCCESS {
            debug!("[acl] le read buffer size failed with status {}", ret.status);
            return Ok(());
        }

        if ret.le_acl_data_packet_length == 0 {
            error!("[acl] controller shares br/edr buffers with le, not reserving le credits");
            return Ok(());
        }

        let controller_max = ret.total_num_le_acl_data_packets;
        let host_max = self
            .credits
            .lock(|credits| credits.borrow_mut().get_mut(Transport::Le).reserve(controller_max as u16));
        info!(
            "[acl] reserved {} of {} le acl buffers",
            controller_max as u16 - host_max,
            controller_max
        );

        let at = params.start + LeReadBufferSizeReturn::TOTAL_NUM_LE_ACL_OFFSET;
        WriteCursor::new(&mut event[at..]).write(host_max as u8)?;
        Ok(())
    }

    /// Reclaim credits for proxy packets from an HCI_Number_Of_Completed_Packets event.
    ///
    /// The event is rewritten in place so it only reports packets the host sent. Returns
    /// the length of the rewritten event, or `None` if nothing is left for the host.
    pub fn process_number_of_completed_packets_event(&self, event: &mut [u8]) -> Result<Option<usize>, Error> {
        let params = event_params(event, EVENT_NUMBER_OF_COMPLETED_PACKETS)?;
        let mut r = ReadCursor::new(params);
        let num_handles: u8 = r.read()?;
        let num_handles = num_handles as usize;
        if r.available() < num_handles * CompletedPackets::SIZE {
            return Err(codec::Error::InsufficientSpace.into());
        }

        let entries = EventHeader::SIZE + 1;
        let mut kept = 0;
        self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            self.credits.lock(|credits| {
                let mut credits = credits.borrow_mut();
                for i in 0..num_handles {
                    let mut entry = CompletedPackets::decode(&event[entries + i * CompletedPackets::SIZE..])?;
                    let mut completed = 0;
                    match entry.conn_handle() {
                        Ok(handle) => match connections.iter_mut().find(|c| c.handle() == handle) {
                            Some(conn) => {
                                completed = conn.complete_pending(entry.num_completed_packets);
                                credits.get_mut(conn.transport()).mark_completed(completed);
                                entry.num_completed_packets -= completed;
                            }
                            None => trace!("[acl] completed packets for untracked conn {}", handle.raw()),
                        },
                        Err(_) => debug!("[acl] completed packets for invalid handle {}", entry.handle),
                    }

                    if completed > 0 && entry.num_completed_packets == 0 {
                        continue;
                    }
                    let at = entries + kept * CompletedPackets::SIZE;
                    entry.encode(&mut event[at..at + CompletedPackets::SIZE])?;
                    kept += 1;
                }
                Ok::<(), Error>(())
            })
        })?;

        if kept == 0 && num_handles > 0 {
            return Ok(None);
        }
        event[EventHeader::SIZE] = kept as u8;
        event[1] = (1 + kept * CompletedPackets::SIZE) as u8;
        Ok(Some(entries + kept * CompletedPackets::SIZE))
    }

    /// Reclaim credits, then forward whatever is left of the event to the host.
    pub fn handle_number_of_completed_packets_event(&self, event: &mut [u8]) {
        match self.process_number_of_completed_packets_event(event) {
            Ok(Some(len)) => self.transport.send_to_host(HciMessageType::Event, &event[..len]),
            Ok(None) => trace!("[acl] all completed packets belonged to the proxy"),
            Err(e) => {
                warn!("[acl] malformed number of completed packets event: {:?}", e);
                self.transport.send_to_host(HciMessageType::Event, event);
            }
        }
    }

    /// Stop tracking a link on HCI_Disconnection_Complete, returning its in flight
    /// credits to the pool.
    pub fn process_disconnection_complete_event(&self, event: &[u8]) -> Result<(), Error> {
        let params = event_params(event, EVENT_DISCONNECTION_COMPLETE)?;
        let disconnect = DisconnectionComplete::decode(params)?;
        if disconnect.status != STATUS_SUCCESS {
            return Ok(());
        }

        let handle = disconnect.handle;
        let released = self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            let idx = connections.iter().position(|c| c.handle() == handle)?;
            let mut conn = connections.swap_remove(idx);
            let pending = conn.complete_pending(conn.num_pending_packets());
            self.credits
                .lock(|credits| credits.borrow_mut().get_mut(conn.transport()).mark_completed(pending));
            conn.end_recombination(Direction::ToHost);
            conn.end_recombination(Direction::ToController);
            Some(pending)
        });

        match released {
            Some(pending) => debug!(
                "[acl] conn {} disconnected, reason {}, released {} credits",
                handle.raw(),
                disconnect.reason,
                pending
            ),
            None => trace!("[acl] untracked conn {} disconnected", handle.raw()),
        }
        self.channels.disconnected(handle);
        Ok(())
    }

    pub fn handle_disconnection_complete_event(&self, event: &[u8]) {
        if let Err(e) = self.process_disconnection_complete_event(event) {
            warn!("[acl] malformed disconnection complete event: {:?}", e);
        }
        self.transport.send_to_host(HciMessageType::Event, event);
    }

    /// Track a BR/EDR ACL link from HCI_Connection_Complete.
    pub fn process_connection_complete_event(&self, event: &[u8]) -> Result<(), Error> {
        let params = event_params(event, EVENT_CONNECTION_COMPLETE)?;
        let complete = ConnectionComplete::decode(params)?;
        if complete.status != STATUS_SUCCESS {
            return Ok(());
        }
        if complete.link_type != LINK_TYPE_ACL {
            trace!("[acl] ignoring link type {}", complete.link_type);
            return Ok(());
        }
        self.create_acl_connection(complete.handle, Transport::BrEdr)
    }

    pub fn handle_connection_complete_event(&self, event: &[u8]) {
        if let Err(e) = self.process_connection_complete_event(event) {
            warn!("[acl] not tracking br/edr connection: {:?}", e);
        }
        self.transport.send_to_host(HciMessageType::Event, event);
    }

    pub fn handle_le_connection_complete_event(&self, event: &[u8]) {
        self.handle_le_meta_connection_complete(event, LE_CONNECTION_COMPLETE);
    }

    pub fn handle_le_enhanced_connection_complete_v1_event(&self, event: &[u8]) {
        self.handle_le_meta_connection_complete(event, LE_ENHANCED_CONNECTION_COMPLETE_V1);
    }

    pub fn handle_le_enhanced_connection_complete_v2_event(&self, event: &[u8]) {
        self.handle_le_meta_connection_complete(event, LE_ENHANCED_CONNECTION_COMPLETE_V2);
    }

    fn handle_le_meta_connection_complete(&self, event: &[u8], subevent: u8) {
        if let Err(e) = self.process_le_connection_complete(event, subevent) {
            warn!("[acl] not tracking le connection: {:?}", e);
        }
        self.transport.send_to_host(HciMessageType::Event, event);
    }

    fn process_le_connection_complete(&self, event: &[u8], subevent: u8) -> Result<(), Error> {
        let params = event_params(event, EVENT_LE_META)?;
        let mut r = ReadCursor::new(params);
        let code: u8 = r.read()?;
        if code != subevent {
            return Err(Error::InvalidArgument);
        }
        let header: ConnectionCompleteHeader = r.read()?;
        if header.status != STATUS_SUCCESS {
            return Ok(());
        }
        self.create_acl_connection(header.handle, Transport::Le)
    }

    /// Start tracking a link.
    pub fn create_acl_connection(&self, handle: ConnHandle, transport: Transport) -> Result<(), Error> {
        self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            if connections.iter().any(|c| c.handle() == handle) {
                return Err(Error::AlreadyExists);
            }
            connections
                .push(AclConnection::new(handle, transport))
                .map_err(|_| Error::ResourceExhausted)?;
            debug!("[acl] tracking {:?} conn {}", transport, handle.raw());
            Ok(())
        })
    }

    /// Signaling channel of `handle`, if it listens on `local_cid`.
    pub fn find_signaling_channel(&self, handle: ConnHandle, local_cid: u16) -> Option<SignalingChannel> {
        self.connections.lock(|connections| {
            connections
                .borrow()
                .iter()
                .find(|c| c.handle() == handle)
                .map(|c| c.signaling_channel())
                .filter(|s| s.local_cid() == local_cid)
        })
    }

    pub fn is_tracked(&self, handle: ConnHandle) -> bool {
        self.connections
            .lock(|connections| connections.borrow().iter().any(|c| c.handle() == handle))
    }

    /// Proxy packets in flight on `handle`, if the link is tracked.
    pub fn num_pending_packets(&self, handle: ConnHandle) -> Option<u16> {
        self.connections.lock(|connections| {
            connections
                .borrow()
                .iter()
                .find(|c| c.handle() == handle)
                .map(|c| c.num_pending_packets())
        })
    }

    /// Take a credit to send one packet on `transport`.
    pub fn reserve_send_credit(&self, transport: Transport) -> Option<SendCredit<'_, M>> {
        SendCredit::reserve(&self.credits, transport)
    }

    /// Send an ACL packet to the controller using a previously reserved credit.
    ///
    /// Returns `NotFound` if the packet's connection is not tracked and `InvalidArgument`
    /// if the packet is malformed or the credit belongs to another transport or channel,
    /// in that order. The credit is returned to its pool on error.
    pub fn send_acl(&self, packet: &[u8], mut credit: SendCredit<'_, M>) -> Result<(), Error> {
        let (header, _) = AclHeader::split(packet).map_err(|_| Error::InvalidArgument)?;
        self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            let conn = connections
                .iter_mut()
                .find(|c| c.handle() == header.handle)
                .ok_or(Error::NotFound)?;
            if !credit.is_from(&self.credits) || conn.transport() != credit.transport() {
                return Err(Error::InvalidArgument);
            }
            conn.add_pending(1);
            credit.mark_used();
            Ok(())
        })?;
        self.transport.send_to_controller(HciMessageType::Data, packet);
        Ok(())
    }

    /// Send an L2CAP Flow Control Credit Indication for `cid` on the signaling channel
    /// of `handle`.
    pub fn send_flow_control_credit_ind(
        &self,
        handle: ConnHandle,
        identifier: u8,
        cid: u16,
        credits: u16,
    ) -> Result<(), Error> {
        let (transport, signaling_cid) = self
            .connections
            .lock(|connections| {
                connections
                    .borrow()
                    .iter()
                    .find(|c| c.handle() == handle)
                    .map(|c| (c.transport(), c.signaling_channel().local_cid()))
            })
            .ok_or(Error::NotFound)?;
        let credit = self.reserve_send_credit(transport).ok_or(Error::Unavailable)?;

        let mut buf =
            [0; AclHeader::SIZE + L2capHeader::SIZE + L2capSignalHeader::SIZE + FlowControlCreditInd::SIZE];
        let mut w = WriteCursor::new(&mut buf);
        let (mut acl, mut frame) = w.split(AclHeader::SIZE)?;
        write_c_frame(&mut frame, signaling_cid, identifier, &FlowControlCreditInd { cid, credits })?;
        let length = frame.len();
        acl.write(AclHeader {
            handle,
            boundary: BoundaryFlag::FirstNonFlushable,
            broadcast: 0,
            length: length as u16,
        })?;

        self.send_acl(&buf[..AclHeader::SIZE + length], credit)
    }

    pub fn credits(&self, transport: Transport) -> Credits {
        self.credits.lock(|credits| *credits.borrow().get(transport))
    }

    pub fn num_free_le_acl_packets(&self) -> u16 {
        self.credits(Transport::Le).remaining()
    }

    pub fn num_free_br_edr_acl_packets(&self) -> u16 {
        self.credits(Transport::BrEdr).remaining()
    }

    pub fn has_send_le_acl_capability(&self) -> bool {
        self.credits(Transport::Le).has_send_capability()
    }

    pub fn has_send_br_edr_acl_capability(&self) -> bool {
        self.credits(Transport::BrEdr).has_send_capability()
    }

    /// Handle ACL data from the controller.
    ///
    /// Signaling PDUs on tracked links are dispatched before they reach the host and are
    /// dropped if consumed. Fragments of a PDU being reassembled are held until the PDU is
    /// complete and then forwarded as one packet if not consumed.
    pub fn handle_acl_data(&self, packet: &[u8]) {
        let (header, payload) = match AclHeader::split(packet) {
            Ok(split) => split,
            Err(e) => {
                debug!("[acl] forwarding malformed acl packet {:?}: {:?}", Bytes(packet), e);
                self.transport.send_to_host(HciMessageType::Data, packet);
                return;
            }
        };

        if header.boundary.is_first() {
            if let Some(held) = self.abandon_recombination(Direction::ToHost, header.handle) {
                self.transport.send_to_host(HciMessageType::Data, held.packet());
            }
        }

        match self.recombine(Direction::ToHost, &header, payload) {
            Fragment::Forward => self.transport.send_to_host(HciMessageType::Data, packet),
            Fragment::Held => {}
            Fragment::Abandoned(held) => {
                self.transport.send_to_host(HciMessageType::Data, held.packet());
                self.transport.send_to_host(HciMessageType::Data, packet);
            }
            Fragment::Complete(signaling) => {
                if !signaling.on_pdu_received(self.channels, payload) {
                    self.transport.send_to_host(HciMessageType::Data, packet);
                }
            }
            Fragment::Recombined(signaling, pdu) => {
                let pdu = pdu.as_ref();
                if !signaling.on_pdu_received(self.channels, &pdu[AclHeader::SIZE..]) {
                    self.transport.send_to_host(HciMessageType::Data, pdu);
                }
            }
        }
    }

    /// Handle ACL data from the host.
    ///
    /// Signaling PDUs are shown to their handlers, but host traffic is always forwarded
    /// to the controller since it is sent on the host's own credits.
    pub fn handle_acl_from_host(&self, packet: &[u8]) {
        if let Ok((header, payload)) = AclHeader::split(packet) {
            if header.boundary.is_first() {
                self.abandon_recombination(Direction::ToController, header.handle);
            }
            match self.recombine(Direction::ToController, &header, payload) {
                Fragment::Complete(signaling) => {
                    signaling.on_pdu_received(self.channels, payload);
                }
                Fragment::Recombined(signaling, pdu) => {
                    signaling.on_pdu_received(self.channels, &pdu.as_ref()[AclHeader::SIZE..]);
                }
                Fragment::Forward | Fragment::Held | Fragment::Abandoned(_) => {}
            }
        }
        self.transport.send_to_controller(HciMessageType::Data, packet);
    }

    /// Drop the unfinished PDU on `handle` in `direction` because a new one starts,
    /// returning the fragments that were held back.
    fn abandon_recombination(&self, direction: Direction, handle: ConnHandle) -> Option<Held<'d>> {
        let writer = self.connections.lock(|connections| {
            connections
                .borrow_mut()
                .iter_mut()
                .find(|c| c.handle() == handle)
                .and_then(|c| c.abandon_recombination(direction))
        })?;
        warn!(
            "[acl][conn = {}] new pdu before previous {:?} pdu was complete",
            handle.raw(),
            direction
        );
        held_fragments(writer)
    }

    fn recombine(&self, direction: Direction, header: &AclHeader, payload: &[u8]) -> Fragment<'d> {
        self.connections.lock(|connections| {
            let mut connections = connections.borrow_mut();
            let Some(conn) = connections.iter_mut().find(|c| c.handle() == header.handle) else {
                return Fragment::Forward;
            };
            let signaling = conn.signaling_channel();

            if !header.boundary.is_first() {
                if !conn.is_recombining(direction) {
                    return Fragment::Forward;
                }
                return match conn.recombine_fragment(direction, payload) {
                    Ok(None) => Fragment::Held,
                    Ok(Some(pdu)) => Fragment::Recombined(signaling, pdu),
                    Err(e) => {
                        warn!(
                            "[acl][conn = {}] dropping {:?} recombination: {:?}",
                            header.handle.raw(),
                            direction,
                            e
                        );
                        match conn.abandon_recombination(direction).and_then(held_fragments) {
                            Some(held) => Fragment::Abandoned(held),
                            None => Fragment::Forward,
                        }
                    }
                };
            }

            let Ok(l2cap) = L2capHeader::decode(payload) else {
                return Fragment::Forward;
            };
            if l2cap.channel != signaling.local_cid() {
                return Fragment::Forward;
            }
            let pdu_len = L2capHeader::SIZE + l2cap.length as usize;
            if payload.len() >= pdu_len {
                return Fragment::Complete(signaling);
            }
            if !signaling.on_fragmented_pdu_received() {
                return Fragment::Forward;
            }

            match start_acl_recombination(conn, direction, self.allocator, header, pdu_len, payload) {
                Ok(()) => Fragment::Held,
                Err(e) => {
                    warn!(
                        "[acl][conn = {}] unable to recombine {} byte pdu: {:?}",
                        header.handle.raw(),
                        pdu_len,
                        e
                    );
                    conn.end_recombination(direction);
                    Fragment::Forward
                }
            }
        })
    }
}

/// Start recombining a PDU of `pdu_len` bytes whose first fragment is `payload`.
///
/// The buffer starts with an ACL header so that the recombined PDU can be sent on as a
/// single packet.
fn start_acl_recombination<'d>(
    conn: &mut AclConnection<'d>,
    direction: Direction,
    allocator: &'d dyn Allocator,
    first: &AclHeader,
    pdu_len: usize,
    payload: &[u8],
) -> Result<(), Error> {
    let length = u16::try_from(pdu_len).map_err(|_| Error::InvalidArgument)?;
    if AclHeader::SIZE + pdu_len > allocator.mtu() {
        debug!("[acl] {} byte pdu exceeds allocator mtu {}", pdu_len, allocator.mtu());
        return Err(Error::ResourceExhausted);
    }
    let mut header = [0; AclHeader::SIZE];
    AclHeader {
        handle: first.handle,
        boundary: first.boundary,
        broadcast: first.broadcast,
        length,
    }
    .encode(&mut header)?;

    conn.start_recombination(direction, allocator, AclHeader::SIZE + pdu_len)?;
    conn.recombine_fragment(direction, &header)?;
    conn.recombine_fragment(direction, payload)?;
    Ok(())
}

/// Rewrite the ACL header of a partly collected PDU to cover only the bytes held.
fn held_fragments(mut writer: MultiBufWriter<'_>) -> Option<Held<'_>> {
    let len = writer.len();
    let mut pdu = writer.take()?;
    let mut header = AclHeader::decode(pdu.as_ref()).ok()?;
    header.length = u16::try_from(len.checked_sub(AclHeader::SIZE)?).ok()?;
    if header.length == 0 {
        return None;
    }
    header.encode(&mut pdu.as_mut()[..AclHeader::SIZE]).ok()?;
    Some(Held { pdu, len })
}

/// Parameters of an event with the given code.
fn event_params(event: &[u8], code: u8) -> Result<&[u8], Error> {
    let (header, params) = EventHeader::split(event)?;
    if header.code != code {
        return Err(Error::InvalidArgument);
    }
    Ok(params)
}

/// Location of the return parameters of a Command Complete event for one of `opcodes`.
fn command_complete_return(event: &[u8], opcodes: &[u16]) -> Result<Range<usize>, Error> {
    let params = event_params(event, EVENT_COMMAND_COMPLETE)?;
    let complete = CommandComplete::decode(params)?;
    if !opcodes.contains(&complete.opcode) {
        return Err(Error::InvalidArgument);
    }
    Ok(EventHeader::SIZE + CommandComplete::SIZE..EventHeader::SIZE + params.len())
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use std::vec::Vec;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;
    use crate::channel_manager::{ChannelManager, SignalingHandler};
    use crate::packet_pool::PacketPool;
    use crate::types::l2cap::{SignalingCommand, L2CAP_CID_ACL_U_SIGNAL, L2CAP_CID_LE_U_SIGNAL};

    #[derive(Default)]
    struct Recorder {
        to_host: RefCell<Vec<(HciMessageType, Vec<u8>)>>,
        to_controller: RefCell<Vec<(HciMessageType, Vec<u8>)>>,
    }

    impl Recorder {
        fn host(&self) -> Vec<(HciMessageType, Vec<u8>)> {
            self.to_host.take()
        }

        fn controller(&self) -> Vec<(HciMessageType, Vec<u8>)> {
            self.to_controller.take()
        }
    }

    impl HciTransport for Recorder {
        fn send_to_host(&self, kind: HciMessageType, packet: &[u8]) {
            self.to_host.borrow_mut().push((kind, packet.to_vec()));
        }

        fn send_to_controller(&self, kind: HciMessageType, packet: &[u8]) {
            self.to_controller.borrow_mut().push((kind, packet.to_vec()));
        }
    }

    struct Handler {
        consume: bool,
        calls: Cell<usize>,
    }

    impl Handler {
        fn new(consume: bool) -> Self {
            Self {
                consume,
                calls: Cell::new(0),
            }
        }
    }

    impl SignalingHandler for Handler {
        fn handle_signaling_command(&self, _handle: ConnHandle, _command: &SignalingCommand<'_>) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.consume
        }
    }

    type Channel<'d> = AclDataChannel<'d, NoopRawMutex, &'d Recorder>;

    fn le_read_buffer_size(total: u8) -> Vec<u8> {
        std::vec![0x0e, 0x07, 0x01, 0x02, 0x20, 0x00, 0xfb, 0x00, total]
    }

    fn read_buffer_size(total: u16) -> Vec<u8> {
        let t = total.to_le_bytes();
        std::vec![0x0e, 0x0b, 0x01, 0x05, 0x10, 0x00, 0xfd, 0x03, 0x40, t[0], t[1], 0x08, 0x00]
    }

    fn le_connection_complete(handle: u16) -> Vec<u8> {
        let h = handle.to_le_bytes();
        let mut event = std::vec![0x3e, 0x13, LE_CONNECTION_COMPLETE, 0x00, h[0], h[1]];
        event.extend_from_slice(&[0; 15]);
        event
    }

    fn connection_complete(handle: u16, link_type: u8) -> Vec<u8> {
        let h = handle.to_le_bytes();
        std::vec![0x03, 0x0b, 0x00, h[0], h[1], 1, 2, 3, 4, 5, 6, link_type, 0x00]
    }

    fn disconnection_complete(handle: u16) -> Vec<u8> {
        let h = handle.to_le_bytes();
        std::vec![0x05, 0x04, 0x00, h[0], h[1], 0x13]
    }

    fn completed_packets(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut event = std::vec![0x13, (1 + entries.len() * 4) as u8, entries.len() as u8];
        for (handle, count) in entries {
            event.extend_from_slice(&handle.to_le_bytes());
            event.extend_from_slice(&count.to_le_bytes());
        }
        event
    }

    fn acl(handle: u16, boundary: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&(handle | (boundary << 12)).to_le_bytes());
        packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    fn send_le(channel: &Channel<'_>, handle: u16) -> Result<(), Error> {
        let credit = channel.reserve_send_credit(Transport::Le).unwrap();
        channel.send_acl(&acl(handle, 0b00, &[0, 0, 0x40, 0]), credit)
    }

    #[test]
    fn le_buffer_size_rewritten_for_host() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);

        let mut event = le_read_buffer_size(16);
        channel.process_le_read_buffer_size_command_complete_event(&mut event).unwrap();
        assert_eq!(event[8], 12);
        assert_eq!(channel.num_free_le_acl_packets(), 4);
        assert_eq!(channel.num_free_br_edr_acl_packets(), 0);

        let mut credits = Vec::new();
        for _ in 0..4 {
            credits.push(channel.reserve_send_credit(Transport::Le).unwrap());
        }
        assert!(channel.reserve_send_credit(Transport::Le).is_none());
        drop(credits.pop());
        assert!(channel.reserve_send_credit(Transport::Le).is_some());
    }

    #[test]
    fn br_edr_buffer_size_rewritten_for_host() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 3);

        let mut event = read_buffer_size(0x0108);
        channel.process_read_buffer_size_command_complete_event(&mut event).unwrap();
        assert_eq!(&event[9..11], &0x0105u16.to_le_bytes());
        assert_eq!(channel.num_free_br_edr_acl_packets(), 3);
        assert!(channel.has_send_br_edr_acl_capability());
        assert!(!channel.has_send_le_acl_capability());
    }

    #[test]
    fn le_buffers_shared_with_br_edr() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);

        let mut event = std::vec![0x0e, 0x07, 0x01, 0x02, 0x20, 0x00, 0x00, 0x00, 0x00];
        channel.process_le_read_buffer_size_command_complete_event(&mut event).unwrap();
        assert_eq!(channel.num_free_le_acl_packets(), 0);
        assert!(!channel.credits(Transport::Le).initialized());
    }

    #[test]
    fn wrong_command_complete() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 4);

        let mut event = le_read_buffer_size(16);
        assert_eq!(
            channel.process_read_buffer_size_command_complete_event(&mut event),
            Err(Error::InvalidArgument)
        );
        let mut event = std::vec![0x0e, 0x04, 0x01, 0x02, 0x20, 0x00];
        assert!(channel.process_le_read_buffer_size_command_complete_event(&mut event).is_err());
    }

    #[test]
    fn send_acl_checks_connection_then_transport() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 2, 2);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(8)).unwrap();
        channel.process_read_buffer_size_command_complete_event(&mut read_buffer_size(8)).unwrap();
        channel.create_acl_connection(ConnHandle::new(0x40), Transport::Le).unwrap();

        // unknown connection with a mismatched credit
        let credit = channel.reserve_send_credit(Transport::BrEdr).unwrap();
        assert_eq!(
            channel.send_acl(&acl(0x41, 0b00, &[0, 0, 0x40, 0]), credit),
            Err(Error::NotFound)
        );

        let credit = channel.reserve_send_credit(Transport::BrEdr).unwrap();
        assert_eq!(
            channel.send_acl(&acl(0x40, 0b00, &[0, 0, 0x40, 0]), credit),
            Err(Error::InvalidArgument)
        );
        assert_eq!(channel.num_free_br_edr_acl_packets(), 2);
        assert!(transport.controller().is_empty());

        send_le(&channel, 0x40).unwrap();
        assert_eq!(channel.num_pending_packets(ConnHandle::new(0x40)), Some(1));
        assert_eq!(channel.num_free_le_acl_packets(), 1);
        assert_eq!(transport.controller().len(), 1);
    }

    #[test]
    fn send_acl_rejects_credit_of_another_channel() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 2, 0);
        let other: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 2, 0);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(8)).unwrap();
        other.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(8)).unwrap();
        channel.create_acl_connection(ConnHandle::new(0x40), Transport::Le).unwrap();

        let credit = other.reserve_send_credit(Transport::Le).unwrap();
        assert_eq!(
            channel.send_acl(&acl(0x40, 0b00, &[0, 0, 0x40, 0]), credit),
            Err(Error::InvalidArgument)
        );
        assert_eq!(other.num_free_le_acl_packets(), 2);
        assert_eq!(channel.num_free_le_acl_packets(), 2);
        assert_eq!(channel.num_pending_packets(ConnHandle::new(0x40)), Some(0));
        assert!(transport.controller().is_empty());
    }

    #[test]
    fn completed_packets_split_between_proxy_and_host() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(10)).unwrap();
        channel.create_acl_connection(ConnHandle::new(1), Transport::Le).unwrap();
        channel.create_acl_connection(ConnHandle::new(2), Transport::Le).unwrap();
        send_le(&channel, 1).unwrap();
        send_le(&channel, 1).unwrap();
        send_le(&channel, 2).unwrap();
        assert_eq!(channel.num_free_le_acl_packets(), 1);

        // conn 1: 2 proxy + 1 host, conn 2: 1 proxy, conn 3: untracked
        let mut event = completed_packets(&[(1, 3), (2, 1), (3, 4)]);
        channel.handle_number_of_completed_packets_event(&mut event);
        assert_eq!(channel.num_free_le_acl_packets(), 4);
        assert_eq!(channel.num_pending_packets(ConnHandle::new(1)), Some(0));
        assert_eq!(
            transport.host(),
            [(HciMessageType::Event, completed_packets(&[(1, 1), (3, 4)]))]
        );
    }

    #[test]
    fn completed_packets_all_for_proxy_suppressed() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(10)).unwrap();
        channel.create_acl_connection(ConnHandle::new(1), Transport::Le).unwrap();
        send_le(&channel, 1).unwrap();

        let mut event = completed_packets(&[(1, 1)]);
        channel.handle_number_of_completed_packets_event(&mut event);
        assert!(transport.host().is_empty());
        assert_eq!(channel.num_free_le_acl_packets(), 4);

        // nothing pending anymore, so the host gets it
        let mut event = completed_packets(&[(1, 1)]);
        channel.handle_number_of_completed_packets_event(&mut event);
        assert_eq!(transport.host(), [(HciMessageType::Event, completed_packets(&[(1, 1)]))]);
        assert_eq!(channel.num_free_le_acl_packets(), 4);
    }

    #[test]
    fn completed_packets_truncated() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);

        // claims two entries, carries one
        let mut event = std::vec![0x13, 0x05, 0x02, 0x01, 0x00, 0x01, 0x00];
        channel.handle_number_of_completed_packets_event(&mut event);
        assert_eq!(transport.host(), [(HciMessageType::Event, event)]);
    }

    #[test]
    fn disconnect_releases_credits() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(10)).unwrap();
        channel.handle_le_connection_complete_event(&le_connection_complete(0x40));
        send_le(&channel, 0x40).unwrap();
        send_le(&channel, 0x40).unwrap();
        send_le(&channel, 0x40).unwrap();
        assert_eq!(channel.num_free_le_acl_packets(), 1);
        transport.host();

        let event = disconnection_complete(0x40);
        channel.handle_disconnection_complete_event(&event);
        assert_eq!(channel.num_free_le_acl_packets(), 4);
        assert!(!channel.is_tracked(ConnHandle::new(0x40)));
        assert_eq!(transport.host(), [(HciMessageType::Event, event)]);
    }

    #[test]
    fn disconnect_of_untracked_link_is_forwarded() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);

        let event = disconnection_complete(0x99);
        channel.handle_disconnection_complete_event(&event);
        assert_eq!(transport.host(), [(HciMessageType::Event, event)]);
    }

    #[test]
    fn disconnect_drops_channel_registrations() {
        let transport = Recorder::default();
        let handler = Handler::new(true);
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        manager.register(ConnHandle::new(0x40), 0x40, &handler).unwrap();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);
        channel.create_acl_connection(ConnHandle::new(0x40), Transport::Le).unwrap();

        channel.handle_disconnection_complete_event(&disconnection_complete(0x40));
        assert!(manager.is_empty());
    }

    #[test]
    fn connection_tracking() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 4);

        channel.handle_connection_complete_event(&connection_complete(0x10, LINK_TYPE_ACL));
        // sco link
        channel.handle_connection_complete_event(&connection_complete(0x11, 0x00));
        channel.handle_le_enhanced_connection_complete_v1_event(&le_connection_complete(0x12));
        assert_eq!(transport.host().len(), 3);

        assert!(channel.is_tracked(ConnHandle::new(0x10)));
        assert!(!channel.is_tracked(ConnHandle::new(0x11)));
        // subevent code does not match the handler
        assert!(!channel.is_tracked(ConnHandle::new(0x12)));

        assert_eq!(
            channel.create_acl_connection(ConnHandle::new(0x10), Transport::Le),
            Err(Error::AlreadyExists)
        );
        assert_eq!(
            channel
                .find_signaling_channel(ConnHandle::new(0x10), L2CAP_CID_ACL_U_SIGNAL)
                .map(|s| s.handle()),
            Some(ConnHandle::new(0x10))
        );
        assert!(channel
            .find_signaling_channel(ConnHandle::new(0x10), L2CAP_CID_LE_U_SIGNAL)
            .is_none());
    }

    #[test]
    fn connection_table_full() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 4);

        for handle in 0..config::MAX_CONNECTIONS as u16 {
            channel.create_acl_connection(ConnHandle::new(handle), Transport::Le).unwrap();
        }
        assert_eq!(
            channel.create_acl_connection(ConnHandle::new(0x100), Transport::Le),
            Err(Error::ResourceExhausted)
        );

        let event = le_connection_complete(0x100);
        channel.handle_le_connection_complete_event(&event);
        assert_eq!(transport.host(), [(HciMessageType::Event, event)]);
        assert!(!channel.is_tracked(ConnHandle::new(0x100)));
    }

    #[test]
    fn failed_connection_not_tracked() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 4);

        let mut event = le_connection_complete(0x20);
        event[3] = 0x3e;
        channel.handle_le_connection_complete_event(&event);
        assert!(!channel.is_tracked(ConnHandle::new(0x20)));
        assert_eq!(transport.host().len(), 1);
    }

    #[test]
    fn credit_ind_layout() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 1, 0);
        channel.create_acl_connection(ConnHandle::new(0x40), Transport::Le).unwrap();

        assert_eq!(
            channel.send_flow_control_credit_ind(ConnHandle::new(0x40), 1, 0x41, 2),
            Err(Error::Unavailable)
        );

        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(4)).unwrap();
        assert_eq!(
            channel.send_flow_control_credit_ind(ConnHandle::new(0x41), 1, 0x41, 2),
            Err(Error::NotFound)
        );
        channel.send_flow_control_credit_ind(ConnHandle::new(0x40), 1, 0x41, 2).unwrap();
        assert_eq!(
            transport.controller(),
            [(
                HciMessageType::Data,
                std::vec![
                    0x40, 0x00, 0x0c, 0x00, 0x08, 0x00, 0x05, 0x00, 0x16, 0x01, 0x04, 0x00, 0x41, 0x00, 0x02, 0x00
                ]
            )]
        );
        assert_eq!(channel.num_free_le_acl_packets(), 0);
        assert_eq!(
            channel.send_flow_control_credit_ind(ConnHandle::new(0x40), 2, 0x41, 2),
            Err(Error::Unavailable)
        );
    }

    #[test]
    fn fragmented_acl_u_pdu_forwarded_whole() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 0);
        channel.create_acl_connection(ConnHandle::new(0x41), Transport::BrEdr).unwrap();

        // echo request split over two fragments
        let first = acl(0x41, 0b10, &[0x06, 0x00, 0x01, 0x00, 0x08, 0x01]);
        let second = acl(0x41, 0b01, &[0x02, 0x00, 0xaa, 0xbb]);
        channel.handle_acl_data(&first);
        assert!(transport.host().is_empty());
        assert_eq!(pool.available(), 1);

        channel.handle_acl_data(&second);
        assert_eq!(
            transport.host(),
            [(
                HciMessageType::Data,
                acl(
                    0x41,
                    0b10,
                    &[0x06, 0x00, 0x01, 0x00, 0x08, 0x01, 0x02, 0x00, 0xaa, 0xbb]
                )
            )]
        );
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn held_fragments_forwarded_on_new_pdu() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 0);
        channel.create_acl_connection(ConnHandle::new(0x41), Transport::BrEdr).unwrap();

        let first = acl(0x41, 0b10, &[0x06, 0x00, 0x01, 0x00, 0x08, 0x01]);
        channel.handle_acl_data(&first);
        assert!(transport.host().is_empty());

        let data = acl(0x41, 0b10, &[0x04, 0x00, 0x40, 0x00, 1, 2, 3, 4]);
        channel.handle_acl_data(&data);
        assert_eq!(
            transport.host(),
            [(HciMessageType::Data, first), (HciMessageType::Data, data)]
        );
        assert_eq!(pool.available(), 2);

        // no session left for a late continuation
        let late = acl(0x41, 0b01, &[0x02, 0x00, 0xaa, 0xbb]);
        channel.handle_acl_data(&late);
        assert_eq!(transport.host(), [(HciMessageType::Data, late)]);
    }

    #[test]
    fn held_fragments_forwarded_on_overlong_continuation() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 0);
        channel.create_acl_connection(ConnHandle::new(0x41), Transport::BrEdr).unwrap();

        let first = acl(0x41, 0b10, &[0x06, 0x00, 0x01, 0x00, 0x08, 0x01]);
        channel.handle_acl_data(&first);
        assert!(transport.host().is_empty());

        // two bytes more than the l2cap header announced
        let second = acl(0x41, 0b01, &[0x02, 0x00, 0xaa, 0xbb, 0xcc, 0xdd]);
        channel.handle_acl_data(&second);
        assert_eq!(
            transport.host(),
            [(HciMessageType::Data, first), (HciMessageType::Data, second)]
        );
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn pdu_larger_than_pool_mtu_is_forwarded() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 16, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 0);
        channel.create_acl_connection(ConnHandle::new(0x41), Transport::BrEdr).unwrap();

        let first = acl(0x41, 0b10, &[0x20, 0x00, 0x01, 0x00, 0x08, 0x01]);
        channel.handle_acl_data(&first);
        assert_eq!(transport.host(), [(HciMessageType::Data, first)]);
        assert_eq!(pool.available(), 2);

        let second = acl(0x41, 0b01, &[0x1c, 0x00, 0xaa, 0xbb]);
        channel.handle_acl_data(&second);
        assert_eq!(transport.host(), [(HciMessageType::Data, second)]);
    }

    #[test]
    fn host_signaling_is_observed_and_forwarded() {
        let transport = Recorder::default();
        let handler = Handler::new(true);
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        manager.register(ConnHandle::new(0x40), 0x40, &handler).unwrap();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 0, 0);
        channel.create_acl_connection(ConnHandle::new(0x40), Transport::Le).unwrap();

        let packet = acl(
            0x40,
            0b00,
            &[0x08, 0x00, 0x05, 0x00, 0x16, 0x01, 0x04, 0x00, 0x40, 0x00, 0x01, 0x00],
        );
        channel.handle_acl_from_host(&packet);
        assert_eq!(handler.calls.get(), 1);
        assert_eq!(transport.controller(), [(HciMessageType::Data, packet)]);
    }

    #[test]
    fn reset_forgets_everything() {
        let transport = Recorder::default();
        let pool: PacketPool<NoopRawMutex, 64, 2> = PacketPool::new();
        let manager: ChannelManager<'_, NoopRawMutex> = ChannelManager::new();
        let channel: Channel<'_> = AclDataChannel::new(&transport, &pool, &manager, 4, 0);
        channel.process_le_read_buffer_size_command_complete_event(&mut le_read_buffer_size(10)).unwrap();
        channel.create_acl_connection(ConnHandle::new(1), Transport::Le).unwrap();
        send_le(&channel, 1).unwrap();

        channel.reset();
        assert!(!channel.is_tracked(ConnHandle::new(1)));
        assert!(!channel.credits(Transport::Le).initialized());
        assert!(channel.has_send_le_acl_capability());
        assert!(channel.reserve_send_credit(Transport::Le).is_none());

        let mut event = le_read_buffer_size(10);
        channel.process_le_read_buffer_size_command_complete_event(&mut event).unwrap();
        assert_eq!(event[8], 6);
        assert_eq!(channel.num_free_le_acl_packets(), 4);
    }
}
