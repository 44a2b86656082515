//! L2CAP signaling channel dispatch.
//!
//! Each tracked link owns one signaling channel: LE-U links signal on CID 0x0005 and
//! allow exactly one command per C-frame, ACL-U links signal on CID 0x0001 and may pack
//! several commands into one C-frame. Parsed commands are routed to handlers through an
//! [`L2capChannelManager`]. Anything that cannot be parsed or has no handler is reported
//! as not consumed and is forwarded to the host untouched.
use bt_hci::param::ConnHandle;

use crate::channel_manager::L2capChannelManager;
use crate::codec::{Decode, FixedSize};
use crate::connection::Transport;
use crate::cursor::ReadCursor;
use crate::types::l2cap::{
    L2capHeader, L2capSignalHeader, SignalingCommand, L2CAP_CID_ACL_U_SIGNAL, L2CAP_CID_LE_U_SIGNAL,
};

/// Signaling channel of an LE-U logical link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct LeUSignalingChannel {
    handle: ConnHandle,
}

impl LeUSignalingChannel {
    pub const CID: u16 = L2CAP_CID_LE_U_SIGNAL;

    pub fn new(handle: ConnHandle) -> Self {
        Self { handle }
    }

    /// Handle a complete C-frame, including its basic L2CAP header.
    ///
    /// Returns `true` if the command was consumed.
    pub fn on_pdu_received(&self, manager: &dyn L2capChannelManager, pdu: &[u8]) -> bool {
        let Some(payload) = c_frame_payload(pdu, Self::CID) else {
            debug!("[le-u][conn = {}] malformed c-frame", self.handle.raw());
            return false;
        };

        let Ok(header) = L2capSignalHeader::decode(payload) else {
            debug!("[le-u][conn = {}] c-frame too short for a command", self.handle.raw());
            return false;
        };

        // A C-frame on LE-U carries exactly one command.
        if L2capSignalHeader::SIZE + header.length as usize != payload.len() {
            warn!(
                "[le-u][conn = {}] c-frame of {} bytes does not hold exactly one command of {} bytes",
                self.handle.raw(),
                payload.len(),
                header.length
            );
            return false;
        }

        let Ok(command) = SignalingCommand::decode(payload) else {
            return false;
        };
        handle_l2cap_signaling_command(manager, self.handle, Self::CID, &command)
    }

    /// Fragmented signaling PDUs are not reassembled on LE-U, they are always forwarded.
    pub fn on_fragmented_pdu_received(&self) -> bool {
        warn!(
            "[le-u][conn = {}] fragmented signaling pdu not supported, forwarding",
            self.handle.raw()
        );
        false
    }
}

/// Signaling channel of an ACL-U logical link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct AclUSignalingChannel {
    handle: ConnHandle,
}

impl AclUSignalingChannel {
    pub const CID: u16 = L2CAP_CID_ACL_U_SIGNAL;

    pub fn new(handle: ConnHandle) -> Self {
        Self { handle }
    }

    /// Handle a complete C-frame, including its basic L2CAP header.
    pub fn on_pdu_received(&self, manager: &dyn L2capChannelManager, pdu: &[u8]) -> bool {
        match c_frame_payload(pdu, Self::CID) {
            Some(payload) => self.on_c_frame_payload(manager, payload),
            None => {
                debug!("[acl-u][conn = {}] malformed c-frame", self.handle.raw());
                false
            }
        }
    }

    /// Handle every command in a C-frame payload.
    ///
    /// All commands of one C-frame must agree on whether they are consumed. A C-frame
    /// where some commands are consumed and others are not cannot be partially forwarded
    /// and panics.
    pub fn on_c_frame_payload(&self, manager: &dyn L2capChannelManager, payload: &[u8]) -> bool {
        let mut r = ReadCursor::new(payload);
        let mut verdict: Option<bool> = None;
        while r.available() > 0 {
            let command: SignalingCommand<'_> = match r.read() {
                Ok(command) => command,
                Err(_) => {
                    if verdict == Some(true) {
                        panic!(
                            "[acl-u][conn = {}] unparsable command after consumed commands",
                            self.handle.raw()
                        );
                    }
                    debug!(
                        "[acl-u][conn = {}] unparsable command at offset {}",
                        self.handle.raw(),
                        r.len()
                    );
                    return false;
                }
            };

            let consumed = handle_l2cap_signaling_command(manager, self.handle, Self::CID, &command);
            match verdict {
                None => verdict = Some(consumed),
                Some(v) if v != consumed => {
                    panic!(
                        "[acl-u][conn = {}] mixed consumed and forwarded commands in one c-frame",
                        self.handle.raw()
                    );
                }
                Some(_) => {}
            }
        }
        verdict.unwrap_or(false)
    }
}

/// The signaling channel of a link, selected by its transport.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub enum SignalingChannel {
    LeU(LeUSignalingChannel),
    AclU(AclUSignalingChannel),
}

impl SignalingChannel {
    pub fn new(handle: ConnHandle, transport: Transport) -> Self {
        match transport {
            Transport::Le => SignalingChannel::LeU(LeUSignalingChannel::new(handle)),
            Transport::BrEdr => SignalingChannel::AclU(AclUSignalingChannel::new(handle)),
        }
    }

    pub fn handle(&self) -> ConnHandle {
        match self {
            SignalingChannel::LeU(c) => c.handle,
            SignalingChannel::AclU(c) => c.handle,
        }
    }

    /// Fixed CID the channel listens on.
    pub fn local_cid(&self) -> u16 {
        match self {
            SignalingChannel::LeU(_) => LeUSignalingChannel::CID,
            SignalingChannel::AclU(_) => AclUSignalingChannel::CID,
        }
    }

    pub fn on_pdu_received(&self, manager: &dyn L2capChannelManager, pdu: &[u8]) -> bool {
        match self {
            SignalingChannel::LeU(c) => c.on_pdu_received(manager, pdu),
            SignalingChannel::AclU(c) => c.on_pdu_received(manager, pdu),
        }
    }

    /// A PDU that will arrive in several fragments has started.
    ///
    /// Returns `true` if the fragments should be reassembled for dispatch.
    pub fn on_fragmented_pdu_received(&self) -> bool {
        match self {
            SignalingChannel::LeU(c) => c.on_fragmented_pdu_received(),
            SignalingChannel::AclU(_) => true,
        }
    }
}

/// Returns the payload of a C-frame on `cid` whose declared length matches the buffer.
fn c_frame_payload(pdu: &[u8], cid: u16) -> Option<&[u8]> {
    let mut r = ReadCursor::new(pdu);
    let header: L2capHeader = r.read().ok()?;
    if header.channel != cid || header.length as usize != r.available() {
        return None;
    }
    Some(r.remaining())
}

/// Route one command to the handler of the channel it addresses.
pub(crate) fn handle_l2cap_signaling_command(
    manager: &dyn L2capChannelManager,
    handle: ConnHandle,
    signaling_cid: u16,
    command: &SignalingCommand<'_>,
) -> bool {
    let cid = command.target_cid(signaling_cid);
    match manager.dispatch_signaling_command(handle, cid, command) {
        Some(consumed) => {
            trace!(
                "[signaling][conn = {}] command {} for cid {} consumed: {}",
                handle.raw(),
                command.header.code,
                cid,
                consumed
            );
            consumed
        }
        None => {
            trace!("[signaling][conn = {}] no handler for cid {}", handle.raw(), cid);
            false
        }
    }
}
