use std::cell::RefCell;

use trouble_proxy::types::hci::HciMessageType;
use trouble_proxy::HciTransport;

pub type Sent = Vec<(HciMessageType, Vec<u8>)>;

/// Records everything the proxy sends in either direction.
#[derive(Default)]
pub struct RecordingTransport {
    to_host: RefCell<Sent>,
    to_controller: RefCell<Sent>,
}

impl RecordingTransport {
    /// Packets sent to the host since the last call.
    pub fn host(&self) -> Sent {
        self.to_host.take()
    }

    /// Packets sent to the controller since the last call.
    pub fn controller(&self) -> Sent {
        self.to_controller.take()
    }
}

impl HciTransport for RecordingTransport {
    fn send_to_host(&self, kind: HciMessageType, packet: &[u8]) {
        self.to_host.borrow_mut().push((kind, packet.to_vec()));
    }

    fn send_to_controller(&self, kind: HciMessageType, packet: &[u8]) {
        self.to_controller.borrow_mut().push((kind, packet.to_vec()));
    }
}

pub fn le_read_buffer_size_v2(total: u8) -> Vec<u8> {
    // ACL length 251, ISO length 100, 4 ISO buffers
    vec![0x0e, 0x0a, 0x01, 0x60, 0x20, 0x00, 0xfb, 0x00, total, 0x64, 0x00, 0x04]
}

pub fn read_buffer_size(total: u16) -> Vec<u8> {
    let t = total.to_le_bytes();
    vec![0x0e, 0x0b, 0x01, 0x05, 0x10, 0x00, 0xfd, 0x03, 0x40, t[0], t[1], 0x08, 0x00]
}

pub fn le_enhanced_connection_complete_v2(handle: u16) -> Vec<u8> {
    let h = handle.to_le_bytes();
    let mut event = vec![0x3e, 0x22, 0x29, 0x00, h[0], h[1]];
    event.extend_from_slice(&[0; 30]);
    event
}

pub fn le_connection_complete(handle: u16) -> Vec<u8> {
    let h = handle.to_le_bytes();
    let mut event = vec![0x3e, 0x13, 0x01, 0x00, h[0], h[1]];
    event.extend_from_slice(&[0; 15]);
    event
}

pub fn connection_complete(handle: u16) -> Vec<u8> {
    let h = handle.to_le_bytes();
    vec![0x03, 0x0b, 0x00, h[0], h[1], 1, 2, 3, 4, 5, 6, 0x01, 0x00]
}

pub fn disconnection_complete(handle: u16) -> Vec<u8> {
    let h = handle.to_le_bytes();
    vec![0x05, 0x04, 0x00, h[0], h[1], 0x13]
}

pub fn completed_packets(entries: &[(u16, u16)]) -> Vec<u8> {
    let mut event = vec![0x13, (1 + entries.len() * 4) as u8, entries.len() as u8];
    for (handle, count) in entries {
        event.extend_from_slice(&handle.to_le_bytes());
        event.extend_from_slice(&count.to_le_bytes());
    }
    event
}

/// An ACL packet with the given packet boundary flag.
pub fn acl(handle: u16, boundary: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&(handle | (boundary << 12)).to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// An L2CAP basic frame carrying `payload` on `cid`.
pub fn l2cap(cid: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&cid.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A Flow Control Credit Indication command.
pub fn credit_ind(identifier: u8, cid: u16, credits: u16) -> Vec<u8> {
    let mut command = vec![0x16, identifier, 0x04, 0x00];
    command.extend_from_slice(&cid.to_le_bytes());
    command.extend_from_slice(&credits.to_le_bytes());
    command
}
