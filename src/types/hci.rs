//! HCI packet views used by the proxy.
//!
//! Only the fields the proxy inspects or rewrites are decoded, everything else is
//! carried through untouched in the original buffer.
use bt_hci::param::ConnHandle;

use crate::codec::{Decode, Encode, Error, FixedSize};
use crate::cursor::{ReadCursor, WriteCursor};

/// HCI H4 packet indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HciMessageType {
    Command = 0x01,
    Data = 0x02,
    Sync = 0x03,
    Event = 0x04,
    Iso = 0x05,
}

pub(crate) const STATUS_SUCCESS: u8 = 0x00;

// Event codes
pub(crate) const EVENT_CONNECTION_COMPLETE: u8 = 0x03;
pub(crate) const EVENT_DISCONNECTION_COMPLETE: u8 = 0x05;
pub(crate) const EVENT_COMMAND_COMPLETE: u8 = 0x0E;
pub(crate) const EVENT_NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
pub(crate) const EVENT_LE_META: u8 = 0x3E;

// LE meta subevent codes
pub(crate) const LE_CONNECTION_COMPLETE: u8 = 0x01;
pub(crate) const LE_ENHANCED_CONNECTION_COMPLETE_V1: u8 = 0x0A;
pub(crate) const LE_ENHANCED_CONNECTION_COMPLETE_V2: u8 = 0x29;

// Command opcodes
pub(crate) const OPCODE_RESET: u16 = opcode(0x03, 0x0003);
pub(crate) const OPCODE_READ_BUFFER_SIZE: u16 = opcode(0x04, 0x0005);
pub(crate) const OPCODE_LE_READ_BUFFER_SIZE_V1: u16 = opcode(0x08, 0x0002);
pub(crate) const OPCODE_LE_READ_BUFFER_SIZE_V2: u16 = opcode(0x08, 0x0060);

// Link types reported by HCI_Connection_Complete
pub(crate) const LINK_TYPE_ACL: u8 = 0x01;

const MAX_CONN_HANDLE: u16 = 0x0EFF;

pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) + ocf
}

fn conn_handle(raw: u16) -> Result<ConnHandle, Error> {
    let raw = raw & 0x0FFF;
    if raw > MAX_CONN_HANDLE {
        return Err(Error::InvalidValue);
    }
    Ok(ConnHandle::new(raw))
}

/// Packet boundary flag of an ACL data packet.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFlag {
    FirstNonFlushable,
    Continuing,
    FirstFlushable,
    Complete,
}

impl BoundaryFlag {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => BoundaryFlag::FirstNonFlushable,
            0b01 => BoundaryFlag::Continuing,
            0b10 => BoundaryFlag::FirstFlushable,
            _ => BoundaryFlag::Complete,
        }
    }

    fn bits(self) -> u16 {
        match self {
            BoundaryFlag::FirstNonFlushable => 0b00,
            BoundaryFlag::Continuing => 0b01,
            BoundaryFlag::FirstFlushable => 0b10,
            BoundaryFlag::Complete => 0b11,
        }
    }

    /// Whether this fragment starts a new L2CAP PDU.
    pub fn is_first(self) -> bool {
        matches!(self, BoundaryFlag::FirstNonFlushable | BoundaryFlag::FirstFlushable)
    }
}

/// HCI ACL data packet header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct AclHeader {
    pub handle: ConnHandle,
    pub boundary: BoundaryFlag,
    pub broadcast: u8,
    pub length: u16,
}

impl AclHeader {
    /// Splits an ACL packet into its header and payload, checking the declared length.
    pub fn split(packet: &[u8]) -> Result<(AclHeader, &[u8]), Error> {
        let mut r = ReadCursor::new(packet);
        let header: AclHeader = r.read()?;
        let payload = r.slice(header.length as usize)?;
        Ok((header, payload))
    }
}

impl FixedSize for AclHeader {
    const SIZE: usize = 4;
}

impl Decode<'_> for AclHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let raw: u16 = r.read()?;
        let length: u16 = r.read()?;
        Ok(Self {
            handle: conn_handle(raw)?,
            boundary: BoundaryFlag::from_bits(raw >> 12),
            broadcast: ((raw >> 14) & 0b11) as u8,
            length,
        })
    }
}

impl Encode for AclHeader {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let raw = self.handle.raw() | (self.boundary.bits() << 12) | (((self.broadcast & 0b11) as u16) << 14);
        let mut w = WriteCursor::new(dest);
        w.write(raw)?;
        w.write(self.length)?;
        Ok(())
    }
}

/// HCI event packet header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct EventHeader {
    pub code: u8,
    pub length: u8,
}

impl EventHeader {
    /// Splits an event packet into its header and parameters, checking the declared length.
    pub fn split(packet: &[u8]) -> Result<(EventHeader, &[u8]), Error> {
        let mut r = ReadCursor::new(packet);
        let header: EventHeader = r.read()?;
        let params = r.slice(header.length as usize)?;
        Ok((header, params))
    }
}

impl FixedSize for EventHeader {
    const SIZE: usize = 2;
}

impl Decode<'_> for EventHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            code: r.read()?,
            length: r.read()?,
        })
    }
}

/// HCI command packet header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct CommandHeader {
    pub opcode: u16,
    pub length: u8,
}

impl FixedSize for CommandHeader {
    const SIZE: usize = 3;
}

impl Decode<'_> for CommandHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            opcode: r.read()?,
            length: r.read()?,
        })
    }
}

/// Leading parameters of an HCI_Command_Complete event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete {
    pub num_hci_command_packets: u8,
    pub opcode: u16,
}

impl FixedSize for CommandComplete {
    const SIZE: usize = 3;
}

impl Decode<'_> for CommandComplete {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            num_hci_command_packets: r.read()?,
            opcode: r.read()?,
        })
    }
}

/// Return parameters of HCI_Read_Buffer_Size.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ReadBufferSizeReturn {
    pub status: u8,
    pub acl_data_packet_length: u16,
    pub sync_data_packet_length: u8,
    pub total_num_acl_data_packets: u16,
    pub total_num_sync_data_packets: u16,
}

impl ReadBufferSizeReturn {
    /// Offset of `total_num_acl_data_packets` within the return parameters.
    pub const TOTAL_NUM_ACL_OFFSET: usize = 4;
}

impl FixedSize for ReadBufferSizeReturn {
    const SIZE: usize = 8;
}

impl Decode<'_> for ReadBufferSizeReturn {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            status: r.read()?,
            acl_data_packet_length: r.read()?,
            sync_data_packet_length: r.read()?,
            total_num_acl_data_packets: r.read()?,
            total_num_sync_data_packets: r.read()?,
        })
    }
}

/// Return parameters shared by HCI_LE_Read_Buffer_Size V1 and V2.
///
/// V2 appends the ISO buffer parameters, which the proxy leaves alone.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct LeReadBufferSizeReturn {
    pub status: u8,
    pub le_acl_data_packet_length: u16,
    pub total_num_le_acl_data_packets: u8,
}

impl LeReadBufferSizeReturn {
    /// Offset of `total_num_le_acl_data_packets` within the return parameters.
    pub const TOTAL_NUM_LE_ACL_OFFSET: usize = 3;
}

impl FixedSize for LeReadBufferSizeReturn {
    const SIZE: usize = 4;
}

impl Decode<'_> for LeReadBufferSizeReturn {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            status: r.read()?,
            le_acl_data_packet_length: r.read()?,
            total_num_le_acl_data_packets: r.read()?,
        })
    }
}

/// Leading parameters of every connection complete flavour the proxy tracks.
///
/// HCI_Connection_Complete, HCI_LE_Connection_Complete and both
/// HCI_LE_Enhanced_Connection_Complete versions start with status and handle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionCompleteHeader {
    pub status: u8,
    pub handle: ConnHandle,
}

impl FixedSize for ConnectionCompleteHeader {
    const SIZE: usize = 3;
}

impl Decode<'_> for ConnectionCompleteHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let status = r.read()?;
        let handle: u16 = r.read()?;
        Ok(Self {
            status,
            handle: conn_handle(handle)?,
        })
    }
}

/// Parameters of HCI_Connection_Complete (BR/EDR).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionComplete {
    pub status: u8,
    pub handle: ConnHandle,
    pub bd_addr: [u8; 6],
    pub link_type: u8,
    pub encryption_enabled: u8,
}

impl FixedSize for ConnectionComplete {
    const SIZE: usize = 11;
}

impl Decode<'_> for ConnectionComplete {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let ConnectionCompleteHeader { status, handle } = r.read()?;
        let mut bd_addr = [0; 6];
        bd_addr.copy_from_slice(r.slice(6)?);
        Ok(Self {
            status,
            handle,
            bd_addr,
            link_type: r.read()?,
            encryption_enabled: r.read()?,
        })
    }
}

/// Parameters of HCI_Disconnection_Complete.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub handle: ConnHandle,
    pub reason: u8,
}

impl FixedSize for DisconnectionComplete {
    const SIZE: usize = 4;
}

impl Decode<'_> for DisconnectionComplete {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let ConnectionCompleteHeader { status, handle } = r.read()?;
        Ok(Self {
            status,
            handle,
            reason: r.read()?,
        })
    }
}

/// One (handle, count) entry of HCI_Number_Of_Completed_Packets.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedPackets {
    pub handle: u16,
    pub num_completed_packets: u16,
}

impl CompletedPackets {
    pub fn conn_handle(&self) -> Result<ConnHandle, Error> {
        conn_handle(self.handle)
    }
}

impl FixedSize for CompletedPackets {
    const SIZE: usize = 4;
}

impl Decode<'_> for CompletedPackets {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            handle: r.read()?,
            num_completed_packets: r.read()?,
        })
    }
}

impl Encode for CompletedPackets {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.handle)?;
        w.write(self.num_completed_packets)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_header_decode() {
        // handle 0x040, first flushable, 5 bytes
        let packet = [0x40, 0x20, 0x05, 0x00, 1, 2, 3, 4, 5];
        let (header, payload) = AclHeader::split(&packet).unwrap();
        assert_eq!(header.handle, ConnHandle::new(0x40));
        assert_eq!(header.boundary, BoundaryFlag::FirstFlushable);
        assert_eq!(header.length, 5);
        assert_eq!(payload, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn acl_header_declared_length_too_long() {
        let packet = [0x40, 0x10, 0x08, 0x00, 1, 2, 3];
        assert_eq!(AclHeader::split(&packet).err(), Some(Error::InsufficientSpace));
    }

    #[test]
    fn acl_header_reserved_handle_rejected() {
        let packet = [0xff, 0x0f, 0x00, 0x00];
        assert_eq!(AclHeader::split(&packet).err(), Some(Error::InvalidValue));
    }

    #[test]
    fn acl_header_encode() {
        let header = AclHeader {
            handle: ConnHandle::new(0x123),
            boundary: BoundaryFlag::Continuing,
            broadcast: 0,
            length: 0x0102,
        };
        let mut buf = [0; 4];
        header.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x23, 0x11, 0x02, 0x01]);
    }

    #[test]
    fn opcodes() {
        assert_eq!(OPCODE_RESET, 0x0C03);
        assert_eq!(OPCODE_READ_BUFFER_SIZE, 0x1005);
        assert_eq!(OPCODE_LE_READ_BUFFER_SIZE_V1, 0x2002);
        assert_eq!(OPCODE_LE_READ_BUFFER_SIZE_V2, 0x2060);
    }
}
