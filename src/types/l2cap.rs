use crate::codec::{Decode, Encode, Error, FixedSize, Type};
use crate::cursor::{ReadCursor, WriteCursor};

/// Fixed signaling channel of an ACL-U logical link.
pub const L2CAP_CID_ACL_U_SIGNAL: u16 = 0x0001;
/// Fixed signaling channel of an LE-U logical link.
pub const L2CAP_CID_LE_U_SIGNAL: u16 = 0x0005;

/// L2CAP basic header, shared by B-frames and C-frames.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    pub length: u16,
    pub channel: u16,
}

impl FixedSize for L2capHeader {
    const SIZE: usize = 4;
}

impl Decode<'_> for L2capHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            length: r.read()?,
            channel: r.read()?,
        })
    }
}

impl Encode for L2capHeader {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.length)?;
        w.write(self.channel)?;
        Ok(())
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalCode {
    CommandRejectRes = 0x01,
    ConnectionReq = 0x02,
    ConnectionRes = 0x03,
    ConfigurationReq = 0x04,
    ConfigurationRes = 0x05,
    DisconnectionReq = 0x06,
    DisconnectionRes = 0x07,
    EchoReq = 0x08,
    EchoRes = 0x09,
    InformationReq = 0x0A,
    InformationRes = 0x0B,
    ConnParamUpdateReq = 0x12,
    ConnParamUpdateRes = 0x13,
    LeCreditConnReq = 0x14,
    LeCreditConnRes = 0x15,
    FlowControlCreditInd = 0x16,
    CreditConnReq = 0x17,
    CreditConnRes = 0x18,
    CreditConnReconfigReq = 0x19,
    CreditConnReconfigRes = 0x1A,
}

impl TryFrom<u8> for SignalCode {
    type Error = Error;
    fn try_from(val: u8) -> Result<Self, Error> {
        Ok(match val {
            0x01 => Self::CommandRejectRes,
            0x02 => Self::ConnectionReq,
            0x03 => Self::ConnectionRes,
            0x04 => Self::ConfigurationReq,
            0x05 => Self::ConfigurationRes,
            0x06 => Self::DisconnectionReq,
            0x07 => Self::DisconnectionRes,
            0x08 => Self::EchoReq,
            0x09 => Self::EchoRes,
            0x0A => Self::InformationReq,
            0x0B => Self::InformationRes,
            0x12 => Self::ConnParamUpdateReq,
            0x13 => Self::ConnParamUpdateRes,
            0x14 => Self::LeCreditConnReq,
            0x15 => Self::LeCreditConnRes,
            0x16 => Self::FlowControlCreditInd,
            0x17 => Self::CreditConnReq,
            0x18 => Self::CreditConnRes,
            0x19 => Self::CreditConnReconfigReq,
            0x1A => Self::CreditConnReconfigRes,
            _ => return Err(Error::InvalidValue),
        })
    }
}

impl FixedSize for SignalCode {
    const SIZE: usize = 1;
}

impl Encode for SignalCode {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest[0] = *self as u8;
        Ok(())
    }
}

/// Common header of every signaling command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capSignalHeader {
    /// Raw command code, unknown codes are kept so they can be passed through.
    pub code: u8,
    pub identifier: u8,
    pub length: u16,
}

impl FixedSize for L2capSignalHeader {
    const SIZE: usize = 4;
}

impl Decode<'_> for L2capSignalHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            code: r.read()?,
            identifier: r.read()?,
            length: r.read()?,
        })
    }
}

impl Encode for L2capSignalHeader {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.code)?;
        w.write(self.identifier)?;
        w.write(self.length)?;
        Ok(())
    }
}

/// A view over one complete signaling command inside a C-frame.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct SignalingCommand<'d> {
    pub header: L2capSignalHeader,
    pub data: &'d [u8],
}

impl<'d> SignalingCommand<'d> {
    /// Known command code, if any.
    pub fn code(&self) -> Option<SignalCode> {
        SignalCode::try_from(self.header.code).ok()
    }

    pub fn identifier(&self) -> u8 {
        self.header.identifier
    }

    /// Decode the command data as a specific signal.
    pub fn signal<S: L2capSignal + Decode<'d>>(&self) -> Result<S, Error> {
        if self.header.code != S::code() as u8 {
            return Err(Error::InvalidValue);
        }
        ReadCursor::new(self.data).read()
    }

    /// Channel a command addresses.
    ///
    /// Commands that name a channel endpoint are routed to that CID, everything else
    /// belongs to the link itself and is routed to `signaling_cid`.
    pub fn target_cid(&self, signaling_cid: u16) -> u16 {
        let mut r = ReadCursor::new(self.data);
        let cid = match self.code() {
            Some(SignalCode::FlowControlCreditInd)
            | Some(SignalCode::DisconnectionReq)
            | Some(SignalCode::DisconnectionRes)
            | Some(SignalCode::ConfigurationReq)
            | Some(SignalCode::ConfigurationRes) => r.read::<u16>().ok(),
            _ => None,
        };
        cid.unwrap_or(signaling_cid)
    }
}

impl Type for SignalingCommand<'_> {
    fn size(&self) -> usize {
        L2capSignalHeader::SIZE + self.data.len()
    }
}

impl<'d> Decode<'d> for SignalingCommand<'d> {
    fn decode(src: &'d [u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let header: L2capSignalHeader = r.read()?;
        let data = r.slice(header.length as usize)?;
        Ok(Self { header, data })
    }
}

/// A signaling command payload.
pub trait L2capSignal: Encode {
    fn code() -> SignalCode;
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlCreditInd {
    pub cid: u16,
    pub credits: u16,
}

impl L2capSignal for FlowControlCreditInd {
    fn code() -> SignalCode {
        SignalCode::FlowControlCreditInd
    }
}

impl FixedSize for FlowControlCreditInd {
    const SIZE: usize = 4;
}

impl Decode<'_> for FlowControlCreditInd {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            cid: r.read()?,
            credits: r.read()?,
        })
    }
}

impl Encode for FlowControlCreditInd {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.cid)?;
        w.write(self.credits)?;
        Ok(())
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionReq {
    pub dcid: u16,
    pub scid: u16,
}

impl L2capSignal for DisconnectionReq {
    fn code() -> SignalCode {
        SignalCode::DisconnectionReq
    }
}

impl FixedSize for DisconnectionReq {
    const SIZE: usize = 4;
}

impl Decode<'_> for DisconnectionReq {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        Ok(Self {
            dcid: r.read()?,
            scid: r.read()?,
        })
    }
}

impl Encode for DisconnectionReq {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.dcid)?;
        w.write(self.scid)?;
        Ok(())
    }
}

/// Writes a C-frame carrying exactly one signaling command into `w`.
pub(crate) fn write_c_frame<S: L2capSignal>(
    w: &mut WriteCursor<'_>,
    channel: u16,
    identifier: u8,
    signal: &S,
) -> Result<(), Error> {
    let header = L2capSignalHeader {
        code: S::code() as u8,
        identifier,
        length: signal.size() as u16,
    };
    let l2cap = L2capHeader {
        length: (header.size() + signal.size()) as u16,
        channel,
    };
    w.write_ref(&l2cap)?;
    w.write_ref(&header)?;
    w.write_ref(signal)?;
    Ok(())
}
