//! Per connection state tracked by the proxy.
use bt_hci::param::ConnHandle;

use crate::packet_pool::{Allocator, Packet};
use crate::recombination::MultiBufWriter;
use crate::signaling::SignalingChannel;
use crate::Error;

/// Physical transport of an ACL link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Le,
    BrEdr,
}

/// Direction of traffic through the proxy.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Controller to host.
    ToHost,
    /// Host to controller.
    ToController,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::ToHost => 0,
            Direction::ToController => 1,
        }
    }
}

/// An ACL logical link known to the proxy.
pub struct AclConnection<'d> {
    handle: ConnHandle,
    transport: Transport,
    num_pending_packets: u16,
    recombination: [Option<MultiBufWriter<'d>>; 2],
    signaling: SignalingChannel,
}

impl<'d> AclConnection<'d> {
    pub fn new(handle: ConnHandle, transport: Transport) -> Self {
        Self {
            handle,
            transport,
            num_pending_packets: 0,
            recombination: [None, None],
            signaling: SignalingChannel::new(handle, transport),
        }
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Proxy packets sent on this link and not yet completed by the controller.
    pub fn num_pending_packets(&self) -> u16 {
        self.num_pending_packets
    }

    pub fn signaling_channel(&self) -> SignalingChannel {
        self.signaling
    }

    pub(crate) fn add_pending(&mut self, n: u16) {
        self.num_pending_packets += n;
    }

    /// Complete up to `n` pending packets, returns how many were completed.
    pub(crate) fn complete_pending(&mut self, n: u16) -> u16 {
        let completed = n.min(self.num_pending_packets);
        self.num_pending_packets -= completed;
        completed
    }

    /// Begin collecting a PDU of `size` bytes in `direction`.
    ///
    /// Returns `FailedPrecondition` if a PDU is already being collected in that direction
    /// and `ResourceExhausted` if the buffer cannot be allocated.
    pub fn start_recombination(
        &mut self,
        direction: Direction,
        allocator: &'d dyn Allocator,
        size: usize,
    ) -> Result<(), Error> {
        let slot = &mut self.recombination[direction.index()];
        if slot.is_some() {
            return Err(Error::FailedPrecondition);
        }
        *slot = Some(MultiBufWriter::create(allocator, size)?);
        Ok(())
    }

    /// Add a fragment to the PDU being collected in `direction`.
    ///
    /// Returns the complete PDU once the last fragment has been written, which ends the
    /// recombination.
    pub fn recombine_fragment(&mut self, direction: Direction, data: &[u8]) -> Result<Option<Packet<'d>>, Error> {
        let slot = &mut self.recombination[direction.index()];
        let Some(writer) = slot.as_mut() else {
            return Err(Error::FailedPrecondition);
        };
        writer.write(data)?;
        if !writer.is_complete() {
            return Ok(None);
        }
        let pdu = writer.take();
        *slot = None;
        Ok(pdu)
    }

    /// Discard any PDU being collected in `direction`.
    pub fn end_recombination(&mut self, direction: Direction) {
        self.recombination[direction.index()] = None;
    }

    /// Stop collecting in `direction` and hand back what was collected so far.
    pub fn abandon_recombination(&mut self, direction: Direction) -> Option<MultiBufWriter<'d>> {
        self.recombination[direction.index()].take()
    }

    pub fn is_recombining(&self, direction: Direction) -> bool {
        self.recombination[direction.index()].is_some()
    }
}

impl core::fmt::Debug for AclConnection<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AclConnection")
            .field("handle", &self.handle)
            .field("transport", &self.transport)
            .field("num_pending_packets", &self.num_pending_packets)
            .finish()
    }
}
