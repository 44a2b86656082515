//! Reassembly of fragmented L2CAP PDUs.
use crate::packet_pool::{Allocator, Packet};
use crate::Error;

/// A fixed size, append only buffer that collects the fragments of one PDU.
///
/// The backing buffer is allocated once in [`MultiBufWriter::create`], writes never
/// allocate.
pub struct MultiBufWriter<'d> {
    buf: Option<Packet<'d>>,
    size: usize,
    offset: usize,
}

impl<'d> MultiBufWriter<'d> {
    /// Allocate a writer for exactly `size` bytes.
    ///
    /// Returns `ResourceExhausted` if the allocator cannot provide the buffer.
    pub fn create(allocator: &'d dyn Allocator, size: usize) -> Result<Self, Error> {
        let Some(buf) = allocator.allocate_contiguous(size) else {
            warn!("[recombination] unable to allocate {} bytes", size);
            return Err(Error::ResourceExhausted);
        };
        Ok(Self {
            buf: Some(buf),
            size,
            offset: 0,
        })
    }

    /// Append `data`.
    ///
    /// Either all of `data` is written or nothing is: if it does not fit in the remaining
    /// space `ResourceExhausted` is returned and the offset is left alone.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.remaining() {
            return Err(Error::ResourceExhausted);
        }
        if let Some(buf) = self.buf.as_mut() {
            buf.as_mut()[self.offset..self.offset + data.len()].copy_from_slice(data);
        }
        self.offset += data.len();
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.size
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.offset
    }

    /// Space left before the buffer is complete.
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Move the backing buffer out.
    ///
    /// The writer is left empty and complete, later calls return `None`.
    pub fn take(&mut self) -> Option<Packet<'d>> {
        self.size = 0;
        self.offset = 0;
        self.buf.take()
    }
}
