//! A packet pool for allocating and freeing fixed size packet buffers.
use core::cell::{RefCell, UnsafeCell};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Source of contiguous packet buffers.
///
/// The proxy never allocates on its own, every buffer it holds on to comes from
/// an allocator provided by the integrator.
pub trait Allocator {
    /// Allocate a single contiguous buffer of exactly `size` bytes.
    ///
    /// Returns `None` if the request cannot be satisfied.
    fn allocate_contiguous(&self, size: usize) -> Option<Packet<'_>>;

    /// Return the slot `idx` to the allocator. Called when a [`Packet`] is dropped.
    ///
    /// # Safety
    ///
    /// `idx` must belong to a [`Packet`] created by this allocator that is being dropped,
    /// so that no live packet refers to the slot once it is free.
    ///
    /// ```compile_fail
    /// use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    /// use trouble_proxy::{Allocator, PacketPool};
    ///
    /// let pool: PacketPool<NoopRawMutex, 4, 1> = PacketPool::new();
    /// let _held = pool.allocate_contiguous(4);
    /// pool.free(0);
    /// ```
    unsafe fn free(&self, idx: usize);

    /// Number of buffers that can currently be allocated.
    fn available(&self) -> usize;

    /// Largest buffer this allocator can hand out.
    fn mtu(&self) -> usize;
}

/// A buffer allocated from an [`Allocator`], returned to it on drop.
pub struct Packet<'d> {
    idx: usize,
    buf: &'d mut [u8],
    pool: &'d dyn Allocator,
}

impl<'d> Packet<'d> {
    /// Wrap slot `idx` of `pool`.
    ///
    /// # Safety
    ///
    /// `buf` must be slot `idx` of `pool` and nothing else may hand out that slot until
    /// the packet is dropped and calls [`Allocator::free`].
    pub unsafe fn new(idx: usize, buf: &'d mut [u8], pool: &'d dyn Allocator) -> Self {
        Self { idx, buf, pool }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl AsRef<[u8]> for Packet<'_> {
    fn as_ref(&self) -> &[u8] {
        self.buf
    }
}

impl AsMut<[u8]> for Packet<'_> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.buf
    }
}

impl Drop for Packet<'_> {
    fn drop(&mut self) {
        // SAFETY: `idx` came with this packet from `pool`, and the packet goes away here.
        unsafe { self.pool.free(self.idx) };
    }
}

impl core::fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet").field("idx", &self.idx).field("len", &self.len()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Packet<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Packet {{ idx: {}, len: {} }}", self.idx, self.len())
    }
}

struct State<const N: usize> {
    free: [bool; N],
}

impl<const N: usize> State<N> {
    const fn new() -> Self {
        Self { free: [true; N] }
    }

    fn alloc(&mut self) -> Option<usize> {
        let idx = self.free.iter().position(|free| *free)?;
        self.free[idx] = false;
        Some(idx)
    }

    fn free(&mut self, idx: usize) {
        self.free[idx] = true;
    }

    fn available(&self) -> usize {
        self.free.iter().filter(|free| **free).count()
    }
}

/// A packet pool holds a pool of `N` packet buffers of `MTU` bytes each.
pub struct PacketPool<M: RawMutex, const MTU: usize, const N: usize> {
    state: Mutex<M, RefCell<State<N>>>,
    buffers: UnsafeCell<[[u8; MTU]; N]>,
}

impl<M: RawMutex, const MTU: usize, const N: usize> Default for PacketPool<M, MTU, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const MTU: usize, const N: usize> PacketPool<M, MTU, N> {
    /// Create a new packet pool with all slots free.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::new())),
            buffers: UnsafeCell::new([[0; MTU]; N]),
        }
    }
}

impl<M: RawMutex, const MTU: usize, const N: usize> Allocator for PacketPool<M, MTU, N> {
    fn allocate_contiguous(&self, size: usize) -> Option<Packet<'_>> {
        if size > MTU {
            trace!("[pool] requested {} bytes, mtu is {}", size, MTU);
            return None;
        }
        let idx = self.state.lock(|state| state.borrow_mut().alloc())?;
        // SAFETY: slot `idx` was marked in use above and is only handed out again
        // after the packet wrapping it is dropped, so this is the only reference.
        let slot = unsafe { &mut *(self.buffers.get() as *mut [u8; MTU]).add(idx) };
        slot.iter_mut().for_each(|b| *b = 0);
        // SAFETY: see above, the slot is freed again by the packet's drop.
        Some(unsafe { Packet::new(idx, &mut slot[..size], self) })
    }

    unsafe fn free(&self, idx: usize) {
        self.state.lock(|state| state.borrow_mut().free(idx));
    }

    fn available(&self) -> usize {
        self.state.lock(|state| state.borrow().available())
    }

    fn mtu(&self) -> usize {
        MTU
    }
}
