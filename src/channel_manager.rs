//! Registry of L2CAP channels the proxy handles signaling for.
use core::cell::RefCell;

use bt_hci::param::ConnHandle;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config;
use crate::types::l2cap::SignalingCommand;
use crate::Error;

/// Lookup of signaling command handlers by connection and channel.
pub trait L2capChannelManager {
    /// Hand `command` to the handler registered for `cid` on `handle`.
    ///
    /// Returns `None` if nothing is registered, otherwise whether the handler consumed
    /// the command.
    fn dispatch_signaling_command(&self, handle: ConnHandle, cid: u16, command: &SignalingCommand<'_>) -> Option<bool>;

    /// Called when the link `handle` is gone.
    fn disconnected(&self, handle: ConnHandle) {
        let _ = handle;
    }
}

/// Handles signaling commands addressed to one channel.
pub trait SignalingHandler {
    /// Returns `true` if the command was consumed and must not reach the host.
    fn handle_signaling_command(&self, handle: ConnHandle, command: &SignalingCommand<'_>) -> bool;
}

struct Registration<'d> {
    handle: ConnHandle,
    cid: u16,
    handler: &'d dyn SignalingHandler,
}

/// Fixed capacity [`L2capChannelManager`].
pub struct ChannelManager<'d, M: RawMutex> {
    state: Mutex<M, RefCell<heapless::Vec<Registration<'d>, { config::MAX_SIGNALING_HANDLERS }>>>,
}

impl<'d, M: RawMutex> Default for ChannelManager<'d, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d, M: RawMutex> ChannelManager<'d, M> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Route signaling for `cid` on `handle` to `handler`.
    pub fn register(&self, handle: ConnHandle, cid: u16, handler: &'d dyn SignalingHandler) -> Result<(), Error> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.iter().any(|r| r.handle == handle && r.cid == cid) {
                return Err(Error::AlreadyExists);
            }
            state
                .push(Registration { handle, cid, handler })
                .map_err(|_| Error::ResourceExhausted)?;
            debug!("[channels] registered cid {} on conn {}", cid, handle.raw());
            Ok(())
        })
    }

    pub fn unregister(&self, handle: ConnHandle, cid: u16) -> Result<(), Error> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let idx = state
                .iter()
                .position(|r| r.handle == handle && r.cid == cid)
                .ok_or(Error::NotFound)?;
            state.swap_remove(idx);
            Ok(())
        })
    }

    pub fn is_registered(&self, handle: ConnHandle, cid: u16) -> bool {
        self.state
            .lock(|state| state.borrow().iter().any(|r| r.handle == handle && r.cid == cid))
    }

    pub fn len(&self) -> usize {
        self.state.lock(|state| state.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'d, M: RawMutex> L2capChannelManager for ChannelManager<'d, M> {
    fn dispatch_signaling_command(&self, handle: ConnHandle, cid: u16, command: &SignalingCommand<'_>) -> Option<bool> {
        // Handlers run without the registry lock so they may register or unregister.
        let handler = self.state.lock(|state| {
            state
                .borrow()
                .iter()
                .find(|r| r.handle == handle && r.cid == cid)
                .map(|r| r.handler)
        })?;
        Some(handler.handle_signaling_command(handle, command))
    }

    fn disconnected(&self, handle: ConnHandle) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let before = state.len();
            state.retain(|r| r.handle != handle);
            if before != state.len() {
                debug!(
                    "[channels] dropped {} registrations of conn {}",
                    before - state.len(),
                    handle.raw()
                );
            }
        });
    }
}
