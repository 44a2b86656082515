//! ACL buffer credits kept by the proxy.
//!
//! The controller reports how many ACL packets it can buffer. The proxy claims a share
//! of them for its own traffic and reports the rest to the host, so the two never
//! oversubscribe the controller between them.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::connection::Transport;
use crate::Error;

/// Credit pool of one transport.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credits {
    to_reserve: u16,
    proxy_max: u16,
    proxy_pending: u16,
}

impl Credits {
    pub const fn new(to_reserve: u16) -> Self {
        Self {
            to_reserve,
            proxy_max: 0,
            proxy_pending: 0,
        }
    }

    /// Claim up to `to_reserve` of the controller's `controller_max` buffers.
    ///
    /// Returns the number of buffers left for the host.
    pub fn reserve(&mut self, controller_max: u16) -> u16 {
        if self.initialized() {
            warn!("[credits] reserve called twice without a reset, proxy max was {}", self.proxy_max);
        }
        self.proxy_max = self.to_reserve.min(controller_max);
        if self.proxy_max < self.to_reserve {
            warn!(
                "[credits] only reserved {} of {} requested credits, controller has {}",
                self.proxy_max,
                self.to_reserve,
                controller_max
            );
        }
        controller_max - self.proxy_max
    }

    /// Mark `num_credits` as in flight.
    ///
    /// Returns `ResourceExhausted` without touching the pool if fewer are remaining.
    pub fn mark_pending(&mut self, num_credits: u16) -> Result<(), Error> {
        if num_credits > self.remaining() {
            return Err(Error::ResourceExhausted);
        }
        self.proxy_pending += num_credits;
        Ok(())
    }

    /// Return `num_credits` in flight credits to the pool.
    pub fn mark_completed(&mut self, num_credits: u16) {
        if num_credits > self.proxy_pending {
            error!(
                "[credits] tried to complete {} credits, only {} pending",
                num_credits, self.proxy_pending
            );
        }
        self.proxy_pending = self.proxy_pending.saturating_sub(num_credits);
    }

    pub fn remaining(&self) -> u16 {
        self.proxy_max - self.proxy_pending
    }

    pub fn has_send_capability(&self) -> bool {
        self.to_reserve > 0
    }

    /// Whether credits were reserved from the controller.
    pub fn initialized(&self) -> bool {
        self.proxy_max > 0
    }

    pub fn to_reserve(&self) -> u16 {
        self.to_reserve
    }

    pub fn proxy_max(&self) -> u16 {
        self.proxy_max
    }

    pub fn proxy_pending(&self) -> u16 {
        self.proxy_pending
    }

    /// Forget the reservation. The configured target is kept.
    pub fn reset(&mut self) {
        self.proxy_max = 0;
        self.proxy_pending = 0;
    }
}

/// The LE and BR/EDR pools, guarded together by one lock.
#[derive(Debug)]
pub(crate) struct CreditPools {
    le: Credits,
    br_edr: Credits,
}

impl CreditPools {
    pub(crate) const fn new(le_to_reserve: u16, br_edr_to_reserve: u16) -> Self {
        Self {
            le: Credits::new(le_to_reserve),
            br_edr: Credits::new(br_edr_to_reserve),
        }
    }

    pub(crate) fn get(&self, transport: Transport) -> &Credits {
        match transport {
            Transport::Le => &self.le,
            Transport::BrEdr => &self.br_edr,
        }
    }

    pub(crate) fn get_mut(&mut self, transport: Transport) -> &mut Credits {
        match transport {
            Transport::Le => &mut self.le,
            Transport::BrEdr => &mut self.br_edr,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.le.reset();
        self.br_edr.reset();
    }
}

/// Permission to send one ACL packet on a transport.
///
/// Dropping an unused credit returns it to its pool. The credit pool lock is taken
/// again on drop, so a credit may be released on a different thread than the one that
/// reserved it as long as `M` allows it.
pub struct SendCredit<'a, M: RawMutex> {
    transport: Transport,
    pools: Option<&'a Mutex<M, RefCell<CreditPools>>>,
}

impl<'a, M: RawMutex> SendCredit<'a, M> {
    /// Take one credit from the pool of `transport`, if any remains.
    pub(crate) fn reserve(pools: &'a Mutex<M, RefCell<CreditPools>>, transport: Transport) -> Option<Self> {
        let reserved = pools.lock(|pools| pools.borrow_mut().get_mut(transport).mark_pending(1));
        match reserved {
            Ok(()) => Some(Self {
                transport,
                pools: Some(pools),
            }),
            Err(_) => {
                trace!("[credits] no {:?} credits remaining", transport);
                None
            }
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Whether the credit was taken from `pools`.
    pub(crate) fn is_from(&self, pools: &Mutex<M, RefCell<CreditPools>>) -> bool {
        self.pools.is_some_and(|p| core::ptr::eq(p, pools))
    }

    /// Consume the credit. It is then returned by the controller's completed packets
    /// event, not by dropping this token.
    pub(crate) fn mark_used(&mut self) {
        self.pools.take();
    }
}

impl<M: RawMutex> Drop for SendCredit<'_, M> {
    fn drop(&mut self) {
        if let Some(pools) = self.pools.take() {
            pools.lock(|pools| pools.borrow_mut().get_mut(self.transport).mark_completed(1));
        }
    }
}

impl<M: RawMutex> core::fmt::Debug for SendCredit<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SendCredit")
            .field("transport", &self.transport)
            .field("used", &self.pools.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};

    use super::*;

    #[test]
    fn reserve_splits_controller_buffers() {
        let mut credits = Credits::new(4);
        assert!(credits.has_send_capability());
        assert!(!credits.initialized());

        assert_eq!(credits.reserve(16), 12);
        assert!(credits.initialized());
        assert_eq!(credits.proxy_max(), 4);
        assert_eq!(credits.remaining(), 4);
    }

    #[test]
    fn reserve_more_than_controller_has() {
        let mut credits = Credits::new(10);
        assert_eq!(credits.reserve(6), 0);
        assert_eq!(credits.proxy_max(), 6);
    }

    #[test]
    fn pass_through_pool() {
        let mut credits = Credits::new(0);
        assert!(!credits.has_send_capability());
        assert_eq!(credits.reserve(8), 8);
        assert!(!credits.initialized());
        assert_eq!(credits.mark_pending(1), Err(Error::ResourceExhausted));
    }

    #[test]
    fn pending_stays_within_max() {
        let mut credits = Credits::new(3);
        credits.reserve(10);

        credits.mark_pending(2).unwrap();
        assert_eq!(credits.mark_pending(2), Err(Error::ResourceExhausted));
        assert_eq!(credits.proxy_pending(), 2);

        credits.mark_pending(1).unwrap();
        assert_eq!(credits.remaining(), 0);

        credits.mark_completed(2);
        assert_eq!(credits.remaining(), 2);

        // more completions than were pending are clamped
        credits.mark_completed(5);
        assert_eq!(credits.proxy_pending(), 0);
        assert_eq!(credits.remaining(), 3);
    }

    #[test]
    fn reset_keeps_target() {
        let mut credits = Credits::new(2);
        credits.reserve(5);
        credits.mark_pending(1).unwrap();
        credits.reset();
        assert!(!credits.initialized());
        assert_eq!(credits.remaining(), 0);
        assert_eq!(credits.to_reserve(), 2);
        assert_eq!(credits.reserve(5), 3);
    }

    #[test]
    fn dropped_credit_is_returned() {
        let pools: Mutex<NoopRawMutex, _> = Mutex::new(RefCell::new(CreditPools::new(4, 0)));
        pools.lock(|p| p.borrow_mut().get_mut(Transport::Le).reserve(16));

        let mut held = std::vec::Vec::new();
        for _ in 0..4 {
            held.push(SendCredit::reserve(&pools, Transport::Le).unwrap());
        }
        assert!(SendCredit::reserve(&pools, Transport::Le).is_none());
        assert!(SendCredit::reserve(&pools, Transport::BrEdr).is_none());

        held.pop();
        assert!(SendCredit::reserve(&pools, Transport::Le).is_some());

        let mut used = held.pop().unwrap();
        used.mark_used();
        drop(used);
        assert_eq!(pools.lock(|p| p.borrow().get(Transport::Le).remaining()), 1);
    }

    #[test]
    fn credit_knows_its_pools() {
        let ours: Mutex<NoopRawMutex, _> = Mutex::new(RefCell::new(CreditPools::new(1, 0)));
        let theirs: Mutex<NoopRawMutex, _> = Mutex::new(RefCell::new(CreditPools::new(1, 0)));
        ours.lock(|p| p.borrow_mut().get_mut(Transport::Le).reserve(4));

        let mut credit = SendCredit::reserve(&ours, Transport::Le).unwrap();
        assert!(credit.is_from(&ours));
        assert!(!credit.is_from(&theirs));

        credit.mark_used();
        assert!(!credit.is_from(&ours));
    }

    #[test]
    fn credit_released_on_another_thread() {
        let pools: Mutex<CriticalSectionRawMutex, _> = Mutex::new(RefCell::new(CreditPools::new(0, 2)));
        pools.lock(|p| p.borrow_mut().get_mut(Transport::BrEdr).reserve(8));

        let a = SendCredit::reserve(&pools, Transport::BrEdr).unwrap();
        let b = SendCredit::reserve(&pools, Transport::BrEdr).unwrap();
        assert_eq!(pools.lock(|p| p.borrow().get(Transport::BrEdr).remaining()), 0);

        std::thread::scope(|s| {
            s.spawn(move || drop(a));
            s.spawn(move || drop(b));
        });
        assert_eq!(pools.lock(|p| p.borrow().get(Transport::BrEdr).remaining()), 2);
    }
}
