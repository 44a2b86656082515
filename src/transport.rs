//! Boundary to the physical HCI links.
use crate::types::hci::HciMessageType;

/// The two links the proxy sits between.
///
/// Sending is fire and forget. Delivery failures are the transport's concern and are
/// not reported back to the proxy. `packet` never includes the H4 packet indicator,
/// which is passed separately as `kind`.
pub trait HciTransport {
    /// Send a packet towards the host stack.
    fn send_to_host(&self, kind: HciMessageType, packet: &[u8]);

    /// Send a packet towards the controller.
    fn send_to_controller(&self, kind: HciMessageType, packet: &[u8]);
}

impl<T: HciTransport + ?Sized> HciTransport for &T {
    fn send_to_host(&self, kind: HciMessageType, packet: &[u8]) {
        T::send_to_host(self, kind, packet)
    }

    fn send_to_controller(&self, kind: HciMessageType, packet: &[u8]) {
        T::send_to_controller(self, kind, packet)
    }
}
