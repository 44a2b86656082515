//! Bluetooth HCI/L2CAP proxy.
//!
//! Sits between a host stack and a controller, keeps a share of the controller's
//! ACL buffers for itself, reassembles signaling PDUs and lets registered handlers
//! consume L2CAP signaling commands before they reach the host. Everything the proxy
//! does not care about is forwarded unchanged.
#![cfg_attr(not(test), no_std)]

mod fmt;

mod codec;
mod cursor;

pub mod config;
pub mod types;

pub mod acl_data_channel;
pub mod channel_manager;
pub mod connection;
pub mod credits;
pub mod packet_pool;
pub mod proxy;
pub mod recombination;
pub mod signaling;
pub mod transport;

pub use acl_data_channel::AclDataChannel;
pub use channel_manager::{ChannelManager, L2capChannelManager, SignalingHandler};
pub use connection::{AclConnection, Direction, Transport};
pub use credits::{Credits, SendCredit};
pub use packet_pool::{Allocator, Packet, PacketPool};
pub use proxy::ProxyHost;
pub use recombination::MultiBufWriter;
pub use transport::HciTransport;

/// Errors reported by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An entry for the same key is already present.
    AlreadyExists,
    /// A fixed capacity table, a credit pool or the allocator is exhausted.
    ResourceExhausted,
    /// The object is not in a state that allows the operation.
    FailedPrecondition,
    NotFound,
    InvalidArgument,
    /// No credit is available to send.
    Unavailable,
    Codec(codec::Error),
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        Self::Codec(error)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::AlreadyExists => defmt::write!(fmt, "AlreadyExists"),
            Error::ResourceExhausted => defmt::write!(fmt, "ResourceExhausted"),
            Error::FailedPrecondition => defmt::write!(fmt, "FailedPrecondition"),
            Error::NotFound => defmt::write!(fmt, "NotFound"),
            Error::InvalidArgument => defmt::write!(fmt, "InvalidArgument"),
            Error::Unavailable => defmt::write!(fmt, "Unavailable"),
            Error::Codec(e) => defmt::write!(fmt, "Codec({})", e),
        }
    }
}
