//! Common types.

pub mod hci;
pub mod l2cap;
pub(crate) mod primitives;
