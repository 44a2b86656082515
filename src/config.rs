//! Compile-time configuration.
//!
//! `trouble-proxy` has some configuration settings that are set at compile time.
//!
//! They can be set in two ways:
//!
//! - Via Cargo features: enable a feature like `<name>-<value>`. `name` must be in lowercase and
//!   use dashes instead of underscores. For example `max-connections-4`. Only a selection of values
//!   is available, check `Cargo.toml` for the list.
//! - Via environment variables at build time: set the variable named `TROUBLE_PROXY_<value>`. For example
//!   `TROUBLE_PROXY_MAX_CONNECTIONS=3 cargo build`. You can also set them in the `[env]` section of
//!   `.cargo/config.toml`. Any value can be set, unlike with Cargo features.
//!
//! Environment variables take precedence over Cargo features. If two Cargo features are enabled for the same setting
//! with different values, compilation fails.

mod raw {
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// Maximum number of tracked ACL connections.
///
/// Connections completing while the table is full are still forwarded to the host,
/// the proxy just does not track them.
///
/// Default: 10.
pub const MAX_CONNECTIONS: usize = raw::MAX_CONNECTIONS;

/// Maximum number of signaling handlers in a [`ChannelManager`](crate::ChannelManager).
///
/// Default: 8.
pub const MAX_SIGNALING_HANDLERS: usize = raw::MAX_SIGNALING_HANDLERS;
