//! ## D-Bus objects hub
//!
//! In-process loopback bus. Implements [dbus_objects_common::transport::Transport], so services
//! and clients created over the same [Hub] can talk to each other without a system bus daemon.
//!
//! The hub owns unique and well-known name registries, routes method calls to connections,
//! which registered target object paths, and broadcasts signals according to connection
//! match rules. Each connection gets its requests and signals through the event sink it was
//! acquired with.
//! [Hub::drop_connection] simulates a link loss.

pub mod args;
pub mod client;
pub mod hub;

pub use args::Args;
pub use hub::Hub;
