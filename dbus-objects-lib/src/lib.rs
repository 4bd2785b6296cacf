//! ## D-Bus objects lib
//!
//! An object and RPC layer on top of a raw bus transport.
//!
//! The library never speaks the wire protocol itself. It uses a
//! [dbus_objects_common::transport::Transport] to acquire bus connections, send calls, and
//! receive inbound requests and signals.
//!
//! Everything starts with a [Bus] context, which owns the transport, the signal router and the
//! registered services.
//!
//! ### Client
//! To act as a client, open a [Connection] using [Bus::connect] and request a remote interface:
//! - [Connection::get_interface] introspects a remote object and builds a [RemoteInterface];
//! - [RemoteInterface::call] calls a remote method;
//! - [RemoteInterface::get_property], [RemoteInterface::set_property] and
//!   [RemoteInterface::get_properties] work with remote properties;
//! - [RemoteInterface::subscribe] returns a stream of the interface signals.
//!
//! ### Service
//! To act as a service, register one using [Bus::register_service], export objects with
//! [Service::create_object] and declare interfaces with [ServiceObject::create_interface]:
//! - [ServiceInterface::add_method] to declare a method;
//! - [ServiceInterface::add_property] to declare a property;
//! - [ServiceInterface::add_signal] to declare a signal. Calling [Signal::emit] broadcasts it.
//!
//! Each exported object carries standard `org.freedesktop.DBus.Introspectable` and
//! `org.freedesktop.DBus.Properties` interfaces.
//!
//! ### Polling
//! Inbound requests and signals are dispatched by polling the [Bus]. Spawn [Bus::run] to do it in
//! the background:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dbus_objects_common::{describe_field, transport::{BusScope, Transport}, Kind, Value};
//! use dbus_objects_lib::{Bus, MethodSpec};
//!
//! async fn example(transport: Arc<dyn Transport>) {
//!     let bus = Bus::new(transport);
//!     tokio::spawn(bus.clone().run());
//!
//!     let service = bus
//!         .register_service(BusScope::Session, "com.example.Calc")
//!         .await
//!         .expect("Failed to register service");
//!
//!     let object = service
//!         .create_object("/com/example/Calc")
//!         .expect("Failed to create object");
//!
//!     object
//!         .create_interface("com.example.Calc")
//!         .add_method(
//!             "Add",
//!             MethodSpec::new()
//!                 .input(describe_field(Kind::Number, Some("x")))
//!                 .input(describe_field(Kind::Number, Some("y")))
//!                 .output(describe_field(Kind::Number, None)),
//!             |args| async move {
//!                 let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
//!                 Ok(Value::Double(sum))
//!             },
//!         )
//!         .update();
//! }
//! ```
//!
//! ### Deferred completion
//! Operations never complete within the call that started them: failures of a disconnected
//! connection, cached lookups and every remote method call are deferred to the next executor turn.
//!

pub mod bus;
pub mod connection;
pub mod proxy;
pub mod service;
pub mod signal;
mod router;
mod utils;

pub use dbus_objects_common::{Error, Result, Value};

pub use bus::Bus;
pub use connection::Connection;
pub use proxy::{CallOptions, RemoteInterface};
pub use service::{
    interface::{MethodSpec, OutArg, ServiceInterface, Signal},
    object::ServiceObject,
    Service,
};
pub use signal::{SignalEvent, SignalReceiver};
