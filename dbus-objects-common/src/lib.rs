//! ## D-Bus objects common
//!
//! Types shared by the object layer and bus transports.

pub mod errors;
pub mod introspection;
pub mod match_rule;
pub mod signature;
pub mod transport;

pub use errors::{Error, ErrorReply, Result};
pub use signature::{describe_field, signature_of, FieldDescriptor, Kind};

/// Dynamic wire value
pub type Value = bson::Bson;

/// Bus daemon well-known name
pub const DBUS_SERVICE_NAME: &str = "org.freedesktop.DBus";
/// Bus daemon object path
pub const DBUS_OBJECT_PATH: &str = "/";
/// Bus daemon interface: `GetNameOwner`, `NameHasOwner`, `ListNames`
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Standard interface every exported object carries
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
/// Standard property access interface every exported object carries
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Path of the signals a transport emits about its own connection
pub const LOCAL_OBJECT_PATH: &str = "/org/freedesktop/DBus/Local";
/// Interface of the signals a transport emits about its own connection
pub const LOCAL_INTERFACE: &str = "org.freedesktop.DBus.Local";
/// Local signal of a lost connection
pub const DISCONNECTED_SIGNAL: &str = "Disconnected";

/// Generic failure. Default name of an error reply
pub const ERROR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";
/// Called method is not declared
pub const ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
/// Wrong argument count or type
pub const ERROR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
/// Property has no setter
pub const ERROR_PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
/// Call destination has no owner
pub const ERROR_SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
/// Destination exports no such object path
pub const ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
/// `GetNameOwner` for a name nobody owns
pub const ERROR_NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
/// Call timed out or the receiver left without replying
pub const ERROR_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
/// Message is larger than the receiver accepts
pub const ERROR_LIMITS_EXCEEDED: &str = "org.freedesktop.DBus.Error.LimitsExceeded";

/// Max accepted message size if not set explicitly
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_024_000;
/// Use transport default timeout
pub const DEFAULT_TIMEOUT: i32 = -1;
/// `Introspect` call timeout
pub const INTROSPECT_TIMEOUT_MS: i32 = 10_000;
/// `Properties.Get` call timeout
pub const PROPERTY_TIMEOUT_MS: i32 = 10_000;
