use thiserror::Error;

use crate::{ERROR_FAILED, ERROR_INVALID_ARGS, ERROR_PROPERTY_READ_ONLY, ERROR_UNKNOWN_METHOD};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Error with a bus-level name. Used verbatim as an error reply name
    #[error("DBusError: {message}")]
    DBus { name: String, message: String },
    /// Operation on a disconnected connection
    #[error("Bus is no longer connected")]
    NotConnected,
    /// Signal emitted by a service with a disconnected connection
    #[error("Service is no longer connected")]
    ServiceNotConnected,
    /// Remote object returned no usable introspection document
    #[error("No introspectable")]
    NoIntrospectable,
    /// Remote object doesn't declare requested interface
    #[error("No such interface")]
    NoSuchInterface,
    /// Method is not declared by the interface
    #[error("No such method: {0}")]
    NoSuchMethod(String),
    /// Signal is not declared by the interface
    #[error("No such signal: {0}")]
    NoSuchSignal(String),
    #[error("Doesn't support such property")]
    NoSuchProperty,
    /// Property has no setter
    #[error("Property {0} is read-only")]
    PropertyReadOnly(String),
    /// Wrong argument count or value type
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    /// Malformed introspection XML
    #[error("Invalid introspection data: {0}")]
    InvalidIntrospection(String),
    /// Reply value can't be converted into requested type
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// Object path is already exported
    #[error("A handler is already registered for {0}")]
    AlreadyRegistered(String),
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DBus {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Bus error name to reply with
    pub fn dbus_name(&self) -> &str {
        match self {
            Self::DBus { name, .. } if !name.is_empty() => name,
            Self::NoSuchMethod(_) => ERROR_UNKNOWN_METHOD,
            Self::InvalidArgs(_) => ERROR_INVALID_ARGS,
            Self::PropertyReadOnly(_) => ERROR_PROPERTY_READ_ONLY,
            _ => ERROR_FAILED,
        }
    }

    /// Human readable error reply message
    pub fn dbus_message(&self) -> String {
        match self {
            Self::DBus { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error reply as received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub name: String,
    pub message: String,
}

impl ErrorReply {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<ErrorReply> for Error {
    fn from(reply: ErrorReply) -> Self {
        Error::new(reply.name, reply.message)
    }
}

impl From<bson::de::Error> for Error {
    fn from(e: bson::de::Error) -> Self {
        Error::InvalidValue(e.to_string())
    }
}

impl From<bson::ser::Error> for Error {
    fn from(e: bson::ser::Error) -> Self {
        Error::InvalidValue(e.to_string())
    }
}
