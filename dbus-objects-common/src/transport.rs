//! Raw bus transport boundary.
//!
//! The object layer never speaks the wire protocol. It acquires [BusHandle]s from a [Transport]
//! and receives inbound requests and signals as [BusEvent]s through the sink given to
//! [Transport::acquire].

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use async_channel::Sender;
use futures::future::BoxFuture;

use crate::{ErrorReply, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusScope {
    Session,
    System,
}

impl Display for BusScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusScope::Session => f.write_str("session"),
            BusScope::System => f.write_str("system"),
        }
    }
}

/// Opaque handle of an inbound method call. Used to address a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(u64);

impl MessageHandle {
    pub fn new(serial: u64) -> Self {
        Self(serial)
    }

    pub fn serial(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    /// Joined input signature
    pub signature: String,
    /// Call timeout in milliseconds. `-1` means transport default
    pub timeout_ms: i32,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct OutgoingSignal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SignalMessage {
    /// Unique name of the receiving connection
    pub unique_name: String,
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Unique name of the receiving connection
    pub unique_name: String,
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub message: MessageHandle,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    Signal(SignalMessage),
    Request(RequestMessage),
}

pub trait Transport: Send + Sync {
    /// Open a connection to a bus. Inbound method calls to the connection object paths and
    /// signals matching its filters are sent to `sink`
    fn acquire(&self, scope: BusScope, sink: Sender<BusEvent>) -> Result<Arc<dyn BusHandle>>;
}

/// Single transport connection
pub trait BusHandle: Send + Sync {
    fn unique_name(&self) -> &str;

    /// Close the connection. Calling it on a closed connection is a no-op
    fn release(&self);

    fn call_method(
        &self,
        call: MethodCall,
    ) -> BoxFuture<'static, std::result::Result<Value, ErrorReply>>;

    fn register_object_path(&self, path: &str) -> Result<()>;

    fn unregister_object_path(&self, path: &str) -> Result<()>;

    fn request_name(&self, name: &str) -> Result<()>;

    fn add_match(&self, rule: &str) -> Result<()>;

    fn emit_signal(&self, signal: OutgoingSignal) -> Result<()>;

    fn send_reply(&self, message: MessageHandle, value: Value, signature: &str) -> Result<()>;

    fn send_error(&self, message: MessageHandle, name: &str, text: &str) -> Result<()>;

    fn set_max_message_size(&self, size: usize);
}
