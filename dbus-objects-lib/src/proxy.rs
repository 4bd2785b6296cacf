use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_channel::Receiver;
use bson::Document;
use log::debug;
use serde::de::DeserializeOwned;

use dbus_objects_common::{
    introspection::{InterfaceDescription, PropertyDescription},
    signature_of,
    transport::MethodCall,
    Error, Kind, Result, Value, DEFAULT_TIMEOUT, PROPERTIES_INTERFACE, PROPERTY_TIMEOUT_MS,
};

use crate::{
    connection::{Connection, WeakConnection},
    signal::{SignalEvent, SignalReceiver},
    utils::next_tick,
};

/// Per call options
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Call timeout. Transport default if not set
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    fn timeout_ms(&self) -> i32 {
        match self.timeout {
            Some(timeout) => i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
            None => DEFAULT_TIMEOUT,
        }
    }
}

/// Method dispatch table entry
struct MethodStub {
    arity: usize,
    signature: String,
}

struct RemoteInterfaceInner {
    connection: WeakConnection,
    service_name: String,
    object_path: String,
    interface_name: String,
    methods: HashMap<String, MethodStub>,
    properties: BTreeMap<String, PropertyDescription>,
    signals: BTreeSet<String>,
    signal_receiver: SignalReceiver,
}

/// Client side proxy of a remote interface. Built from the remote object introspection
#[derive(Clone)]
pub struct RemoteInterface {
    inner: Arc<RemoteInterfaceInner>,
}

impl RemoteInterface {
    pub(crate) fn new(
        connection: WeakConnection,
        service_name: &str,
        object_path: &str,
        interface_name: &str,
        description: InterfaceDescription,
    ) -> Self {
        let methods = description
            .methods
            .iter()
            .map(|(name, method)| {
                (
                    name.clone(),
                    MethodStub {
                        arity: method.inputs.len(),
                        signature: method.input_signature(),
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(RemoteInterfaceInner {
                connection,
                service_name: service_name.into(),
                object_path: object_path.into(),
                interface_name: interface_name.into(),
                methods,
                properties: description.properties,
                signals: description.signals.into_keys().collect(),
                signal_receiver: SignalReceiver::new(),
            }),
        }
    }

    /// Subscribe to the interface signals if it declares any
    pub(crate) async fn init(&self, connection: &Connection) -> Result<()> {
        if self.inner.signals.is_empty() {
            next_tick().await;
            return Ok(());
        }

        debug!(
            "Subscribing to {} signals of {}:{}",
            self.inner.interface_name, self.inner.service_name, self.inner.object_path
        );

        connection
            .register_signal_handler(
                &self.inner.service_name,
                &self.inner.object_path,
                &self.inner.interface_name,
                self.inner.signal_receiver.clone(),
            )
            .await
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn object_path(&self) -> &str {
        &self.inner.object_path
    }

    pub fn interface_name(&self) -> &str {
        &self.inner.interface_name
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.inner.signals.iter().map(String::as_str).collect()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.inner.properties.get(name)
    }

    /// Check if both handles point to the same proxy
    pub fn ptr_eq(&self, other: &RemoteInterface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn connected(&self) -> bool {
        self.inner
            .connection
            .upgrade()
            .map_or(false, |connection| connection.connected())
    }

    pub(crate) fn signal_receiver(&self) -> SignalReceiver {
        self.inner.signal_receiver.clone()
    }

    /// Stream of the interface signals
    pub fn subscribe(&self) -> Receiver<SignalEvent> {
        self.inner.signal_receiver.listen()
    }

    /// Call a remote method with default options
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call_with_options(method, args, CallOptions::default())
            .await
    }

    pub async fn call_with_options(
        &self,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        // Dispatch is never synchronous
        next_tick().await;

        let stub = self
            .inner
            .methods
            .get(method)
            .ok_or_else(|| Error::NoSuchMethod(method.to_owned()))?;

        if args.len() != stub.arity {
            return Err(Error::InvalidArgs(format!(
                "{method} expects {} arguments, got {}",
                stub.arity,
                args.len()
            )));
        }

        let connection = self
            .inner
            .connection
            .upgrade()
            .filter(Connection::connected)
            .ok_or(Error::NotConnected)?;

        connection
            .call_method(MethodCall {
                destination: self.inner.service_name.clone(),
                path: self.inner.object_path.clone(),
                interface: self.inner.interface_name.clone(),
                member: method.into(),
                signature: stub.signature.clone(),
                timeout_ms: options.timeout_ms(),
                args,
            })
            .await
    }

    /// Call a remote method and deserialize the result
    pub async fn call_as<R: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<R> {
        let value = self.call(method, args).await?;
        Ok(bson::from_bson(value)?)
    }

    pub async fn get_property(&self, name: &str) -> Result<Value> {
        self.call_properties(
            "Get",
            "ss",
            PROPERTY_TIMEOUT_MS,
            vec![self.inner.interface_name.as_str().into(), name.into()],
        )
        .await
    }

    pub async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        if let Some(property) = self.inner.properties.get(name) {
            let expected = property.field.signature.as_str();
            let actual = signature_of(Kind::of_value(&value));

            let known = Kind::ALL
                .iter()
                .any(|kind| signature_of(*kind) == expected);

            if known && expected != signature_of(Kind::Auto) && expected != actual {
                return Err(Error::InvalidArgs(format!(
                    "Property {name} expects {expected}, got {actual}"
                )));
            }
        }

        self.call_properties(
            "Set",
            "ssv",
            DEFAULT_TIMEOUT,
            vec![self.inner.interface_name.as_str().into(), name.into(), value],
        )
        .await
        .map(|_| ())
    }

    /// Get all the interface properties
    pub async fn get_properties(&self) -> Result<Document> {
        let reply = self
            .call_properties(
                "GetAll",
                "s",
                DEFAULT_TIMEOUT,
                vec![self.inner.interface_name.as_str().into()],
            )
            .await?;

        match reply {
            Value::Document(properties) => Ok(properties),
            other => Err(Error::InvalidValue(format!(
                "Unexpected properties reply: {other}"
            ))),
        }
    }

    async fn call_properties(
        &self,
        member: &str,
        signature: &str,
        timeout_ms: i32,
        args: Vec<Value>,
    ) -> Result<Value> {
        let Some(connection) = self.inner.connection.upgrade() else {
            next_tick().await;
            return Err(Error::NotConnected);
        };

        connection
            .call_method(MethodCall {
                destination: self.inner.service_name.clone(),
                path: self.inner.object_path.clone(),
                interface: PROPERTIES_INTERFACE.into(),
                member: member.into(),
                signature: signature.into(),
                timeout_ms,
                args,
            })
            .await
    }
}
