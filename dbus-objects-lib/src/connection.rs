use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    sync::{Arc, Weak},
};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use dbus_objects_common::{
    introspection::{self, InterfaceDescription},
    match_rule::MatchRule,
    transport::{BusHandle, BusScope, MessageHandle, MethodCall, SignalMessage, Transport},
    Error, ErrorReply, Result, Value, DBUS_INTERFACE, DBUS_OBJECT_PATH, DBUS_SERVICE_NAME,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_TIMEOUT, DISCONNECTED_SIGNAL, INTROSPECTABLE_INTERFACE,
    INTROSPECT_TIMEOUT_MS, LOCAL_INTERFACE, LOCAL_OBJECT_PATH,
};

use crate::{
    proxy::RemoteInterface,
    router::SignalRouter,
    signal::{SignalEvent, SignalReceiver},
    utils::next_tick,
};

#[derive(Clone)]
struct SignalRegistration {
    service_name: String,
    path: String,
    interface: String,
    receiver: SignalReceiver,
}

struct ConnectionState {
    /// Transport handle. Present only while connected
    handle: Option<Arc<dyn BusHandle>>,
    /// Signal receivers by `path:interface`. Survive reconnects
    signal_receivers: HashMap<String, SignalRegistration>,
    /// Match rules installed at the current handle
    match_rules: HashSet<String>,
    /// Remote interfaces by `service:path:interface`
    interfaces: HashMap<String, RemoteInterface>,
    max_message_size: usize,
}

pub(crate) struct ConnectionInner {
    scope: BusScope,
    transport: Arc<dyn Transport>,
    router: SignalRouter,
    state: Mutex<ConnectionState>,
}

/// Bus connection. Wraps a transport handle, which is replaced on reconnect
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<ConnectionInner>);

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    pub(crate) async fn connect(
        transport: Arc<dyn Transport>,
        router: SignalRouter,
        scope: BusScope,
    ) -> Result<Self> {
        let this = Self {
            inner: Arc::new(ConnectionInner {
                scope,
                transport,
                router,
                state: Mutex::new(ConnectionState {
                    handle: None,
                    signal_receivers: HashMap::new(),
                    match_rules: HashSet::new(),
                    interfaces: HashMap::new(),
                    max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                }),
            }),
        };

        let result = this.open();
        next_tick().await;
        result.map(|_| this)
    }

    fn open(&self) -> Result<()> {
        let handle = self
            .inner
            .transport
            .acquire(self.inner.scope, self.inner.router.sink())?;
        let unique_name = handle.unique_name().to_owned();

        {
            let mut state = self.inner.state.lock();
            handle.set_max_message_size(state.max_message_size);
            state.handle = Some(handle);
        }

        self.inner.router.register(&unique_name, self);

        info!("Connected to the {} bus as {unique_name}", self.inner.scope);
        Ok(())
    }

    fn close(&self) {
        let handle = {
            let mut state = self.inner.state.lock();
            state.match_rules.clear();
            state.handle.take()
        };

        if let Some(handle) = handle {
            self.inner.router.unregister(handle.unique_name());
            handle.release();

            info!(
                "Disconnected {} from the {} bus",
                handle.unique_name(),
                self.inner.scope
            );
        }
    }

    pub fn scope(&self) -> BusScope {
        self.inner.scope
    }

    pub fn connected(&self) -> bool {
        self.inner.state.lock().handle.is_some()
    }

    /// Unique bus name of the current transport handle
    pub fn unique_name(&self) -> Option<String> {
        self.handle().map(|handle| handle.unique_name().to_owned())
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn BusHandle>> {
        self.inner.state.lock().handle.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    /// Handle of a connected bus. Fails on the next tick otherwise
    async fn connected_handle(&self) -> Result<Arc<dyn BusHandle>> {
        let handle = self.handle();

        match handle {
            Some(handle) => Ok(handle),
            None => {
                next_tick().await;
                Err(Error::NotConnected)
            }
        }
    }

    /// Release the transport handle. Remote interfaces and signal receivers are kept
    pub async fn disconnect(&self) {
        self.close();
        next_tick().await
    }

    /// Replace the transport handle with a new one and restore every signal receiver
    pub async fn reconnect(&self) -> Result<()> {
        info!("Reconnecting to the {} bus", self.inner.scope);

        self.close();
        self.open()?;

        let handle = self.handle().ok_or(Error::NotConnected)?;
        let registrations: Vec<SignalRegistration> = self
            .inner
            .state
            .lock()
            .signal_receivers
            .values()
            .cloned()
            .collect();

        for registration in registrations {
            self.subscribe(&handle, registration).await?;
        }

        next_tick().await;
        Ok(())
    }

    /// Limit inbound message size. `None` sets the default limit
    pub fn set_max_message_size(&self, size: Option<usize>) {
        let size = size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);

        let handle = {
            let mut state = self.inner.state.lock();
            state.max_message_size = size;
            state.handle.clone()
        };

        if let Some(handle) = handle {
            handle.set_max_message_size(size);
        }
    }

    /// Call a remote method
    pub async fn call_method(&self, call: MethodCall) -> Result<Value> {
        let handle = self.connected_handle().await?;

        debug!(
            "Calling {}.{} at {}:{}",
            call.interface, call.member, call.destination, call.path
        );

        handle
            .call_method(call)
            .await
            .map_err(|reply| self.create_error(reply))
    }

    fn create_error(&self, reply: ErrorReply) -> Error {
        debug!("Error reply {}: {}", reply.name, reply.message);
        Error::from(reply)
    }

    /// Resolve a well-known name into the unique name of its owner
    pub async fn unique_service_name(&self, service_name: &str) -> Result<String> {
        let reply = self
            .call_method(MethodCall {
                destination: DBUS_SERVICE_NAME.into(),
                path: DBUS_OBJECT_PATH.into(),
                interface: DBUS_INTERFACE.into(),
                member: "GetNameOwner".into(),
                signature: "s".into(),
                timeout_ms: DEFAULT_TIMEOUT,
                args: vec![service_name.into()],
            })
            .await?;

        match reply {
            Value::String(name) => Ok(name),
            other => Err(Error::InvalidValue(format!(
                "Unexpected name owner reply: {other}"
            ))),
        }
    }

    /// Introspect remote object. Returns interface declarations by their names
    pub async fn introspect(
        &self,
        service_name: &str,
        path: &str,
    ) -> Result<BTreeMap<String, InterfaceDescription>> {
        let reply = self
            .call_method(MethodCall {
                destination: service_name.into(),
                path: path.into(),
                interface: INTROSPECTABLE_INTERFACE.into(),
                member: "Introspect".into(),
                signature: String::new(),
                timeout_ms: INTROSPECT_TIMEOUT_MS,
                args: vec![],
            })
            .await?;

        let Value::String(xml) = reply else {
            warn!("Non-string introspection of {service_name}:{path}");
            return Err(Error::NoIntrospectable);
        };

        match introspection::parse(&xml) {
            Ok(node) if !node.interfaces.is_empty() => Ok(node.interfaces),
            Ok(_) => Err(Error::NoIntrospectable),
            Err(e) => {
                warn!("Failed to parse {service_name}:{path} introspection: {e}");
                Err(Error::NoIntrospectable)
            }
        }
    }

    /// Get a remote interface. Each (service, path, interface) is introspected once per connection
    pub async fn get_interface(
        &self,
        service_name: &str,
        path: &str,
        interface_name: &str,
    ) -> Result<RemoteInterface> {
        let key = format!("{service_name}:{path}:{interface_name}");

        let cached = self.inner.state.lock().interfaces.get(&key).cloned();
        if let Some(interface) = cached {
            next_tick().await;
            return Ok(interface);
        }

        let mut interfaces = self.introspect(service_name, path).await?;
        let description = interfaces
            .remove(interface_name)
            .ok_or(Error::NoSuchInterface)?;

        let interface = RemoteInterface::new(
            self.downgrade(),
            service_name,
            path,
            interface_name,
            description,
        );
        interface.init(self).await?;

        let mut state = self.inner.state.lock();
        if let Some(existing) = state.interfaces.get(&key).cloned() {
            // Lost a race with a concurrent lookup. Keep the first proxy receiving signals
            if let Some(registration) = state
                .signal_receivers
                .get_mut(&format!("{path}:{interface_name}"))
            {
                registration.receiver = existing.signal_receiver();
            }

            return Ok(existing);
        }

        state.interfaces.insert(key, interface.clone());
        Ok(interface)
    }

    /// Route signals of a remote interface into a receiver
    pub async fn register_signal_handler(
        &self,
        service_name: &str,
        path: &str,
        interface_name: &str,
        receiver: SignalReceiver,
    ) -> Result<()> {
        let handle = self.connected_handle().await?;

        self.subscribe(
            &handle,
            SignalRegistration {
                service_name: service_name.into(),
                path: path.into(),
                interface: interface_name.into(),
                receiver,
            },
        )
        .await
    }

    async fn subscribe(
        &self,
        handle: &Arc<dyn BusHandle>,
        registration: SignalRegistration,
    ) -> Result<()> {
        // Signals carry unique sender names
        let sender = match self.unique_service_name(&registration.service_name).await {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    "Failed to resolve {} owner: {e}. Filtering by the name itself",
                    registration.service_name
                );
                registration.service_name.clone()
            }
        };

        let rule = MatchRule::signal()
            .sender(&sender)
            .interface(&registration.interface)
            .path(&registration.path);

        let key = format!("{}:{}", registration.path, registration.interface);
        self.inner
            .state
            .lock()
            .signal_receivers
            .insert(key, registration);

        self.add_match_rules(handle, &[MatchRule::signal(), rule])?;

        next_tick().await;
        Ok(())
    }

    /// Install match rules, which are not installed at the handle yet
    fn add_match_rules(&self, handle: &Arc<dyn BusHandle>, rules: &[MatchRule]) -> Result<()> {
        for rule in rules.iter().map(MatchRule::to_string) {
            if self.inner.state.lock().match_rules.contains(&rule) {
                continue;
            }

            debug!("Adding match rule {rule}");
            handle.add_match(&rule)?;

            self.inner.state.lock().match_rules.insert(rule);
        }

        Ok(())
    }

    pub(crate) async fn dispatch_signal(&self, signal: SignalMessage) {
        if signal.path == LOCAL_OBJECT_PATH
            && signal.interface == LOCAL_INTERFACE
            && signal.member == DISCONNECTED_SIGNAL
        {
            warn!("Connection {} lost", signal.unique_name);

            if let Err(e) = self.reconnect().await {
                error!("Failed to reconnect to the {} bus: {e}", self.inner.scope);
            }

            return;
        }

        let key = format!("{}:{}", signal.path, signal.interface);
        let receiver = self
            .inner
            .state
            .lock()
            .signal_receivers
            .get(&key)
            .map(|registration| registration.receiver.clone());

        match receiver {
            Some(receiver) => receiver.emit(SignalEvent {
                name: signal.member,
                args: signal.args,
            }),
            None => trace!("No signal receiver for {key}. Dropping {}", signal.member),
        }
    }

    pub(crate) fn send_message_reply(&self, message: MessageHandle, value: Value, signature: &str) {
        match self.handle() {
            Some(handle) => {
                if let Err(e) = handle.send_reply(message, value, signature) {
                    warn!("Failed to send a reply: {e}");
                }
            }
            None => warn!("Dropping a reply: bus is no longer connected"),
        }
    }

    pub(crate) fn send_error_reply(&self, message: MessageHandle, name: &str, text: &str) {
        match self.handle() {
            Some(handle) => {
                if let Err(e) = handle.send_error(message, name, text) {
                    warn!("Failed to send an error reply: {e}");
                }
            }
            None => warn!("Dropping an error reply: bus is no longer connected"),
        }
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Connection({}, {})",
            self.inner.scope,
            self.unique_name().as_deref().unwrap_or("disconnected")
        )
    }
}
