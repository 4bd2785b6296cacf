use std::{collections::HashMap, sync::Arc};

use async_channel::{unbounded, Receiver};
use log::{debug, info, warn};
use parking_lot::Mutex;

use dbus_objects_common::{
    transport::{BusEvent, BusScope, RequestMessage, SignalMessage, Transport},
    Error, Result,
};

use crate::{connection::Connection, router::SignalRouter, service::Service, utils::next_tick};

struct BusInner {
    transport: Arc<dyn Transport>,
    router: SignalRouter,
    /// Inbound requests and signals
    events: Receiver<BusEvent>,
    /// Services, which own well-known names, by `scope:name`
    named_services: Mutex<HashMap<String, Service>>,
    /// Every service to route requests to
    services: Mutex<Vec<Service>>,
}

/// Bus context. Owns the transport, the signal router and the registered services
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (sender, receiver) = unbounded();

        Self {
            inner: Arc::new(BusInner {
                router: SignalRouter::new(sender),
                transport,
                events: receiver,
                named_services: Mutex::new(HashMap::new()),
                services: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open a new bus connection
    pub async fn connect(&self, scope: BusScope) -> Result<Connection> {
        Connection::connect(
            self.inner.transport.clone(),
            self.inner.router.clone(),
            scope,
        )
        .await
    }

    /// Register a service with a well-known name.
    /// Returns the existing service if already registered
    pub async fn register_service(&self, scope: BusScope, name: &str) -> Result<Service> {
        let key = format!("{scope}:{name}");

        let registered = self.inner.named_services.lock().get(&key).cloned();
        if let Some(service) = registered {
            debug!("Service {name} is already registered on the {scope} bus");

            next_tick().await;
            return Ok(service);
        }

        let connection = self.connect(scope).await?;
        let handle = connection.handle().ok_or(Error::NotConnected)?;
        handle.request_name(name)?;

        info!("Registered service {name} on the {scope} bus");

        let service = Service::new(connection, name, true);
        self.inner
            .named_services
            .lock()
            .insert(key, service.clone());
        self.inner.services.lock().push(service.clone());

        Ok(service)
    }

    /// Create a service over an existing connection. The service doesn't request its name
    pub fn create_service(&self, connection: &Connection, name: &str) -> Service {
        debug!("Creating service {name} over {connection:?}");

        let service = Service::new(connection.clone(), name, false);
        self.inner.services.lock().push(service.clone());
        service
    }

    /// Handle a single inbound request or signal.
    /// Signals are dispatched in order of arrival. Each request is handled on its own task, so
    /// a pending method handler never blocks other requests or signals
    pub async fn poll(&self) -> Result<()> {
        let event = self
            .inner
            .events
            .recv()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        match event {
            BusEvent::Signal(signal) => self.dispatch_signal(signal).await,
            BusEvent::Request(request) => self.dispatch_request(request),
        }

        Ok(())
    }

    /// Handle inbound requests and signals until the transport goes away
    pub async fn run(self) -> Result<()> {
        loop {
            self.poll().await?
        }
    }

    async fn dispatch_signal(&self, signal: SignalMessage) {
        match self.inner.router.route(&signal.unique_name) {
            Some(connection) => connection.dispatch_signal(signal).await,
            None => debug!(
                "No connection for {}. Dropping {}.{}",
                signal.unique_name, signal.interface, signal.member
            ),
        }
    }

    fn dispatch_request(&self, request: RequestMessage) {
        let service = {
            let services = self.inner.services.lock();

            let mut candidates = services.iter().filter(|service| {
                service.connection().unique_name().as_deref() == Some(request.unique_name.as_str())
            });

            candidates
                .clone()
                .find(|service| service.exports(&request.path))
                .or_else(|| candidates.next())
                .cloned()
        };

        match service {
            Some(service) => {
                tokio::spawn(async move { service.handle_request(request).await });
            }
            None => warn!(
                "No service for {}:{}. Dropping request",
                request.unique_name, request.path
            ),
        }
    }
}
