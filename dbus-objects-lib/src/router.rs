use std::{collections::HashMap, sync::Arc};

use async_channel::Sender;
use log::debug;
use parking_lot::Mutex;

use dbus_objects_common::transport::BusEvent;

use crate::connection::{Connection, WeakConnection};

/// Routes transport signals to the connections, which own receiving unique names
#[derive(Clone)]
pub(crate) struct SignalRouter {
    /// Connections by their unique bus names
    routes: Arc<Mutex<HashMap<String, WeakConnection>>>,
    /// Bus event sink every connection is acquired with
    sink: Sender<BusEvent>,
}

impl SignalRouter {
    pub fn new(sink: Sender<BusEvent>) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    pub fn sink(&self) -> Sender<BusEvent> {
        self.sink.clone()
    }

    pub fn register(&self, unique_name: &str, connection: &Connection) {
        debug!("Routing signals for {unique_name}");

        self.routes
            .lock()
            .insert(unique_name.to_owned(), connection.downgrade());
    }

    pub fn unregister(&self, unique_name: &str) {
        debug!("Stopped routing signals for {unique_name}");

        self.routes.lock().remove(unique_name);
    }

    pub fn route(&self, unique_name: &str) -> Option<Connection> {
        self.routes
            .lock()
            .get(unique_name)
            .and_then(WeakConnection::upgrade)
    }
}
