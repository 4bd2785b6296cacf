pub mod interface;
pub mod object;

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use log::{debug, info, warn};
use parking_lot::Mutex;

use dbus_objects_common::{transport::RequestMessage, Error, Result};

use crate::{connection::Connection, utils::next_tick};

use object::ServiceObject;

pub(crate) struct ServiceInner {
    /// Service connection. Shared with remote interfaces requested through it
    connection: Connection,
    /// Self service name
    name: String,
    /// If the service requested its name at the bus
    owns_name: bool,
    /// Exported objects by their paths
    objects: Mutex<BTreeMap<String, ServiceObject>>,
}

/// Service handle
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

#[derive(Clone)]
pub(crate) struct WeakService(Weak<ServiceInner>);

impl WeakService {
    pub fn upgrade(&self) -> Option<Service> {
        self.0.upgrade().map(|inner| Service { inner })
    }
}

impl Service {
    pub(crate) fn new(connection: Connection, name: &str, owns_name: bool) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                connection,
                name: name.into(),
                owns_name,
                objects: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn connected(&self) -> bool {
        self.inner.connection.connected()
    }

    fn downgrade(&self) -> WeakService {
        WeakService(Arc::downgrade(&self.inner))
    }

    /// Export an object at `path`. Returns the existing object if the path is already exported
    pub fn create_object(&self, path: &str) -> Result<ServiceObject> {
        let handle = self.inner.connection.handle().ok_or(Error::NotConnected)?;

        let mut objects = self.inner.objects.lock();
        if let Some(object) = objects.get(path) {
            debug!("Object {path} is already exported by {}", self.inner.name);
            return Ok(object.clone());
        }

        handle.register_object_path(path)?;

        let object = ServiceObject::new(self.downgrade(), self.inner.connection.clone(), path);
        objects.insert(path.into(), object.clone());

        info!("Service {} exported {path}", self.inner.name);
        Ok(object)
    }

    pub fn object(&self, path: &str) -> Option<ServiceObject> {
        self.inner.objects.lock().get(path).cloned()
    }

    /// Stop exporting an object
    pub fn remove_object(&self, path: &str) -> Result<()> {
        if self.inner.objects.lock().remove(path).is_none() {
            debug!("Object {path} is not exported by {}", self.inner.name);
            return Ok(());
        }

        if let Some(handle) = self.inner.connection.handle() {
            handle.unregister_object_path(path)?;
        }

        info!("Service {} removed {path}", self.inner.name);
        Ok(())
    }

    /// Re-request the service name and re-register every object path on a reconnected bus
    pub async fn restore(&self) -> Result<()> {
        let Some(handle) = self.inner.connection.handle() else {
            next_tick().await;
            return Err(Error::NotConnected);
        };

        if self.inner.owns_name {
            handle.request_name(&self.inner.name)?;
        }

        for path in self.paths() {
            handle.register_object_path(&path)?;
        }

        info!("Restored service {} at {}", self.inner.name, handle.unique_name());

        next_tick().await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        info!("Disconnecting service {}", self.inner.name);
        self.inner.connection.disconnect().await
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.inner.objects.lock().keys().cloned().collect()
    }

    pub(crate) fn exports(&self, path: &str) -> bool {
        self.inner.objects.lock().contains_key(path)
    }

    pub(crate) async fn handle_request(&self, request: RequestMessage) {
        let interface = self
            .object(&request.path)
            .and_then(|object| object.interface(&request.interface));

        match interface {
            Some(interface) => {
                interface
                    .call(&request.member, request.message, request.args)
                    .await
            }
            None => warn!(
                "No handler for {}.{} at {}. Dropping request",
                request.interface, request.member, request.path
            ),
        }
    }
}
