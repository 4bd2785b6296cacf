use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Weak},
};

use bson::Document;
use log::debug;
use parking_lot::Mutex;

use dbus_objects_common::{
    describe_field, introspection::DOCTYPE, Error, FieldDescriptor, Kind, Result, Value,
    ERROR_UNKNOWN_OBJECT, INTROSPECTABLE_INTERFACE, PROPERTIES_INTERFACE,
};

use crate::connection::Connection;

use super::{
    interface::{MethodSpec, ServiceInterface},
    WeakService,
};

const PROPERTIES_CHANGED_SIGNAL: &str = "PropertiesChanged";

struct ObjectInner {
    path: String,
    service: WeakService,
    connection: Connection,
    interfaces: Mutex<BTreeMap<String, ServiceInterface>>,
    /// Introspection document as of the last rebuild
    introspection: Mutex<String>,
}

/// Object exported by a [crate::Service] at an object path
#[derive(Clone)]
pub struct ServiceObject {
    inner: Arc<ObjectInner>,
}

impl ServiceObject {
    pub(crate) fn new(service: WeakService, connection: Connection, path: &str) -> Self {
        let this = Self {
            inner: Arc::new(ObjectInner {
                path: path.into(),
                service,
                connection,
                interfaces: Mutex::new(BTreeMap::new()),
                introspection: Mutex::new(String::new()),
            }),
        };

        this.add_introspectable_interface();
        this.add_properties_interface();
        this
    }

    fn from_weak(object: &Weak<ObjectInner>) -> Result<Self> {
        object
            .upgrade()
            .map(|inner| Self { inner })
            .ok_or_else(|| Error::new(ERROR_UNKNOWN_OBJECT, "Object is no longer exported"))
    }

    fn add_introspectable_interface(&self) {
        let object = Arc::downgrade(&self.inner);

        self.create_interface(INTROSPECTABLE_INTERFACE)
            .add_method(
                "Introspect",
                MethodSpec::new().output(describe_field(Kind::String, Some("data"))),
                move |_| {
                    let object = object.clone();

                    async move {
                        let object = Self::from_weak(&object)?;
                        Ok(Value::String(object.update_introspection()))
                    }
                },
            )
            .update();
    }

    fn add_properties_interface(&self) {
        let interface = self.create_interface(PROPERTIES_INTERFACE);

        let object = Arc::downgrade(&self.inner);
        let resolver_object = object.clone();
        interface.add_method(
            "Get",
            MethodSpec::new()
                .input(describe_field(Kind::String, Some("interface_name")))
                .input(describe_field(Kind::String, Some("property_name")))
                .dynamic_output(move |_, _, args| {
                    // Declared property type if known
                    let declared = match (args.first(), args.get(1), resolver_object.upgrade()) {
                        (
                            Some(Value::String(interface)),
                            Some(Value::String(property)),
                            Some(inner),
                        ) => ServiceObject { inner }.property_field(interface, property),
                        _ => None,
                    };

                    declared
                        .map(|field| FieldDescriptor::new(field.signature, Some("value")))
                        .unwrap_or_else(|| describe_field(Kind::Auto, Some("value")))
                }),
            move |args| {
                let object = object.clone();

                async move {
                    let object = Self::from_weak(&object)?;
                    let interface = object.property_interface(&args)?;

                    interface.get_property(&string_arg(&args, 1)?).await
                }
            },
        );

        let object = Arc::downgrade(&self.inner);
        interface.add_method(
            "Set",
            MethodSpec::new()
                .input(describe_field(Kind::String, Some("interface_name")))
                .input(describe_field(Kind::String, Some("property_name")))
                .input(describe_field(Kind::Auto, Some("value"))),
            move |mut args| {
                let object = object.clone();

                async move {
                    let object = Self::from_weak(&object)?;
                    let interface = object.property_interface(&args)?;
                    let name = string_arg(&args, 1)?;

                    let value = args.pop().unwrap_or(Value::Null);
                    interface.set_property(&name, value).await?;
                    Ok(Value::Null)
                }
            },
        );

        let object = Arc::downgrade(&self.inner);
        interface.add_method(
            "GetAll",
            MethodSpec::new()
                .input(describe_field(Kind::String, Some("interface_name")))
                .output(describe_field(Kind::Map, Some("properties"))),
            move |args| {
                let object = object.clone();

                async move {
                    let object = Self::from_weak(&object)?;
                    let interface = object.property_interface(&args)?;

                    Ok(Value::Document(interface.get_properties().await?))
                }
            },
        );

        interface.add_signal(
            PROPERTIES_CHANGED_SIGNAL,
            vec![
                describe_field(Kind::String, Some("interface_name")),
                describe_field(Kind::Map, Some("changed_properties")),
                describe_field(Kind::List, Some("invalidated_properties")),
            ],
        );

        interface.update();
    }

    /// Interface named by the first argument of a properties call
    fn property_interface(&self, args: &[Value]) -> Result<ServiceInterface> {
        let interface_name = string_arg(args, 0)?;
        self.interface(&interface_name).ok_or(Error::NoSuchProperty)
    }

    fn property_field(&self, interface_name: &str, property_name: &str) -> Option<FieldDescriptor> {
        self.interface(interface_name)?.property_field(property_name)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Get or create an interface
    pub fn create_interface(&self, name: &str) -> ServiceInterface {
        let interface = {
            let mut interfaces = self.inner.interfaces.lock();

            if let Some(interface) = interfaces.get(name) {
                return interface.clone();
            }

            let interface =
                ServiceInterface::new(name, &self.inner.path, self.inner.connection.clone());
            interfaces.insert(name.into(), interface.clone());
            interface
        };

        debug!("Created interface {name} at {}", self.inner.path);

        interface.update();
        interface
    }

    pub fn interface(&self, name: &str) -> Option<ServiceInterface> {
        self.inner.interfaces.lock().get(name).cloned()
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.inner.interfaces.lock().keys().cloned().collect()
    }

    /// Rebuild the object introspection document from the interface fragments and child objects
    pub fn update_introspection(&self) -> String {
        let fragments: Vec<String> = self
            .inner
            .interfaces
            .lock()
            .values()
            .map(ServiceInterface::introspection)
            .collect();

        let mut introspection = vec![
            DOCTYPE.to_owned(),
            format!("<node name=\"{}\">", self.inner.path),
        ];
        introspection.extend(fragments);

        for child in self.child_nodes() {
            introspection.push(format!("<node name=\"{child}\"/>"));
        }

        introspection.push("</node>".into());

        let introspection = introspection.join("\n");
        *self.inner.introspection.lock() = introspection.clone();
        introspection
    }

    /// Introspection document as of the last rebuild
    pub fn introspection(&self) -> String {
        self.inner.introspection.lock().clone()
    }

    /// First path segments of the service objects below this one
    fn child_nodes(&self) -> BTreeSet<String> {
        let Some(service) = self.inner.service.upgrade() else {
            return BTreeSet::new();
        };

        let prefix = if self.inner.path.ends_with('/') {
            self.inner.path.clone()
        } else {
            format!("{}/", self.inner.path)
        };

        service
            .paths()
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Emit the standard properties change signal
    pub fn emit_properties_changed(
        &self,
        interface_name: &str,
        changed: Document,
        invalidated: Vec<String>,
    ) -> Result<()> {
        let properties = self
            .interface(PROPERTIES_INTERFACE)
            .ok_or(Error::NoSuchInterface)?;

        properties.emit_signal(
            PROPERTIES_CHANGED_SIGNAL,
            vec![
                interface_name.into(),
                Value::Document(changed),
                Value::Array(invalidated.into_iter().map(Value::String).collect()),
            ],
        )
    }
}

fn string_arg(args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(Error::InvalidArgs(format!(
            "Argument {index} must be a string"
        ))),
    }
}
