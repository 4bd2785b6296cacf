use std::{collections::BTreeMap, future::Future, sync::Arc};

use bson::Document;
use futures::{future::BoxFuture, FutureExt};
use log::{debug, warn};
use parking_lot::Mutex;

use dbus_objects_common::{
    introspection::Access,
    transport::{MessageHandle, OutgoingSignal},
    Error, FieldDescriptor, Result, Value, ERROR_INVALID_ARGS, ERROR_UNKNOWN_METHOD,
};

use crate::connection::Connection;

type MethodHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type PropertyGetter = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type PropertySetter = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Resolves method output type from the interface name, method name and call arguments
pub type OutResolver = Arc<dyn Fn(&str, &str, &[Value]) -> FieldDescriptor + Send + Sync>;

/// Method output declaration
#[derive(Clone)]
pub enum OutArg {
    Static(FieldDescriptor),
    /// Output, which type depends on the call
    Dynamic(OutResolver),
}

impl OutArg {
    fn resolve(&self, interface_name: &str, method_name: &str, args: &[Value]) -> FieldDescriptor {
        match self {
            OutArg::Static(field) => field.clone(),
            OutArg::Dynamic(resolver) => resolver(interface_name, method_name, args),
        }
    }
}

/// Method signature builder
#[derive(Clone, Default)]
pub struct MethodSpec {
    inputs: Vec<FieldDescriptor>,
    output: Option<OutArg>,
}

impl MethodSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, field: FieldDescriptor) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: FieldDescriptor) -> Self {
        self.output = Some(OutArg::Static(field));
        self
    }

    pub fn dynamic_output<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str, &str, &[Value]) -> FieldDescriptor + Send + Sync + 'static,
    {
        self.output = Some(OutArg::Dynamic(Arc::new(resolver)));
        self
    }
}

#[derive(Clone)]
struct MethodDeclaration {
    inputs: Vec<FieldDescriptor>,
    output: Option<OutArg>,
    handler: MethodHandler,
}

#[derive(Clone)]
struct PropertyDeclaration {
    field: FieldDescriptor,
    access: Access,
    getter: PropertyGetter,
    setter: Option<PropertySetter>,
}

#[derive(Default)]
struct InterfaceState {
    methods: BTreeMap<String, MethodDeclaration>,
    properties: BTreeMap<String, PropertyDeclaration>,
    signals: BTreeMap<String, Vec<FieldDescriptor>>,
    /// Introspection fragment as of the last [ServiceInterface::update]
    introspection: String,
}

struct InterfaceInner {
    name: String,
    object_path: String,
    connection: Connection,
    state: Mutex<InterfaceState>,
}

/// Interface exported by a [crate::ServiceObject]. Dispatches inbound calls to registered handlers
#[derive(Clone)]
pub struct ServiceInterface {
    inner: Arc<InterfaceInner>,
}

/// Declared signal handle
#[derive(Clone)]
pub struct Signal {
    interface: ServiceInterface,
    name: String,
}

impl Signal {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Broadcast the signal
    pub fn emit(&self, values: Vec<Value>) -> Result<()> {
        self.interface.emit_signal(&self.name, values)
    }
}

impl ServiceInterface {
    pub(crate) fn new(name: &str, object_path: &str, connection: Connection) -> Self {
        Self {
            inner: Arc::new(InterfaceInner {
                name: name.into(),
                object_path: object_path.into(),
                connection,
                state: Mutex::new(InterfaceState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declare a method. Redeclaring a method replaces its handler
    pub fn add_method<F, Fr>(&self, name: &str, spec: MethodSpec, handler: F) -> &Self
    where
        F: Fn(Vec<Value>) -> Fr + Send + Sync + 'static,
        Fr: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |args| handler(args).boxed());

        self.inner.state.lock().methods.insert(
            name.into(),
            MethodDeclaration {
                inputs: spec.inputs,
                output: spec.output,
                handler,
            },
        );

        self
    }

    /// Declare a read-only property
    pub fn add_property<G, Gr>(&self, name: &str, field: FieldDescriptor, getter: G) -> &Self
    where
        G: Fn() -> Gr + Send + Sync + 'static,
        Gr: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert_property(name, field, Arc::new(move || getter().boxed()), None)
    }

    /// Declare a read-write property
    pub fn add_writable_property<G, Gr, S, Sr>(
        &self,
        name: &str,
        field: FieldDescriptor,
        getter: G,
        setter: S,
    ) -> &Self
    where
        G: Fn() -> Gr + Send + Sync + 'static,
        Gr: Future<Output = Result<Value>> + Send + 'static,
        S: Fn(Value) -> Sr + Send + Sync + 'static,
        Sr: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert_property(
            name,
            field,
            Arc::new(move || getter().boxed()),
            Some(Arc::new(move |value| setter(value).boxed())),
        )
    }

    fn insert_property(
        &self,
        name: &str,
        field: FieldDescriptor,
        getter: PropertyGetter,
        setter: Option<PropertySetter>,
    ) -> &Self {
        let access = if setter.is_some() {
            Access::ReadWrite
        } else {
            Access::Read
        };

        self.inner.state.lock().properties.insert(
            name.into(),
            PropertyDeclaration {
                field,
                access,
                getter,
                setter,
            },
        );

        self
    }

    /// Declare a signal
    pub fn add_signal(&self, name: &str, args: Vec<FieldDescriptor>) -> Signal {
        self.inner.state.lock().signals.insert(name.into(), args);

        Signal {
            interface: self.clone(),
            name: name.into(),
        }
    }

    /// Rebuild the introspection fragment from the current declarations
    pub fn update(&self) -> &Self {
        let (methods, properties, signals) = {
            let state = self.inner.state.lock();

            let methods: Vec<(String, Vec<FieldDescriptor>, Option<OutArg>)> = state
                .methods
                .iter()
                .map(|(name, method)| (name.clone(), method.inputs.clone(), method.output.clone()))
                .collect();

            let properties: Vec<(String, String, Access)> = state
                .properties
                .iter()
                .map(|(name, property)| {
                    (name.clone(), property.field.signature.clone(), property.access)
                })
                .collect();

            (methods, properties, state.signals.clone())
        };

        let mut introspection = vec![format!("<interface name=\"{}\">", self.inner.name)];

        for (name, inputs, output) in methods {
            introspection.push(format!("<method name=\"{name}\">"));

            for input in &inputs {
                introspection.push(arg_element(input, Some("in")));
            }

            // Dynamic outputs resolve without call arguments
            if let Some(output) = output {
                let field = output.resolve(&self.inner.name, &name, &[]);
                introspection.push(arg_element(&field, Some("out")));
            }

            introspection.push("</method>".into());
        }

        for (name, signature, access) in properties {
            introspection.push(format!(
                "<property name=\"{name}\" type=\"{signature}\" access=\"{access}\"/>"
            ));
        }

        for (name, args) in signals {
            introspection.push(format!("<signal name=\"{name}\">"));

            for arg in &args {
                introspection.push(arg_element(arg, None));
            }

            introspection.push("</signal>".into());
        }

        introspection.push("</interface>".into());

        self.inner.state.lock().introspection = introspection.join("\n");
        self
    }

    /// Introspection fragment as of the last [ServiceInterface::update]
    pub fn introspection(&self) -> String {
        self.inner.state.lock().introspection.clone()
    }

    /// Handle an inbound method call and reply to it
    pub(crate) async fn call(&self, member: &str, message: MessageHandle, args: Vec<Value>) {
        let declaration = self.inner.state.lock().methods.get(member).cloned();

        let Some(declaration) = declaration else {
            warn!("Unknown method {}.{member} called", self.inner.name);

            self.inner.connection.send_error_reply(
                message,
                ERROR_UNKNOWN_METHOD,
                &format!("Method \"{member}\" doesn't exist"),
            );
            return;
        };

        if declaration.inputs.len() != args.len() {
            warn!(
                "Method {}.{member} called with {} arguments instead of {}",
                self.inner.name,
                args.len(),
                declaration.inputs.len()
            );

            self.inner.connection.send_error_reply(
                message,
                ERROR_INVALID_ARGS,
                &format!(
                    "Method \"{member}\" expects {} arguments, got {}",
                    declaration.inputs.len(),
                    args.len()
                ),
            );
            return;
        }

        let signature = declaration
            .output
            .as_ref()
            .map(|output| output.resolve(&self.inner.name, member, &args).signature)
            .unwrap_or_default();

        debug!("Method call {}.{member} at {}", self.inner.name, self.inner.object_path);

        match (declaration.handler)(args).await {
            Ok(value) => self
                .inner
                .connection
                .send_message_reply(message, value, &signature),
            Err(e) => {
                debug!("Method {}.{member} failed: {e}", self.inner.name);

                self.inner
                    .connection
                    .send_error_reply(message, e.dbus_name(), &e.dbus_message())
            }
        }
    }

    /// Declared property type
    pub fn property_field(&self, name: &str) -> Option<FieldDescriptor> {
        self.inner
            .state
            .lock()
            .properties
            .get(name)
            .map(|property| property.field.clone())
    }

    pub async fn get_property(&self, name: &str) -> Result<Value> {
        let getter = self
            .inner
            .state
            .lock()
            .properties
            .get(name)
            .map(|property| property.getter.clone());

        match getter {
            Some(getter) => getter().await,
            None => Err(Error::NoSuchProperty),
        }
    }

    pub async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        let setter = self
            .inner
            .state
            .lock()
            .properties
            .get(name)
            .map(|property| property.setter.clone());

        match setter {
            Some(Some(setter)) => setter(value).await,
            Some(None) => Err(Error::PropertyReadOnly(name.into())),
            None => Err(Error::NoSuchProperty),
        }
    }

    /// Values of every readable property. Getters are called one at a time
    pub async fn get_properties(&self) -> Result<Document> {
        let getters: Vec<(String, PropertyGetter)> = self
            .inner
            .state
            .lock()
            .properties
            .iter()
            .map(|(name, property)| (name.clone(), property.getter.clone()))
            .collect();

        let mut properties = Document::new();
        for (name, getter) in getters {
            match getter().await {
                Ok(value) => {
                    properties.insert(name, value);
                }
                Err(e) => debug!("Skipping property {name}: {e}"),
            }
        }

        Ok(properties)
    }

    /// Broadcast a declared signal
    pub fn emit_signal(&self, name: &str, values: Vec<Value>) -> Result<()> {
        let handle = self
            .inner
            .connection
            .handle()
            .ok_or(Error::ServiceNotConnected)?;

        let signatures: Vec<String> = self
            .inner
            .state
            .lock()
            .signals
            .get(name)
            .ok_or_else(|| Error::NoSuchSignal(name.into()))?
            .iter()
            .map(|arg| arg.signature.clone())
            .collect();

        debug!("Emitting {}.{name} at {}", self.inner.name, self.inner.object_path);

        handle.emit_signal(OutgoingSignal {
            path: self.inner.object_path.clone(),
            interface: self.inner.name.clone(),
            member: name.into(),
            args: values,
            signatures,
        })
    }
}

fn arg_element(field: &FieldDescriptor, direction: Option<&str>) -> String {
    let mut element = String::from("<arg");

    if let Some(name) = &field.name {
        element.push_str(&format!(" name=\"{name}\""));
    }

    if let Some(direction) = direction {
        element.push_str(&format!(" direction=\"{direction}\""));
    }

    element.push_str(&format!(" type=\"{}\"/>", field.signature));
    element
}
