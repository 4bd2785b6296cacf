use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_channel::Sender;
use bson::{Bson, Document};
use futures::channel::oneshot;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use dbus_objects_common::{
    match_rule::MatchRule,
    transport::{
        BusEvent, BusHandle, BusScope, MessageHandle, MethodCall, OutgoingSignal, RequestMessage,
        SignalMessage, Transport,
    },
    Error, ErrorReply, Result, Value, DBUS_SERVICE_NAME, DEFAULT_MAX_MESSAGE_SIZE,
    DISCONNECTED_SIGNAL, ERROR_FAILED, ERROR_INVALID_ARGS, ERROR_LIMITS_EXCEEDED,
    ERROR_NAME_HAS_NO_OWNER, ERROR_NO_REPLY, ERROR_SERVICE_UNKNOWN, ERROR_UNKNOWN_METHOD,
    ERROR_UNKNOWN_OBJECT, LOCAL_INTERFACE, LOCAL_OBJECT_PATH,
};

use crate::{args::Args, client::Client};

pub type ContextType = Arc<Mutex<HubContext>>;

pub(crate) type ReplyResult = std::result::Result<Value, ErrorReply>;

pub struct ClientState {
    pub scope: BusScope,
    /// Inbound requests and signals of the connection
    pub sink: Sender<BusEvent>,
    pub paths: HashSet<String>,
    pub match_rules: Vec<MatchRule>,
    pub max_message_size: usize,
}

pub(crate) struct PendingCall {
    /// Unique name of the connection, which has to reply
    pub target: String,
    pub reply: oneshot::Sender<ReplyResult>,
}

/// Call routing result
pub(crate) enum Dispatched {
    /// Answered by the hub itself
    Reply(Value),
    /// Delivered to a connection
    Pending {
        serial: u64,
        reply: oneshot::Receiver<ReplyResult>,
        timeout: Duration,
    },
}

pub struct HubContext {
    pub(crate) clients: HashMap<String, ClientState>,
    /// Well-known name owners by scope and name
    pub(crate) names: HashMap<(BusScope, String), String>,
    pub(crate) pending_calls: HashMap<u64, PendingCall>,
    next_client_id: u64,
    next_serial: u64,
    default_call_timeout: Duration,
}

impl HubContext {
    fn add_client(&mut self, scope: BusScope, sink: Sender<BusEvent>) -> String {
        self.next_client_id += 1;
        let unique_name = format!(":1.{}", self.next_client_id);

        self.clients.insert(
            unique_name.clone(),
            ClientState {
                scope,
                sink,
                paths: HashSet::new(),
                match_rules: Vec::new(),
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
        );

        info!("New {scope} bus connection {unique_name}");
        unique_name
    }

    /// Remove a client with its names and pending calls
    pub(crate) fn remove_client(&mut self, unique_name: &str) -> Option<ClientState> {
        let client = self.clients.remove(unique_name)?;

        self.names.retain(|_, owner| owner != unique_name);
        // Callers get `NoReply` once the reply senders are dropped
        self.pending_calls.retain(|_, call| call.target != unique_name);

        info!("Connection {unique_name} closed");
        Some(client)
    }

    pub(crate) fn client_mut(&mut self, unique_name: &str) -> Result<&mut ClientState> {
        self.clients.get_mut(unique_name).ok_or(Error::NotConnected)
    }

    pub(crate) fn request_name(&mut self, unique_name: &str, name: &str) -> Result<()> {
        let scope = self.client_mut(unique_name)?.scope;
        let key = (scope, name.to_owned());

        let owner = self.names.get(&key).cloned();

        match owner {
            Some(owner) if owner != unique_name => Err(Error::new(
                ERROR_FAILED,
                format!("Name {name} is already owned by {owner}"),
            )),
            _ => {
                info!("{unique_name} owns {name} on the {scope} bus");

                self.names.insert(key, unique_name.to_owned());
                Ok(())
            }
        }
    }

    /// Unique name of a connection, addressed by either its unique or a well-known name
    fn resolve(&self, scope: BusScope, name: &str) -> Option<String> {
        if name.starts_with(':') {
            return self
                .clients
                .get(name)
                .filter(|client| client.scope == scope)
                .map(|_| name.to_owned());
        }

        self.names.get(&(scope, name.to_owned())).cloned()
    }

    pub(crate) fn dispatch_call(
        &mut self,
        sender: &str,
        call: MethodCall,
    ) -> std::result::Result<Dispatched, ErrorReply> {
        let scope = match self.clients.get(sender) {
            Some(client) => client.scope,
            None => return Err(ErrorReply::new(ERROR_FAILED, "Connection is closed")),
        };

        if call.destination == DBUS_SERVICE_NAME {
            return self.handle_bus_call(scope, &call).map(Dispatched::Reply);
        }

        let target = self.resolve(scope, &call.destination).ok_or_else(|| {
            ErrorReply::new(
                ERROR_SERVICE_UNKNOWN,
                format!("The name {} was not provided by any service", call.destination),
            )
        })?;

        let (max_message_size, sink) = match self.clients.get(&target) {
            Some(client) if client.paths.contains(&call.path) => {
                (client.max_message_size, client.sink.clone())
            }
            _ => {
                return Err(ErrorReply::new(
                    ERROR_UNKNOWN_OBJECT,
                    format!("No such object path '{}'", call.path),
                ))
            }
        };

        let size = message_size(&call.args);
        if size > max_message_size {
            return Err(ErrorReply::new(
                ERROR_LIMITS_EXCEEDED,
                format!("Message of {size} bytes exceeds {max_message_size} bytes limit"),
            ));
        }

        self.next_serial += 1;
        let serial = self.next_serial;
        let (reply_sender, reply) = oneshot::channel();

        debug!(
            "Routing {}.{} from {sender} to {target}:{}",
            call.interface, call.member, call.path
        );

        self.pending_calls.insert(
            serial,
            PendingCall {
                target: target.clone(),
                reply: reply_sender,
            },
        );

        let timeout = u64::try_from(call.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_call_timeout);

        let request = RequestMessage {
            unique_name: target,
            sender: sender.to_owned(),
            path: call.path,
            interface: call.interface,
            member: call.member,
            message: MessageHandle::new(serial),
            args: call.args,
        };

        if sink.try_send(BusEvent::Request(request)).is_err() {
            self.pending_calls.remove(&serial);
            return Err(ErrorReply::new(ERROR_NO_REPLY, "Receiver event sink is closed"));
        }

        Ok(Dispatched::Pending {
            serial,
            reply,
            timeout,
        })
    }

    /// Bus daemon methods
    fn handle_bus_call(
        &self,
        scope: BusScope,
        call: &MethodCall,
    ) -> std::result::Result<Value, ErrorReply> {
        match call.member.as_str() {
            "GetNameOwner" => {
                let name = string_arg(&call.args)?;

                self.resolve(scope, &name).map(Value::String).ok_or_else(|| {
                    ErrorReply::new(
                        ERROR_NAME_HAS_NO_OWNER,
                        format!("Could not get owner of name '{name}': no such name"),
                    )
                })
            }
            "NameHasOwner" => {
                let name = string_arg(&call.args)?;
                Ok(Value::Boolean(self.resolve(scope, &name).is_some()))
            }
            "ListNames" => {
                let mut names: Vec<String> = self
                    .clients
                    .iter()
                    .filter(|(_, client)| client.scope == scope)
                    .map(|(name, _)| name.clone())
                    .chain(
                        self.names
                            .keys()
                            .filter(|(name_scope, _)| *name_scope == scope)
                            .map(|(_, name)| name.clone()),
                    )
                    .collect();
                names.sort();

                Ok(Value::Array(names.into_iter().map(Value::String).collect()))
            }
            other => Err(ErrorReply::new(
                ERROR_UNKNOWN_METHOD,
                format!("Unknown bus method {other}"),
            )),
        }
    }

    pub(crate) fn take_pending_call(
        &mut self,
        unique_name: &str,
        message: MessageHandle,
    ) -> Option<PendingCall> {
        let serial = message.serial();
        let target = self
            .pending_calls
            .get(&serial)
            .map(|call| call.target.clone());

        match target {
            Some(target) if target == unique_name => self.pending_calls.remove(&serial),
            Some(target) => {
                warn!("{unique_name} replies to a call addressed to {target}. Ignoring");
                None
            }
            None => {
                warn!("{unique_name} replies to an unknown call #{serial}");
                None
            }
        }
    }

    /// Deliver a signal once to every connection with a matching rule
    pub(crate) fn broadcast_signal(&self, sender: &str, signal: OutgoingSignal) {
        let Some(scope) = self.clients.get(sender).map(|client| client.scope) else {
            return;
        };

        let senders: Vec<&str> = std::iter::once(sender)
            .chain(
                self.names
                    .iter()
                    .filter(|((name_scope, _), owner)| *name_scope == scope && *owner == sender)
                    .map(|((_, name), _)| name.as_str()),
            )
            .collect();

        for (unique_name, client) in self.clients.iter().filter(|(_, c)| c.scope == scope) {
            let matches = client.match_rules.iter().any(|rule| {
                rule.matches_signal(&senders, &signal.path, &signal.interface, &signal.member)
            });

            if !matches {
                continue;
            }

            trace!("Delivering {}.{} to {unique_name}", signal.interface, signal.member);

            let delivered = client.sink.try_send(BusEvent::Signal(SignalMessage {
                unique_name: unique_name.clone(),
                sender: sender.to_owned(),
                path: signal.path.clone(),
                interface: signal.interface.clone(),
                member: signal.member.clone(),
                args: signal.args.clone(),
            }));

            if delivered.is_err() {
                debug!("Event sink of {unique_name} is closed");
            }
        }
    }
}

/// In-process loopback bus
pub struct Hub {
    context: ContextType,
}

impl Hub {
    pub fn new(args: Args) -> Self {
        Self {
            context: Arc::new(Mutex::new(HubContext {
                clients: HashMap::new(),
                names: HashMap::new(),
                pending_calls: HashMap::new(),
                next_client_id: 0,
                next_serial: 0,
                default_call_timeout: args.default_call_timeout,
            })),
        }
    }

    /// Drop a connection as if its link was lost. The owner receives local `Disconnected` signal
    pub fn drop_connection(&self, unique_name: &str) -> bool {
        let removed = self.context.lock().remove_client(unique_name);

        let Some(client) = removed else {
            return false;
        };

        warn!("Dropped connection {unique_name}");

        let disconnected = client.sink.try_send(BusEvent::Signal(SignalMessage {
            unique_name: unique_name.to_owned(),
            sender: LOCAL_INTERFACE.to_owned(),
            path: LOCAL_OBJECT_PATH.to_owned(),
            interface: LOCAL_INTERFACE.to_owned(),
            member: DISCONNECTED_SIGNAL.to_owned(),
            args: vec![],
        }));

        if disconnected.is_err() {
            debug!("Event sink of {unique_name} is closed");
        }

        true
    }

    /// Owner of a well-known name
    pub fn name_owner(&self, scope: BusScope, name: &str) -> Option<String> {
        self.context.lock().resolve(scope, name)
    }

    pub fn connection_count(&self) -> usize {
        self.context.lock().clients.len()
    }

    /// Match rules installed by a connection
    pub fn match_rules(&self, unique_name: &str) -> Vec<String> {
        self.context
            .lock()
            .clients
            .get(unique_name)
            .map(|client| client.match_rules.iter().map(MatchRule::to_string).collect())
            .unwrap_or_default()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(Args::default())
    }
}

impl Transport for Hub {
    fn acquire(&self, scope: BusScope, sink: Sender<BusEvent>) -> Result<Arc<dyn BusHandle>> {
        let unique_name = self.context.lock().add_client(scope, sink);

        Ok(Arc::new(Client::new(self.context.clone(), unique_name)))
    }
}

fn string_arg(args: &[Value]) -> std::result::Result<String, ErrorReply> {
    match args.first() {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(ErrorReply::new(ERROR_INVALID_ARGS, "Expected a string argument")),
    }
}

/// Encoded size of call arguments
fn message_size(args: &[Value]) -> usize {
    let mut document = Document::new();
    document.insert("args", Bson::Array(args.to_vec()));

    let mut buffer = Vec::new();
    match document.to_writer(&mut buffer) {
        Ok(_) => buffer.len(),
        Err(e) => {
            warn!("Failed to encode call arguments: {e}");
            0
        }
    }
}
