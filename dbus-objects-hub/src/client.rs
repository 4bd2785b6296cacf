use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use tokio::time;

use dbus_objects_common::{
    match_rule::MatchRule,
    transport::{BusHandle, MessageHandle, MethodCall, OutgoingSignal},
    Error, ErrorReply, Result, Value, ERROR_NO_REPLY,
};

use crate::hub::{ContextType, Dispatched};

/// Hub connection handle
pub struct Client {
    context: ContextType,
    unique_name: String,
}

impl Client {
    pub fn new(context: ContextType, unique_name: String) -> Self {
        Self {
            context,
            unique_name,
        }
    }

    fn complete_call(
        &self,
        message: MessageHandle,
        result: std::result::Result<Value, ErrorReply>,
    ) -> Result<()> {
        let mut context = self.context.lock();
        context.client_mut(&self.unique_name)?;

        if let Some(call) = context.take_pending_call(&self.unique_name, message) {
            if call.reply.send(result).is_err() {
                debug!("Caller of #{} is gone", message.serial());
            }
        }

        Ok(())
    }
}

impl BusHandle for Client {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn release(&self) {
        self.context.lock().remove_client(&self.unique_name);
    }

    fn call_method(
        &self,
        call: MethodCall,
    ) -> BoxFuture<'static, std::result::Result<Value, ErrorReply>> {
        let context = self.context.clone();
        let dispatched = self.context.lock().dispatch_call(&self.unique_name, call);

        async move {
            let (serial, reply, timeout) = match dispatched {
                Ok(Dispatched::Reply(value)) => return Ok(value),
                Ok(Dispatched::Pending {
                    serial,
                    reply,
                    timeout,
                }) => (serial, reply, timeout),
                Err(e) => return Err(e),
            };

            match time::timeout(timeout, reply).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ErrorReply::new(
                    ERROR_NO_REPLY,
                    "Message recipient disconnected from the bus without replying",
                )),
                Err(_) => {
                    context.lock().pending_calls.remove(&serial);

                    Err(ErrorReply::new(
                        ERROR_NO_REPLY,
                        format!("Did not receive a reply in {}ms", timeout.as_millis()),
                    ))
                }
            }
        }
        .boxed()
    }

    fn register_object_path(&self, path: &str) -> Result<()> {
        let mut context = self.context.lock();

        if !context.client_mut(&self.unique_name)?.paths.insert(path.to_owned()) {
            return Err(Error::AlreadyRegistered(path.to_owned()));
        }

        info!("{} registered {path}", self.unique_name);
        Ok(())
    }

    fn unregister_object_path(&self, path: &str) -> Result<()> {
        let mut context = self.context.lock();

        if !context.client_mut(&self.unique_name)?.paths.remove(path) {
            warn!("{} unregisters unknown path {path}", self.unique_name);
        }

        Ok(())
    }

    fn request_name(&self, name: &str) -> Result<()> {
        self.context.lock().request_name(&self.unique_name, name)
    }

    fn add_match(&self, rule: &str) -> Result<()> {
        let rule = MatchRule::parse(rule)?;

        debug!("{} added match rule {rule}", self.unique_name);

        let mut context = self.context.lock();
        context.client_mut(&self.unique_name)?.match_rules.push(rule);
        Ok(())
    }

    fn emit_signal(&self, signal: OutgoingSignal) -> Result<()> {
        let mut context = self.context.lock();
        context.client_mut(&self.unique_name)?;

        debug!(
            "{} emits {}.{} ({})",
            self.unique_name,
            signal.interface,
            signal.member,
            signal.signatures.concat()
        );

        context.broadcast_signal(&self.unique_name, signal);
        Ok(())
    }

    fn send_reply(&self, message: MessageHandle, value: Value, signature: &str) -> Result<()> {
        debug!("{} replies to #{} ({signature})", self.unique_name, message.serial());
        self.complete_call(message, Ok(value))
    }

    fn send_error(&self, message: MessageHandle, name: &str, text: &str) -> Result<()> {
        debug!("{} replies to #{} with {name}", self.unique_name, message.serial());
        self.complete_call(message, Err(ErrorReply::new(name, text)))
    }

    fn set_max_message_size(&self, size: usize) {
        if let Some(client) = self.context.lock().clients.get_mut(&self.unique_name) {
            client.max_message_size = size;
        }
    }
}
