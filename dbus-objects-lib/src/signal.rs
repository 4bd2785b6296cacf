use std::sync::Arc;

use async_channel::{unbounded, Receiver, Sender};
use log::trace;
use parking_lot::Mutex;

use crate::Value;

/// Received signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub name: String,
    pub args: Vec<Value>,
}

/// Signal receiver registered at a [crate::Connection] for an object path and an interface.
/// Fans out received signals to every listener
#[derive(Clone, Default)]
pub struct SignalReceiver {
    listeners: Arc<Mutex<Vec<Sender<SignalEvent>>>>,
}

impl SignalReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Dropping the stream unsubscribes
    pub fn listen(&self) -> Receiver<SignalEvent> {
        let (sender, receiver) = unbounded();

        self.listeners.lock().push(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: SignalEvent) {
        trace!("Dispatching signal {}", event.name);

        // Send data and remove listeners, who don't want it anymore
        self.listeners
            .lock()
            .retain(|listener| listener.try_send(event.clone()).is_ok());
    }
}
