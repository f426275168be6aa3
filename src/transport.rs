//! The seam between this crate and whatever actually moves the bytes.
//!
//! The embedding application supplies a [`Transport`]; the crate never
//! assumes more than fire-and-forget delivery with per-channel FIFO
//! ordering. [`LoopbackTransport`] wires a dispatcher and a set of callers
//! together inside one process, standing in for a real engine-side peer in
//! tests and demos.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::RwLock;

use crate::caller::MethodCaller;
use crate::dispatcher::Dispatcher;

/// Failure to hand a payload to the wire. Delivery failures past this point
/// are reported asynchronously by the peer (or not at all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has been shut down.
    Closed,
    /// The payload could not be sent.
    SendFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport is closed"),
            TransportError::SendFailed(reason) => write!(f, "send failed: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound byte path toward the peer.
pub trait Transport: Send + Sync {
    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// In-process transport: requests sent through it are dispatched against a
/// [`Dispatcher`] and replies are routed back to the originating channel's
/// [`MethodCaller`].
///
/// Callers are held weakly; a dropped caller simply stops receiving replies.
pub struct LoopbackTransport {
    dispatcher: Arc<Dispatcher>,
    callers: RwLock<HashMap<String, Weak<MethodCaller>>>,
}

impl LoopbackTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(LoopbackTransport { dispatcher, callers: RwLock::new(HashMap::new()) })
    }

    /// Routes replies for the caller's channel back to it.
    pub fn connect_caller(&self, caller: &Arc<MethodCaller>) {
        self.callers
            .write()
            .insert(caller.channel().to_string(), Arc::downgrade(caller));
    }

}

impl Transport for LoopbackTransport {
    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // The reply sink must be 'static, so it captures the weak caller
        // handle by value rather than borrowing the transport.
        let reply_target = self.callers.read().get(channel).cloned();
        let reply_channel = channel.to_string();
        self.dispatcher.handle_message(
            channel,
            &payload,
            Box::new(move |bytes| match reply_target.as_ref().and_then(Weak::upgrade) {
                Some(caller) => caller.handle_response(&bytes),
                None => {
                    debug!("[Loopback] reply on '{}' with no live caller; dropped", reply_channel)
                }
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MethodTable;
    use crate::envelope::MethodResult;
    use crate::task_queue::TaskQueue;
    use crate::value::Value;
    use std::sync::mpsc;

    #[test]
    fn loopback_round_trip() {
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(queue));
        dispatcher.register(
            "echo",
            MethodTable::new().sync_method("echoInt", |args| Ok(args)),
        );

        let transport = LoopbackTransport::new(dispatcher);
        let caller = Arc::new(MethodCaller::new("echo", transport.clone()));
        transport.connect_caller(&caller);

        let (tx, rx) = mpsc::channel();
        caller.invoke("echoInt", Value::Int64(5), move |r| tx.send(r).unwrap());
        assert_eq!(rx.recv().unwrap(), MethodResult::Success(Value::Int64(5)));
    }

    #[test]
    fn reply_for_dropped_caller_is_dropped() {
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(queue));
        dispatcher.register("echo", MethodTable::new().sync_method("echoInt", |args| Ok(args)));

        let transport = LoopbackTransport::new(dispatcher.clone());
        {
            let caller = Arc::new(MethodCaller::new("echo", transport.clone()));
            transport.connect_caller(&caller);
        }
        // Nothing to assert beyond "does not panic": the weak handle is dead.
        let payload = crate::envelope::encode_request(crate::envelope::MethodCall::new(
            "echoInt",
            Value::Null,
        ));
        transport.send("echo", payload).unwrap();
    }
}
