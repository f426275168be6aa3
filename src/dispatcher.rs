//! Host-side dispatch: channel registry, method lookup, reply production.
//!
//! One generic name-to-closure table replaces the per-type trampoline
//! vtables a binding generator would emit. A channel moves between exactly
//! two states: unregistered and registered; registration overwrites any
//! previous table for the name, teardown is idempotent.
//!
//! Every incoming request produces exactly one reply through its
//! [`ReplySink`]: a success or error envelope, or the empty "unimplemented"
//! envelope when no handler matches. Handler panics are caught at this
//! boundary and answered as internal errors; a fault in one call never
//! affects the next.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::envelope::{
    self, CallError, MethodCall, encode_error, encode_success, encode_unimplemented,
};
use crate::task_queue::TaskQueue;
use crate::value::Value;

/// Consumes the encoded reply for one request. Provided by the transport;
/// invoked exactly once per request.
pub type ReplySink = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;

type SyncHandler = Box<dyn Fn(Value) -> Result<Value, CallError> + Send + Sync>;
type AsyncHandler = Box<dyn Fn(Value, Responder) + Send + Sync>;

enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Maps method names to handlers for one channel.
///
/// Built once at startup, read-only after registration.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        MethodTable { methods: HashMap::new() }
    }

    /// Adds a handler that replies before returning control to the transport.
    pub fn sync_method(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Handler::Sync(Box::new(handler)));
        self
    }

    /// Adds a handler that replies later through its [`Responder`], possibly
    /// from another thread.
    pub fn async_method(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(Value, Responder) + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Handler::Async(Box::new(handler)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// One-shot completion handle given to an asynchronous handler.
///
/// Completion may happen on any thread; the encode-and-reply step is posted
/// to the owning [`TaskQueue`] rather than touching the reply sink directly.
/// Consuming `self` makes double completion impossible; dropping a
/// `Responder` without completing it replies with an internal error so the
/// peer's pending call still resolves.
pub struct Responder {
    reply: Option<ReplySink>,
    queue: Arc<TaskQueue>,
    method: String,
}

impl Responder {
    pub fn success(mut self, result: Value) {
        self.finish(encode_success(result));
    }

    pub fn error(mut self, error: CallError) {
        self.finish(encode_error(&error));
    }

    fn finish(&mut self, payload: Vec<u8>) {
        match self.reply.take() {
            Some(sink) => self.queue.post(move || sink(payload)),
            None => unreachable!("responder completed twice"),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.reply.is_some() {
            error!(
                "[Dispatcher] async handler for '{}' dropped its responder without replying",
                self.method
            );
            let error = CallError::internal("handler finished without sending a reply");
            self.finish(encode_error(&error));
        }
    }
}

/// Routes incoming request envelopes to registered handlers.
pub struct Dispatcher {
    channels: RwLock<HashMap<String, Arc<MethodTable>>>,
    queue: Arc<TaskQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Dispatcher { channels: RwLock::new(HashMap::new()), queue }
    }

    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Registers a method table under a channel name.
    ///
    /// Re-registering an existing name deterministically replaces the old
    /// table. Call only from the owning thread, while no dispatch is in
    /// flight for the name.
    pub fn register(&self, channel: impl Into<String>, table: MethodTable) {
        let channel = channel.into();
        let previous = self.channels.write().insert(channel.clone(), Arc::new(table));
        if previous.is_some() {
            warn!("[Dispatcher] channel '{}' re-registered; previous table replaced", channel);
        } else {
            debug!("[Dispatcher] channel '{}' registered", channel);
        }
    }

    /// Tears down a channel. A no-op when the name is not registered.
    pub fn unregister(&self, channel: &str) {
        if self.channels.write().remove(channel).is_some() {
            debug!("[Dispatcher] channel '{}' unregistered", channel);
        }
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.channels.read().contains_key(channel)
    }

    /// Delivers one incoming request envelope.
    ///
    /// The reply sink fires exactly once: with a success or error envelope,
    /// or with the empty unimplemented envelope when the channel or method
    /// has no handler. Sync handlers reply inline; async handlers reply
    /// through the owning task queue.
    pub fn handle_message(&self, channel: &str, payload: &[u8], reply: ReplySink) {
        let Some(table) = self.channels.read().get(channel).cloned() else {
            debug!("[Dispatcher] no channel '{}' registered; answering unimplemented", channel);
            reply(encode_unimplemented());
            return;
        };

        let call = match envelope::decode_request(payload) {
            Ok(call) => call,
            Err(e) => {
                warn!("[Dispatcher] undecodable request on '{}': {}", channel, e);
                let error = CallError::new(envelope::DECODE_ERROR_CODE, e.to_string());
                reply(encode_error(&error));
                return;
            }
        };

        let Some(handler) = table.methods.get(&call.method) else {
            debug!(
                "[Dispatcher] no handler for '{}' on channel '{}'; answering unimplemented",
                call.method, channel
            );
            reply(encode_unimplemented());
            return;
        };

        let MethodCall { method, arguments } = call;
        match handler {
            Handler::Sync(f) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(arguments)));
                let payload = match outcome {
                    Ok(Ok(result)) => encode_success(result),
                    Ok(Err(error)) => encode_error(&error),
                    Err(cause) => {
                        // as_ref: downcast the boxed payload, not the box.
                        let message = panic_message(cause.as_ref());
                        error!("[Dispatcher] handler for '{}' panicked: {}", method, message);
                        encode_error(&CallError::internal(message))
                    }
                };
                reply(payload);
            }
            Handler::Async(f) => {
                let responder =
                    Responder { reply: Some(reply), queue: self.queue.clone(), method: method.clone() };
                // A panic during invocation unwinds through the responder's
                // Drop, which answers with an internal error.
                if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(|| f(arguments, responder))) {
                    error!(
                        "[Dispatcher] async handler for '{}' panicked during invocation: {}",
                        method,
                        panic_message(cause.as_ref())
                    );
                }
            }
        }
    }

    /// Inline-reply entry point for synchronous transports.
    ///
    /// Returns `None` when no channel is registered under the name, or when
    /// the reply is not yet available (an async handler still running).
    pub fn handle_message_sync(&self, channel: &str, payload: &[u8]) -> Option<Vec<u8>> {
        if !self.is_registered(channel) {
            return None;
        }
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let out = slot.clone();
        self.handle_message(channel, payload, Box::new(move |bytes| *out.lock() = Some(bytes)));
        if self.queue.runs_on_owning_thread() {
            self.queue.run_pending();
        }
        let reply = slot.lock().take();
        reply
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
