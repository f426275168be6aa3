//! Facade tying the dispatcher, the owning-thread task queue, the transport
//! and the per-channel callers together, plus the optional process-global
//! bridge handle an embedder can stash once and reach from callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::caller::MethodCaller;
use crate::dispatcher::{Dispatcher, MethodTable, ReplySink};
use crate::envelope::MethodResult;
use crate::task_queue::TaskQueue;
use crate::transport::{LoopbackTransport, Transport};
use crate::value::Value;

/// One end of a cross-language call bridge.
///
/// Construct it on the thread that will own the channels; that thread must
/// periodically [`pump`](Bridge::pump) (or block in
/// [`pump_wait`](Bridge::pump_wait)) so completions posted by worker threads
/// get delivered.
pub struct Bridge {
    queue: Arc<TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    callers: RwLock<HashMap<String, Arc<MethodCaller>>>,
    loopback: Option<Arc<LoopbackTransport>>,
}

impl Bridge {
    /// Builds a bridge over the transport the embedding application
    /// provides. Incoming envelopes are fed in through
    /// [`handle_message`](Bridge::handle_message) /
    /// [`handle_response`](Bridge::handle_response).
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(queue.clone()));
        Arc::new(Bridge {
            queue,
            dispatcher,
            transport,
            callers: RwLock::new(HashMap::new()),
            loopback: None,
        })
    }

    /// Builds a self-contained bridge whose peer is its own dispatcher.
    /// Useful for tests and single-process embedding.
    pub fn new_loopback() -> Arc<Self> {
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(queue.clone()));
        let loopback = LoopbackTransport::new(dispatcher.clone());
        info!("[Bridge] loopback bridge created");
        Arc::new(Bridge {
            queue,
            dispatcher,
            transport: loopback.clone(),
            callers: RwLock::new(HashMap::new()),
            loopback: Some(loopback),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Registers a host-side method table. Re-registration replaces.
    pub fn register(&self, channel: impl Into<String>, table: MethodTable) {
        self.dispatcher.register(channel, table);
    }

    /// Tears down a host-side channel. Idempotent.
    pub fn unregister(&self, channel: &str) {
        self.dispatcher.unregister(channel);
    }

    /// Returns the caller for a channel, creating it on first use.
    pub fn caller(&self, channel: &str) -> Arc<MethodCaller> {
        if let Some(existing) = self.callers.read().get(channel) {
            return existing.clone();
        }
        let mut callers = self.callers.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(existing) = callers.get(channel) {
            return existing.clone();
        }
        let caller = Arc::new(MethodCaller::new(channel, self.transport.clone()));
        if let Some(loopback) = &self.loopback {
            loopback.connect_caller(&caller);
        }
        callers.insert(channel.to_string(), caller.clone());
        caller
    }

    /// Convenience: invoke a method on a channel's caller.
    pub fn invoke(
        &self,
        channel: &str,
        method: &str,
        arguments: Value,
        completion: impl FnOnce(MethodResult) + Send + 'static,
    ) {
        self.caller(channel).invoke(method, arguments, completion);
    }

    /// Feeds one incoming request envelope from the embedder's transport.
    pub fn handle_message(&self, channel: &str, payload: &[u8], reply: ReplySink) {
        self.dispatcher.handle_message(channel, payload, reply);
    }

    /// Inline-reply variant for synchronous transports; `None` when the
    /// channel is unregistered.
    pub fn handle_message_sync(&self, channel: &str, payload: &[u8]) -> Option<Vec<u8>> {
        self.dispatcher.handle_message_sync(channel, payload)
    }

    /// Feeds one incoming response envelope to the channel's caller.
    pub fn handle_response(&self, channel: &str, payload: &[u8]) {
        if let Some(caller) = self.callers.read().get(channel).cloned() {
            caller.handle_response(payload);
        }
    }

    /// Runs completions queued by worker threads. Owning thread only.
    pub fn pump(&self) {
        self.queue.run_pending();
    }

    /// Blocks for up to `timeout` waiting for queued work, then runs it.
    pub fn pump_wait(&self, timeout: std::time::Duration) -> bool {
        self.queue.wait_run_pending(timeout)
    }

    /// Cancels every caller and tears down every host channel.
    pub fn shutdown(&self) {
        info!("[Bridge] shutting down");
        // Drain under the lock, cancel outside it: a completion may call
        // back into the bridge.
        let drained: Vec<Arc<MethodCaller>> =
            self.callers.write().drain().map(|(_, c)| c).collect();
        for caller in drained {
            caller.shutdown();
        }
        // Late async completions still land on the queue; run them so their
        // replies are produced (and then suppressed by the cancelled tokens).
        if self.queue.runs_on_owning_thread() {
            self.queue.run_pending();
        }
    }
}

static GLOBAL_BRIDGE: Lazy<RwLock<Option<Arc<Bridge>>>> = Lazy::new(|| RwLock::new(None));

/// Stashes the process-wide bridge handle reachable from embedder callbacks.
/// Replaces any previous handle.
pub fn set_global_bridge(bridge: Arc<Bridge>) {
    *GLOBAL_BRIDGE.write() = Some(bridge);
}

pub fn global_bridge() -> Option<Arc<Bridge>> {
    GLOBAL_BRIDGE.read().clone()
}

/// Drops the process-wide handle. A no-op when none is set.
pub fn clear_global_bridge() {
    *GLOBAL_BRIDGE.write() = None;
}
