//! Client side of a channel: build requests, track pending calls, resolve
//! completions exactly once.
//!
//! The wire carries no correlation id. A channel admits its calls FIFO:
//! responses are matched to pending calls in arrival order, relying on the
//! transport's per-channel ordering. This mirrors the one-call-in-flight,
//! chain-from-the-callback pattern of the generated bindings this crate
//! replaces, and is a deliberate design choice, not an omission.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::envelope::{self, CallError, MethodCall, MethodResult, encode_request};
use crate::transport::Transport;
use crate::value::Value;

/// Shared cancellation flag, checked at the point a completion would be
/// delivered. Once cancelled, late replies are suppressed instead of
/// reaching torn-down application code.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type Completion = Box<dyn FnOnce(MethodResult) + Send + 'static>;

struct PendingCall {
    /// Caller-local identity; never on the wire. Lets a failed send remove
    /// exactly the call it queued, even if the queue shifted underneath it.
    id: u64,
    method: String,
    completion: Completion,
}

/// Issues method calls on one named channel.
pub struct MethodCaller {
    channel: String,
    transport: Arc<dyn Transport>,
    pending: Mutex<VecDeque<PendingCall>>,
    next_call_id: AtomicU64,
    token: CancellationToken,
}

impl MethodCaller {
    pub fn new(channel: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        MethodCaller {
            channel: channel.into(),
            transport,
            pending: Mutex::new(VecDeque::new()),
            next_call_id: AtomicU64::new(0),
            token: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sends `method(arguments)` toward the peer.
    ///
    /// The completion fires exactly once, with the decoded result, a typed
    /// error, or [`MethodResult::Cancelled`] if the caller shuts down first.
    /// A transport send failure resolves the call with an internal error
    /// rather than leaving it dangling.
    pub fn invoke(
        &self,
        method: &str,
        arguments: Value,
        completion: impl FnOnce(MethodResult) + Send + 'static,
    ) {
        if self.token.is_cancelled() {
            completion(MethodResult::Cancelled);
            return;
        }

        let payload = encode_request(MethodCall::new(method, arguments));
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);

        // Queue before sending: an in-process transport may deliver the
        // response re-entrantly from inside send().
        self.pending.lock().push_back(PendingCall {
            id,
            method: method.to_string(),
            completion: Box::new(completion),
        });

        if let Err(e) = self.transport.send(&self.channel, payload) {
            warn!("[Caller] send on '{}' failed: {}", self.channel, e);
            // Remove by identity: a re-entrant response or an interleaved
            // invoke may have shifted the queue while send() was running.
            let failed = {
                let mut pending = self.pending.lock();
                pending
                    .iter()
                    .position(|call| call.id == id)
                    .and_then(|index| pending.remove(index))
            };
            if let Some(call) = failed {
                (call.completion)(MethodResult::Error(CallError::new(
                    envelope::INTERNAL_ERROR_CODE,
                    e.to_string(),
                )));
            }
        }
    }

    /// Delivers a response envelope to the oldest pending call.
    pub fn handle_response(&self, payload: &[u8]) {
        let Some(call) = self.pending.lock().pop_front() else {
            warn!("[Caller] response on '{}' with no pending call; dropped", self.channel);
            return;
        };

        if self.token.is_cancelled() {
            debug!(
                "[Caller] stale reply for '{}' on '{}' after shutdown; suppressed",
                call.method, self.channel
            );
            return;
        }

        let result = match envelope::decode_response(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "[Caller] undecodable response for '{}' on '{}': {}",
                    call.method, self.channel, e
                );
                MethodResult::Error(CallError::new(envelope::DECODE_ERROR_CODE, e.to_string()))
            }
        };
        (call.completion)(result);
    }

    /// Cancels the token and resolves every outstanding call with
    /// [`MethodResult::Cancelled`]. Replies arriving afterwards are
    /// suppressed. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
        let drained: Vec<PendingCall> = self.pending.lock().drain(..).collect();
        for call in drained {
            debug!("[Caller] cancelling pending '{}' on '{}'", call.method, self.channel);
            (call.completion)(MethodResult::Cancelled);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for MethodCaller {
    fn drop(&mut self) {
        // A caller must not leave completions dangling when its owner goes
        // away mid-call.
        self.shutdown();
    }
}
