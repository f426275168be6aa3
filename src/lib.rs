//! Typed cross-language message codec and bidirectional dispatch core.
//!
//! - Builds a dynamically-typed [`Value`](value::Value) for each argument
//!   and return value
//! - Serializes values with a compact tag-prefixed binary [`codec`]
//! - Wraps calls and results in the tri-state [`envelope`] protocol
//!   (success / error / unimplemented)
//! - Routes incoming requests through a host-side [`dispatcher`] with
//!   sync and async handlers
//! - Tracks outgoing calls in a client-side [`caller`] with exactly-once
//!   completion and cooperative cancellation
//!
//! The embedding application supplies the transport (see [`transport`]) and
//! pumps the owning-thread [`task_queue`] so worker-thread completions get
//! marshaled back where the transport lives.

pub mod bridge;
pub mod caller;
pub mod codec;
pub mod dispatcher;
pub mod envelope;
pub mod json;
pub mod task_queue;
pub mod transport;
pub mod value;

use std::sync::Once;

use env_logger::{Builder, Env};
use log::LevelFilter;

pub use bridge::{Bridge, clear_global_bridge, global_bridge, set_global_bridge};
pub use caller::{CancellationToken, MethodCaller};
pub use codec::{DecodeError, decode, encode};
pub use dispatcher::{Dispatcher, MethodTable, ReplySink, Responder};
pub use envelope::{CallError, EnvelopeError, MethodCall, MethodResult};
pub use task_queue::TaskQueue;
pub use transport::{LoopbackTransport, Transport, TransportError};
pub use value::{TypeMismatch, Value, ValueMap};

// A host may create several bridges over the life of one process; the
// logger can only be installed once, so guard it.
static LOGGER_INIT: Once = Once::new();

/// Installs an `env_logger` backend (info by default, `RUST_LOG` overrides).
/// Safe to call more than once.
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        Builder::from_env(Env::default().default_filter_or("info"))
            .filter(None, LevelFilter::Info)
            .init();
    });
}
