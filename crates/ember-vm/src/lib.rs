#![forbid(unsafe_code)]

//! Interpreter for assembled ember modules.
//!
//! Every service instance owns a context with its own fibers and mailbox. Contexts talk only
//! by message; the main context is also the one place singletons are initialized.

mod config;
mod context;
mod error;
mod frame;
mod metrics;
pub mod native;
mod runtime;
mod value;

pub use config::RuntimeConfig;
pub use context::{Address, ContextId, FiberId, Message};
pub use error::VmError;
pub use metrics::VmMetrics;
pub use native::{NativeCall, NativeEnv, NativeRegistry, NativeResult, NativeTemplate};
pub use runtime::{Outcome, Runtime};
pub use value::{ArrayRef, Object, ObjectRef, ServiceRef, Value};
