//! cloud-runtimes Client
//!
//! Combines the state client with thin passthroughs for service
//! invocation, bindings, pub/sub, secrets and sidecar lifecycle.

mod builder;
mod runtime;

pub use builder::*;
pub use runtime::*;

pub use cloudrt_state::{CallContext, CancelHandle, StateClient};
