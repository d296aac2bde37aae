//! cloud-runtimes State API
//!
//! The state client with its request builder and call context, plus the
//! in-memory and sled reference backends it is tested against.

pub mod builder;
pub mod client;
pub mod context;
pub mod memory;
pub mod persistent;
pub mod store;

pub use builder::*;
pub use client::*;
pub use context::*;
pub use memory::*;
pub use persistent::*;
pub use store::*;
