//! cloud-runtimes Core Library
//!
//! Core types, errors, and transport traits for the cloud-runtimes clients.
//! This crate has no I/O of its own; backends and clients build on it.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
