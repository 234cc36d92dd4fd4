//! Notifuse Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, request context
//! and identifiers shared by the storage, core and API crates.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::Config;
pub use context::Context;
pub use error::{Error, Result, ResultExt};
