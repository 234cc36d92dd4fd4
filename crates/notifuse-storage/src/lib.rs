//! Notifuse Storage - Repositories and persistence
//!
//! PostgreSQL-backed repositories for broadcasts, webhook events, message
//! history, workspaces, contacts and templates, plus in-memory
//! equivalents for tests.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
