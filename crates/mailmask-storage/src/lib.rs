//! mailmask Storage - Database access for aliases, users, mail and the
//! transaction log
//!
//! This crate provides the persistence collaborators the core pipeline
//! talks to, behind narrow repository traits.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
