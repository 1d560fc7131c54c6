//! Entwine Storage - Durable persistence adapters
//!
//! This crate provides storage backends implementing
//! [`entwine_core::PersistenceAdapter`].

#![allow(clippy::result_large_err)]

pub mod error;
pub mod migration;

#[cfg(feature = "redb")]
pub mod redb;

pub use error::{StorageError, StorageResult};
pub use migration::{get_migrations, Migratable, SchemaVersion, CURRENT_VERSION};

#[cfg(feature = "redb")]
pub use redb::RedbStorage;
