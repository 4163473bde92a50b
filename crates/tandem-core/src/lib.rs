//! Tandem Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncConfig`, `SyncItem`, `SyncLogEntry`, `SyncStatus`
//! - **Use cases** - `ManageConfigsUseCase`
//! - **Port definitions** - Traits for adapters: `ISyncStateStore`,
//!   `IRemoteObjectStore`, `IRemoteContentStore`, `IRemoteChangeFeed`
//! - **State machine** - Per-file sync states and their legal transitions
//! - **Ambient helpers** - configuration, tracing setup, content hashing, path helpers
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement.
//! Use cases orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod hashing;
pub mod logging;
pub mod paths;
pub mod ports;
pub mod usecases;
