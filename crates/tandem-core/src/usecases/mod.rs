//! Use cases (interactors) for tandem
//!
//! Thin coordinators that validate input through domain constructors and
//! delegate persistence to ports.
//!
//! ## Use Cases
//!
//! - [`ManageConfigsUseCase`] - Register, unregister and inspect sync configurations

pub mod manage_configs;

pub use manage_configs::{ConfigLogs, ManageConfigsUseCase};
