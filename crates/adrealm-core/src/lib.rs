//! # adrealm-core
//!
//! Foundational types for authenticating users and resolving group
//! membership against Active Directory domains over the network.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and retry classification
//! - [`config`] - Realm, domain, cache and TLS configuration
//! - [`sid`] - Strongly-typed Windows security identifiers

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod sid;

// Re-export commonly used types
pub use error::{Error, Result};
