//! Registry-family API surface: client, wire types, and error taxonomy

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiBase, RegistryClient};
pub use error::{RegistryApiError, Result};
pub use types::{ApiStatus, Candidate, ItemSubType};
