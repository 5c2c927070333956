//! # Provena CLI Connector
//!
//! A command-line connector that drives a Provena metadata registry through
//! discrete remote operations (create person, create dataset, create workflow
//! template, ...) instead of the web form, safely enough to sit behind a
//! free-text agent front end.
//!
//! ## Features
//!
//! - **Browser login**: OAuth 2.0 authorization-code flow with PKCE against
//!   the deployment's Keycloak realm; tokens live in the OS keychain only
//! - **Guided registration**: slot-filling workflows that collect and validate
//!   every field, resolve references via search-and-select, and never execute
//!   a mutating call without an explicit, verbatim confirmation
//! - **Registry access**: search, fetch, list, and count registry items with
//!   a typed API client
//!
//! ## Example
//!
//! ```rust,no_run
//! use provena_cli::workflow::SchemaRegistry;
//!
//! let registry = SchemaRegistry::builtin();
//! for schema in registry.operations() {
//!     println!("{}", schema.name);
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod registry;
pub mod workflow;

pub use auth::{AuthSession, Credential, CredentialStore, KeyringStore, MemoryStore};
pub use registry::{RegistryClient, ToolInvoker};
pub use workflow::{SchemaRegistry, WorkflowEngine};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Handle resolver base used to render registry record links
pub const HANDLE_URL_BASE: &str = "https://hdl.handle.net";

/// Render the public handle URL for a registry record id.
pub fn handle_url(id: &str) -> String {
    format!("{}/{}", HANDLE_URL_BASE, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_url() {
        assert_eq!(handle_url("10378.1/1234567"), "https://hdl.handle.net/10378.1/1234567");
    }
}
