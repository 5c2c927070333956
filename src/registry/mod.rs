//! Registry access: the typed API client and the mutating-call boundary

pub mod api;
pub mod invoker;

pub use api::{Candidate, ItemSubType, RegistryApiError, RegistryClient};
pub use invoker::{InvokeError, InvokeOutcome, ToolInvoker};
