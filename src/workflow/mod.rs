//! Guided slot-filling workflows
//!
//! The schema registry describes each registration operation; the engine
//! walks its fields, validates every submission, resolves references via
//! search-and-select, and executes nothing without explicit confirmation.

pub mod engine;
pub mod schema;

pub use engine::{
    EngineReply, OperationInvoker, Phase, ReferenceSelection, RegistrySearch, WorkflowEngine,
    WorkflowError,
};
pub use schema::{
    FieldDefault, FieldKind, FieldSpec, OperationSchema, SchemaRegistry, ValidationError,
};
