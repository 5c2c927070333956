//! The slot-filling workflow engine
//!
//! Collects required then optional fields for one operation at a time,
//! validating every raw submission, resolving reference fields through a
//! search-and-select sub-flow, and gating the final remote call behind an
//! explicit confirmation of a verbatim summary. The engine owns exactly one
//! [`WorkflowState`] per conversation; nothing reaches the invoker without a
//! `confirm(true)` on the summary it rendered.

use super::schema::{FieldDefault, FieldKind, FieldSpec, OperationSchema, SchemaRegistry};
use crate::registry::api::{Candidate, ItemSubType, RegistryApiError};
use crate::registry::invoker::{InvokeError, InvokeOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// How many candidates a reference search presents
const REFERENCE_SEARCH_LIMIT: usize = 10;

/// Search collaborator used by reference-field sub-flows
#[async_trait]
pub trait RegistrySearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        subtype: Option<ItemSubType>,
        limit: usize,
    ) -> std::result::Result<Vec<Candidate>, RegistryApiError>;
}

/// Invoker collaborator that executes a confirmed operation
#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn call(&self, operation: &str, arguments: &Value) -> std::result::Result<InvokeOutcome, InvokeError>;
}

/// Phases of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CollectingRequired,
    CollectingOptional,
    Summary,
    AwaitingConfirmation,
    Confirmed,
    Cancelled,
}

/// Ephemeral result of a reference search, alive only while its field is
/// being collected
#[derive(Debug, Clone)]
pub struct ReferenceSelection {
    pub query: String,
    pub candidates: Vec<Candidate>,
    pub chosen: Option<String>,
}

/// The single active workflow
pub struct WorkflowState {
    schema: OperationSchema,
    /// Field indices in collection order (required first)
    order: Vec<usize>,
    /// Whether the field at each order position has been answered or skipped
    completed: Vec<bool>,
    collected: BTreeMap<String, Value>,
    cursor: usize,
    phase: Phase,
    pending: Option<ReferenceSelection>,
}

impl WorkflowState {
    fn new(schema: OperationSchema) -> Self {
        let order = schema.collection_order();
        let completed = vec![false; order.len()];
        Self {
            schema,
            order,
            completed,
            collected: BTreeMap::new(),
            cursor: 0,
            phase: Phase::CollectingRequired,
            pending: None,
        }
    }

    fn current_field(&self) -> &FieldSpec {
        &self.schema.fields[self.order[self.cursor]]
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.order
            .iter()
            .position(|&i| self.schema.fields[i].key == key)
    }

    /// The assembled argument object, exactly as the summary renders it.
    fn arguments(&self) -> Value {
        Value::Object(self.collected.clone().into_iter().collect())
    }

    fn render_summary(&self) -> String {
        let mut lines = vec![format!("About to call {} with:", self.schema.name)];
        for &i in &self.order {
            let key = self.schema.fields[i].key;
            if let Some(value) = self.collected.get(key) {
                let rendered =
                    serde_json::to_string(value).unwrap_or_else(|_| value.to_string());
                lines.push(format!("  {}: {}", key, rendered));
            }
        }
        lines.push("Confirm? (yes/no)".to_string());
        lines.join("\n")
    }
}

/// What the engine hands back to the conversation after each input
#[derive(Debug)]
pub enum EngineReply {
    /// Ask for (or re-ask after a validation failure) one field
    Prompt { field: String, message: String },
    /// Present ranked candidates for a reference field
    Candidates {
        field: String,
        query: String,
        candidates: Vec<Candidate>,
    },
    /// Verbatim summary of the assembled arguments; awaiting yes/no
    Summary { operation: String, rendered: String },
    /// The confirmed call succeeded; the workflow is finished
    Completed { outcome: InvokeOutcome },
    /// The registry rejected the call; back at the summary for revision
    ReturnedToSummary {
        status: u16,
        body: String,
        rendered: String,
    },
    /// The workflow was cancelled and its state discarded
    Cancelled,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("a workflow for '{0}' is already active - finish or cancel it first")]
    WorkflowAlreadyActive(String),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("no workflow is active")]
    NoActiveWorkflow,

    #[error("the workflow is awaiting a yes/no confirmation")]
    AwaitingDecision,

    #[error("the workflow is not awaiting confirmation")]
    NotAwaitingConfirmation,

    #[error("'{0}' is not a field of this operation")]
    UnknownField(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Drives one workflow at a time against the search and invoker collaborators
pub struct WorkflowEngine {
    registry: Arc<SchemaRegistry>,
    search: Arc<dyn RegistrySearch>,
    invoker: Arc<dyn OperationInvoker>,
    state: Option<WorkflowState>,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        search: Arc<dyn RegistrySearch>,
        invoker: Arc<dyn OperationInvoker>,
    ) -> Self {
        Self {
            registry,
            search,
            invoker,
            state: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.state.as_ref().map(|s| s.phase)
    }

    /// The argument object as currently assembled, if a workflow is active.
    pub fn arguments(&self) -> Option<Value> {
        self.state.as_ref().map(|s| s.arguments())
    }

    /// Begin collecting fields for an operation.
    pub fn start(&mut self, operation: &str) -> Result<EngineReply> {
        if let Some(state) = &self.state {
            return Err(WorkflowError::WorkflowAlreadyActive(
                state.schema.name.to_string(),
            ));
        }
        let schema = self
            .registry
            .get(operation)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownOperation(operation.to_string()))?;

        log::info!("Starting workflow for {}", schema.name);
        self.state = Some(WorkflowState::new(schema));
        Ok(self.prompt_current())
    }

    /// Submit a raw value for the field currently being collected.
    ///
    /// `cancel` abandons the workflow from any phase; `skip` passes over an
    /// optional field, storing its default if it has one. A validation
    /// failure re-prompts without advancing the cursor, so resubmitting
    /// changes nothing.
    pub async fn submit(&mut self, raw: &str) -> Result<EngineReply> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("cancel") {
            return Ok(self.cancel());
        }

        {
            let state = self.state.as_ref().ok_or(WorkflowError::NoActiveWorkflow)?;
            match state.phase {
                Phase::CollectingRequired | Phase::CollectingOptional => {}
                _ => return Err(WorkflowError::AwaitingDecision),
            }
        }

        let field = {
            let state = self.state.as_ref().expect("checked above");
            state.current_field().clone()
        };

        if !field.required && trimmed.eq_ignore_ascii_case("skip") {
            let state = self.state.as_mut().expect("checked above");
            state.pending = None;
            match &field.default {
                Some(FieldDefault::Static(value)) => {
                    state.collected.insert(field.key.to_string(), value.clone());
                }
                Some(FieldDefault::Derived(derive)) => {
                    if let Some(value) = derive(&state.collected) {
                        state.collected.insert(field.key.to_string(), value);
                    }
                }
                None => {}
            }
            return Ok(self.advance());
        }

        if let FieldKind::Reference(subtype) = field.kind {
            return self.submit_reference(trimmed, &field, subtype).await;
        }

        match field.validate(trimmed) {
            Ok(value) => {
                let state = self.state.as_mut().expect("checked above");
                state.collected.insert(field.key.to_string(), value);
                Ok(self.advance())
            }
            Err(e) => Ok(EngineReply::Prompt {
                field: field.key.to_string(),
                message: format!("{}. {}", e, field.prompt),
            }),
        }
    }

    /// Decide the fate of a summary: `true` executes the single permitted
    /// mutating call, `false` discards everything.
    pub async fn confirm(&mut self, decision: bool) -> Result<EngineReply> {
        {
            let state = self.state.as_ref().ok_or(WorkflowError::NoActiveWorkflow)?;
            if state.phase != Phase::AwaitingConfirmation {
                return Err(WorkflowError::NotAwaitingConfirmation);
            }
        }

        if !decision {
            log::info!("Workflow declined at confirmation; discarding");
            self.state = None;
            return Ok(EngineReply::Cancelled);
        }

        let (operation, arguments) = {
            let state = self.state.as_mut().expect("checked above");
            state.phase = Phase::Confirmed;
            (state.schema.name.to_string(), state.arguments())
        };

        match self.invoker.call(&operation, &arguments).await {
            Ok(outcome) => {
                self.state = None;
                Ok(EngineReply::Completed { outcome })
            }
            Err(InvokeError::RemoteRejected { status, body }) => {
                // Surface the rejection verbatim and return to the summary so
                // fields can be revised without re-entering everything.
                let state = self.state.as_mut().expect("still active");
                state.phase = Phase::AwaitingConfirmation;
                let rendered = state.render_summary();
                Ok(EngineReply::ReturnedToSummary {
                    status,
                    body,
                    rendered,
                })
            }
            Err(e) => {
                let state = self.state.as_mut().expect("still active");
                state.phase = Phase::AwaitingConfirmation;
                Err(e.into())
            }
        }
    }

    /// Re-collect a single field, from the summary or mid-collection.
    pub fn revise(&mut self, key: &str) -> Result<EngineReply> {
        let state = self.state.as_mut().ok_or(WorkflowError::NoActiveWorkflow)?;
        let position = state
            .position_of(key)
            .ok_or_else(|| WorkflowError::UnknownField(key.to_string()))?;

        state.collected.remove(key);
        state.completed[position] = false;
        state.cursor = position;
        state.pending = None;
        state.phase = if state.schema.fields[state.order[position]].required {
            Phase::CollectingRequired
        } else {
            Phase::CollectingOptional
        };
        Ok(self.prompt_current())
    }

    /// Abandon the active workflow, discarding all collected state.
    ///
    /// Safe at any phase: no external call has been made before CONFIRMED.
    pub fn cancel(&mut self) -> EngineReply {
        if self.state.take().is_some() {
            log::info!("Workflow cancelled");
        }
        EngineReply::Cancelled
    }

    async fn submit_reference(
        &mut self,
        raw: &str,
        field: &FieldSpec,
        subtype: ItemSubType,
    ) -> Result<EngineReply> {
        // A pending selection first tries the input as a candidate number.
        let selected = {
            let state = self.state.as_mut().expect("active workflow");
            match (&mut state.pending, raw.parse::<usize>()) {
                (Some(pending), Ok(choice)) if (1..=pending.candidates.len()).contains(&choice) => {
                    let id = pending.candidates[choice - 1].id.clone();
                    pending.chosen = Some(id.clone());
                    Some(id)
                }
                (Some(pending), Ok(_)) => {
                    // Out-of-range pick: re-present the same candidates.
                    return Ok(EngineReply::Candidates {
                        field: field.key.to_string(),
                        query: pending.query.clone(),
                        candidates: pending.candidates.clone(),
                    });
                }
                _ => None,
            }
        };
        if let Some(id) = selected {
            let state = self.state.as_mut().expect("active workflow");
            state.collected.insert(field.key.to_string(), Value::String(id));
            state.pending = None;
            return Ok(self.advance());
        }

        // A handle-shaped input is accepted directly, no search round trip.
        if let Ok(value) = field.validate(raw) {
            let state = self.state.as_mut().expect("active workflow");
            state.collected.insert(field.key.to_string(), value);
            state.pending = None;
            return Ok(self.advance());
        }

        // Anything else is a (possibly refined) search query.
        let result = self
            .search
            .search(raw, Some(subtype), REFERENCE_SEARCH_LIMIT)
            .await;
        let state = self.state.as_mut().expect("active workflow");
        match result {
            Ok(candidates) if candidates.is_empty() => {
                state.pending = None;
                Ok(EngineReply::Prompt {
                    field: field.key.to_string(),
                    message: format!(
                        "No {} matches for \"{}\". Try another query or enter a handle id.",
                        subtype, raw
                    ),
                })
            }
            Ok(candidates) => {
                state.pending = Some(ReferenceSelection {
                    query: raw.to_string(),
                    candidates: candidates.clone(),
                    chosen: None,
                });
                Ok(EngineReply::Candidates {
                    field: field.key.to_string(),
                    query: raw.to_string(),
                    candidates,
                })
            }
            Err(e) => {
                log::warn!("Reference search failed: {}", e);
                Ok(EngineReply::Prompt {
                    field: field.key.to_string(),
                    message: format!("Search failed ({}). Try again or enter a handle id.", e),
                })
            }
        }
    }

    /// Mark the current field done and move to the next open one, entering
    /// the summary when none remain.
    fn advance(&mut self) -> EngineReply {
        let state = self.state.as_mut().expect("active workflow");
        state.completed[state.cursor] = true;

        match state.completed.iter().position(|&done| !done) {
            Some(next) => {
                state.cursor = next;
                state.phase = if state.current_field().required {
                    Phase::CollectingRequired
                } else {
                    Phase::CollectingOptional
                };
                self.prompt_current()
            }
            None => self.finish_collection(),
        }
    }

    fn finish_collection(&mut self) -> EngineReply {
        let state = self.state.as_mut().expect("active workflow");

        if let Some(check) = state.schema.cross_check {
            if let Err(violation) = check(&state.collected) {
                let position = state
                    .position_of(&violation.field)
                    .expect("cross check names a schema field");
                state.collected.remove(&violation.field);
                state.completed[position] = false;
                state.cursor = position;
                state.phase = if state.schema.fields[state.order[position]].required {
                    Phase::CollectingRequired
                } else {
                    Phase::CollectingOptional
                };
                let prompt = state.schema.fields[state.order[position]].prompt;
                return EngineReply::Prompt {
                    field: violation.field,
                    message: format!("{}. {}", violation.error, prompt),
                };
            }
        }

        state.phase = Phase::Summary;
        let rendered = state.render_summary();
        // The summary is the last stop before the confirmation gate.
        state.phase = Phase::AwaitingConfirmation;
        EngineReply::Summary {
            operation: state.schema.name.to_string(),
            rendered,
        }
    }

    fn prompt_current(&self) -> EngineReply {
        let state = self.state.as_ref().expect("active workflow");
        let field = state.current_field();
        let message = if field.required {
            field.prompt.to_string()
        } else {
            format!("{} (optional - type 'skip' to leave out)", field.prompt)
        };
        EngineReply::Prompt {
            field: field.key.to_string(),
            message,
        }
    }
}
