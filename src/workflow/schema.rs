//! Operation schemas and field validation
//!
//! Each registration operation the connector supports is described by an
//! [`OperationSchema`]: an ordered field list with per-field kind, prompt,
//! requiredness, default, and normalization. Validation is a pure function
//! from a raw string to a normalized JSON value; the workflow engine never
//! trusts upstream text to be well-formed.

use crate::registry::api::{ApiBase, ItemSubType};
use chrono::{DateTime, NaiveDate, SecondsFormat};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use thiserror::Error;

/// A recoverable, per-field validation failure; the engine re-prompts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// A cross-field constraint failure, naming the field to re-collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossFieldError {
    pub field: String,
    pub error: ValidationError,
}

/// Resource usage types accepted by dataset templates
pub const USAGE_TYPES: [&str; 4] = [
    "GENERAL_DATA",
    "CONFIG_FILE",
    "FORCING_DATA",
    "PARAMETER_FILE",
];

/// The shape of a single field's value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text,
    Email,
    Url,
    Bool,
    /// Calendar date, YYYY-MM-DD
    Date,
    /// ISO 8601 timestamp with offset
    DateTime,
    /// Decimal number entered as text (stored as the normalized string)
    Decimal,
    /// ISO 8601 duration, e.g. P1D
    Duration,
    /// Comma-separated values stored as a JSON array of strings
    Csv,
    JsonObject,
    JsonArray,
    /// One of a fixed set of upper-case names
    EnumSet(&'static [&'static str]),
    /// A registry handle id, resolvable via search-and-select
    Reference(ItemSubType),
}

/// Default applied when an optional field is skipped
#[derive(Clone)]
pub enum FieldDefault {
    Static(Value),
    /// Computed from the values collected so far
    Derived(fn(&BTreeMap<String, Value>) -> Option<Value>),
}

impl std::fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldDefault::Static(v) => write!(f, "Static({})", v),
            FieldDefault::Derived(_) => write!(f, "Derived(..)"),
        }
    }
}

/// Specification of one field of an operation
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: &'static str,
    pub required: bool,
    pub kind: FieldKind,
    /// Question shown when the field is collected
    pub prompt: &'static str,
    pub default: Option<FieldDefault>,
    /// Applied to the accepted value (ORCID/ROR URL forms, EWKT SRID prefix)
    pub normalizer: Option<fn(&str) -> String>,
}

impl FieldSpec {
    fn new(key: &'static str, required: bool, kind: FieldKind, prompt: &'static str) -> Self {
        Self {
            key,
            required,
            kind,
            prompt,
            default: None,
            normalizer: None,
        }
    }

    fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    fn with_normalizer(mut self, normalizer: fn(&str) -> String) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Validate and normalize a raw submission for this field.
    pub fn validate(&self, raw: &str) -> Result<Value, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new(format!("{} cannot be empty", self.key)));
        }

        let value = match self.kind {
            FieldKind::Text => Value::String(trimmed.to_string()),
            FieldKind::Email => {
                let (local, domain) = trimmed
                    .split_once('@')
                    .ok_or_else(|| ValidationError::new("enter an email address like name@example.org"))?;
                if local.is_empty() || domain.is_empty() || !domain.contains('.') {
                    return Err(ValidationError::new(
                        "enter an email address like name@example.org",
                    ));
                }
                Value::String(trimmed.to_string())
            }
            FieldKind::Url => {
                let parsed = url::Url::parse(trimmed)
                    .map_err(|_| ValidationError::new("enter a fully qualified URL"))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(ValidationError::new("enter an http(s) URL"));
                }
                Value::String(trimmed.to_string())
            }
            FieldKind::Bool => match trimmed.to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Value::Bool(true),
                "false" | "no" | "n" | "0" => Value::Bool(false),
                _ => return Err(ValidationError::new("answer true or false")),
            },
            FieldKind::Date => {
                let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map_err(|_| ValidationError::new("enter a date as YYYY-MM-DD"))?;
                Value::String(date.format("%Y-%m-%d").to_string())
            }
            FieldKind::DateTime => {
                let dt = DateTime::parse_from_rfc3339(trimmed).map_err(|_| {
                    ValidationError::new("enter an ISO 8601 timestamp like 2024-01-31T10:00:00Z")
                })?;
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            FieldKind::Decimal => {
                let number: f64 = trimmed
                    .parse()
                    .map_err(|_| ValidationError::new("enter a decimal number, e.g. 0.01"))?;
                if !number.is_finite() {
                    return Err(ValidationError::new("enter a finite decimal number"));
                }
                Value::String(trimmed.to_string())
            }
            FieldKind::Duration => {
                if !trimmed.starts_with('P') || trimmed.len() < 2 {
                    return Err(ValidationError::new(
                        "enter an ISO 8601 duration, e.g. P1D for one day",
                    ));
                }
                Value::String(trimmed.to_string())
            }
            FieldKind::Csv => {
                let items: Vec<Value> = trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect();
                if items.is_empty() {
                    return Err(ValidationError::new("provide at least one comma-separated value"));
                }
                Value::Array(items)
            }
            FieldKind::JsonObject => {
                let parsed: Value = serde_json::from_str(trimmed)
                    .map_err(|e| ValidationError::new(format!("invalid JSON: {}", e)))?;
                if !parsed.is_object() {
                    return Err(ValidationError::new("enter a JSON object, e.g. {\"key\": \"value\"}"));
                }
                parsed
            }
            FieldKind::JsonArray => {
                let parsed: Value = serde_json::from_str(trimmed)
                    .map_err(|e| ValidationError::new(format!("invalid JSON: {}", e)))?;
                if !parsed.is_array() {
                    return Err(ValidationError::new("enter a JSON array, e.g. [...]"));
                }
                parsed
            }
            FieldKind::EnumSet(allowed) => {
                let upper = trimmed.to_uppercase();
                if !allowed.contains(&upper.as_str()) {
                    return Err(ValidationError::new(format!(
                        "must be one of: {}",
                        allowed.join(", ")
                    )));
                }
                Value::String(upper)
            }
            FieldKind::Reference(_) => {
                if !looks_like_handle(trimmed) {
                    return Err(ValidationError::new(
                        "enter a registry handle id (e.g. 10378.1/1234567) or search by name",
                    ));
                }
                Value::String(trimmed.to_string())
            }
        };

        match (&self.normalizer, value) {
            (Some(normalize), Value::String(s)) => Ok(Value::String(normalize(&s))),
            (_, value) => Ok(value),
        }
    }
}

/// True for values shaped like a registry handle id, e.g. `10378.1/1234567`.
pub fn looks_like_handle(value: &str) -> bool {
    let value = value.trim();
    if value.contains(char::is_whitespace) {
        return false;
    }
    match value.split_once('/') {
        Some((prefix, suffix)) => {
            !prefix.is_empty()
                && !suffix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_digit() || c == '.')
        }
        None => false,
    }
}

fn normalize_orcid(value: &str) -> String {
    if value.starts_with("http") {
        value.to_string()
    } else {
        format!("https://orcid.org/{}", value)
    }
}

fn normalize_ror(value: &str) -> String {
    if value.starts_with("http") {
        value.to_string()
    } else {
        format!("https://ror.org/{}", value)
    }
}

/// Bare WKT geometry gets the default SRID prefixed.
fn normalize_ewkt(value: &str) -> String {
    if value.to_uppercase().starts_with("SRID=") {
        value.to_string()
    } else {
        format!("SRID=4326;{}", value)
    }
}

fn derive_person_display_name(collected: &BTreeMap<String, Value>) -> Option<Value> {
    let first = collected.get("first_name")?.as_str()?;
    let last = collected.get("last_name")?.as_str()?;
    Some(Value::String(format!("{} {}", first.trim(), last.trim())))
}

fn derive_display_name_from_name(collected: &BTreeMap<String, Value>) -> Option<Value> {
    collected.get("name").cloned()
}

/// Static description of one remote registration operation
#[derive(Debug, Clone)]
pub struct OperationSchema {
    pub name: &'static str,
    pub description: &'static str,
    /// Which deployment service hosts the endpoint
    pub base: ApiBase,
    pub path: &'static str,
    /// Fields in declaration order; collection order is required-first
    pub fields: Vec<FieldSpec>,
    /// Constraint spanning multiple fields, checked when collection finishes
    pub cross_check: Option<fn(&BTreeMap<String, Value>) -> Result<(), CrossFieldError>>,
}

impl OperationSchema {
    /// Indices of `fields` in collection order: required first, then
    /// optional, both keeping declaration order.
    pub fn collection_order(&self) -> Vec<usize> {
        let required = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.required)
            .map(|(i, _)| i);
        let optional = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.required)
            .map(|(i, _)| i);
        required.chain(optional).collect()
    }

    pub fn required_keys(&self) -> Vec<&'static str> {
        self.fields.iter().filter(|f| f.required).map(|f| f.key).collect()
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }
}

fn model_run_times_check(collected: &BTreeMap<String, Value>) -> Result<(), CrossFieldError> {
    let (Some(start), Some(end)) = (
        collected.get("start_time").and_then(|v| v.as_str()),
        collected.get("end_time").and_then(|v| v.as_str()),
    ) else {
        return Ok(());
    };
    let start = DateTime::parse_from_rfc3339(start);
    let end = DateTime::parse_from_rfc3339(end);
    if let (Ok(start), Ok(end)) = (start, end) {
        if end <= start {
            return Err(CrossFieldError {
                field: "end_time".to_string(),
                error: ValidationError::new("end_time must be after start_time"),
            });
        }
    }
    Ok(())
}

fn dataset_constraints_check(collected: &BTreeMap<String, Value>) -> Result<(), CrossFieldError> {
    let begin = collected.get("temporal_begin_date");
    let end = collected.get("temporal_end_date");
    match (begin, end) {
        (Some(_), None) => {
            return Err(CrossFieldError {
                field: "temporal_end_date".to_string(),
                error: ValidationError::new("temporal coverage needs both begin and end dates"),
            });
        }
        (None, Some(_)) => {
            return Err(CrossFieldError {
                field: "temporal_begin_date".to_string(),
                error: ValidationError::new("temporal coverage needs both begin and end dates"),
            });
        }
        _ => {}
    }

    let reposited = collected
        .get("access_reposited")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if !reposited && !collected.contains_key("access_uri") {
        return Err(CrossFieldError {
            field: "access_uri".to_string(),
            error: ValidationError::new("externally hosted data needs an access URI"),
        });
    }
    Ok(())
}

/// The set of operations this connector can drive
pub struct SchemaRegistry {
    operations: Vec<OperationSchema>,
}

impl SchemaRegistry {
    /// All built-in registration operations.
    pub fn builtin() -> Self {
        Self {
            operations: vec![
                create_person(),
                create_organisation(),
                create_model(),
                create_dataset_template(),
                create_model_run_workflow_template(),
                create_dataset(),
                create_model_run(),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&OperationSchema> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationSchema> {
        self.operations.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.operations.iter().map(|op| op.name).collect()
    }
}

fn create_person() -> OperationSchema {
    OperationSchema {
        name: "create_person",
        description: "Register a person in the registry",
        base: ApiBase::Registry,
        path: "/registry/agent/person/create",
        fields: vec![
            FieldSpec::new("first_name", true, FieldKind::Text, "Given name(s)?"),
            FieldSpec::new("last_name", true, FieldKind::Text, "Family name(s)?"),
            FieldSpec::new("email", true, FieldKind::Email, "Contact email?"),
            FieldSpec::new(
                "display_name",
                false,
                FieldKind::Text,
                "Display name? (skip to use \"first last\")",
            )
            .with_default(FieldDefault::Derived(derive_person_display_name)),
            FieldSpec::new("orcid", false, FieldKind::Text, "ORCID iD or URL?")
                .with_normalizer(normalize_orcid),
            FieldSpec::new(
                "ethics_approved",
                false,
                FieldKind::Bool,
                "Ethics approved for the registry? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(true))),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            )
            .with_default(FieldDefault::Static(json!({}))),
        ],
        cross_check: None,
    }
}

fn create_organisation() -> OperationSchema {
    OperationSchema {
        name: "create_organisation",
        description: "Register an organisation in the registry",
        base: ApiBase::Registry,
        path: "/registry/agent/organisation/create",
        fields: vec![
            FieldSpec::new("name", true, FieldKind::Text, "Organisation name?"),
            FieldSpec::new(
                "display_name",
                false,
                FieldKind::Text,
                "Display name? (skip to use the name)",
            )
            .with_default(FieldDefault::Derived(derive_display_name_from_name)),
            FieldSpec::new("ror", false, FieldKind::Text, "ROR iD or URL?")
                .with_normalizer(normalize_ror),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            )
            .with_default(FieldDefault::Static(json!({}))),
        ],
        cross_check: None,
    }
}

fn create_model() -> OperationSchema {
    OperationSchema {
        name: "create_model",
        description: "Register a software model in the registry",
        base: ApiBase::Registry,
        path: "/registry/entity/model/create",
        fields: vec![
            FieldSpec::new("name", true, FieldKind::Text, "Model name?"),
            FieldSpec::new("description", true, FieldKind::Text, "What does the model do?"),
            FieldSpec::new(
                "documentation_url",
                true,
                FieldKind::Url,
                "URL of the model's documentation?",
            ),
            FieldSpec::new(
                "source_url",
                true,
                FieldKind::Url,
                "URL of the model's source code?",
            ),
            FieldSpec::new(
                "display_name",
                false,
                FieldKind::Text,
                "Display name? (skip to use the name)",
            )
            .with_default(FieldDefault::Derived(derive_display_name_from_name)),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            ),
        ],
        cross_check: None,
    }
}

fn create_dataset_template() -> OperationSchema {
    OperationSchema {
        name: "create_dataset_template",
        description: "Register a dataset template defining expected files/resources",
        base: ApiBase::Registry,
        path: "/registry/entity/dataset_template/create",
        fields: vec![
            FieldSpec::new("display_name", true, FieldKind::Text, "Template name?"),
            FieldSpec::new(
                "description",
                false,
                FieldKind::Text,
                "What is this template for?",
            ),
            FieldSpec::new(
                "defined_resources",
                false,
                FieldKind::JsonArray,
                "Defined resources as a JSON array of {path, description, usage_type, is_folder}?",
            ),
            FieldSpec::new(
                "deferred_resources",
                false,
                FieldKind::JsonArray,
                "Deferred resources as a JSON array of {key, description, usage_type, is_folder}?",
            ),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            ),
        ],
        cross_check: None,
    }
}

fn create_model_run_workflow_template() -> OperationSchema {
    OperationSchema {
        name: "create_model_run_workflow_template",
        description: "Register a workflow template describing a model's inputs and outputs",
        base: ApiBase::Registry,
        path: "/registry/entity/model_run_workflow/create",
        fields: vec![
            FieldSpec::new("display_name", true, FieldKind::Text, "Workflow template name?"),
            FieldSpec::new(
                "model_id",
                true,
                FieldKind::Reference(ItemSubType::Model),
                "Which model is this workflow for? (handle id, or search by name)",
            ),
            FieldSpec::new(
                "input_template_ids",
                false,
                FieldKind::JsonArray,
                "Input dataset templates as a JSON array of {template_id, optional}?",
            ),
            FieldSpec::new(
                "output_template_ids",
                false,
                FieldKind::JsonArray,
                "Output dataset templates as a JSON array of {template_id, optional}?",
            ),
            FieldSpec::new(
                "required_annotations",
                false,
                FieldKind::Csv,
                "Required annotation keys, comma-separated?",
            ),
            FieldSpec::new(
                "optional_annotations",
                false,
                FieldKind::Csv,
                "Optional annotation keys, comma-separated?",
            ),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            ),
        ],
        cross_check: None,
    }
}

fn create_dataset() -> OperationSchema {
    OperationSchema {
        name: "create_dataset",
        description: "Mint a dataset in the data store",
        base: ApiBase::Datastore,
        path: "/register/mint-dataset",
        fields: vec![
            FieldSpec::new("name", true, FieldKind::Text, "Dataset name?"),
            FieldSpec::new("description", true, FieldKind::Text, "Describe the dataset"),
            FieldSpec::new(
                "publisher_id",
                true,
                FieldKind::Reference(ItemSubType::Organisation),
                "Publisher organisation? (handle id, or search by name)",
            ),
            FieldSpec::new(
                "organisation_id",
                true,
                FieldKind::Reference(ItemSubType::Organisation),
                "Record creator organisation? (handle id, or search by name)",
            ),
            FieldSpec::new("created_date", true, FieldKind::Date, "Date created? (YYYY-MM-DD)"),
            FieldSpec::new(
                "published_date",
                true,
                FieldKind::Date,
                "Date published? (YYYY-MM-DD)",
            ),
            FieldSpec::new(
                "license",
                true,
                FieldKind::Url,
                "License URI? (e.g. https://creativecommons.org/licenses/by/4.0/)",
            ),
            FieldSpec::new(
                "access_reposited",
                false,
                FieldKind::Bool,
                "Is the data reposited in the data store? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(true))),
            FieldSpec::new(
                "access_uri",
                false,
                FieldKind::Url,
                "URI of the externally hosted data?",
            ),
            FieldSpec::new(
                "access_description",
                false,
                FieldKind::Text,
                "How is the externally hosted data accessed?",
            ),
            FieldSpec::new(
                "ethics_registration_relevant",
                false,
                FieldKind::Bool,
                "Is ethics registration relevant? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "ethics_registration_obtained",
                false,
                FieldKind::Bool,
                "Has ethics registration been obtained? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "ethics_access_relevant",
                false,
                FieldKind::Bool,
                "Is ethics access approval relevant? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "ethics_access_obtained",
                false,
                FieldKind::Bool,
                "Has ethics access approval been obtained? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "indigenous_knowledge_relevant",
                false,
                FieldKind::Bool,
                "Does the dataset contain indigenous knowledge? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "indigenous_knowledge_obtained",
                false,
                FieldKind::Bool,
                "Has consent for indigenous knowledge been obtained? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "export_controls_relevant",
                false,
                FieldKind::Bool,
                "Are export controls relevant? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new(
                "export_controls_obtained",
                false,
                FieldKind::Bool,
                "Has export control clearance been obtained? (true/false)",
            )
            .with_default(FieldDefault::Static(Value::Bool(false))),
            FieldSpec::new("purpose", false, FieldKind::Text, "Why was the dataset created?"),
            FieldSpec::new(
                "rights_holder",
                false,
                FieldKind::Text,
                "Who owns or manages the rights?",
            ),
            FieldSpec::new(
                "usage_limitations",
                false,
                FieldKind::Text,
                "Access or usage restrictions?",
            ),
            FieldSpec::new(
                "preferred_citation",
                false,
                FieldKind::Text,
                "Preferred citation?",
            ),
            FieldSpec::new(
                "spatial_coverage",
                false,
                FieldKind::Text,
                "Spatial coverage as EWKT? (e.g. SRID=4326;POINT(145.7 -16.2))",
            )
            .with_normalizer(normalize_ewkt),
            FieldSpec::new(
                "spatial_extent",
                false,
                FieldKind::Text,
                "Spatial extent as an EWKT bounding polygon?",
            )
            .with_normalizer(normalize_ewkt),
            FieldSpec::new(
                "spatial_resolution",
                false,
                FieldKind::Decimal,
                "Spatial resolution in decimal degrees? (e.g. 0.01)",
            ),
            FieldSpec::new(
                "temporal_begin_date",
                false,
                FieldKind::Date,
                "Temporal coverage begin date? (YYYY-MM-DD)",
            ),
            FieldSpec::new(
                "temporal_end_date",
                false,
                FieldKind::Date,
                "Temporal coverage end date? (YYYY-MM-DD)",
            ),
            FieldSpec::new(
                "temporal_resolution",
                false,
                FieldKind::Duration,
                "Temporal resolution as an ISO 8601 duration? (e.g. P1D)",
            ),
            FieldSpec::new("formats", false, FieldKind::Csv, "File formats, comma-separated?"),
            FieldSpec::new("keywords", false, FieldKind::Csv, "Keywords, comma-separated?"),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            ),
            FieldSpec::new(
                "data_custodian_id",
                false,
                FieldKind::Reference(ItemSubType::Person),
                "Data custodian? (person handle id, or search by name)",
            ),
            FieldSpec::new(
                "point_of_contact",
                false,
                FieldKind::Text,
                "Point of contact details?",
            ),
        ],
        cross_check: Some(dataset_constraints_check),
    }
}

fn create_model_run() -> OperationSchema {
    OperationSchema {
        name: "create_model_run",
        description: "Register a model run linking inputs to outputs through a model",
        base: ApiBase::Prov,
        path: "/model_run/register",
        fields: vec![
            FieldSpec::new(
                "workflow_template_id",
                true,
                FieldKind::Reference(ItemSubType::ModelRunWorkflowTemplate),
                "Which workflow template does this run follow? (handle id, or search by name)",
            ),
            FieldSpec::new("display_name", true, FieldKind::Text, "Name for this run?"),
            FieldSpec::new("description", true, FieldKind::Text, "What was this run for?"),
            FieldSpec::new(
                "start_time",
                true,
                FieldKind::DateTime,
                "When did execution start? (ISO 8601, e.g. 2024-01-31T10:00:00Z)",
            ),
            FieldSpec::new(
                "end_time",
                true,
                FieldKind::DateTime,
                "When did execution finish? (ISO 8601)",
            ),
            FieldSpec::new(
                "modeller_id",
                true,
                FieldKind::Reference(ItemSubType::Person),
                "Who ran the model? (person handle id, or search by name)",
            ),
            FieldSpec::new(
                "requesting_organisation_id",
                true,
                FieldKind::Reference(ItemSubType::Organisation),
                "Which organisation requested the run? (handle id, or search by name)",
            ),
            FieldSpec::new(
                "model_version",
                false,
                FieldKind::Text,
                "Model version, if different from the template's?",
            ),
            FieldSpec::new(
                "input_datasets",
                false,
                FieldKind::JsonArray,
                "Input dataset ids as a JSON array?",
            ),
            FieldSpec::new(
                "output_datasets",
                false,
                FieldKind::JsonArray,
                "Output dataset ids as a JSON array?",
            ),
            FieldSpec::new(
                "annotations",
                false,
                FieldKind::JsonObject,
                "Annotations as a JSON object matching the template's keys?",
            ),
            FieldSpec::new(
                "user_metadata",
                false,
                FieldKind::JsonObject,
                "Additional metadata as a JSON object?",
            ),
        ],
        cross_check: Some(model_run_times_check),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: FieldKind) -> FieldSpec {
        FieldSpec::new("field", true, kind, "?")
    }

    #[test]
    fn test_builtin_registry_contents() {
        let registry = SchemaRegistry::builtin();
        let names = registry.names();
        assert_eq!(names.len(), 7);
        for expected in [
            "create_person",
            "create_organisation",
            "create_model",
            "create_dataset_template",
            "create_model_run_workflow_template",
            "create_dataset",
            "create_model_run",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert!(registry.get("create_widget").is_none());
    }

    #[test]
    fn test_collection_order_required_first() {
        let registry = SchemaRegistry::builtin();
        let person = registry.get("create_person").unwrap();
        let order = person.collection_order();
        let keys: Vec<_> = order.iter().map(|&i| person.fields[i].key).collect();
        assert_eq!(
            keys,
            vec![
                "first_name",
                "last_name",
                "email",
                "display_name",
                "orcid",
                "ethics_approved",
                "user_metadata"
            ]
        );

        let boundary = person.fields.iter().filter(|f| f.required).count();
        assert!(order[..boundary].iter().all(|&i| person.fields[i].required));
        assert!(order[boundary..].iter().all(|&i| !person.fields[i].required));
    }

    #[test]
    fn test_text_and_email_validation() {
        assert_eq!(
            spec(FieldKind::Text).validate("  hello  ").unwrap(),
            Value::String("hello".to_string())
        );
        assert!(spec(FieldKind::Text).validate("   ").is_err());

        assert!(spec(FieldKind::Email).validate("a@example.org").is_ok());
        assert!(spec(FieldKind::Email).validate("not-an-email").is_err());
        assert!(spec(FieldKind::Email).validate("a@nodot").is_err());
    }

    #[test]
    fn test_url_validation() {
        assert!(spec(FieldKind::Url).validate("https://example.org/docs").is_ok());
        assert!(spec(FieldKind::Url).validate("ftp://example.org").is_err());
        assert!(spec(FieldKind::Url).validate("example.org").is_err());
    }

    #[test]
    fn test_bool_validation() {
        assert_eq!(spec(FieldKind::Bool).validate("Yes").unwrap(), Value::Bool(true));
        assert_eq!(spec(FieldKind::Bool).validate("0").unwrap(), Value::Bool(false));
        assert!(spec(FieldKind::Bool).validate("maybe").is_err());
    }

    #[test]
    fn test_date_and_datetime_validation() {
        assert_eq!(
            spec(FieldKind::Date).validate("2024-02-29").unwrap(),
            Value::String("2024-02-29".to_string())
        );
        assert!(spec(FieldKind::Date).validate("29/02/2024").is_err());
        assert!(spec(FieldKind::Date).validate("2023-02-29").is_err());

        let dt = spec(FieldKind::DateTime).validate("2024-01-31T10:00:00Z").unwrap();
        assert_eq!(dt, Value::String("2024-01-31T10:00:00Z".to_string()));
        assert!(spec(FieldKind::DateTime).validate("yesterday").is_err());
    }

    #[test]
    fn test_csv_validation() {
        assert_eq!(
            spec(FieldKind::Csv).validate("CSV, JSON , ").unwrap(),
            serde_json::json!(["CSV", "JSON"])
        );
        assert!(spec(FieldKind::Csv).validate(" , ,").is_err());
    }

    #[test]
    fn test_json_validation() {
        assert!(spec(FieldKind::JsonObject).validate("{\"a\": 1}").is_ok());
        assert!(spec(FieldKind::JsonObject).validate("[1]").is_err());
        assert!(spec(FieldKind::JsonArray).validate("[\"x\"]").is_ok());
        assert!(spec(FieldKind::JsonArray).validate("{}").is_err());
        assert!(spec(FieldKind::JsonObject).validate("nonsense").is_err());
    }

    #[test]
    fn test_enum_set_validation() {
        let field = spec(FieldKind::EnumSet(&USAGE_TYPES));
        assert_eq!(
            field.validate("general_data").unwrap(),
            Value::String("GENERAL_DATA".to_string())
        );
        assert!(field.validate("SOMETHING_ELSE").is_err());
    }

    #[test]
    fn test_reference_direct_handle() {
        let field = spec(FieldKind::Reference(ItemSubType::Model));
        assert_eq!(
            field.validate("10378.1/1234567").unwrap(),
            Value::String("10378.1/1234567".to_string())
        );
        // Free text falls through to the search sub-flow.
        assert!(field.validate("coral model").is_err());
    }

    #[test]
    fn test_looks_like_handle() {
        assert!(looks_like_handle("10378.1/1234567"));
        assert!(looks_like_handle("102.100.100/abc"));
        assert!(!looks_like_handle("coral reef"));
        assert!(!looks_like_handle("no-slash"));
        assert!(!looks_like_handle("abc/123"));
        assert!(!looks_like_handle("10378.1/"));
    }

    #[test]
    fn test_orcid_and_ror_normalization() {
        let registry = SchemaRegistry::builtin();
        let person = registry.get("create_person").unwrap();
        let orcid = person.field("orcid").unwrap();
        assert_eq!(
            orcid.validate("0000-0002-1825-0097").unwrap(),
            Value::String("https://orcid.org/0000-0002-1825-0097".to_string())
        );
        assert_eq!(
            orcid.validate("https://orcid.org/0000-0002-1825-0097").unwrap(),
            Value::String("https://orcid.org/0000-0002-1825-0097".to_string())
        );

        let org = registry.get("create_organisation").unwrap();
        let ror = org.field("ror").unwrap();
        assert_eq!(
            ror.validate("03yrm5c26").unwrap(),
            Value::String("https://ror.org/03yrm5c26".to_string())
        );
    }

    #[test]
    fn test_ewkt_normalization() {
        let registry = SchemaRegistry::builtin();
        let dataset = registry.get("create_dataset").unwrap();
        let coverage = dataset.field("spatial_coverage").unwrap();
        assert_eq!(
            coverage.validate("POINT(145.7 -16.2)").unwrap(),
            Value::String("SRID=4326;POINT(145.7 -16.2)".to_string())
        );
        assert_eq!(
            coverage.validate("SRID=7844;POINT(145.7 -16.2)").unwrap(),
            Value::String("SRID=7844;POINT(145.7 -16.2)".to_string())
        );
    }

    #[test]
    fn test_person_display_name_derivation() {
        let mut collected = BTreeMap::new();
        collected.insert("first_name".to_string(), Value::String("MCP".to_string()));
        collected.insert("last_name".to_string(), Value::String("Robot".to_string()));
        assert_eq!(
            derive_person_display_name(&collected),
            Some(Value::String("MCP Robot".to_string()))
        );

        collected.remove("last_name");
        assert_eq!(derive_person_display_name(&collected), None);
    }

    #[test]
    fn test_model_run_times_cross_check() {
        let mut collected = BTreeMap::new();
        collected.insert(
            "start_time".to_string(),
            Value::String("2024-01-31T10:00:00Z".to_string()),
        );
        collected.insert(
            "end_time".to_string(),
            Value::String("2024-01-31T09:00:00Z".to_string()),
        );
        let err = model_run_times_check(&collected).unwrap_err();
        assert_eq!(err.field, "end_time");

        collected.insert(
            "end_time".to_string(),
            Value::String("2024-01-31T11:00:00Z".to_string()),
        );
        assert!(model_run_times_check(&collected).is_ok());
    }

    #[test]
    fn test_dataset_cross_checks() {
        let mut collected = BTreeMap::new();
        collected.insert(
            "temporal_begin_date".to_string(),
            Value::String("2024-01-01".to_string()),
        );
        let err = dataset_constraints_check(&collected).unwrap_err();
        assert_eq!(err.field, "temporal_end_date");

        collected.insert(
            "temporal_end_date".to_string(),
            Value::String("2024-06-01".to_string()),
        );
        assert!(dataset_constraints_check(&collected).is_ok());

        collected.insert("access_reposited".to_string(), Value::Bool(false));
        let err = dataset_constraints_check(&collected).unwrap_err();
        assert_eq!(err.field, "access_uri");
    }
}
