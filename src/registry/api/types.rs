//! Wire types for the registry, datastore, search, and provenance APIs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Registry item subtypes this connector understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemSubType {
    Person,
    Organisation,
    Model,
    Dataset,
    DatasetTemplate,
    ModelRunWorkflowTemplate,
    ModelRun,
}

impl ItemSubType {
    pub const ALL: [ItemSubType; 7] = [
        ItemSubType::Person,
        ItemSubType::Organisation,
        ItemSubType::Model,
        ItemSubType::Dataset,
        ItemSubType::DatasetTemplate,
        ItemSubType::ModelRunWorkflowTemplate,
        ItemSubType::ModelRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSubType::Person => "PERSON",
            ItemSubType::Organisation => "ORGANISATION",
            ItemSubType::Model => "MODEL",
            ItemSubType::Dataset => "DATASET",
            ItemSubType::DatasetTemplate => "DATASET_TEMPLATE",
            ItemSubType::ModelRunWorkflowTemplate => "MODEL_RUN_WORKFLOW_TEMPLATE",
            ItemSubType::ModelRun => "MODEL_RUN",
        }
    }

    /// Parse a user-supplied subtype filter, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_uppercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    pub fn valid_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for ItemSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope carried by every registry-family API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiStatus {
    pub success: bool,
    #[serde(default)]
    pub details: Option<String>,
}

impl ApiStatus {
    pub fn details_or_unknown(&self) -> String {
        self.details.clone().unwrap_or_else(|| "unknown failure".to_string())
    }
}

/// One hit from the search service, before item details are resolved
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// A ranked, label-resolved search result presented to the user
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub label: String,
    pub subtype: Option<String>,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct FetchResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub item: Option<serde_json::Value>,
}

/// Request body for the general list endpoint
#[derive(Debug, Serialize)]
pub struct GeneralListRequest {
    pub filter_by: Option<serde_json::Value>,
    pub sort_by: Option<serde_json::Value>,
    pub pagination_key: Option<serde_json::Value>,
}

impl Default for GeneralListRequest {
    fn default() -> Self {
        Self {
            filter_by: None,
            sort_by: None,
            pagination_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub total_item_count: Option<u64>,
    #[serde(default)]
    pub pagination_key: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub counts: HashMap<String, u64>,
}
