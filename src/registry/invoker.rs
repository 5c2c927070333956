//! The capability boundary for mutating registry calls
//!
//! Every confirmed workflow funnels through [`ToolInvoker::call`]: it looks
//! up the operation endpoint, obtains a fresh credential (or refuses), and
//! performs the remote call. It does not re-validate business semantics;
//! the workflow engine already did.

use crate::auth::{AuthError, AuthSession};
use crate::registry::api::{Candidate, ItemSubType, RegistryApiError, RegistryClient};
use crate::workflow::engine::{OperationInvoker, RegistrySearch};
use crate::workflow::schema::SchemaRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Failures of a mutating operation call
#[derive(Debug, Error)]
pub enum InvokeError {
    /// No usable credential; no remote call was attempted
    #[error("not authenticated - run `prov-ctl auth login` first")]
    Unauthenticated,

    /// The operation name is not in the schema registry
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// Application-level rejection, surfaced verbatim
    #[error("the registry rejected the call ({status}): {body}")]
    RemoteRejected { status: u16, body: String },

    /// Network or server failure after bounded retries
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Result of a successful operation call
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    /// Identifier of the created record (handle id or job session id)
    pub id: Option<String>,
    /// Public resolver URL, when the id is a handle
    pub handle_url: Option<String>,
    /// The raw response object
    pub raw: Value,
}

/// Executes confirmed operations and reference searches with a fresh
/// credential attached
pub struct ToolInvoker {
    auth: Arc<AuthSession>,
    client: Arc<RegistryClient>,
    schemas: Arc<SchemaRegistry>,
    session_key: String,
}

impl ToolInvoker {
    pub fn new(
        auth: Arc<AuthSession>,
        client: Arc<RegistryClient>,
        schemas: Arc<SchemaRegistry>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            client,
            schemas,
            session_key: session_key.into(),
        }
    }

    async fn fresh_token(&self) -> Result<String, InvokeError> {
        match self.auth.ensure_fresh(&self.session_key).await {
            Ok(credential) => Ok(credential.access_token),
            // A missing store reads as "not authenticated", never as a crash.
            Err(AuthError::ReauthRequired) | Err(AuthError::Store(_)) => {
                Err(InvokeError::Unauthenticated)
            }
            Err(other) => Err(InvokeError::Transport(other.to_string())),
        }
    }
}

#[async_trait]
impl OperationInvoker for ToolInvoker {
    async fn call(&self, operation: &str, arguments: &Value) -> Result<InvokeOutcome, InvokeError> {
        let schema = self
            .schemas
            .get(operation)
            .ok_or_else(|| InvokeError::UnknownOperation(operation.to_string()))?;

        let token = self.fresh_token().await?;
        let url = self.client.operation_url(schema.base, schema.path);

        log::info!("Calling {} at {}", operation, url);
        let raw = self
            .client
            .create_item(&token, &url, arguments)
            .await
            .map_err(map_api_error)?;

        Ok(outcome_from_response(raw))
    }
}

#[async_trait]
impl RegistrySearch for ToolInvoker {
    async fn search(
        &self,
        query: &str,
        subtype: Option<ItemSubType>,
        limit: usize,
    ) -> Result<Vec<Candidate>, RegistryApiError> {
        let token = self
            .fresh_token()
            .await
            .map_err(|_| RegistryApiError::Unauthorized)?;
        self.client.search(&token, query, subtype, limit).await
    }
}

fn map_api_error(error: RegistryApiError) -> InvokeError {
    match error {
        RegistryApiError::Unauthorized => InvokeError::Unauthenticated,
        RegistryApiError::Rejected { status, body } => InvokeError::RemoteRejected { status, body },
        RegistryApiError::NotFound(body) => InvokeError::RemoteRejected { status: 404, body },
        RegistryApiError::Unsuccessful(details) => InvokeError::RemoteRejected {
            status: 200,
            body: details,
        },
        RegistryApiError::Server { status, message } => {
            InvokeError::Transport(format!("server error {}: {}", status, message))
        }
        other => InvokeError::Transport(other.to_string()),
    }
}

fn outcome_from_response(raw: Value) -> InvokeOutcome {
    let created_id = raw
        .get("created_item")
        .and_then(|item| item.get("id"))
        .and_then(|v| v.as_str())
        .or_else(|| raw.get("handle").and_then(|v| v.as_str()))
        .map(String::from);

    if let Some(id) = created_id {
        let handle_url = Some(crate::handle_url(&id));
        return InvokeOutcome {
            id: Some(id),
            handle_url,
            raw,
        };
    }

    // Model run registration is asynchronous and returns a job session id.
    let session_id = raw
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(String::from);
    InvokeOutcome {
        id: session_id,
        handle_url: None,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_from_created_item() {
        let raw = json!({
            "status": {"success": true},
            "created_item": {"id": "10378.1/1234567"}
        });
        let outcome = outcome_from_response(raw);
        assert_eq!(outcome.id.as_deref(), Some("10378.1/1234567"));
        assert_eq!(
            outcome.handle_url.as_deref(),
            Some("https://hdl.handle.net/10378.1/1234567")
        );
    }

    #[test]
    fn test_outcome_from_minted_handle() {
        let raw = json!({"status": {"success": true}, "handle": "10378.1/7777"});
        let outcome = outcome_from_response(raw);
        assert_eq!(outcome.id.as_deref(), Some("10378.1/7777"));
        assert!(outcome.handle_url.is_some());
    }

    #[test]
    fn test_outcome_from_async_session() {
        let raw = json!({"status": {"success": true}, "session_id": "job-42"});
        let outcome = outcome_from_response(raw);
        assert_eq!(outcome.id.as_deref(), Some("job-42"));
        assert!(outcome.handle_url.is_none());
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(
            map_api_error(RegistryApiError::Unauthorized),
            InvokeError::Unauthenticated
        ));

        match map_api_error(RegistryApiError::Rejected {
            status: 422,
            body: "bad field".to_string(),
        }) {
            InvokeError::RemoteRejected { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "bad field");
            }
            other => panic!("expected RemoteRejected, got {:?}", other),
        }

        assert!(matches!(
            map_api_error(RegistryApiError::Server {
                status: 502,
                message: "bad gateway".to_string()
            }),
            InvokeError::Transport(_)
        ));

        // Envelope-level failures surface verbatim like any 4xx.
        assert!(matches!(
            map_api_error(RegistryApiError::Unsuccessful("duplicate".to_string())),
            InvokeError::RemoteRejected { status: 200, .. }
        ));
    }
}
