//! Typed client for the registry-family APIs
//!
//! Provides authenticated access to the registry, datastore, search, and
//! provenance services of a deployment. The caller supplies the bearer token;
//! freshness is the auth session's concern.

use super::error::{RegistryApiError, Result};
use super::types::{
    ApiStatus, Candidate, CountResponse, FetchResponse, GeneralListRequest, ItemSubType,
    ListResponse, SearchResponse,
};
use crate::config::RegistryEndpoints;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

/// User agent for API requests
const USER_AGENT: &str = concat!("provena-cli/", env!("CARGO_PKG_VERSION"));

/// Bounded retry policy for transient transport failures
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Which deployment service an endpoint path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiBase {
    Registry,
    Datastore,
    Prov,
}

/// Client for the registry-family APIs
pub struct RegistryClient {
    http: reqwest::Client,
    endpoints: RegistryEndpoints,
}

impl RegistryClient {
    pub fn new(endpoints: RegistryEndpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(RegistryApiError::Http)?;

        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &RegistryEndpoints {
        &self.endpoints
    }

    /// Absolute URL for an operation path on one of the deployment services.
    pub fn operation_url(&self, base: ApiBase, path: &str) -> String {
        let root = match base {
            ApiBase::Registry => &self.endpoints.registry_api,
            ApiBase::Datastore => &self.endpoints.datastore_api,
            ApiBase::Prov => &self.endpoints.prov_api,
        };
        format!("{}{}", root, path)
    }

    // =========================================================================
    // Read operations
    // =========================================================================

    /// Search the registry and resolve each hit to a labeled candidate.
    ///
    /// Hits whose details cannot be fetched fall back to their raw id as the
    /// label rather than dropping out of the ranking.
    pub async fn search(
        &self,
        token: &str,
        query: &str,
        subtype_filter: Option<ItemSubType>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let url = format!("{}/search/entity-registry", self.endpoints.search_api);
        let mut params: Vec<(&str, String)> = vec![
            ("search_query", query.to_string()),
            ("record_limit", limit.to_string()),
        ];
        if let Some(subtype) = subtype_filter {
            params.push(("subtype_filter", subtype.as_str().to_string()));
        }

        let request = self.http.get(&url).query(&params).bearer_auth(token);
        let response = self.send_with_retry(request, true).await?;
        let parsed: SearchResponse = self.handle_response(response).await?;
        Self::check_envelope(&parsed.status)?;

        let mut candidates = Vec::new();
        for hit in parsed.results.into_iter().take(limit) {
            let (label, subtype) = match self.fetch_item(token, &hit.id).await {
                Ok(item) => {
                    let label = item
                        .get("display_name")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&hit.id)
                        .to_string();
                    let subtype = item
                        .get("item_subtype")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    (label, subtype)
                }
                Err(e) => {
                    log::debug!("Could not resolve search hit {}: {}", hit.id, e);
                    (hit.id.clone(), None)
                }
            };
            candidates.push(Candidate {
                id: hit.id,
                label,
                subtype,
                score: hit.score,
            });
        }
        Ok(candidates)
    }

    /// Fetch any registry item by id, returning the raw item object.
    pub async fn fetch_item(&self, token: &str, id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/registry/general/fetch", self.endpoints.registry_api);
        let request = self
            .http
            .get(&url)
            .query(&[("id", id)])
            .bearer_auth(token);

        let response = self.send_with_retry(request, true).await?;
        let parsed: FetchResponse = self.handle_response(response).await?;
        Self::check_envelope(&parsed.status)?;
        parsed
            .item
            .ok_or_else(|| RegistryApiError::NotFound(id.to_string()))
    }

    /// List general registry items (first `page_size` of the first page).
    pub async fn list_items(
        &self,
        token: &str,
        page_size: usize,
    ) -> Result<(Vec<serde_json::Value>, Option<u64>)> {
        let url = format!("{}/registry/general/list", self.endpoints.registry_api);
        let request = self
            .http
            .post(&url)
            .json(&GeneralListRequest::default())
            .bearer_auth(token);

        let response = self.send_with_retry(request, true).await?;
        let mut parsed: ListResponse = self.handle_response(response).await?;
        Self::check_envelope(&parsed.status)?;
        parsed.items.truncate(page_size);
        Ok((parsed.items, parsed.total_item_count))
    }

    /// Item counts per subtype across the registry.
    pub async fn item_counts(&self, token: &str) -> Result<HashMap<String, u64>> {
        let url = format!("{}/registry/general/about/count", self.endpoints.registry_api);
        let request = self.http.get(&url).bearer_auth(token);

        let response = self.send_with_retry(request, true).await?;
        let parsed: CountResponse = self.handle_response(response).await?;
        Self::check_envelope(&parsed.status)?;
        Ok(parsed.counts)
    }

    // =========================================================================
    // Mutating operations
    // =========================================================================

    /// POST a create payload to an operation endpoint.
    ///
    /// Mutating calls are retried only while no response has been received
    /// (connect errors, timeouts before the status line); a 5xx that arrives
    /// is surfaced rather than retried so a duplicate record can never be
    /// minted.
    pub async fn create_item(
        &self,
        token: &str,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let request = self.http.post(url).json(payload).bearer_auth(token);
        let response = self.send_with_retry(request, false).await?;
        let parsed: serde_json::Value = self.handle_response(response).await?;

        if let Some(status) = parsed.get("status") {
            let success = status.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
            if !success {
                let details = status
                    .get("details")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown failure")
                    .to_string();
                return Err(RegistryApiError::Unsuccessful(details));
            }
        }
        Ok(parsed)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn check_envelope(status: &ApiStatus) -> Result<()> {
        if status.success {
            Ok(())
        } else {
            Err(RegistryApiError::Unsuccessful(status.details_or_unknown()))
        }
    }

    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        retry_5xx: bool,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let this_try = request
                .try_clone()
                .ok_or_else(|| RegistryApiError::Parse("request body is not replayable".to_string()))?;

            match this_try.send().await {
                Ok(response) => {
                    if response.status().is_server_error() && retry_5xx && attempt < RETRY_ATTEMPTS {
                        log::debug!(
                            "Server error {} on attempt {}, backing off",
                            response.status(),
                            attempt
                        );
                        Self::backoff(attempt).await;
                        continue;
                    }
                    return Ok(response);
                }
                // No response was received, so a retry cannot duplicate work.
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < RETRY_ATTEMPTS => {
                    log::debug!("Transport error on attempt {}: {}, backing off", attempt, e);
                    Self::backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn backoff(attempt: u32) {
        tokio::time::sleep(RETRY_BASE * 2u32.saturating_pow(attempt - 1)).await;
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RegistryApiError::Parse(e.to_string()));
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();

        match status_code {
            401 => Err(RegistryApiError::Unauthorized),
            404 => Err(RegistryApiError::NotFound(body)),
            400..=499 => Err(RegistryApiError::Rejected {
                status: status_code,
                body,
            }),
            _ => Err(RegistryApiError::Server {
                status: status_code,
                message: body,
            }),
        }
    }
}
