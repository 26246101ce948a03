//! REST implementation of [`ResourceClient`] using [`reqwest`].
//!
//! Talks to the kanban API's v2-style endpoints. Response bodies arrive in
//! a `{"data": ...}` envelope (list endpoints sometimes nest a second
//! `data` array next to pagination info); both are unwrapped here so the
//! rest of the system sees bare resource bodies. Paginated lists are
//! followed to the last page, so callers always see the complete list.

use std::future::Future;
use std::time::Duration;

use km_core::config::MediatorConfig;
use km_core::{ApiError, CoreError, ResourceId, ResourceType};
use reqwest::header::RETRY_AFTER;
use reqwest::Method;
use serde_json::{json, Value};

use crate::client::ResourceClient;

/// Header carrying the API token.
const API_KEY_HEADER: &str = "apikey";

/// Connection timeout for the underlying HTTP client. The per-call budget
/// is enforced one layer up by `CachedClient`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for one remote API instance.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpClient {
    /// Create a client for `base_url` (e.g. `https://acme.example.com/api/v2`).
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, api_token))
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_token: api_token.into(),
        }
    }

    /// Build from session configuration; URL and token are required.
    pub fn from_config(config: &MediatorConfig) -> Result<Self, CoreError> {
        let url = config
            .api_url
            .as_deref()
            .ok_or_else(|| CoreError::Config("KANBAN_API_URL must be set".to_string()))?;
        let token = config
            .api_token
            .as_deref()
            .ok_or_else(|| CoreError::Config("KANBAN_API_TOKEN must be set".to_string()))?;
        Self::new(url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- private helpers ----

    /// Send one request and return the unwrapped `data` payload.
    ///
    /// `resource_type`/`id` name the addressed resource for error mapping.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(API_KEY_HEADER, &self.api_token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(method = %method, url = %url, "Remote API request");
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let err = match ApiError::from_status(status.as_u16(), text, resource_type, id) {
                ApiError::RateLimited { .. } => ApiError::RateLimited { retry_after },
                other => other,
            };
            tracing::debug!(status = status.as_u16(), url = %url, error = %err, "Remote API error");
            return Err(err);
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await.map_err(map_transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("invalid JSON from {url}: {e}")))?;
        Ok(unwrap_envelope(body))
    }

    /// Fetch every page of a list endpoint.
    async fn get_list(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<Vec<Value>, ApiError> {
        collect_pages(move |page| {
            let mut query = query.to_vec();
            if page > 1 {
                query.push(("page", page.to_string()));
            }
            async move {
                self.send(Method::GET, path, &query, None, resource_type, id)
                    .await
            }
        })
        .await
    }
}

impl ResourceClient for HttpClient {
    async fn get_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<Value, ApiError> {
        let path = format!("/{}/{id}", collection_path(resource_type));
        self.send(Method::GET, &path, &[], None, resource_type, id)
            .await
    }

    async fn list_board_cards(&self, board_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        self.get_list(
            "/cards",
            &[("board_ids", board_id.to_string())],
            ResourceType::Board,
            board_id,
        )
        .await
    }

    async fn list_workspace_boards(
        &self,
        workspace_id: ResourceId,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_list(
            "/boards",
            &[("workspace_ids", workspace_id.to_string())],
            ResourceType::Workspace,
            workspace_id,
        )
        .await
    }

    async fn list_card_children(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let path = format!("/cards/{card_id}/children");
        self.get_list(&path, &[], ResourceType::Card, card_id).await
    }

    async fn list_card_comments(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let path = format!("/cards/{card_id}/comments");
        self.get_list(&path, &[], ResourceType::Card, card_id).await
    }

    async fn list_card_subtasks(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let path = format!("/cards/{card_id}/subtasks");
        self.get_list(&path, &[], ResourceType::Card, card_id).await
    }

    async fn update_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
        params: &Value,
    ) -> Result<Value, ApiError> {
        let path = format!("/{}/{id}", collection_path(resource_type));
        self.send(Method::PATCH, &path, &[], Some(params), resource_type, id)
            .await
    }

    async fn archive_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        if !supports_archive(resource_type) {
            return Err(ApiError::Validation(format!(
                "{} cannot be archived",
                resource_type.plural()
            )));
        }
        let path = format!("/{}/{id}", collection_path(resource_type));
        self.send(
            Method::PATCH,
            &path,
            &[],
            Some(&json!({ "is_archived": 1 })),
            resource_type,
            id,
        )
        .await
        .map(|_| ())
    }

    async fn delete_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        let path = format!("/{}/{id}", collection_path(resource_type));
        self.send(Method::DELETE, &path, &[], None, resource_type, id)
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// REST collection segment for a resource type.
fn collection_path(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Workspace => "workspaces",
        ResourceType::Board => "boards",
        ResourceType::Card => "cards",
        ResourceType::CustomField => "customFields",
        ResourceType::User => "users",
    }
}

fn supports_archive(resource_type: ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Workspace | ResourceType::Board | ResourceType::Card
    )
}

/// Strip the outer `{"data": ...}` envelope, if present.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// One page of a list response.
#[derive(Debug, PartialEq)]
struct ListPage {
    items: Vec<Value>,
    /// Total pages reported by the remote, 1 when unpaginated.
    all_pages: u32,
}

/// Accept either a bare array or a paginated `{"data": [...]}` object.
fn extract_page(body: Value) -> Result<ListPage, ApiError> {
    match body {
        Value::Array(items) => Ok(ListPage {
            items,
            all_pages: 1,
        }),
        Value::Null => Ok(ListPage {
            items: Vec::new(),
            all_pages: 1,
        }),
        Value::Object(mut map) => {
            let all_pages = map
                .get("pagination")
                .and_then(|p| p.get("all_pages"))
                .and_then(Value::as_u64)
                .map_or(1, |n| u32::try_from(n).unwrap_or(u32::MAX).max(1));
            match map.remove("data") {
                Some(Value::Array(items)) => Ok(ListPage { items, all_pages }),
                _ => Err(ApiError::Decode(
                    "list response has no data array".to_string(),
                )),
            }
        }
        other => Err(ApiError::Decode(format!("expected a list, got {other}"))),
    }
}

/// Request pages `1..=all_pages` through `fetch` and concatenate them.
///
/// The page count is taken from the first response.
async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<Value>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
{
    let first = extract_page(fetch(1).await?)?;
    let mut items = first.items;
    for page in 2..=first.all_pages {
        let next = extract_page(fetch(page).await?)?;
        items.extend(next.items);
    }
    if first.all_pages > 1 {
        tracing::debug!(pages = first.all_pages, items = items.len(), "Collected paginated list");
    }
    Ok(items)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn connect_timeout_error() -> ApiError {
    ApiError::Timeout(CONNECT_TIMEOUT)
}

/// Only the connect timeout is configured on the reqwest client, so a
/// reqwest timeout always means that deadline expired.
fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        connect_timeout_error()
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
