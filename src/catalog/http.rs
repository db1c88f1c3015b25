//! Blocking HTTP backends for the catalog application and workspace database.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | `list_items` | `GET {catalog}/items?limit=N` |
//! | `update_tags` | `PUT {catalog}/items/{id}/tags` with `{"tags": [...]}` |
//! | `move_to_trash` | `POST {catalog}/items/{id}/trash` (409 = already in trash) |
//! | `query` | `POST {workspace}/records/query` with `{"field", "equals"}` |
//! | `update_fields` | `PATCH {workspace}/records/{id}` with `{"fields": {...}}` |
//!
//! Every request carries the configured timeout. Timeouts, connection
//! failures, 5xx and 429 map to [`ApiError::Unavailable`] so the retry
//! decorator can pick them up; 404 maps to [`ApiError::NotFound`].

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    ApiError, CatalogApi, CatalogEntry, RawRecord, RecordFilter, TrashOutcome, WorkspaceApi,
};

/// Either a bare array or an object wrapping it.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Items { items: Vec<T> },
    Records { records: Vec<T> },
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(v) | Self::Items { items: v } | Self::Records { records: v } => v,
        }
    }
}

/// Shared client plumbing for both services.
#[derive(Debug, Clone)]
struct Endpoint {
    client: Client,
    base: Url,
}

impl Endpoint {
    fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        if base.cannot_be_a_base() {
            return Err(ApiError::Rejected {
                status: 0,
                message: format!("not a usable base URL: {}", base),
            });
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Unavailable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Rejected {
                status: 0,
                message: format!("not a usable base URL: {}", self.base),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Unavailable(err.to_string())
    }
}

fn check_status(response: Response, what: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status, what, body))
}

fn status_error(status: StatusCode, what: &str, body: String) -> ApiError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ApiError::Unavailable(format!("{} returned {}", what, status))
    } else if status == StatusCode::NOT_FOUND {
        ApiError::NotFound(what.to_string())
    } else {
        ApiError::Rejected {
            status: status.as_u16(),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        }
    }
}

/// Catalog application over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    endpoint: Endpoint,
}

impl HttpCatalog {
    /// Create a client for the catalog at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` cannot carry path segments or the HTTP
    /// client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            endpoint: Endpoint::new(base, timeout)?,
        })
    }
}

impl CatalogApi for HttpCatalog {
    fn list_items(&self, limit: usize) -> Result<Vec<CatalogEntry>, ApiError> {
        let mut url = self.endpoint.url(&["items"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        log::debug!("GET {}", url);

        let response = self
            .endpoint
            .client
            .get(url)
            .send()
            .map_err(transport_error)?;
        let response = check_status(response, "item listing")?;
        let items = response
            .json::<ListResponse<CatalogEntry>>()
            .map_err(|e| ApiError::Decode(e.to_string()))?
            .into_vec();
        Ok(items)
    }

    fn update_tags(&self, item_id: &str, tags: &BTreeSet<String>) -> Result<(), ApiError> {
        let url = self.endpoint.url(&["items", item_id, "tags"])?;
        log::debug!("PUT {}", url);
        let response = self
            .endpoint
            .client
            .put(url)
            .json(&json!({ "tags": tags }))
            .send()
            .map_err(transport_error)?;
        check_status(response, &format!("item {}", item_id))?;
        Ok(())
    }

    fn move_to_trash(&self, item_id: &str) -> Result<TrashOutcome, ApiError> {
        let url = self.endpoint.url(&["items", item_id, "trash"])?;
        log::debug!("POST {}", url);
        let response = self
            .endpoint
            .client
            .post(url)
            .send()
            .map_err(transport_error)?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(TrashOutcome::AlreadyInTrash);
        }
        check_status(response, &format!("item {}", item_id))?;
        Ok(TrashOutcome::Moved)
    }
}

/// Workspace database over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWorkspace {
    endpoint: Endpoint,
}

impl HttpWorkspace {
    /// Create a client for the workspace at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` cannot carry path segments or the HTTP
    /// client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            endpoint: Endpoint::new(base, timeout)?,
        })
    }
}

impl WorkspaceApi for HttpWorkspace {
    fn query(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, ApiError> {
        let url = self.endpoint.url(&["records", "query"])?;
        log::debug!("POST {} ({} = {})", url, filter.field, filter.equals);
        let response = self
            .endpoint
            .client
            .post(url)
            .json(filter)
            .send()
            .map_err(transport_error)?;
        let response = check_status(response, "record query")?;
        Ok(response
            .json::<ListResponse<RawRecord>>()
            .map_err(|e| ApiError::Decode(e.to_string()))?
            .into_vec())
    }

    fn update_fields(&self, record_id: &str, fields: &Map<String, Value>) -> Result<(), ApiError> {
        let url = self.endpoint.url(&["records", record_id])?;
        log::debug!("PATCH {}", url);
        let response = self
            .endpoint
            .client
            .patch(url)
            .json(&json!({ "fields": fields }))
            .send()
            .map_err(transport_error)?;
        check_status(response, &format!("record {}", record_id))?;
        Ok(())
    }
}
