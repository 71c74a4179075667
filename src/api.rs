//! Transport-agnostic request router.
//!
//! Maps `(method, path, query, body, identity)` onto the intake and query
//! operations and renders every outcome as a JSON envelope with permissive
//! CORS headers. Errors become `{error:{code,message}, request_id}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{ErrorKind, PlatformError, Result};
use crate::intake::{IntakeStage, UploadRequest};
use crate::query::{ListParams, QueryService};
use crate::validation::InputValidator;

const DEFAULT_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token",
    ),
    ("Access-Control-Allow-Methods", "GET,POST,PUT,DELETE,OPTIONS"),
];

/// An incoming API call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
    /// Raw JSON body
    pub body: Option<String>,
    /// Authenticated caller, if any
    pub user_id: Option<String>,
    /// Echoed in error envelopes
    pub request_id: String,
}

impl ApiRequest {
    /// A `GET` on `path` with a fresh request id.
    pub fn get(path: &str, user_id: Option<&str>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            user_id: user_id.map(str::to_string),
            request_id: uuid::Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    /// Add one query parameter.
    #[must_use]
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }
}

/// Rendered response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// HTTP status
    pub status_code: u16,
    /// Content type and CORS headers
    pub headers: BTreeMap<String, String>,
    /// JSON body
    pub body: Value,
}

impl ApiResponse {
    /// Response with the default JSON and CORS headers.
    pub fn new(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            headers: DEFAULT_HEADERS
                .iter()
                .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
                .collect(),
            body,
        }
    }

    /// Error envelope. Internal details never reach the body.
    pub fn from_error(err: &PlatformError, request_id: Option<&str>) -> Self {
        let mut body = json!({
            "error": {
                "code": err.code(),
                "message": err.public_message(),
            }
        });
        if let Some(request_id) = request_id.filter(|id| !id.is_empty()) {
            body["request_id"] = Value::String(request_id.to_string());
        }
        Self::new(err.status_code(), body)
    }

    fn not_found() -> Self {
        Self::new(
            404,
            json!({ "error": { "code": "NOT_FOUND", "message": "Endpoint not found" } }),
        )
    }
}

enum Route<'a> {
    Upload,
    List,
    Contract(&'a str),
    Analysis(&'a str),
    Preflight,
    Unknown,
}

fn route<'a>(method: &str, path: &'a str) -> Route<'a> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method.to_ascii_uppercase().as_str(), segments.as_slice()) {
        ("OPTIONS", _) => Route::Preflight,
        ("POST", ["contracts"]) => Route::Upload,
        ("GET", ["contracts"]) => Route::List,
        ("GET", ["contracts", id]) if !id.is_empty() => Route::Contract(*id),
        ("GET", ["contracts", id, "analysis"]) if !id.is_empty() => Route::Analysis(*id),
        _ => Route::Unknown,
    }
}

/// Routes API requests to intake and query operations.
#[derive(Clone)]
pub struct ApiRouter {
    intake: Arc<IntakeStage>,
    query: QueryService,
}

impl ApiRouter {
    /// Router dispatching uploads to `intake` and reads to `query`.
    pub fn new(intake: Arc<IntakeStage>, query: QueryService) -> Self {
        Self { intake, query }
    }

    /// Handle one request. Never fails: errors are rendered into the envelope.
    pub async fn handle(&self, request: &ApiRequest) -> ApiResponse {
        info!(request_id = %request.request_id, method = %request.method, path = %request.path, "Processing API request");

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                log_error(&err, &request.request_id);
                ApiResponse::from_error(&err, Some(&request.request_id))
            }
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let user_id = InputValidator::require_user(request.user_id.as_deref())?;

        match route(&request.method, &request.path) {
            Route::Preflight => Ok(ApiResponse::new(200, json!({}))),
            Route::Upload => {
                let upload: UploadRequest = request
                    .body
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|err| PlatformError::Validation(format!("Invalid JSON in request body: {err}")))?
                    .unwrap_or_default();
                let ticket = self
                    .intake
                    .accept(Some(user_id), &upload, &request.request_id)
                    .await?;
                Ok(ApiResponse::new(201, serde_json::to_value(ticket)?))
            }
            Route::List => {
                let params = ListParams {
                    limit: request.query.get("limit").cloned(),
                    status: request.query.get("status").cloned(),
                    last_key: request.query.get("last_key").cloned(),
                };
                let list = self.query.list_contracts(user_id, &params).await?;
                Ok(ApiResponse::new(200, serde_json::to_value(list)?))
            }
            Route::Contract(id) => {
                let contract = self.query.get_contract(id, user_id).await?;
                Ok(ApiResponse::new(200, serde_json::to_value(contract)?))
            }
            Route::Analysis(id) => {
                let analysis = self.query.get_analysis(id, user_id).await?;
                Ok(ApiResponse::new(200, serde_json::to_value(analysis)?))
            }
            Route::Unknown => Ok(ApiResponse::not_found()),
        }
    }
}

fn log_error(err: &PlatformError, request_id: &str) {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::Authorization => {
            warn!(%request_id, code = err.code(), error = %err, "Request rejected");
        }
        ErrorKind::NotFound => {
            info!(%request_id, code = err.code(), error = %err, "Document not found");
        }
        _ => {
            error!(%request_id, code = err.code(), error = %err, "Request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert!(matches!(route("POST", "/contracts"), Route::Upload));
        assert!(matches!(route("get", "/contracts/"), Route::List));
        assert!(matches!(route("GET", "/contracts/abc"), Route::Contract("abc")));
        assert!(matches!(route("GET", "/contracts/abc/analysis"), Route::Analysis("abc")));
        assert!(matches!(route("DELETE", "/contracts/abc"), Route::Unknown));
        assert!(matches!(route("GET", "/health"), Route::Unknown));
    }

    #[test]
    fn test_error_envelope_redacts_internal_errors() {
        let err = PlatformError::Internal("sled: corrupted page 42".to_string());
        let response = ApiResponse::from_error(&err, Some("req-1"));
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(response.body["error"]["message"], "An internal error occurred");
        assert_eq!(response.body["request_id"], "req-1");
        assert_eq!(response.headers["Access-Control-Allow-Origin"], "*");
        assert_eq!(response.headers["Content-Type"], "application/json");
    }
}
