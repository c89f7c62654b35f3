//! HTTP routes
//!
//! Every response body is a `{"success": ..., ...}` envelope. Account
//! payloads are always the sanitized view; raw tokens never leave the
//! process through this surface.

use std::sync::Arc;

use account_pool::{AccountStatus, AccountView, NewAccount, PoolManager, normalize_resource_url};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use provider_auth::Provider;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::auth::{AuthError, AuthKeys};
use crate::import::{self, LegacyAccountRecord, parse_rfc3339_millis};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PoolManager>,
    pub auth: Arc<AuthKeys>,
    pub metrics: PrometheusHandle,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/accounts", get(list_accounts))
        .route("/api/accounts/import", post(import_account))
        .route("/api/accounts/import-batch", post(import_batch))
        .route("/api/accounts/select", post(select_account))
        .route("/api/accounts/{id}", get(get_account).delete(delete_account))
        .route("/api/accounts/{id}/status", put(update_status))
        .route("/api/accounts/{id}/name", put(rename_account))
        .route("/api/admin/accounts", get(admin_list))
        .with_state(state)
}

/// Map a pool error to its HTTP status and a JSON error body.
fn pool_error(err: account_pool::Error) -> Response {
    use account_pool::Error;
    if let Error::Duplicate { existing_id } = &err {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "error": "duplicate_account",
                "existing_id": existing_id,
            })),
        )
            .into_response();
    }
    let (status, code) = match &err {
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        // Handled above; kept for exhaustiveness
        Error::Duplicate { .. } => (StatusCode::CONFLICT, "duplicate_account"),
        Error::CredentialExpired => (StatusCode::CONFLICT, "credential_expired"),
        Error::TemporarilyUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
        }
        Error::NoAccountAvailable => (StatusCode::SERVICE_UNAVAILABLE, "no_account_available"),
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        Error::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    let message = match &err {
        // Store messages may carry filesystem paths; keep them internal.
        Error::Store(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    (
        status,
        Json(json!({ "success": false, "error": code, "message": message })),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": "invalid_input", "message": message })),
    )
        .into_response()
}

/// Authenticate the request or produce the 401 response.
fn caller(state: &AppState, headers: &HeaderMap) -> Result<account_pool::Caller, Response> {
    state.auth.authenticate(headers).map_err(|e| {
        let code = match e {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::UnknownKey => "invalid_api_key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": code })),
        )
            .into_response()
    })
}

fn ok_data(data: impl serde::Serialize) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let accounts = state.manager.store().len().await;
    Json(json!({ "status": "ok", "accounts": accounts })).into_response()
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Credential document accepted by single-account import. Matches the
/// Qwen CLI credential file layout; Kiro accounts arrive via the batch
/// endpoint instead.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    resource_url: Option<String>,
    email: Option<String>,
    /// Epoch milliseconds.
    expiry_date: Option<u64>,
    /// RFC 3339 alternative to `expiry_date`.
    expired: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    provider: Provider,
    #[serde(default)]
    is_shared: bool,
    account_name: Option<String>,
    credential: Option<Value>,
}

async fn import_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ImportRequest>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(raw) = body.credential else {
        return bad_request("credential is required");
    };
    let credential: CredentialPayload = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(_) => return bad_request("credential must be a JSON object"),
    };
    let Some(refresh_token) = credential
        .refresh_token
        .filter(|t| !t.trim().is_empty())
    else {
        return bad_request("credential.refresh_token is required");
    };

    let mut new = NewAccount::new(body.provider, refresh_token);
    new.account_name = body.account_name;
    new.is_shared = body.is_shared;
    new.access_token = credential.access_token.unwrap_or_default();
    new.expires_at = credential
        .expiry_date
        .or_else(|| credential.expired.as_deref().and_then(parse_rfc3339_millis));
    new.resource_url = credential
        .resource_url
        .as_deref()
        .map(normalize_resource_url);
    new.identity.email = credential.email;

    match state.manager.register(new, Some(&caller.user_id)).await {
        Ok(account) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "data": AccountView::from(&account) })),
        )
            .into_response(),
        Err(e) => pool_error(e),
    }
}

async fn import_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Accept a bare array or an `{"accounts": [...]}` wrapper.
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("accounts") {
            Some(Value::Array(items)) => items,
            _ => return bad_request("expected an array of account records"),
        },
        _ => return bad_request("expected an array of account records"),
    };

    let mut unparsable = 0usize;
    let mut records: Vec<LegacyAccountRecord> = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(record) => records.push(record),
            Err(_) => unparsable += 1,
        }
    }

    let mut outcome =
        import::import_legacy_batch(&state.manager, Some(&caller.user_id), records).await;
    outcome.failed += unparsable;
    info!(
        user_id = %caller.user_id,
        imported = outcome.imported,
        skipped = outcome.skipped_duplicate,
        failed = outcome.failed,
        filtered = outcome.filtered,
        "batch import finished"
    );
    ok_data(outcome)
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    provider: Provider,
    #[serde(default)]
    shared_only: bool,
}

/// Pick an eligible account and guarantee its token is usable before
/// answering. The response is still the sanitized view.
async fn select_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SelectRequest>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let requesting_user = if caller.is_admin {
        None
    } else {
        Some(caller.user_id.as_str())
    };
    let selected = match state
        .manager
        .select(body.provider, requesting_user, body.shared_only)
        .await
    {
        Ok(account) => account,
        Err(e) => return pool_error(e),
    };
    match state.manager.ensure_fresh(&selected.account_id).await {
        Ok(account) => ok_data(AccountView::from(&account)),
        Err(e) => pool_error(e),
    }
}

async fn list_accounts(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    ok_data(state.manager.list_for_user(&caller.user_id).await)
}

async fn get_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.manager.get_for_user(&id, &caller).await {
        Ok(view) => ok_data(view),
        Err(e) => pool_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: AccountStatus,
}

async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.manager.update_status(&id, &caller, body.status).await {
        Ok(account) => ok_data(AccountView::from(&account)),
        Err(e) => pool_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    account_name: String,
}

async fn rename_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.manager.rename(&id, &caller, &body.account_name).await {
        Ok(account) => ok_data(AccountView::from(&account)),
        Err(e) => pool_error(e),
    }
}

async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.manager.delete(&id, &caller).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => pool_error(e),
    }
}

async fn admin_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if !caller.is_admin {
        return pool_error(account_pool::Error::Forbidden);
    }
    ok_data(state.manager.list_all().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_pool::{AccountStore, HttpRefresher, now_millis};
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tower::ServiceExt;

    const USER_KEY: &str = "user-key-1";
    const OTHER_KEY: &str = "user-key-2";
    const ADMIN_KEY: &str = "admin-key";

    async fn test_state(dir: &tempfile::TempDir) -> AppState {
        let store = Arc::new(
            AccountStore::load(dir.path().join("accounts.json"))
                .await
                .unwrap(),
        );
        let manager = Arc::new(PoolManager::new(
            store,
            Arc::new(HttpRefresher::new(reqwest::Client::new())),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let auth = Arc::new(AuthKeys::new(
            Some(ADMIN_KEY.into()),
            [
                (USER_KEY.to_string(), "alice".to_string()),
                (OTHER_KEY.to_string(), "bob".to_string()),
            ],
        ));
        AppState {
            manager,
            auth,
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn qwen_import(name: &str, shared: bool) -> Value {
        json!({
            "provider": "qwen",
            "is_shared": shared,
            "account_name": name,
            "credential": {
                "access_token": "at_secret",
                "refresh_token": format!("rt_{name}"),
                "resource_url": "https://portal.qwen.ai",
                "email": format!("{name}@example.com"),
                "expiry_date": now_millis() + 3_600_000,
            }
        })
    }

    #[tokio::test]
    async fn requests_without_key_are_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .oneshot(request("GET", "/api/accounts", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn import_then_list_shows_sanitized_account() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(qwen_import("a", false)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["provider"], "qwen");
        assert_eq!(body["data"]["resource_url"], "portal.qwen.ai");
        assert!(body["data"].get("access_token").is_none());
        assert!(body["data"].get("refresh_token").is_none());

        let response = app
            .oneshot(request("GET", "/api/accounts", Some(USER_KEY), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert!(!body.to_string().contains("at_secret"));
    }

    #[tokio::test]
    async fn import_without_credential_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(json!({ "provider": "qwen" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_error_maps_to_conflict_with_existing_id() {
        let response = pool_error(account_pool::Error::Duplicate {
            existing_id: "acct-1".into(),
        });
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "duplicate_account");
        assert_eq!(body["existing_id"], "acct-1");
    }

    #[tokio::test]
    async fn batch_import_skips_identity_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let batch = json!([{
            "refreshToken": "rt_batch",
            "status": "active",
            "userId": "remote-1",
            "machineId": "m-1",
        }, {
            "refreshToken": "rt_batch2",
            "status": "active",
            "userId": "remote-1",
            "machineId": "m-2",
        }]);
        let response = app
            .oneshot(request(
                "POST",
                "/api/accounts/import-batch",
                Some(USER_KEY),
                Some(batch),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["imported"], 1);
        assert_eq!(body["data"]["skipped_duplicate"], 1);
    }

    #[tokio::test]
    async fn batch_import_tallies_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let batch = json!({ "accounts": [
            {
                "label": "one",
                "provider": "BuilderId",
                "refreshToken": "rt_1",
                "machineId": "m1",
                "userId": "u1",
                "status": "正常",
                "expiresAt": "2026/01/12 02:32:20"
            },
            { "label": "no token", "status": "正常" },
            { "label": "banned", "refreshToken": "rt_2", "status": "封禁" },
            "not an object"
        ]});

        let response = app
            .oneshot(request(
                "POST",
                "/api/accounts/import-batch",
                Some(USER_KEY),
                Some(batch),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["imported"], 1);
        assert_eq!(body["data"]["filtered"], 2);
        assert_eq!(body["data"]["failed"], 1);
    }

    #[tokio::test]
    async fn other_users_account_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(qwen_import("a", false)),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["account_id"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/accounts/{id}"),
                Some(OTHER_KEY),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Admin may read it
        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/accounts/{id}"),
                Some(ADMIN_KEY),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_and_name_updates_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(qwen_import("a", false)),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["account_id"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/accounts/{id}/status"),
                Some(USER_KEY),
                Some(json!({ "status": "disabled" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["status"], "disabled");

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/accounts/{id}/name"),
                Some(USER_KEY),
                Some(json!({ "account_name": "renamed" })),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"]["account_name"], "renamed");

        let response = app
            .oneshot(request(
                "PUT",
                &format!("/api/accounts/{id}/name"),
                Some(USER_KEY),
                Some(json!({ "account_name": "   " })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(qwen_import("a", false)),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["account_id"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/accounts/{id}"),
                Some(USER_KEY),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/accounts/{id}"),
                Some(USER_KEY),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn select_returns_fresh_sanitized_account() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        // Fresh expiry, so selection never reaches the network
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/accounts/import",
                Some(USER_KEY),
                Some(qwen_import("a", true)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(request(
                "POST",
                "/api/accounts/select",
                Some(OTHER_KEY),
                Some(json!({ "provider": "qwen", "shared_only": true })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["provider"], "qwen");
        assert!(body["data"].get("access_token").is_none());
    }

    #[tokio::test]
    async fn select_on_empty_pool_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .oneshot(request(
                "POST",
                "/api/accounts/select",
                Some(USER_KEY),
                Some(json!({ "provider": "kiro_idc" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "no_account_available");
    }

    #[tokio::test]
    async fn admin_listing_requires_admin_key() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/admin/accounts", Some(USER_KEY), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request("GET", "/api/admin/accounts", Some(ADMIN_KEY), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_and_metrics_are_open() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");

        let response = app
            .oneshot(request("GET", "/metrics", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
