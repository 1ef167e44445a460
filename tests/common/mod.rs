//! Fake provider server for integration tests.
//!
//! One axum app on `127.0.0.1:0` answers for Drive, Graph and the OAuth
//! backend. Every request is recorded; responses come from scripted routes
//! matched on method + path (+ whatever the closure checks, usually the
//! bearer token), so several accounts can be served side by side.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use unidrive::providers::http_retry::HttpRetryConfig;
use unidrive::providers::oauth2::DirectExchange;
use unidrive::providers::{
    DropboxAdapter, GoogleDriveAdapter, GoogleDriveConfig, OAuthConfig, OneDriveAdapter, OneDriveConfig,
};
use unidrive::{AdapterSet, DriveBrowser, TokenStore};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

pub enum Reply {
    Json(StatusCode, Value),
    Text(StatusCode, String),
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Reply::Json(StatusCode::OK, value)
    }

    pub fn status(status: u16) -> Self {
        Reply::Json(
            StatusCode::from_u16(status).unwrap(),
            json!({ "error": { "code": status, "message": format!("scripted {}", status) } }),
        )
    }
}

type Route = Arc<dyn Fn(&RecordedRequest) -> Option<Reply> + Send + Sync>;

#[derive(Clone, Default)]
struct FakeState {
    routes: Arc<Mutex<Vec<(Method, String, Route)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct FakeProvider {
    pub base_url: String,
    state: FakeState,
}

async fn handle(
    State(state): State<FakeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let request = RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query,
        headers,
        body,
    };
    state.requests.lock().unwrap().push(request.clone());

    let routes: Vec<Route> = state
        .routes
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, p, _)| *m == method && *p == request.path)
        .map(|(_, _, r)| r.clone())
        .collect();

    for route in routes.iter().rev() {
        if let Some(reply) = route(&request) {
            return match reply {
                Reply::Json(status, value) => (status, axum::Json(value)).into_response(),
                Reply::Text(status, text) => (status, text).into_response(),
            };
        }
    }
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({ "error": { "message": format!("no route for {} {}", method, request.path) } })),
    )
        .into_response()
}

impl FakeProvider {
    pub async fn spawn() -> Self {
        let state = FakeState::default();
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Register a route. Later routes are tried first; a closure returning
    /// `None` passes the request on.
    pub fn route<F>(&self, method: Method, path: &str, respond: F)
    where
        F: Fn(&RecordedRequest) -> Option<Reply> + Send + Sync + 'static,
    {
        self.state
            .routes
            .lock()
            .unwrap()
            .push((method, path.to_string(), Arc::new(respond)));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    // ============ Google Drive scripting ============

    /// userinfo + quota for the account behind `token`.
    pub fn google_account(&self, token: &str, email: &str, quota: Option<(i64, i64)>) {
        let t = token.to_string();
        let email = email.to_string();
        self.route(Method::GET, "/oauth2/v2/userinfo", move |req| {
            (req.bearer() == Some(t.as_str())).then(|| {
                Reply::ok(json!({ "id": format!("id-{}", email), "email": email, "name": "Test User" }))
            })
        });

        let t = token.to_string();
        self.route(Method::GET, "/drive/v3/about", move |req| {
            (req.bearer() == Some(t.as_str())).then(|| {
                let storage = match quota {
                    Some((limit, usage)) => json!({ "limit": limit.to_string(), "usage": usage.to_string() }),
                    None => json!({ "usage": "12345" }),
                };
                Reply::ok(json!({ "storageQuota": storage }))
            })
        });
    }

    /// Folder listing for `token`, served as one response per page.
    pub fn google_folder(&self, token: &str, folder_id: &str, pages: Vec<Vec<Value>>) {
        let t = token.to_string();
        let needle = format!("'{}' in parents", folder_id);
        self.route(Method::GET, "/drive/v3/files", move |req| {
            if req.bearer() != Some(t.as_str()) || !req.query.get("q").is_some_and(|q| q.contains(&needle)) {
                return None;
            }
            let index = req
                .query
                .get("pageToken")
                .and_then(|p| p.trim_start_matches('p').parse::<usize>().ok())
                .unwrap_or(0);
            let files = pages.get(index).cloned().unwrap_or_default();
            let mut body = json!({ "files": files });
            if index + 1 < pages.len() {
                body["nextPageToken"] = json!(format!("p{}", index + 1));
            }
            Some(Reply::ok(body))
        });
    }

    // ============ OneDrive scripting ============

    /// `/me` + `/me/drive` for the account behind `token`.
    pub fn onedrive_account(&self, token: &str, upn: &str, quota: (i64, i64)) {
        let t = token.to_string();
        let upn = upn.to_string();
        self.route(Method::GET, "/v1.0/me", move |req| {
            (req.bearer() == Some(t.as_str()))
                .then(|| Reply::ok(json!({ "id": format!("id-{}", upn), "userPrincipalName": upn })))
        });

        let t = token.to_string();
        self.route(Method::GET, "/v1.0/me/drive", move |req| {
            (req.bearer() == Some(t.as_str()))
                .then(|| Reply::ok(json!({ "quota": { "total": quota.0, "used": quota.1 } })))
        });
    }
}

pub fn drive_file(id: &str, name: &str, mime: &str, modified: &str) -> Value {
    json!({ "id": id, "name": name, "mimeType": mime, "modifiedTime": modified, "size": "10" })
}

pub fn drive_folder(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name, "mimeType": "application/vnd.google-apps.folder" })
}

pub fn fast_retry() -> HttpRetryConfig {
    HttpRetryConfig {
        max_retries: 2,
        base_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2.0,
    }
}

pub fn google_adapter(provider: &FakeProvider) -> GoogleDriveAdapter {
    GoogleDriveAdapter::new(
        reqwest::Client::new(),
        GoogleDriveConfig::with_base_url(&provider.base_url),
        fast_retry(),
    )
}

pub fn onedrive_adapter(provider: &FakeProvider, simple_upload_limit: u64) -> OneDriveAdapter {
    let mut config = OneDriveConfig::with_base_url(&provider.base_url);
    config.simple_upload_limit = simple_upload_limit;
    OneDriveAdapter::new(reqwest::Client::new(), config, fast_retry())
}

pub fn browser_for(provider: &FakeProvider) -> DriveBrowser {
    let adapters = AdapterSet::new()
        .with(Arc::new(google_adapter(provider)))
        .with(Arc::new(onedrive_adapter(provider, 4 * 1024 * 1024)))
        .with(Arc::new(DropboxAdapter::new()));
    DriveBrowser::new(TokenStore::new().shared(), adapters)
}

/// Dropbox code exchange against the fake `/oauth2/token`.
pub fn dropbox_exchange(provider: &FakeProvider) -> DirectExchange {
    let mut config = OAuthConfig::dropbox("app-key", None, "http://127.0.0.1:8765/callback");
    config.token_url = format!("{}/oauth2/token", provider.base_url);
    DirectExchange::new(config)
}
