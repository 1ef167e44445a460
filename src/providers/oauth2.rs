//! OAuth2 Authentication Module
//!
//! Authorization code + PKCE for every provider. The authorize URL is built
//! here; turning the code into tokens is delegated to a `TokenExchanger`,
//! either the companion backend (Google, which needs a client secret that must
//! not ship in the app) or the provider token endpoint directly.

use async_trait::async_trait;
use oauth2::{
    basic::{BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{ProviderError, ProviderKind};
use crate::config::AppConfig;

/// Non-standard fields of a token response. Dropbox names the account the
/// tokens belong to; other providers leave it out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl ExtraTokenFields for ProviderTokenFields {}

type ProviderTokenResponse = StandardTokenResponse<ProviderTokenFields, BasicTokenType>;

/// OAuth2 client over `ProviderTokenResponse` (v5 typestates: auth, device,
/// introspection, revocation, token endpoint)
type ProviderClient<HasAuthUrl, HasTokenUrl> = oauth2::Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    HasTokenUrl,
>;

/// Configured OAuth2 client with auth and token endpoints set
type ConfiguredClient = ProviderClient<EndpointSet, EndpointSet>;

/// Simple error wrapper for the oauth2 HTTP client adapter.
#[derive(Debug)]
struct OAuth2TransportError(String);

impl std::fmt::Display for OAuth2TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OAuth2TransportError {}

/// Async HTTP client adapter for oauth2 v5.
/// oauth2's built-in reqwest support targets reqwest 0.12, so requests are
/// bridged through the crate's reqwest by hand.
struct OAuth2HttpClient;

impl<'c> oauth2::AsyncHttpClient<'c> for OAuth2HttpClient {
    type Error = oauth2::HttpClientError<OAuth2TransportError>;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<oauth2::HttpResponse, Self::Error>> + Send + Sync + 'c>,
    >;

    fn call(&'c self, request: oauth2::HttpRequest) -> Self::Future {
        Box::pin(async move {
            // token endpoints must never redirect
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
                .unwrap_or(reqwest::Method::POST);
            let mut builder = client.request(method, request.uri().to_string());
            for (name, value) in request.headers() {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
            let response = builder
                .body(request.into_body())
                .send()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let mut http_response = http::Response::builder().status(status);
            for (name, value) in headers.iter() {
                http_response = http_response.header(name.as_str(), value.as_bytes());
            }
            http_response
                .body(body.to_vec())
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))
        })
    }
}

/// OAuth2 configuration for a provider
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider: ProviderKind,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    /// Extra query parameters for the authorization URL
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Google Drive; the code is exchanged by the backend, which holds the secret.
    pub fn google(client_id: &str, redirect_uri: &str) -> Self {
        Self {
            provider: ProviderKind::Google,
            client_id: client_id.to_string(),
            client_secret: None,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
                "https://www.googleapis.com/auth/drive".to_string(),
            ],
            redirect_uri: redirect_uri.to_string(),
            extra_auth_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
        }
    }

    /// OneDrive (public client, no secret)
    pub fn onedrive(client_id: &str, redirect_uri: &str) -> Self {
        Self {
            provider: ProviderKind::OneDrive,
            client_id: client_id.to_string(),
            client_secret: None,
            auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            scopes: vec![
                "User.Read".to_string(),
                "Files.ReadWrite".to_string(),
                "offline_access".to_string(),
            ],
            redirect_uri: redirect_uri.to_string(),
            extra_auth_params: vec![],
        }
    }

    pub fn dropbox(app_key: &str, app_secret: Option<&str>, redirect_uri: &str) -> Self {
        Self {
            provider: ProviderKind::Dropbox,
            client_id: app_key.to_string(),
            client_secret: app_secret.map(str::to_string),
            auth_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            scopes: vec![
                "account_info.read".to_string(),
                "files.metadata.read".to_string(),
            ],
            redirect_uri: redirect_uri.to_string(),
            extra_auth_params: vec![
                ("token_access_type".to_string(), "offline".to_string()),
            ],
        }
    }

    pub fn from_app_config(kind: ProviderKind, config: &AppConfig) -> Result<Self, ProviderError> {
        let client_id = match kind {
            ProviderKind::Google => &config.google_client_id,
            ProviderKind::OneDrive => &config.onedrive_client_id,
            ProviderKind::Dropbox => &config.dropbox_app_key,
        };
        if client_id.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!("{} client id is not configured", kind)));
        }

        Ok(match kind {
            ProviderKind::Google => Self::google(client_id, &config.redirect_uri),
            ProviderKind::OneDrive => Self::onedrive(client_id, &config.redirect_uri),
            ProviderKind::Dropbox => Self::dropbox(
                client_id,
                config.dropbox_app_secret.as_deref().filter(|s| !s.is_empty()),
                &config.redirect_uri,
            ),
        })
    }
}

/// Tokens returned by an exchange or a refresh
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
    /// Account id reported alongside the tokens, used when the identity
    /// lookup fails
    pub account_hint: Option<String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
            account_hint: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    /// Check if token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= chrono::Utc::now().timestamp() + 300,
            None => false,
        }
    }
}

/// Turns authorization codes and refresh tokens into access tokens
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &SecretString,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError>;

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, ProviderError>;
}

/// Exchanger per provider, used for silent re-login
pub type ExchangerSet = HashMap<ProviderKind, Arc<dyn TokenExchanger>>;

/// Token response of the companion backend. `expiresAt` is in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Code exchange through the companion backend
/// (`POST {base}/google/oauth/exchange` and `/google/oauth/refresh`).
pub struct BackendExchange {
    client: reqwest::Client,
    base_url: String,
}

impl BackendExchange {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<BackendTokens, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // the backend answers failures with plain text
            let text = response.text().await.unwrap_or_default();
            let text = super::sanitize_api_error(&text);
            warn!("Backend {} failed with {}", path, status);
            return Err(ProviderError::AuthenticationFailed(if text.is_empty() {
                format!("token service returned {}", status)
            } else {
                text
            }));
        }

        Ok(response.json::<BackendTokens>().await?)
    }
}

#[async_trait]
impl TokenExchanger for BackendExchange {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &SecretString,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError> {
        let body = serde_json::json!({
            "code": code,
            "codeVerifier": verifier.expose_secret(),
            "redirectUri": redirect_uri,
        });
        let tokens = self.post("/google/oauth/exchange", body).await?;
        info!("OAuth2 code exchanged through backend");
        Ok(TokenSet {
            access_token: SecretString::from(tokens.access_token),
            refresh_token: tokens.refresh_token.map(SecretString::from),
            expires_at: tokens.expires_at.map(|ms| ms / 1000),
            account_hint: None,
        })
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, ProviderError> {
        let body = serde_json::json!({ "refreshToken": refresh_token.expose_secret() });
        let tokens = self.post("/google/oauth/refresh", body).await?;
        info!("OAuth2 tokens refreshed through backend");
        Ok(TokenSet {
            access_token: SecretString::from(tokens.access_token),
            // keep the old refresh token if none was returned
            refresh_token: Some(
                tokens
                    .refresh_token
                    .map(SecretString::from)
                    .unwrap_or_else(|| refresh_token.clone()),
            ),
            expires_at: tokens.expires_at.map(|ms| ms / 1000),
            account_hint: None,
        })
    }
}

/// Code exchange straight against the provider token endpoint
pub struct DirectExchange {
    config: OAuthConfig,
}

impl DirectExchange {
    pub fn new(config: OAuthConfig) -> Self {
        Self { config }
    }
}

fn token_set_from(token: &ProviderTokenResponse, fallback_refresh: Option<&SecretString>) -> TokenSet {
    let expires_at = token
        .expires_in()
        .map(|d| chrono::Utc::now().timestamp() + d.as_secs() as i64);
    TokenSet {
        access_token: SecretString::from(token.access_token().secret().clone()),
        refresh_token: token
            .refresh_token()
            .map(|t| SecretString::from(t.secret().clone()))
            .or_else(|| fallback_refresh.cloned()),
        expires_at,
        account_hint: token
            .extra_fields()
            .account_id
            .clone()
            .filter(|id| !id.is_empty()),
    }
}

#[async_trait]
impl TokenExchanger for DirectExchange {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &SecretString,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError> {
        let mut config = self.config.clone();
        config.redirect_uri = redirect_uri.to_string();
        let client = create_client(&config)?;

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.expose_secret().to_string()))
            .request_async(&OAuth2HttpClient)
            .await
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Token exchange failed: {}", e)))?;

        info!("OAuth2 tokens obtained for {}", self.config.provider);
        Ok(token_set_from(&token, None))
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, ProviderError> {
        let client = create_client(&self.config)?;
        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose_secret().to_string()))
            .request_async(&OAuth2HttpClient)
            .await
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Token refresh failed: {}", e)))?;

        info!("OAuth2 tokens refreshed for {}", self.config.provider);
        Ok(token_set_from(&token, Some(refresh_token)))
    }
}

/// Create OAuth2 client from config (v5 builder API)
fn create_client(config: &OAuthConfig) -> Result<ConfiguredClient, ProviderError> {
    let auth_url = AuthUrl::new(config.auth_url.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;
    let token_url = TokenUrl::new(config.token_url.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid token URL: {}", e)))?;
    let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid redirect URL: {}", e)))?;

    let mut client = ProviderClient::<EndpointNotSet, EndpointNotSet>::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    if let Some(ref secret) = config.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    Ok(client)
}

/// OAuth2 Manager for handling authorization flows
#[derive(Clone, Default)]
pub struct OAuth2Manager {
    /// Pending PKCE verifiers keyed by state
    pending_verifiers: Arc<RwLock<HashMap<String, PkceCodeVerifier>>>,
}

impl OAuth2Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start OAuth2 authorization flow - returns the URL to open and the state
    pub async fn start_auth_flow(&self, config: &OAuthConfig) -> Result<(String, String), ProviderError> {
        let client = create_client(config)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token) = {
            let mut auth_builder = client
                .authorize_url(CsrfToken::new_random)
                .set_pkce_challenge(pkce_challenge);
            for scope in &config.scopes {
                auth_builder = auth_builder.add_scope(Scope::new(scope.clone()));
            }
            for (key, value) in &config.extra_auth_params {
                auth_builder = auth_builder.add_extra_param(key, value);
            }
            auth_builder.url()
        };

        let state = csrf_token.secret().clone();
        self.pending_verifiers
            .write()
            .await
            .insert(state.clone(), pkce_verifier);

        info!("OAuth2 auth URL generated for {}", config.provider);
        Ok((auth_url.to_string(), state))
    }

    /// Remove and return the PKCE verifier of a pending flow.
    pub async fn take_verifier(&self, state: &str) -> Result<SecretString, ProviderError> {
        self.pending_verifiers
            .write()
            .await
            .remove(state)
            .map(|v| SecretString::from(v.secret().clone()))
            .ok_or_else(|| {
                ProviderError::AuthenticationFailed(
                    "Invalid state token - authorization flow expired or invalid".to_string(),
                )
            })
    }

    /// Finish a flow: check the state, then let `exchanger` redeem the code.
    pub async fn complete_auth_flow(
        &self,
        config: &OAuthConfig,
        exchanger: &dyn TokenExchanger,
        code: &str,
        state: &str,
    ) -> Result<TokenSet, ProviderError> {
        let verifier = self.take_verifier(state).await?;
        exchanger.exchange_code(code, &verifier, &config.redirect_uri).await
    }
}

/// Bind the OAuth2 callback listener on a specific port (0 = ephemeral).
/// Returns the listener and the actual port assigned by the OS.
pub async fn bind_callback_listener(port: u16) -> Result<(tokio::net::TcpListener, u16), ProviderError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let actual_port = listener.local_addr()?.port();
    info!("OAuth callback listener bound on port {}", actual_port);
    Ok((listener, actual_port))
}

/// Wait for an OAuth2 callback on an already-bound listener.
/// Returns (code, state) extracted from the callback request.
pub async fn wait_for_callback(listener: tokio::net::TcpListener) -> Result<(String, String), ProviderError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (mut socket, _) = listener.accept().await?;
    let mut buffer = vec![0u8; 4096];
    let n = socket.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let parsed = parse_callback_request(&request);
    let (title, message) = match &parsed {
        Ok(_) => ("Authorization Successful", "Your account is connected. You can close this window."),
        Err(_) => ("Authorization Failed", "The account was not connected. Please try again."),
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
         <!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>Unidrive</title></head>\
         <body style=\"font-family:sans-serif;text-align:center;padding-top:80px\">\
         <h1>{}</h1><p>{}</p></body></html>",
        title, message
    );
    socket.write_all(response.as_bytes()).await?;

    parsed
}

/// Parse OAuth callback request to extract code and state
fn parse_callback_request(request: &str) -> Result<(String, String), ProviderError> {
    // GET /callback?code=xxx&state=yyy HTTP/1.1
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| ProviderError::AuthenticationFailed("Empty request".to_string()))?;
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ProviderError::AuthenticationFailed("Invalid request format".to_string()))?;
    let (_, query) = path
        .split_once('?')
        .ok_or_else(|| ProviderError::AuthenticationFailed("No query parameters".to_string()))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(ProviderError::AuthenticationFailed(format!("OAuth error: {}", value)))
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| ProviderError::AuthenticationFailed("Missing code".to_string()))?;
    let state = state.ok_or_else(|| ProviderError::AuthenticationFailed("Missing state".to_string()))?;
    Ok((code, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_request() {
        let request = "GET /callback?code=abc%2F123&state=xyz789 HTTP/1.1\r\nHost: localhost\r\n";
        let (code, state) = parse_callback_request(request).unwrap();
        assert_eq!(code, "abc/123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn test_parse_callback_request_error() {
        let request = "GET /callback?error=access_denied&state=s HTTP/1.1\r\n";
        assert!(matches!(
            parse_callback_request(request),
            Err(ProviderError::AuthenticationFailed(msg)) if msg.contains("access_denied")
        ));
        assert!(parse_callback_request("GET /callback HTTP/1.1\r\n").is_err());
    }

    #[test]
    fn test_from_app_config_requires_client_id() {
        let mut config = AppConfig::default();
        config.onedrive_client_id = String::new();
        assert!(matches!(
            OAuthConfig::from_app_config(ProviderKind::OneDrive, &config),
            Err(ProviderError::InvalidConfig(_))
        ));

        config.google_client_id = "gid.apps.googleusercontent.com".to_string();
        let google = OAuthConfig::from_app_config(ProviderKind::Google, &config).unwrap();
        assert_eq!(google.provider, ProviderKind::Google);
        assert_eq!(google.redirect_uri, config.redirect_uri);
        assert!(google.client_secret.is_none());
    }

    #[tokio::test]
    async fn test_start_auth_flow_keeps_verifier_once() {
        let manager = OAuth2Manager::new();
        let config = OAuthConfig::onedrive("client-1", "http://127.0.0.1:8765/callback");
        let (url, state) = manager.start_auth_flow(&config).await.unwrap();

        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("state={}", state)));

        let verifier = manager.take_verifier(&state).await.unwrap();
        assert!(verifier.expose_secret().len() >= 43);
        assert!(manager.take_verifier(&state).await.is_err());
    }

    #[test]
    fn test_token_response_account_id() {
        let dropbox: ProviderTokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "sl.abc",
            "token_type": "bearer",
            "expires_in": 14400,
            "refresh_token": "rt",
            "account_id": "dbid:AAH4f99",
            "uid": "12345"
        }))
        .unwrap();
        let tokens = token_set_from(&dropbox, None);
        assert_eq!(tokens.account_hint.as_deref(), Some("dbid:AAH4f99"));
        assert_eq!(tokens.refresh_token.unwrap().expose_secret(), "rt");
        assert!(tokens.expires_at.is_some());

        let onedrive: ProviderTokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "eyJ0",
            "token_type": "Bearer",
            "expires_in": 3600
        }))
        .unwrap();
        let fallback = SecretString::from("old-rt".to_string());
        let tokens = token_set_from(&onedrive, Some(&fallback));
        assert!(tokens.account_hint.is_none());
        assert_eq!(tokens.refresh_token.unwrap().expose_secret(), "old-rt");
    }

    #[test]
    fn test_token_set_expiry() {
        let mut tokens = TokenSet::new("a");
        assert!(!tokens.is_expired());
        tokens.expires_at = Some(chrono::Utc::now().timestamp() + 60);
        assert!(tokens.is_expired());
        tokens.expires_at = Some(chrono::Utc::now().timestamp() + 3600);
        assert!(!tokens.is_expired());
    }
}
