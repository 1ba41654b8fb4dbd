//! Application-only OAuth2 for Reddit's API (client credentials grant).

use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, TokenResponse, TokenUrl};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use whodis_core::{CoreError, RedditApiError};

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub auth_url: String,
    pub token_url: String,
}

impl RedditOAuth2Config {
    pub fn new(client_id: String, client_secret: String, user_agent: String) -> Self {
        Self {
            client_id,
            client_secret,
            user_agent,
            auth_url: REDDIT_AUTH_URL.to_string(),
            token_url: REDDIT_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() + EXPIRY_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub enum AuthState {
    NotAuthenticated,
    Authenticated { expires_at: SystemTime },
    TokenExpired { expired_at: SystemTime },
}

#[derive(Debug)]
pub struct TokenManager {
    config: RedditOAuth2Config,
    token: Mutex<Option<RedditToken>>,
}

impl TokenManager {
    pub fn new(config: RedditOAuth2Config) -> Self {
        Self {
            config,
            token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RedditOAuth2Config {
        &self.config
    }

    pub async fn set_token(&self, token: RedditToken) {
        *self.token.lock().await = Some(token);
    }

    pub async fn get_auth_state(&self) -> AuthState {
        match self.token.lock().await.as_ref() {
            None => AuthState::NotAuthenticated,
            Some(token) if token.is_expired() => AuthState::TokenExpired {
                expired_at: token.expires_at,
            },
            Some(token) => AuthState::Authenticated {
                expires_at: token.expires_at,
            },
        }
    }

    /// Drops the cached token so the next request fetches a new one.
    pub async fn invalidate(&self) {
        if self.token.lock().await.take().is_some() {
            debug!("Discarded Reddit access token");
        }
    }

    /// Returns a valid access token, requesting a new one when there is
    /// none or the cached one is about to expire.
    pub async fn access_token(&self, http: &Client) -> Result<String, CoreError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token(http).await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn request_token(&self, http: &Client) -> Result<RedditToken, CoreError> {
        let auth_failed = |reason: String| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
        };

        let client = BasicClient::new(
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
            AuthUrl::new(self.config.auth_url.clone()).map_err(|e| auth_failed(e.to_string()))?,
            Some(
                TokenUrl::new(self.config.token_url.clone())
                    .map_err(|e| auth_failed(e.to_string()))?,
            ),
        );

        debug!("Requesting Reddit application token");
        let response = client
            .exchange_client_credentials()
            .request_async(|request| send_oauth_request(http, request))
            .await
            .map_err(|e| {
                error!("Reddit token request failed: {}", e);
                auth_failed(e.to_string())
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let scope = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| (**s).clone()).collect())
            .unwrap_or_default();

        info!("Authenticated with Reddit (token valid for {:?})", lifetime);
        Ok(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + lifetime,
            scope,
        })
    }
}

/// Transport for the `oauth2` crate, so the token request goes through the
/// same client (and user agent) as every API call.
async fn send_oauth_request(
    http: &Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}
