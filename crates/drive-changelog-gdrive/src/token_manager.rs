//! OAuth token manager with automatic refresh.
//!
//! Reads authorized-user or service-account credentials from disk, caches
//! the access token in-memory, and refreshes it via Google OAuth2 when it is
//! about to expire.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Google rejects assertions valid for more than an hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Authorized-user credentials, as written by `gcloud auth application-default login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Service-account key file, as downloaded from the Cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    /// Signed RS256 JWT-bearer assertion for the Drive scope.
    fn assertion(&self, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|e| {
            anyhow::anyhow!(
                "Invalid private key for service account {}: {}",
                self.client_email,
                e
            )
        })?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }
}

/// Credentials file contents, selected by its `type` field.
#[derive(Debug, Clone)]
pub enum Credentials {
    AuthorizedUser(AuthorizedUserCredentials),
    ServiceAccount(ServiceAccountKey),
}

impl Credentials {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read credentials {}: {}", path.display(), e)
        })?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("Credentials {} are not valid JSON: {}", path.display(), e)
        })?;

        // gcloud omits the type on some older authorized-user files.
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("authorized_user")
            .to_string();

        match kind.as_str() {
            "authorized_user" => serde_json::from_value(value)
                .map(Self::AuthorizedUser)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Credentials {} are not authorized-user JSON: {}",
                        path.display(),
                        e
                    )
                }),
            "service_account" => serde_json::from_value(value)
                .map(Self::ServiceAccount)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Credentials {} are not a service-account key: {}",
                        path.display(),
                        e
                    )
                }),
            other => anyhow::bail!(
                "Unsupported credentials type '{}' in {} (expected authorized_user or service_account)",
                other,
                path.display()
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizedUser(_) => "authorized_user",
            Self::ServiceAccount(_) => "service_account",
        }
    }
}

/// Cached token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => chrono::Utc::now() >= exp - chrono::Duration::minutes(5),
            None => true,
        }
    }
}

/// Hands out access tokens, refreshing when needed.
pub struct TokenManager {
    http: reqwest::Client,
    credentials: Credentials,
    /// Also serializes refreshes so concurrent callers share one round trip.
    cache: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(credentials: Credentials, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            credentials,
            cache: Mutex::new(None),
        })
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_valid_token(&self) -> anyhow::Result<String> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if !cached.is_expired() {
                debug!("Token cache hit");
                return Ok(cached.access_token.clone());
            }
            debug!("Access token expired, refreshing");
        }

        let fresh = self.refresh_token().await?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    /// Fetch a new access token: the refresh_token grant for a user, a
    /// signed JWT-bearer assertion for a service account.
    async fn refresh_token(&self) -> anyhow::Result<CachedToken> {
        let request = match &self.credentials {
            Credentials::AuthorizedUser(user) => self.http.post(&user.token_uri).form(&[
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ]),
            Credentials::ServiceAccount(key) => {
                let assertion = key.assertion(chrono::Utc::now())?;
                self.http.post(&key.token_uri).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            }
        };
        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token refresh failed: {} {}", status, body);
        }

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
            expires_in: Option<u64>,
        }

        let token_resp: RefreshResponse = resp.json().await?;
        let expires_at = token_resp
            .expires_in
            .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs as i64));

        match expires_at {
            Some(at) => info!("Refreshed OAuth token, expires at {}", at.to_rfc3339()),
            None => info!("Refreshed OAuth token (no expiry reported)"),
        }

        Ok(CachedToken {
            access_token: token_resp.access_token,
            expires_at,
        })
    }
}
