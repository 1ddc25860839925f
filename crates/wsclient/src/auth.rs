//! Credentials and credential providers

use crate::config::TransportVariant;
use crate::error::{ResultError, Result, WsclientError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

/// Authentication material for one session
#[derive(Clone, PartialEq)]
pub enum Credential {
    /// Anonymous access
    None,
    /// User name and password
    Basic { user: String, password: String },
    /// Bearer token, e.g. issued by an OAuth2 authority
    Bearer {
        token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// TLS client certificate and private key (PEM)
    Certificate { cert_pem: Vec<u8>, key_pem: Vec<u8> },
}

impl Credential {
    /// Create basic credentials
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Create a bearer credential without expiry
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Value of the `Authorization` header, if the credential uses one
    pub(crate) fn authorization_header(&self) -> Option<String> {
        match self {
            Self::None | Self::Certificate { .. } => None,
            Self::Basic { user, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", user, password))
            )),
            Self::Bearer { token, .. } => Some(format!("Bearer {}", token)),
        }
    }

    /// Whether the credential expires within `skew`
    pub fn expires_within(&self, skew: Duration) -> bool {
        match self {
            Self::Bearer {
                expires_at: Some(expires_at),
                ..
            } => expires_within(*expires_at, skew),
            _ => false,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Self::Bearer { expires_at, .. } => f
                .debug_struct("Bearer")
                .field("token", &"***")
                .field("expires_at", expires_at)
                .finish(),
            Self::Certificate { .. } => f.debug_struct("Certificate").finish_non_exhaustive(),
        }
    }
}

/// A skew too large to subtract counts as expired
pub(crate) fn expires_within(expires_at: DateTime<Utc>, skew: Duration) -> bool {
    chrono::Duration::from_std(skew)
        .ok()
        .and_then(|skew| expires_at.checked_sub_signed(skew))
        .map_or(true, |deadline| deadline <= Utc::now())
}

/// What a provider knows about the session asking for credentials
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Client-side session id
    pub id: String,
    /// Server base URL
    pub server_url: Url,
    /// Transport variant
    pub transport: TransportVariant,
}

/// Supplies authentication material on demand.
///
/// `provide` is called once when the session is created, `refresh` whenever
/// the session needs new material because the previous one expired.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Supply the initial credential
    async fn provide(&self, session: &SessionInfo) -> Result<Credential>;

    /// Supply a fresh credential
    async fn refresh(&self, session: &SessionInfo) -> Result<Credential> {
        self.provide(session).await
    }
}

/// Anonymous access
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousProvider;

#[async_trait]
impl CredentialProvider for AnonymousProvider {
    async fn provide(&self, _session: &SessionInfo) -> Result<Credential> {
        Ok(Credential::None)
    }
}

/// User name and password
#[derive(Clone)]
pub struct UserProvider {
    user: String,
    password: String,
}

impl UserProvider {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserProvider").field("user", &self.user).finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for UserProvider {
    async fn provide(&self, _session: &SessionInfo) -> Result<Credential> {
        if self.user.is_empty() || self.password.is_empty() {
            return Err(ResultError::client(WsclientError::InvalidAuthMaterial)
                .with_detail("user name and password must not be empty"));
        }
        Ok(Credential::basic(&self.user, &self.password))
    }
}

/// A bearer token obtained elsewhere
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn provide(&self, _session: &SessionInfo) -> Result<Credential> {
        if self.token.is_empty() {
            return Err(ResultError::client(WsclientError::InvalidAuthMaterial)
                .with_detail("empty bearer token"));
        }
        Ok(Credential::bearer(&self.token))
    }
}

/// TLS client certificate authentication
#[derive(Clone)]
pub struct CertificateProvider {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl CertificateProvider {
    /// Create from PEM encoded certificate chain and private key
    pub fn from_pem(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Result<Self> {
        let cert_pem = cert_pem.into();
        let key_pem = key_pem.into();
        if !is_pem(&cert_pem) || !is_pem(&key_pem) {
            return Err(ResultError::client(WsclientError::InvalidAuthMaterial)
                .with_detail("certificate and key must be PEM encoded"));
        }
        Ok(Self { cert_pem, key_pem })
    }
}

fn is_pem(data: &[u8]) -> bool {
    String::from_utf8_lossy(data).contains("-----BEGIN ")
}

#[async_trait]
impl CredentialProvider for CertificateProvider {
    async fn provide(&self, _session: &SessionInfo) -> Result<Credential> {
        Ok(Credential::Certificate {
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
        })
    }
}

/// OAuth2 client-credentials grant against an Auth0 or Azure authority.
///
/// Tokens are cached until they expire; `refresh` always requests a new one.
pub struct ClientCredentialsProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    scope: Option<String>,
    audience: Option<String>,
    http: reqwest::Client,
    cached: Mutex<Option<Credential>>,
}

impl ClientCredentialsProvider {
    /// Create a provider for an arbitrary token endpoint
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                ResultError::client(WsclientError::TlsInitializationFailure)
                    .with_detail(&e)
                    .with_source(e)
            })?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            scope: None,
            audience: None,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Auth0 tenant, e.g. `https://tenant.eu.auth0.com`
    pub fn auth0(
        authority: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self> {
        let token_url = format!("{}/oauth/token", authority.trim_end_matches('/'));
        Ok(Self::new(token_url, client_id, client_secret)?.with_audience(audience))
    }

    /// Azure AD authority, e.g. `https://login.microsoftonline.com/<tenant>`
    pub fn azure(
        authority: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self> {
        let token_url = format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'));
        Ok(Self::new(token_url, client_id, client_secret)?.with_scope(scope))
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[instrument(skip(self), fields(token_url = %self.token_url))]
    async fn request_token(&self) -> Result<Credential> {
        let token_url = TokenUrl::new(self.token_url.clone()).map_err(|e| {
            ResultError::client(WsclientError::InvalidUrl)
                .with_detail(&e)
                .with_source(e)
        })?;
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url);

        let mut request = client.exchange_client_credentials();
        if let Some(scope) = &self.scope {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        if let Some(audience) = &self.audience {
            request = request.add_extra_param("audience", audience.clone());
        }

        let response = request.request_async(&self.http).await.map_err(|e| {
            ResultError::auth(WsclientError::AuthError)
                .with_detail(&e)
                .with_source(e)
        })?;

        debug!("Obtained access token");
        let expires_at = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        Ok(Credential::Bearer {
            token: response.access_token().secret().clone(),
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn provide(&self, _session: &SessionInfo) -> Result<Credential> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref() {
            if !credential.expires_within(Duration::ZERO) {
                return Ok(credential.clone());
            }
        }
        let credential = self.request_token().await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    async fn refresh(&self, _session: &SessionInfo) -> Result<Credential> {
        let mut cached = self.cached.lock().await;
        let credential = self.request_token().await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }
}

impl fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}
