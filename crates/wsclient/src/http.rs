//! HTTP plumbing shared by the session and its managers

use crate::auth::{expires_within, Credential, CredentialProvider, SessionInfo};
use crate::config::{SessionContext, TransportVariant};
use crate::error::{is_json, ResultError, Result, WsclientError};
use crate::types::{KeyStorePassword, LoginOptions, SessionTokenResponse, UserCertificates, UserCredentials};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const LOGIN_PATH: &str = "authentication/user/login/";
const REFRESH_PATH: &str = "authentication/user/refresh/";
const LOGOUT_PATH: &str = "authentication/user/logout/";
const INFO_PATH: &str = "authentication/user/info/";
const CERTIFICATES_PATH: &str = "authentication/user/certificates/";

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

/// Token issued by the server's login endpoint
#[derive(Clone, Debug)]
pub(crate) struct SessionToken {
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    fn from_response(response: SessionTokenResponse) -> Self {
        // no expiry reported, or one beyond the representable range: the
        // token is valid for the session's lifetime
        let expires_at = response
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        Self {
            token: response.token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        }
    }
}

/// How outgoing requests are authorized
#[derive(Clone, Debug)]
pub(crate) enum AuthState {
    Anonymous,
    /// REST session token from the login endpoint
    Session(SessionToken),
    /// Credential sent with every call (SOAP)
    Direct(Credential),
}

impl AuthState {
    fn header(&self) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Session(token) => Some(format!("Bearer {}", token.token)),
            Self::Direct(credential) => credential.authorization_header(),
        }
    }

    fn needs_refresh(&self, skew: std::time::Duration) -> bool {
        match self {
            Self::Anonymous => false,
            Self::Session(token) => token.expires_at.is_some_and(|at| expires_within(at, skew)),
            Self::Direct(credential) => credential.expires_within(skew),
        }
    }
}

/// Request body variants
pub(crate) enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart { file_name: String, data: Bytes },
    Xml(String),
}

/// A request against the session's endpoint URL
pub(crate) struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(header::HeaderName, String)>,
    body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body).map_err(ResultError::conversion)?);
        Ok(self)
    }

    pub fn multipart(mut self, file_name: impl Into<String>, data: Bytes) -> Self {
        self.body = RequestBody::Multipart {
            file_name: file_name.into(),
            data,
        };
        self
    }

    pub fn xml(mut self, envelope: String) -> Self {
        self.body = RequestBody::Xml(envelope);
        self
    }
}

/// One authenticated connection to the server.
///
/// Owned by the session and shared with its managers.
pub(crate) struct Connection {
    context: SessionContext,
    http: Client,
    endpoint: Url,
    info: SessionInfo,
    provider: Arc<dyn CredentialProvider>,
    session_id: RwLock<String>,
    auth: RwLock<AuthState>,
    refresh_lock: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,
    user: RwLock<Option<UserCredentials>>,
    certificates: RwLock<Option<UserCertificates>>,
}

impl Connection {
    pub fn new(
        context: SessionContext,
        info: SessionInfo,
        provider: Arc<dyn CredentialProvider>,
        credential: &Credential,
    ) -> Result<Self> {
        let http = build_client(&context, credential)?;
        let endpoint = context.endpoint_url()?;
        Ok(Self {
            session_id: RwLock::new(info.id.clone()),
            context,
            http,
            endpoint,
            info,
            provider,
            auth: RwLock::new(AuthState::Anonymous),
            refresh_lock: tokio::sync::Mutex::new(()),
            state: RwLock::new(SessionState::Created),
            user: RwLock::new(None),
            certificates: RwLock::new(None),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn transport(&self) -> TransportVariant {
        self.context.transport
    }

    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.state() {
            SessionState::Active => Ok(()),
            _ => Err(ResultError::session_closed()),
        }
    }

    /// Require an active REST session
    pub fn ensure_rest(&self) -> Result<()> {
        self.ensure_active()?;
        match self.transport() {
            TransportVariant::Rest => Ok(()),
            TransportVariant::Soap => Err(ResultError::client(WsclientError::UnknownSessionType)
                .with_detail("operation requires a REST session")),
        }
    }

    /// Run the initial authentication round-trip and activate the session
    pub async fn handshake(&self, credential: Credential) -> Result<()> {
        let auth = match (self.transport(), &credential) {
            (_, Credential::None) => AuthState::Anonymous,
            (TransportVariant::Soap, _) => AuthState::Direct(credential.clone()),
            (TransportVariant::Rest, _) => {
                let (token, session_id) = self.login(&credential).await.map_err(|e| {
                    match e.http_status() {
                        Some(401) | Some(403) => e.into_auth(WsclientError::AuthenticationFailure),
                        _ => e,
                    }
                })?;
                if let Some(id) = session_id {
                    *self.session_id.write() = id;
                }
                AuthState::Session(token)
            }
        };
        *self.auth.write() = auth;

        if let Some(requirement) = &self.context.api_version {
            if let Err(e) = self.check_version(requirement).await {
                // release the server-side session the login just opened
                let auth = self.auth.read().clone();
                self.logout(&auth).await;
                return Err(e);
            }
        }

        *self.state.write() = SessionState::Active;
        Ok(())
    }

    /// Activate the session with a previously issued token
    pub fn resume(&self, token: SessionToken) {
        *self.auth.write() = AuthState::Session(token);
        *self.state.write() = SessionState::Active;
    }

    /// Close the session, at most once
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        if previous != SessionState::Active {
            return;
        }

        let auth = self.auth.read().clone();
        self.logout(&auth).await;
    }

    /// Best-effort logout of a REST session token
    async fn logout(&self, auth: &AuthState) {
        if self.transport() != TransportVariant::Rest || !matches!(auth, AuthState::Session(_)) {
            return;
        }
        if let Err(e) = self.send(ApiRequest::get(LOGOUT_PATH), auth.header()).await {
            warn!("Logout failed, discarding session anyway: {}", e);
        }
    }

    /// The logged in user, fetched once per session
    pub async fn user(&self) -> Result<UserCredentials> {
        self.ensure_rest()?;
        if let Some(user) = self.user.read().clone() {
            return Ok(user);
        }
        let response = self.execute(ApiRequest::get(INFO_PATH)).await?;
        let user: UserCredentials = read_json(response).await?;
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    /// Key stores and certificates of the logged in user, fetched once per session
    pub async fn certificates(&self) -> Result<UserCertificates> {
        self.ensure_rest()?;
        if let Some(certificates) = self.certificates.read().clone() {
            return Ok(certificates);
        }
        let response = self.execute(ApiRequest::get(CERTIFICATES_PATH)).await?;
        let certificates: UserCertificates = read_json(response).await?;
        *self.certificates.write() = Some(certificates.clone());
        Ok(certificates)
    }

    /// Unlock one of the user's key stores and re-read the certificates
    pub async fn update_certificates(
        &self,
        key_store: &str,
        password: &KeyStorePassword,
    ) -> Result<UserCertificates> {
        self.ensure_rest()?;
        if key_store.is_empty() {
            return Err(ResultError::invalid_parameters("key store name must not be empty"));
        }
        let request =
            ApiRequest::put(format!("{}passwords/{}", CERTIFICATES_PATH, key_store)).json(password)?;
        let certificates: UserCertificates = read_json(self.execute(request).await?).await?;
        *self.certificates.write() = Some(certificates.clone());
        Ok(certificates)
    }

    /// Authorize and send a request, failing on error statuses
    pub async fn execute(&self, request: ApiRequest) -> Result<Response> {
        let response = self.execute_unchecked(request).await?;
        check_status(response).await
    }

    /// Authorize and send a request, returning any response
    pub async fn execute_unchecked(&self, request: ApiRequest) -> Result<Response> {
        self.ensure_active()?;
        let authorization = self.authorization().await?;
        self.send(request, authorization).await
    }

    async fn send(&self, request: ApiRequest, authorization: Option<String>) -> Result<Response> {
        let url = self
            .endpoint
            .join(&request.path)
            .map_err(|e| ResultError::client(WsclientError::InvalidUrl).with_detail(e))?;

        let mut builder = self.http.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { file_name, data } => {
                let mime = mime_guess::from_path(&file_name).first_or_octet_stream();
                let part = reqwest::multipart::Part::bytes(data.to_vec())
                    .file_name(file_name)
                    .mime_str(mime.as_ref())
                    .map_err(ResultError::conversion)?;
                builder.multipart(reqwest::multipart::Form::new().part("filedata", part))
            }
            RequestBody::Xml(envelope) => builder
                .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
                .header("SOAPAction", "\"\"")
                .body(envelope),
        };

        debug!("Sending {} request to {}", request.method, url);
        builder.send().await.map_err(ResultError::from_transport)
    }

    /// Current `Authorization` header, refreshing expired material first
    async fn authorization(&self) -> Result<Option<String>> {
        let skew = self.context.skew_time;
        {
            let auth = self.auth.read();
            if !auth.needs_refresh(skew) {
                return Ok(auth.header());
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // another call may have refreshed while we waited
        let current = self.auth.read().clone();
        if !current.needs_refresh(skew) {
            return Ok(current.header());
        }

        let refreshed = self.refresh(current).await?;
        let header = refreshed.header();
        *self.auth.write() = refreshed;
        Ok(header)
    }

    async fn refresh(&self, current: AuthState) -> Result<AuthState> {
        debug!("Refreshing session credentials");
        let refreshed = match current {
            AuthState::Session(token) => match token.refresh_token {
                Some(refresh_token) => self
                    .request_token(REFRESH_PATH, Some(format!("Bearer {}", refresh_token)))
                    .await
                    .map(|(token, _)| AuthState::Session(token)),
                None => match self.provider.refresh(&self.info).await {
                    Ok(credential) => self
                        .login(&credential)
                        .await
                        .map(|(token, _)| AuthState::Session(token)),
                    Err(e) => Err(e),
                },
            },
            AuthState::Direct(_) => self.provider.refresh(&self.info).await.map(AuthState::Direct),
            AuthState::Anonymous => Ok(AuthState::Anonymous),
        };

        refreshed.map_err(|e| {
            if e.is_auth() || e.is_unreachable() {
                e
            } else {
                e.into_auth(WsclientError::SessionRefreshFailure)
            }
        })
    }

    async fn login(&self, credential: &Credential) -> Result<(SessionToken, Option<String>)> {
        self.request_token(LOGIN_PATH, credential.authorization_header())
            .await
    }

    async fn request_token(
        &self,
        path: &str,
        authorization: Option<String>,
    ) -> Result<(SessionToken, Option<String>)> {
        let request = ApiRequest::post(path).json(&LoginOptions {
            create_refresh_token: true,
        })?;
        let response = check_status(self.send(request, authorization).await?).await?;
        let token: SessionTokenResponse = read_json(response).await?;
        let session_id = token.session_id.clone().filter(|id| !id.is_empty());
        Ok((SessionToken::from_response(token), session_id))
    }

    async fn check_version(&self, requirement: &semver::VersionReq) -> Result<()> {
        let authorization = self.auth.read().header();
        let response = check_status(self.send(ApiRequest::get("server/version"), authorization).await?)
            .await?;
        let reported: crate::types::ServerVersion = read_json(response).await?;

        let version = semver::Version::parse(reported.version.trim()).map_err(|e| {
            ResultError::server_state(WsclientError::ProtocolMismatch)
                .with_detail(format!("unparsable server version '{}'", reported.version))
                .with_source(e)
        })?;
        if !requirement.matches(&version) {
            return Err(ResultError::server_state(WsclientError::ProtocolMismatch)
                .with_detail(format!("server reports {}, required {}", version, requirement)));
        }
        debug!("Server version {} matches {}", version, requirement);
        Ok(())
    }
}

/// Map error statuses through the error translator
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let (content_type, body) = read_body(response).await;
    Err(ResultError::from_response(
        status.as_u16(),
        content_type.as_deref(),
        &body,
    ))
}

/// Content type and body of a response, empty if the body cannot be read
pub(crate) async fn read_body(response: Response) -> (Option<String>, Bytes) {
    let content_type = content_type(&response);
    let body = response.bytes().await.unwrap_or_default();
    (content_type, body)
}

pub(crate) fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub(crate) fn is_json_response(response: &Response) -> bool {
    content_type(response).as_deref().is_some_and(is_json)
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = read_bytes(response).await?;
    serde_json::from_slice(&body).map_err(ResultError::invalid_content)
}

pub(crate) async fn read_bytes(response: Response) -> Result<Bytes> {
    response.bytes().await.map_err(ResultError::from_transport)
}

fn build_client(context: &SessionContext, credential: &Credential) -> Result<Client> {
    let tls_failure = |e: reqwest::Error| {
        ResultError::client(WsclientError::TlsInitializationFailure)
            .with_detail(&e)
            .with_source(e)
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, */*"));

    let mut builder = Client::builder()
        .use_rustls_tls()
        .timeout(context.timeout)
        .connect_timeout(context.connect_timeout)
        .user_agent(context.user_agent.clone())
        .default_headers(headers)
        .cookie_store(true);

    if let Some(tls) = &context.tls {
        if let Some(min) = tls.min_protocol {
            builder = builder.min_tls_version(min.as_reqwest());
        }
        if let Some(max) = tls.max_protocol {
            builder = builder.max_tls_version(max.as_reqwest());
        }
        for pem in &tls.root_certificates {
            let certificate = reqwest::Certificate::from_pem(pem).map_err(tls_failure)?;
            builder = builder.add_root_certificate(certificate);
        }
        if !tls.reject_unauthorized {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    if let Some(proxy) = &context.proxy {
        let mut reqwest_proxy = reqwest::Proxy::all(proxy.url()).map_err(tls_failure)?;
        if let Some(credentials) = &proxy.credentials {
            reqwest_proxy = reqwest_proxy.basic_auth(&credentials.user, &credentials.password);
        }
        builder = builder.proxy(reqwest_proxy);
    }

    if let Credential::Certificate { cert_pem, key_pem } = credential {
        let mut pem = cert_pem.clone();
        pem.push(b'\n');
        pem.extend_from_slice(key_pem);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            ResultError::client(WsclientError::InvalidAuthMaterial)
                .with_detail(&e)
                .with_source(e)
        })?;
        builder = builder.identity(identity);
    }

    builder.build().map_err(tls_failure)
}
