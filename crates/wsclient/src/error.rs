//! Error types and wsclient error codes

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ResultError>;

/// Boxed error kept as the cause of a [`ResultError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Known wsclient failure states.
///
/// These codes describe client-side failures and must not be confused with the
/// error codes reported by the server, which are carried verbatim by
/// [`ResultError::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsclientError {
    UnknownException,
    UnknownWebserviceProtocol,
    UnknownWebserviceType,
    InvalidSourceDocument,
    InvalidHttpMessageContent,
    InvalidDocument,
    InvalidHistoryData,
    InvalidWebserviceSession,
    InvalidResultDocument,
    InvalidUrl,
    HttpIoError,
    TlsInitializationFailure,
    HttpEmptyEntity,
    HttpCustomError,
    UnknownHttpMethod,
    UnknownSessionType,
    XmlOrJsonConversionFailure,
    InvalidAuthMaterial,
    AuthenticationFailure,
    SessionRefreshFailure,
    RestExecution,
    AuthError,
    AdminPermissionError,
    SessionClosed,
    InvalidParameters,
    ProtocolMismatch,
}

impl WsclientError {
    /// Every known error, in code order
    pub const ALL: [WsclientError; 26] = [
        Self::UnknownException,
        Self::UnknownWebserviceProtocol,
        Self::UnknownWebserviceType,
        Self::InvalidSourceDocument,
        Self::InvalidHttpMessageContent,
        Self::InvalidDocument,
        Self::InvalidHistoryData,
        Self::InvalidWebserviceSession,
        Self::InvalidResultDocument,
        Self::InvalidUrl,
        Self::HttpIoError,
        Self::TlsInitializationFailure,
        Self::HttpEmptyEntity,
        Self::HttpCustomError,
        Self::UnknownHttpMethod,
        Self::UnknownSessionType,
        Self::XmlOrJsonConversionFailure,
        Self::InvalidAuthMaterial,
        Self::AuthenticationFailure,
        Self::SessionRefreshFailure,
        Self::RestExecution,
        Self::AuthError,
        Self::AdminPermissionError,
        Self::SessionClosed,
        Self::InvalidParameters,
        Self::ProtocolMismatch,
    ];

    /// Get the numeric error code
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownException => -1,
            Self::UnknownWebserviceProtocol => -2,
            Self::UnknownWebserviceType => -3,
            Self::InvalidSourceDocument => -5,
            Self::InvalidHttpMessageContent => -6,
            Self::InvalidDocument => -7,
            Self::InvalidHistoryData => -10,
            Self::InvalidWebserviceSession => -11,
            Self::InvalidResultDocument => -12,
            Self::InvalidUrl => -30,
            Self::HttpIoError => -31,
            Self::TlsInitializationFailure => -32,
            Self::HttpEmptyEntity => -33,
            Self::HttpCustomError => -34,
            Self::UnknownHttpMethod => -35,
            Self::UnknownSessionType => -36,
            Self::XmlOrJsonConversionFailure => -37,
            Self::InvalidAuthMaterial => -40,
            Self::AuthenticationFailure => -41,
            Self::SessionRefreshFailure => -42,
            Self::RestExecution => -53,
            Self::AuthError => -54,
            Self::AdminPermissionError => -55,
            Self::SessionClosed => -56,
            Self::InvalidParameters => -57,
            Self::ProtocolMismatch => -58,
        }
    }

    /// Get the default message
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownException => "Unknown exception.",
            Self::UnknownWebserviceProtocol => "The selected webservice protocol is unknown.",
            Self::UnknownWebserviceType => "The selected webservice type is not available.",
            Self::InvalidSourceDocument => "Invalid file source.",
            Self::InvalidHttpMessageContent => "Failed to deserialize XML/JSON HTTP message content.",
            Self::InvalidDocument => "The found document is invalid.",
            Self::InvalidHistoryData => "Invalid history parameter.",
            Self::InvalidWebserviceSession => {
                "Creating a webservice instance failed for the selected session."
            }
            Self::InvalidResultDocument => "The resulting document is invalid",
            Self::InvalidUrl => "Invalid URL.",
            Self::HttpIoError => "HTTP/HTTPS IO error.",
            Self::TlsInitializationFailure => "TLS agent initialization failed.",
            Self::HttpEmptyEntity => "HTTP entity is empty",
            Self::HttpCustomError => "HTTP custom error",
            Self::UnknownHttpMethod => "Unknown HTTP method",
            Self::UnknownSessionType => "Unknown session type",
            Self::XmlOrJsonConversionFailure => "Unable to convert to XML/JSON",
            Self::InvalidAuthMaterial => "Authentication/authorization material is invalid",
            Self::AuthenticationFailure => "The session authentication failed",
            Self::SessionRefreshFailure => "Refreshing the session token failed",
            Self::RestExecution => "REST web service execution error",
            Self::AuthError => "Authentication/Authorization failure.",
            Self::AdminPermissionError => "Admin permission required.",
            Self::SessionClosed => "The session has been closed.",
            Self::InvalidParameters => "The operation parameters are invalid.",
            Self::ProtocolMismatch => "The server API version is not supported.",
        }
    }

    /// Look up the error for a numeric code, falling back to `UnknownException`
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.code() == code)
            .unwrap_or(Self::UnknownException)
    }
}

impl fmt::Display for WsclientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// The error type of every wsclient operation.
///
/// `Client` covers local faults (bad parameters, stale handles, closed
/// sessions), `Server` covers anything the remote side or the transport
/// reported, and `Auth` covers rejected credentials and failed token refreshes.
#[derive(Error, Debug)]
pub enum ResultError {
    #[error("Client error ({error_code}): {message}")]
    Client {
        client_error: WsclientError,
        error_code: i32,
        message: String,
        stack_trace: Option<String>,
        http_status: Option<u16>,
        source: Option<BoxError>,
    },

    #[error("Server error ({error_code}): {message}")]
    Server {
        client_error: WsclientError,
        error_code: i32,
        message: String,
        stack_trace: Option<String>,
        http_status: Option<u16>,
        source: Option<BoxError>,
    },

    #[error("Auth error ({error_code}): {message}")]
    Auth {
        client_error: WsclientError,
        error_code: i32,
        message: String,
        stack_trace: Option<String>,
        http_status: Option<u16>,
        source: Option<BoxError>,
    },
}

/// Structured error payload returned by the server
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerErrorBody {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
}

impl ResultError {
    /// Create a client-side error
    pub fn client(error: WsclientError) -> Self {
        Self::Client {
            client_error: error,
            error_code: error.code(),
            message: error.message().to_string(),
            stack_trace: None,
            http_status: None,
            source: None,
        }
    }

    /// Create an authentication error
    pub fn auth(error: WsclientError) -> Self {
        Self::Auth {
            client_error: error,
            error_code: error.code(),
            message: error.message().to_string(),
            stack_trace: None,
            http_status: None,
            source: None,
        }
    }

    /// Create a server error carrying the server's own error code
    pub fn server(error_code: i32, message: impl Into<String>, stack_trace: Option<String>) -> Self {
        Self::Server {
            client_error: WsclientError::RestExecution,
            error_code,
            message: message.into(),
            stack_trace,
            http_status: None,
            source: None,
        }
    }

    /// Create a server-side error for a wsclient failure state
    pub fn server_state(error: WsclientError) -> Self {
        Self::Server {
            client_error: error,
            error_code: error.code(),
            message: error.message().to_string(),
            stack_trace: None,
            http_status: None,
            source: None,
        }
    }

    /// The server could not be reached, or the call timed out
    pub fn unreachable(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::server_state(WsclientError::HttpIoError)
            .with_detail(&cause)
            .with_source(cause)
    }

    /// Translate a transport-level failure
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            tracing::debug!("Request timed out: {}", err);
        }
        Self::unreachable(err)
    }

    /// Translate a non-success HTTP response.
    ///
    /// Never fails: unknown payloads degrade to `HttpCustomError`.
    pub fn from_response(status: u16, content_type: Option<&str>, body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::server_state(WsclientError::HttpEmptyEntity)
                .with_detail(format!("HTTP {}", status))
                .with_http_status(status);
        }

        if content_type.is_some_and(is_json) {
            if let Ok(payload) = serde_json::from_slice::<ServerErrorBody>(body) {
                if payload.error_code != 0 {
                    let code = i32::try_from(payload.error_code).unwrap_or(i32::MIN);
                    return Self::server(
                        code,
                        payload.error_message.unwrap_or_default(),
                        payload.stack_trace.filter(|s| !s.is_empty()),
                    )
                    .with_http_status(status);
                }
            }
        }

        let text = String::from_utf8_lossy(body);
        Self::server_state(WsclientError::HttpCustomError)
            .with_detail(text.trim())
            .with_http_status(status)
    }

    /// A request or parameter entity could not be serialized
    pub fn conversion(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::client(WsclientError::XmlOrJsonConversionFailure)
            .with_detail(&cause)
            .with_source(cause)
    }

    /// A success response could not be decoded
    pub fn invalid_content(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::client(WsclientError::InvalidHttpMessageContent)
            .with_detail(&cause)
            .with_source(cause)
    }

    /// Document id not tracked by the document manager
    pub fn not_found(document_id: &str) -> Self {
        Self::client(WsclientError::InvalidDocument)
            .with_detail(format!("unknown document '{}'", document_id))
    }

    /// Operation attempted on a closed session
    pub fn session_closed() -> Self {
        Self::client(WsclientError::SessionClosed)
    }

    /// Local parameter validation failure
    pub fn invalid_parameters(detail: impl fmt::Display) -> Self {
        Self::client(WsclientError::InvalidParameters).with_detail(detail)
    }

    /// Append detail text to the message
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        let detail = detail.to_string();
        if !detail.is_empty() {
            let message = self.message_mut();
            message.push_str(": ");
            message.push_str(&detail);
        }
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Client { source, .. } | Self::Server { source, .. } | Self::Auth { source, .. } => {
                *source = Some(cause.into());
            }
        }
        self
    }

    /// Record the HTTP status the error was derived from
    pub fn with_http_status(mut self, status: u16) -> Self {
        match &mut self {
            Self::Client { http_status, .. }
            | Self::Server { http_status, .. }
            | Self::Auth { http_status, .. } => *http_status = Some(status),
        }
        self
    }

    /// Wrap this error as an authentication failure of the given kind
    pub fn into_auth(self, error: WsclientError) -> Self {
        let status = self.http_status();
        let detail = self.message().to_string();
        let mut auth = Self::auth(error).with_detail(detail);
        if let Some(status) = status {
            auth = auth.with_http_status(status);
        }
        auth.with_source(self)
    }

    /// Numeric error code: the server's code for server payloads, the
    /// wsclient code otherwise
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Client { error_code, .. }
            | Self::Server { error_code, .. }
            | Self::Auth { error_code, .. } => *error_code,
        }
    }

    /// The wsclient failure state
    pub fn client_error(&self) -> WsclientError {
        match self {
            Self::Client { client_error, .. }
            | Self::Server { client_error, .. }
            | Self::Auth { client_error, .. } => *client_error,
        }
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        match self {
            Self::Client { message, .. } | Self::Server { message, .. } | Self::Auth { message, .. } => {
                message
            }
        }
    }

    /// Server-side stack trace, if the server sent one
    pub fn stack_trace_message(&self) -> Option<&str> {
        match self {
            Self::Client { stack_trace, .. }
            | Self::Server { stack_trace, .. }
            | Self::Auth { stack_trace, .. } => stack_trace.as_deref(),
        }
    }

    /// HTTP status of the failed response, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Client { http_status, .. }
            | Self::Server { http_status, .. }
            | Self::Auth { http_status, .. } => *http_status,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Check if this is a "document not found" error
    pub fn is_not_found(&self) -> bool {
        self.is_client() && self.client_error() == WsclientError::InvalidDocument
    }

    /// Check if the session or handle was no longer usable
    pub fn is_illegal_state(&self) -> bool {
        self.is_client() && self.client_error() == WsclientError::SessionClosed
    }

    /// Check if the server was unreachable or the call timed out
    pub fn is_unreachable(&self) -> bool {
        self.is_server() && self.client_error() == WsclientError::HttpIoError
    }

    fn message_mut(&mut self) -> &mut String {
        match self {
            Self::Client { message, .. } | Self::Server { message, .. } | Self::Auth { message, .. } => {
                message
            }
        }
    }
}

/// Check whether a content type denotes a JSON payload
pub(crate) fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
