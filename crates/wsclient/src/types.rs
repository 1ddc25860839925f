//! Common types for the client SDK

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document as reported by the server's document store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    /// Server-assigned document id
    pub document_id: String,
    /// File name without extension
    #[serde(default)]
    pub file_name: String,
    /// File extension
    #[serde(default)]
    pub file_extension: String,
    /// MIME type
    #[serde(default)]
    pub mime_type: String,
    /// Size in bytes
    #[serde(default)]
    pub file_size: u64,
    /// Creation time (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    /// Last modification time (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_last_modified: Option<i64>,
    /// Whether the document is protected by a password or certificate
    #[serde(default)]
    pub is_protected: bool,
    /// Document-level error reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DocumentError>,
}

/// Document-level error state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentError {
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_message: String,
}

/// One entry of a document's history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Position in the history
    pub id: i64,
    /// File name at this point of the history
    #[serde(default)]
    pub file_name: String,
    /// Operation that produced this state
    #[serde(default)]
    pub operation: String,
    /// Whether this is the active state
    #[serde(default)]
    pub active: bool,
    /// When the entry was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Index of the entry within the history
    pub fn index(&self) -> i64 {
        self.id
    }

    /// Description of the operation that produced the entry
    pub fn description(&self) -> &str {
        &self.operation
    }
}

/// A server-tracked document, as known to the local document manager
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemoteDocument {
    /// Latest server view of the document
    pub file: DocumentFile,
    /// History entries ordered by index (empty unless history tracking is on)
    pub history: Vec<HistoryEntry>,
}

impl RemoteDocument {
    pub(crate) fn new(file: DocumentFile) -> Self {
        Self {
            file,
            history: Vec::new(),
        }
    }

    /// Server-assigned document id
    pub fn document_id(&self) -> &str {
        &self.file.document_id
    }

    /// Display name
    pub fn display_name(&self) -> &str {
        &self.file.file_name
    }

    /// File name including extension
    pub fn full_name(&self) -> String {
        if self.file.file_extension.is_empty() {
            self.file.file_name.clone()
        } else {
            format!("{}.{}", self.file.file_name, self.file.file_extension)
        }
    }

    /// The currently active history entry
    pub fn active_history(&self) -> Option<&HistoryEntry> {
        self.history.iter().find(|entry| entry.active)
    }

    /// Insert or replace a history entry, keeping index order
    pub(crate) fn upsert_history(&mut self, entry: HistoryEntry) {
        match self.history.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => {
                self.history.push(entry);
                self.history.sort_by_key(|e| e.id);
            }
        }
    }
}

/// Result of a web service call
#[derive(Clone, Debug)]
pub enum OperationResult {
    /// The service produced a document, now tracked by the document manager
    Document(RemoteDocument),
    /// The service produced non-document output
    Bytes(Bytes),
}

impl OperationResult {
    /// Get the result document, if any
    pub fn document(&self) -> Option<&RemoteDocument> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Bytes(_) => None,
        }
    }

    /// Consume into the result document, if any
    pub fn into_document(self) -> Option<RemoteDocument> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Bytes(_) => None,
        }
    }

    /// Get the raw payload, if any
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Document(_) => None,
            Self::Bytes(data) => Some(data),
        }
    }
}

/// Session token issued by the login and refresh endpoints
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionTokenResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Options sent to the login and refresh endpoints
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginOptions {
    pub create_refresh_token: bool,
}

/// The user logged in via a session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredentials {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Key stores and certificates the logged in user can sign with
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCertificates {
    #[serde(default)]
    pub key_stores: Vec<KeyStoreInfo>,
    /// Certificate descriptions as reported by the server
    #[serde(default)]
    pub certificates: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreInfo {
    #[serde(default)]
    pub key_store_name: String,
    /// Whether the key store is currently unlocked
    #[serde(default)]
    pub is_key_store_accessible: bool,
}

/// Password unlocking one of the user's key stores
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStorePassword {
    pub key_store_password: String,
}

impl KeyStorePassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            key_store_password: password.into(),
        }
    }
}

/// Version information reported by the server
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerVersion {
    pub version: String,
}

/// Rename request body
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileUpdate {
    pub file_name: String,
}

/// Compression request body
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileCompress {
    pub document_id_list: Vec<String>,
    pub archive_file_name: String,
    pub store_archive: bool,
}

/// Options for extracting an archive document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOptions {
    /// Only extract these archive paths (all files when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_names: Vec<String>,
    /// Additional server-specific options
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExtractOptions {
    /// Extract every file of the archive
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict extraction to the given archive paths
    pub fn with_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            file_names: files.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Document information categories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoType {
    Form,
    Attachments,
    Outline,
    Pages,
    Fonts,
    Images,
    Signatures,
    Metadata,
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Attachments => "attachments",
            Self::Outline => "outline",
            Self::Pages => "pages",
            Self::Fonts => "fonts",
            Self::Images => "images",
            Self::Signatures => "signatures",
            Self::Metadata => "metadata",
        }
    }
}

/// Server configuration sections
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigurationKind {
    Application,
    Server,
    User,
    Log,
    Provider,
    Cluster,
}

impl ConfigurationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Server => "server",
            Self::User => "user",
            Self::Log => "log",
            Self::Provider => "provider",
            Self::Cluster => "cluster",
        }
    }
}

/// Groups of files kept in the server's data store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatastoreGroup {
    Logo,
    Css,
    Generic,
    Icc,
}

impl DatastoreGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Css => "css",
            Self::Generic => "generic",
            Self::Icc => "icc",
        }
    }
}

/// Components that can be included in a support package
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupportGroup {
    Logs,
    Configuration,
    Status,
    Keystores,
}

impl SupportGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Configuration => "configuration",
            Self::Status => "status",
            Self::Keystores => "keystores",
        }
    }
}
