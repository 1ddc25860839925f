//! Document manager and document handles
//!
//! The manager keeps a local view of the documents stored on the server for
//! one session. Every mutation is a server round-trip first; the local cache
//! is only updated once the server confirmed the call.

use crate::error::{ResultError, Result, WsclientError};
use crate::http::{read_bytes, read_json, ApiRequest, Connection};
use crate::types::{
    DocumentFile, ExtractOptions, FileCompress, FileUpdate, HistoryEntry, InfoType, RemoteDocument,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument};

#[derive(Default)]
struct DocumentCache {
    entries: HashMap<String, (u64, RemoteDocument)>,
    next_seq: u64,
}

impl DocumentCache {
    /// Insert or refresh a document; `None` leaves a known history untouched
    fn upsert(&mut self, file: DocumentFile, history: Option<Vec<HistoryEntry>>) -> RemoteDocument {
        let (_, doc) = match self.entries.entry(file.document_id.clone()) {
            Entry::Occupied(entry) => {
                let entry = entry.into_mut();
                entry.1.file = file;
                entry
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                entry.insert((seq, RemoteDocument::new(file)))
            }
        };
        if let Some(history) = history {
            doc.history = history;
        }
        doc.clone()
    }

    fn get(&self, document_id: &str) -> Result<RemoteDocument> {
        self.entries
            .get(document_id)
            .map(|(_, doc)| doc.clone())
            .ok_or_else(|| ResultError::not_found(document_id))
    }

    fn ordered(&self) -> Vec<RemoteDocument> {
        let mut docs: Vec<_> = self.entries.values().collect();
        docs.sort_by_key(|(seq, _)| *seq);
        docs.into_iter().map(|(_, doc)| doc.clone()).collect()
    }
}

/// Tracks the server-side documents of one session
pub struct DocumentManager {
    conn: Arc<Connection>,
    this: Weak<DocumentManager>,
    cache: Mutex<DocumentCache>,
    history_active: AtomicBool,
}

impl DocumentManager {
    pub(crate) fn new(conn: Arc<Connection>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            conn,
            this: this.clone(),
            cache: Mutex::new(DocumentCache::default()),
            history_active: AtomicBool::new(false),
        })
    }

    // ==================== Local view ====================

    /// All tracked documents in the order they became known
    pub fn get_documents(&self) -> Vec<RemoteDocument> {
        self.cache.lock().ordered()
    }

    /// A tracked document; fails once the session is closed
    pub fn get_document(&self, document_id: &str) -> Result<RemoteDocument> {
        self.conn.ensure_active()?;
        self.cache.lock().get(document_id)
    }

    /// Whether a document is tracked
    pub fn contains_document(&self, document_id: &str) -> bool {
        self.cache.lock().entries.contains_key(document_id)
    }

    /// A handle to a tracked document
    pub fn handle(&self, document_id: &str) -> Result<DocumentHandle> {
        if !self.contains_document(document_id) {
            return Err(ResultError::not_found(document_id));
        }
        Ok(DocumentHandle {
            document_id: document_id.to_string(),
            manager: self.this.clone(),
        })
    }

    pub fn is_history_active(&self) -> bool {
        self.history_active.load(Ordering::SeqCst)
    }

    // ==================== Server operations ====================

    /// Upload a document to the server's document store
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_document(&self, data: Bytes, file_name: &str) -> Result<RemoteDocument> {
        self.conn.ensure_rest()?;
        if file_name.trim().is_empty() {
            return Err(ResultError::client(WsclientError::InvalidSourceDocument)
                .with_detail("file name must not be empty"));
        }

        let request = ApiRequest::post("documents")
            .query("history", self.is_history_active())
            .multipart(file_name, data);
        let file: DocumentFile = read_json(self.conn.execute(request).await?).await?;
        let document = self.register(file).await?;
        debug!("Uploaded {} as {}", file_name, document.document_id());
        Ok(document)
    }

    /// Download the full content of a document
    #[instrument(skip(self))]
    pub async fn download_document(&self, document_id: &str) -> Result<Bytes> {
        self.tracked(document_id)?;
        let request = ApiRequest::get(format!("documents/{}", document_id))
            .header(reqwest::header::ACCEPT, "application/octet-stream");
        read_bytes(self.conn.execute(request).await?).await
    }

    /// Rename a document
    #[instrument(skip(self))]
    pub async fn rename_document(&self, document_id: &str, file_name: &str) -> Result<RemoteDocument> {
        self.tracked(document_id)?;
        let request = ApiRequest::post(format!("documents/{}/update", document_id)).json(
            &FileUpdate {
                file_name: file_name.to_string(),
            },
        )?;
        let file: DocumentFile = read_json(self.conn.execute(request).await?).await?;
        self.commit(document_id, file, None)
    }

    /// Delete a document from the server and stop tracking it
    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.tracked(document_id)?;
        self.conn
            .execute(ApiRequest::delete(format!("documents/{}", document_id)))
            .await?;
        self.cache.lock().entries.remove(document_id);
        Ok(())
    }

    /// Compress documents into a new archive document
    #[instrument(skip(self))]
    pub async fn compress_documents(
        &self,
        document_ids: &[&str],
        archive_name: &str,
    ) -> Result<RemoteDocument> {
        let response = self.compress(document_ids, archive_name, true).await?;
        let file: DocumentFile = read_json(response).await?;
        self.register(file).await
    }

    /// Compress documents and return the archive without storing it
    #[instrument(skip(self))]
    pub async fn download_archive(&self, document_ids: &[&str], archive_name: &str) -> Result<Bytes> {
        let response = self.compress(document_ids, archive_name, false).await?;
        read_bytes(response).await
    }

    async fn compress(
        &self,
        document_ids: &[&str],
        archive_name: &str,
        store_archive: bool,
    ) -> Result<reqwest::Response> {
        self.conn.ensure_rest()?;
        if document_ids.is_empty() {
            return Err(ResultError::invalid_parameters("no documents to compress"));
        }
        {
            let cache = self.cache.lock();
            for id in document_ids {
                cache.get(id)?;
            }
        }

        let request = ApiRequest::post("documents/compress").json(&FileCompress {
            document_id_list: document_ids.iter().map(|id| id.to_string()).collect(),
            archive_file_name: archive_name.to_string(),
            store_archive,
        })?;
        self.conn.execute(request).await
    }

    /// Extract an archive document; every extracted file becomes a tracked document
    #[instrument(skip(self, options))]
    pub async fn extract_document(
        &self,
        document_id: &str,
        options: &ExtractOptions,
    ) -> Result<Vec<RemoteDocument>> {
        self.tracked(document_id)?;
        let request = ApiRequest::post(format!("documents/{}/extract", document_id)).json(options)?;
        let files: Vec<DocumentFile> = read_json(self.conn.execute(request).await?).await?;
        for file in &files {
            validate_result(file)?;
        }
        let mut histories = Vec::with_capacity(files.len());
        for file in &files {
            histories.push(self.history_if_active(&file.document_id).await?);
        }

        // all or nothing
        let mut cache = self.cache.lock();
        Ok(files
            .into_iter()
            .zip(histories)
            .map(|(file, history)| cache.upsert(file, history))
            .collect())
    }

    /// Fetch a single file from an archive document
    #[instrument(skip(self))]
    pub async fn extract_archive_file(&self, document_id: &str, archive_path: &str) -> Result<Bytes> {
        self.tracked(document_id)?;
        let request = ApiRequest::get(format!(
            "documents/{}/archive/{}",
            document_id,
            archive_path.trim_start_matches('/')
        ));
        read_bytes(self.conn.execute(request).await?).await
    }

    /// Replace the content of a document
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn update_document(
        &self,
        document_id: &str,
        data: Bytes,
        file_name: &str,
    ) -> Result<RemoteDocument> {
        self.tracked(document_id)?;
        let request = ApiRequest::put(format!("documents/{}", document_id))
            .query("history", self.is_history_active())
            .multipart(file_name, data);
        let file: DocumentFile = read_json(self.conn.execute(request).await?).await?;
        validate_result(&file)?;
        let history = self.history_if_active(document_id).await?;
        self.commit(document_id, file, history)
    }

    /// Set or remove the passwords protecting a document
    #[instrument(skip(self, passwords))]
    pub async fn update_document_security(
        &self,
        document_id: &str,
        passwords: &serde_json::Value,
    ) -> Result<RemoteDocument> {
        self.tracked(document_id)?;
        let request =
            ApiRequest::put(format!("documents/{}/security/password", document_id)).json(passwords)?;
        let file: DocumentFile = read_json(self.conn.execute(request).await?).await?;
        self.commit(document_id, file, None)
    }

    /// Query information about a document
    #[instrument(skip(self))]
    pub async fn get_document_info(
        &self,
        document_id: &str,
        info_type: InfoType,
    ) -> Result<serde_json::Value> {
        self.tracked(document_id)?;
        let request =
            ApiRequest::get(format!("documents/{}/info/{}", document_id, info_type.as_str()));
        read_json(self.conn.execute(request).await?).await
    }

    /// Re-read the server's document list
    #[instrument(skip(self))]
    pub async fn synchronize(&self) -> Result<Vec<RemoteDocument>> {
        self.conn.ensure_rest()?;
        let files: Vec<DocumentFile> =
            read_json(self.conn.execute(ApiRequest::get("documents/list")).await?).await?;
        for file in &files {
            validate_result(file)?;
        }
        let mut histories = Vec::with_capacity(files.len());
        for file in &files {
            histories.push(self.history_if_active(&file.document_id).await?);
        }

        let mut cache = self.cache.lock();
        cache
            .entries
            .retain(|id, _| files.iter().any(|f| &f.document_id == id));
        for (file, history) in files.into_iter().zip(histories) {
            cache.upsert(file, history);
        }
        Ok(cache.ordered())
    }

    // ==================== History ====================

    /// Enable or disable history tracking
    #[instrument(skip(self))]
    pub async fn set_history_active(&self, active: bool) -> Result<()> {
        if active {
            self.conn.ensure_rest()?;
            for doc in self.get_documents() {
                self.pull_history(doc.document_id()).await?;
            }
        } else {
            for (_, doc) in self.cache.lock().entries.values_mut() {
                doc.history.clear();
            }
        }
        self.history_active.store(active, Ordering::SeqCst);
        Ok(())
    }

    /// History of a document, as currently reported by the server
    #[instrument(skip(self))]
    pub async fn get_document_history(&self, document_id: &str) -> Result<Vec<HistoryEntry>> {
        self.require_history()?;
        self.tracked(document_id)?;
        Ok(self.pull_history(document_id).await?.history)
    }

    /// One history entry of a document
    #[instrument(skip(self))]
    pub async fn get_document_history_entry(
        &self,
        document_id: &str,
        entry_id: i64,
    ) -> Result<HistoryEntry> {
        self.get_document_history(document_id)
            .await?
            .into_iter()
            .find(|entry| entry.id == entry_id)
            .ok_or_else(|| {
                ResultError::client(WsclientError::InvalidHistoryData)
                    .with_detail(format!("no history entry {} for '{}'", entry_id, document_id))
            })
    }

    /// Update a history entry, e.g. to make it the active one.
    ///
    /// The server decides which entry ends up active; the full history is
    /// re-read afterwards.
    #[instrument(skip(self, entry), fields(entry_id = entry.id))]
    pub async fn update_document_history(
        &self,
        document_id: &str,
        entry: &HistoryEntry,
    ) -> Result<HistoryEntry> {
        self.require_history()?;
        self.tracked(document_id)?;
        let request =
            ApiRequest::put(format!("documents/{}/history/{}", document_id, entry.id)).json(entry)?;
        let updated: HistoryEntry = read_json(self.conn.execute(request).await?).await?;

        {
            let mut cache = self.cache.lock();
            if let Some((_, doc)) = cache.entries.get_mut(document_id) {
                doc.upsert_history(updated.clone());
            }
        }
        self.pull_history(document_id).await?;
        Ok(updated)
    }

    // ==================== Internal ====================

    /// Track a document produced by a web service call
    pub(crate) async fn synchronize_document(&self, file: DocumentFile) -> Result<RemoteDocument> {
        self.register(file).await
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Track a server-side document together with its history.
    ///
    /// Nothing is cached unless the history could be read as well.
    async fn register(&self, file: DocumentFile) -> Result<RemoteDocument> {
        validate_result(&file)?;
        let history = self.history_if_active(&file.document_id).await?;
        Ok(self.cache.lock().upsert(file, history))
    }

    fn commit(
        &self,
        document_id: &str,
        file: DocumentFile,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<RemoteDocument> {
        validate_result(&file)?;
        let mut cache = self.cache.lock();
        match cache.entries.get_mut(document_id) {
            Some((_, doc)) => {
                doc.file = file;
                if let Some(history) = history {
                    doc.history = history;
                }
                Ok(doc.clone())
            }
            // deleted concurrently
            None => Err(ResultError::not_found(document_id)),
        }
    }

    fn tracked(&self, document_id: &str) -> Result<()> {
        self.conn.ensure_rest()?;
        if self.contains_document(document_id) {
            Ok(())
        } else {
            Err(ResultError::not_found(document_id))
        }
    }

    fn require_history(&self) -> Result<()> {
        if self.is_history_active() {
            Ok(())
        } else {
            Err(ResultError::client(WsclientError::InvalidHistoryData)
                .with_detail("history tracking is not active"))
        }
    }

    async fn history_if_active(&self, document_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        if self.is_history_active() {
            Ok(Some(self.fetch_history(document_id).await?))
        } else {
            Ok(None)
        }
    }

    async fn fetch_history(&self, document_id: &str) -> Result<Vec<HistoryEntry>> {
        let request = ApiRequest::get(format!("documents/{}/history", document_id));
        let mut history: Vec<HistoryEntry> = read_json(self.conn.execute(request).await?).await?;
        history.sort_by_key(|entry| entry.id);
        Ok(history)
    }

    async fn pull_history(&self, document_id: &str) -> Result<RemoteDocument> {
        let history = self.fetch_history(document_id).await?;
        let mut cache = self.cache.lock();
        match cache.entries.get_mut(document_id) {
            Some((_, doc)) => {
                doc.history = history;
                Ok(doc.clone())
            }
            None => Err(ResultError::not_found(document_id)),
        }
    }
}

fn validate_result(file: &DocumentFile) -> Result<()> {
    if file.document_id.is_empty() {
        return Err(ResultError::client(WsclientError::InvalidResultDocument)
            .with_detail("server response carries no document id"));
    }
    Ok(())
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("documents", &self.cache.lock().entries.len())
            .field("history_active", &self.is_history_active())
            .finish()
    }
}

/// Non-owning reference to one tracked document.
///
/// Handles stay valid while the owning session is active and the document is
/// tracked; afterwards every operation fails.
#[derive(Clone)]
pub struct DocumentHandle {
    document_id: String,
    manager: Weak<DocumentManager>,
}

impl DocumentHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    fn manager(&self) -> Result<Arc<DocumentManager>> {
        let manager = self.manager.upgrade().ok_or_else(ResultError::session_closed)?;
        manager.connection().ensure_active()?;
        Ok(manager)
    }

    /// Current local view of the document
    pub fn document(&self) -> Result<RemoteDocument> {
        self.manager()?.get_document(&self.document_id)
    }

    pub async fn download(&self) -> Result<Bytes> {
        self.manager()?.download_document(&self.document_id).await
    }

    pub async fn rename(&self, file_name: &str) -> Result<RemoteDocument> {
        self.manager()?.rename_document(&self.document_id, file_name).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.manager()?.delete_document(&self.document_id).await
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.manager()?.get_document_history(&self.document_id).await
    }

    pub async fn update_history(&self, entry: &HistoryEntry) -> Result<HistoryEntry> {
        self.manager()?
            .update_document_history(&self.document_id, entry)
            .await
    }

    pub async fn extract(&self, options: &ExtractOptions) -> Result<Vec<RemoteDocument>> {
        self.manager()?.extract_document(&self.document_id, options).await
    }

    pub async fn info(&self, info_type: InfoType) -> Result<serde_json::Value> {
        self.manager()?.get_document_info(&self.document_id, info_type).await
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("document_id", &self.document_id)
            .finish()
    }
}
