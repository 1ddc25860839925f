//! Session lifecycle

use crate::admin::AdministrationManager;
use crate::auth::{AnonymousProvider, CredentialProvider, SessionInfo};
use crate::config::SessionContext;
use crate::documents::DocumentManager;
use crate::error::Result;
use crate::http::{Connection, SessionState, SessionToken};
use crate::types::{KeyStorePassword, RemoteDocument, UserCertificates, UserCredentials};
use crate::webservice::{WebServiceInvoker, WebServiceType};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, instrument};

struct SessionInner {
    conn: Arc<Connection>,
    documents: Arc<DocumentManager>,
    admin: AdministrationManager,
}

/// One authenticated connection to a document-processing server.
///
/// Cloning is cheap; all clones share the same connection, document manager
/// and administration manager.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session and run the authentication handshake
    #[instrument(skip(context, provider), fields(url = %context.server_url, transport = ?context.transport))]
    pub async fn create(
        context: SessionContext,
        provider: impl CredentialProvider + 'static,
    ) -> Result<Self> {
        let provider: Arc<dyn CredentialProvider> = Arc::new(provider);
        let info = session_info(&context);
        let credential = provider.provide(&info).await?;

        let conn = Connection::new(context, info, provider, &credential)?;
        conn.handshake(credential).await?;

        let session = Self::from_connection(conn);
        info!("Session {} opened", session.id());
        Ok(session)
    }

    /// Open an anonymous session
    pub async fn anonymous(context: SessionContext) -> Result<Self> {
        Self::create(context, AnonymousProvider).await
    }

    /// Continue a session from an already issued session token.
    ///
    /// No login round-trip is made and the document list starts empty; use
    /// [`DocumentManager::synchronize`] to pick up the server's documents.
    pub async fn resume(
        context: SessionContext,
        provider: impl CredentialProvider + 'static,
        token: impl Into<String>,
    ) -> Result<Self> {
        let provider: Arc<dyn CredentialProvider> = Arc::new(provider);
        let info = session_info(&context);
        let credential = provider.provide(&info).await?;

        let conn = Connection::new(context, info, provider, &credential)?;
        conn.resume(SessionToken::new(token));

        let session = Self::from_connection(conn);
        info!("Session {} resumed", session.id());
        Ok(session)
    }

    fn from_connection(conn: Connection) -> Self {
        let conn = Arc::new(conn);
        Self {
            inner: Arc::new(SessionInner {
                documents: DocumentManager::new(conn.clone()),
                admin: AdministrationManager::new(conn.clone()),
                conn,
            }),
        }
    }

    /// Close the session. Calling it again does nothing.
    #[instrument(skip(self), fields(session = %self.id()))]
    pub async fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.inner.conn.close().await;
        info!("Session closed");
    }

    /// Session id, as issued by the server or generated locally
    pub fn id(&self) -> String {
        self.inner.conn.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.inner.conn.state()
    }

    pub fn context(&self) -> &SessionContext {
        self.inner.conn.context()
    }

    /// The user the session is logged in as
    pub async fn user(&self) -> Result<UserCredentials> {
        self.inner.conn.user().await
    }

    /// Key stores and certificates available to the session's user
    pub async fn certificates(&self) -> Result<UserCertificates> {
        self.inner.conn.certificates().await
    }

    /// Unlock a key store; returns the refreshed certificate view
    pub async fn update_certificates(
        &self,
        key_store: &str,
        password: &KeyStorePassword,
    ) -> Result<UserCertificates> {
        self.inner.conn.update_certificates(key_store, password).await
    }

    /// Shorthand for [`DocumentManager::upload_document`]
    pub async fn upload_document(&self, data: impl Into<Bytes>, file_name: &str) -> Result<RemoteDocument> {
        self.inner
            .documents
            .upload_document(data.into(), file_name)
            .await
    }

    /// Bind a new invoker for a service to this session
    pub fn create_web_service_instance(&self, service: WebServiceType) -> Result<WebServiceInvoker> {
        self.inner.conn.ensure_active()?;
        Ok(WebServiceInvoker::new(self.clone(), service))
    }

    pub fn document_manager(&self) -> &DocumentManager {
        &self.inner.documents
    }

    pub fn administration_manager(&self) -> &AdministrationManager {
        &self.inner.admin
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.inner.conn
    }
}

fn session_info(context: &SessionContext) -> SessionInfo {
    SessionInfo {
        id: uuid::Uuid::new_v4().to_string(),
        server_url: context.server_url.clone(),
        transport: context.transport,
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("url", &self.context().server_url.as_str())
            .finish()
    }
}
