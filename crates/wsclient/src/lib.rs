//! # wsclient
//!
//! A client SDK for remote document-processing servers.
//!
//! ## Features
//!
//! - **Sessions**: Login, token refresh and logout over REST, or SOAP envelopes
//! - **Document Store**: Upload, download, rename, compress and extract server-side documents
//! - **Web Services**: Converter, toolbox, PDF/A, OCR, signature, URL converter and barcode calls
//! - **Administration**: Logs, status, configuration, data store and session table
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsclient::{Session, SessionContext, UserProvider, WebServiceType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = SessionContext::new("http://localhost:8080/webPDF")?;
//!     let session = Session::create(context, UserProvider::new("admin", "admin")).await?;
//!
//!     // Upload a source document
//!     let source = session
//!         .upload_document(std::fs::read("lorem-ipsum.docx")?, "lorem-ipsum.docx")
//!         .await?;
//!
//!     // Convert the first five pages to PDF
//!     let mut converter = session.create_web_service_instance(WebServiceType::Converter)?;
//!     converter.operation_parameters_mut().set("pages", "1-5")?;
//!     let result = converter.process(Some(&source)).await?;
//!
//!     if let Some(document) = result.document() {
//!         let pdf = session
//!             .document_manager()
//!             .download_document(document.document_id())
//!             .await?;
//!         std::fs::write("lorem-ipsum.pdf", &pdf)?;
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

mod admin;
mod auth;
mod config;
mod documents;
mod error;
mod http;
mod session;
mod soap;
mod types;
mod webservice;

pub use admin::AdministrationManager;
pub use auth::{
    AnonymousProvider, CertificateProvider, ClientCredentialsProvider, Credential,
    CredentialProvider, SessionInfo, StaticTokenProvider, UserProvider,
};
pub use config::{ProxyConfig, ProxyCredentials, SessionContext, TlsOptions, TlsProtocol, TransportVariant};
pub use documents::{DocumentHandle, DocumentManager};
pub use error::{BoxError, ResultError, Result, WsclientError};
pub use http::SessionState;
pub use session::Session;
pub use types::*;
pub use webservice::{ParameterSchema, ParameterTree, WebServiceInvoker, WebServiceType};

// Re-exported so callers can implement providers and version checks
pub use async_trait::async_trait;
pub use semver::VersionReq;
