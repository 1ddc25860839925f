//! Command implementations

use anyhow::Context;
use bytes::Bytes;
use std::path::Path;
use tracing::{debug, info, instrument};
use wsclient::{OperationResult, ParameterTree, RemoteDocument, Session, WebServiceType};

/// Run one web service and write its result to `output`.
///
/// For the URL converter `input` is the page URL, otherwise a local file.
/// REST sessions upload the file first; SOAP sessions send it inline.
#[instrument(skip(session, params))]
pub async fn convert(
    session: &Session,
    service: WebServiceType,
    input: &str,
    output: &Path,
    params: Option<&str>,
) -> anyhow::Result<()> {
    let mut invoker = session.create_web_service_instance(service)?;
    if let Some(json) = params {
        invoker.set_operation_parameters(ParameterTree::from_json(json)?)?;
    }

    let result = if service.requires_input() {
        let (data, file_name) = read_file(Path::new(input)).await?;
        invoker.process_content(data, &file_name).await?
    } else {
        invoker.operation_parameters_mut().set("url", input)?;
        invoker.process(None).await?
    };

    let data = match result {
        OperationResult::Document(document) => {
            debug!(document_id = %document.document_id(), "Downloading result");
            session
                .document_manager()
                .download_document(document.document_id())
                .await?
        }
        OperationResult::Bytes(data) => data,
    };

    tokio::fs::write(output, &data)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Wrote {} bytes to {}", data.len(), output.display());
    Ok(())
}

/// Upload a local file and return the server's view of it
#[instrument(skip(session))]
pub async fn upload(session: &Session, input: &Path) -> anyhow::Result<RemoteDocument> {
    upload_file(session, input).await
}

/// Server status report
pub async fn status(session: &Session) -> anyhow::Result<serde_json::Value> {
    Ok(session.administration_manager().fetch_server_status().await?)
}

/// Server log text
pub async fn log(session: &Session, range: Option<&str>) -> anyhow::Result<String> {
    Ok(session.administration_manager().fetch_log(range, None).await?)
}

async fn upload_file(session: &Session, path: &Path) -> anyhow::Result<RemoteDocument> {
    let (data, file_name) = read_file(path).await?;
    Ok(session.upload_document(data, &file_name).await?)
}

async fn read_file(path: &Path) -> anyhow::Result<(Bytes, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?
        .to_string();
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok((Bytes::from(data), file_name))
}
