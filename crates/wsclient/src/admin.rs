//! Server administration

use crate::error::{ResultError, Result, WsclientError};
use crate::http::{read_bytes, read_json, ApiRequest, Connection};
use crate::types::{ConfigurationKind, DatastoreGroup, SupportGroup};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationUpdate<'a> {
    configuration: &'a Value,
    configuration_checks: Value,
    configuration_mode: &'static str,
    configuration_type: &'static str,
}

/// Administrative operations; every call requires an admin user
pub struct AdministrationManager {
    conn: Arc<Connection>,
}

impl AdministrationManager {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    async fn require_admin(&self) -> Result<()> {
        let user = self.conn.user().await?;
        if user.is_admin {
            Ok(())
        } else {
            Err(ResultError::client(WsclientError::AdminPermissionError)
                .with_detail(format!("user '{}' is not an administrator", user.user_name)))
        }
    }

    // ==================== Log ====================

    /// Size of the server log in bytes
    #[instrument(skip(self))]
    pub async fn fetch_log_length(&self, date: Option<NaiveDate>) -> Result<u64> {
        self.require_admin().await?;
        let response = self.conn.execute(with_date(ApiRequest::head("admin/server/log"), date)).await?;
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                ResultError::client(WsclientError::InvalidHttpMessageContent)
                    .with_detail("log length not reported")
            })
    }

    /// Server log text, optionally a byte range such as `0-1023` or `-500`
    #[instrument(skip(self))]
    pub async fn fetch_log(&self, range: Option<&str>, date: Option<NaiveDate>) -> Result<String> {
        self.require_admin().await?;
        let mut request = with_date(ApiRequest::get("admin/server/log"), date)
            .header(header::ACCEPT, "text/plain");
        if let Some(range) = range {
            request = request.header(header::RANGE, format!("bytes={}", range));
        }
        let body = read_bytes(self.conn.execute(request).await?).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    // ==================== Server ====================

    /// Server status report
    #[instrument(skip(self))]
    pub async fn fetch_server_status(&self) -> Result<Value> {
        self.require_admin().await?;
        read_json(self.conn.execute(ApiRequest::get("admin/server/status")).await?).await
    }

    /// Status of the server cluster
    #[instrument(skip(self))]
    pub async fn fetch_cluster_status(&self) -> Result<Value> {
        self.require_admin().await?;
        read_json(self.conn.execute(ApiRequest::get("admin/cluster/status")).await?).await
    }

    /// Build a support package archive
    #[instrument(skip(self))]
    pub async fn build_support_package(
        &self,
        groups: &[SupportGroup],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Bytes> {
        self.require_admin().await?;
        let mut request = ApiRequest::get("admin/server/support")
            .header(header::ACCEPT, "application/octet-stream");
        if !groups.is_empty() {
            let groups: Vec<&str> = groups.iter().map(SupportGroup::as_str).collect();
            request = request.query("group", groups.join(","));
        }
        if let Some(start) = start {
            request = request.query("start", start.timestamp_millis());
        }
        if let Some(end) = end {
            request = request.query("end", end.timestamp_millis());
        }
        read_bytes(self.conn.execute(request).await?).await
    }

    /// Restart the server
    #[instrument(skip(self))]
    pub async fn restart_server(&self) -> Result<()> {
        self.require_admin().await?;
        self.conn.execute(ApiRequest::get("admin/server/restart")).await?;
        debug!("Server restart requested");
        Ok(())
    }

    // ==================== Configuration ====================

    #[instrument(skip(self))]
    pub async fn fetch_configuration(&self, kind: ConfigurationKind) -> Result<Value> {
        self.require_admin().await?;
        let request = ApiRequest::get(format!("admin/configuration/{}", kind.as_str()));
        read_json(self.conn.execute(request).await?).await
    }

    /// Store a configuration section; the server returns the resulting section
    #[instrument(skip(self, configuration))]
    pub async fn update_configuration(
        &self,
        kind: ConfigurationKind,
        configuration: &Value,
        checks: &[String],
    ) -> Result<Value> {
        self.post_configuration(kind, configuration, checks, "write").await
    }

    /// Validate a configuration section without storing it
    #[instrument(skip(self, configuration))]
    pub async fn validate_configuration(
        &self,
        kind: ConfigurationKind,
        configuration: &Value,
        checks: &[String],
    ) -> Result<Value> {
        self.post_configuration(kind, configuration, checks, "validate").await
    }

    /// Let the server check that the named external executables can be run
    /// with the given application configuration
    #[instrument(skip(self, configuration))]
    pub async fn test_executables(
        &self,
        configuration: &Value,
        executables: &[String],
    ) -> Result<Value> {
        if executables.is_empty() {
            return Err(ResultError::invalid_parameters("no executables to test"));
        }
        let checks = json!([{"checkType": "executable", "executables": executables}]);
        self.post_configuration(ConfigurationKind::Application, configuration, checks, "validate")
            .await
    }

    async fn post_configuration(
        &self,
        kind: ConfigurationKind,
        configuration: &Value,
        checks: impl Into<Value>,
        mode: &'static str,
    ) -> Result<Value> {
        self.require_admin().await?;
        let request = ApiRequest::post("admin/configuration/").json(&ConfigurationUpdate {
            configuration,
            configuration_checks: checks.into(),
            configuration_mode: mode,
            configuration_type: kind.as_str(),
        })?;
        read_json(self.conn.execute(request).await?).await
    }

    // ==================== Data store ====================

    #[instrument(skip(self))]
    pub async fn fetch_datastore(&self, group: DatastoreGroup, name: Option<&str>) -> Result<Bytes> {
        self.require_admin().await?;
        let request = with_name(ApiRequest::get(format!("admin/datastore/{}", group.as_str())), name);
        read_bytes(self.conn.execute(request).await?).await
    }

    /// Replace a data store entry
    #[instrument(skip(self, entry))]
    pub async fn update_datastore(&self, entry: &Value) -> Result<Value> {
        self.require_admin().await?;
        let request = ApiRequest::post("admin/datastore/").json(entry)?;
        read_json(self.conn.execute(request).await?).await
    }

    #[instrument(skip(self))]
    pub async fn delete_datastore(&self, group: DatastoreGroup, name: Option<&str>) -> Result<()> {
        self.require_admin().await?;
        let request =
            with_name(ApiRequest::delete(format!("admin/datastore/{}", group.as_str())), name);
        self.conn.execute(request).await?;
        Ok(())
    }

    // ==================== Sessions ====================

    /// Table of the sessions currently open on the server
    #[instrument(skip(self))]
    pub async fn fetch_session_table(&self) -> Result<Value> {
        self.require_admin().await?;
        read_json(self.conn.execute(ApiRequest::get("admin/session/table")).await?).await
    }

    /// Close another session on the server
    #[instrument(skip(self))]
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        self.require_admin().await?;
        if session_id.is_empty() {
            return Err(ResultError::invalid_parameters("session id must not be empty"));
        }
        self.conn
            .execute(ApiRequest::post(format!("admin/session/{}/close", session_id)))
            .await?;
        Ok(())
    }
}

fn with_date(request: ApiRequest, date: Option<NaiveDate>) -> ApiRequest {
    match date {
        Some(date) => request.query("date", date.format("%Y-%m-%d")),
        None => request,
    }
}

fn with_name(request: ApiRequest, name: Option<&str>) -> ApiRequest {
    match name {
        Some(name) => request.query("name", name),
        None => request,
    }
}

impl std::fmt::Debug for AdministrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdministrationManager").finish_non_exhaustive()
    }
}
