//! Administration manager tests against a mock server.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wsclient::{ConfigurationKind, DatastoreGroup, Session, SupportGroup, WsclientError};

async fn mount_user(server: &MockServer, is_admin: bool) {
    Mock::given(method("GET"))
        .and(path(rest("authentication/user/info/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userName": if is_admin { "admin" } else { "user" },
            "isAdmin": is_admin,
            "isUser": true,
            "isAnonymous": false
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn admin_session(server: &MockServer) -> Session {
    let session = open_session(server).await;
    mount_user(server, true).await;
    session
}

// =============================================================================
// Permissions
// =============================================================================

mod permissions {
    use super::*;

    #[tokio::test]
    async fn test_non_admin_rejected_before_call() {
        let server = MockServer::start().await;
        let session = open_session(&server).await;
        mount_user(&server, false).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/server/status")))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        let err = admin.fetch_server_status().await.unwrap_err();
        assert!(err.is_client());
        assert_eq!(err.client_error(), WsclientError::AdminPermissionError);

        // user info is cached for the session
        let err = admin.restart_server().await.unwrap_err();
        assert_eq!(err.client_error(), WsclientError::AdminPermissionError);
    }

    #[tokio::test]
    async fn test_user_is_cached() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;

        let first = session.user().await.unwrap();
        let second = session.user().await.unwrap();

        assert!(first.is_admin);
        assert_eq!(first, second);
    }
}

// =============================================================================
// Server
// =============================================================================

mod server {
    use super::*;

    #[tokio::test]
    async fn test_fetch_status() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/server/status")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "server": {"status": "ok"},
                "webservices": {"converter": {"status": "ok"}}
            })))
            .mount(&server)
            .await;

        let status = session.administration_manager().fetch_server_status().await.unwrap();
        assert_eq!(status["server"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_fetch_log_range() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/server/log")))
            .and(header("range", "bytes=0-10"))
            .respond_with(ResponseTemplate::new(206).set_body_string("INFO start"))
            .expect(1)
            .mount(&server)
            .await;

        let log = session
            .administration_manager()
            .fetch_log(Some("0-10"), None)
            .await
            .unwrap();
        assert_eq!(log, "INFO start");
    }

    #[tokio::test]
    async fn test_support_package() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/server/support")))
            .and(query_param("group", "logs,configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .mount(&server)
            .await;

        let package = session
            .administration_manager()
            .build_support_package(&[SupportGroup::Logs, SupportGroup::Configuration], None, None)
            .await
            .unwrap();
        assert!(package.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_session_table_and_close() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/session/table")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sessions": [{"sessionId": "other-1", "userName": "user"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(rest("admin/session/other-1/close")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        let table = admin.fetch_session_table().await.unwrap();
        let id = table["sessions"][0]["sessionId"].as_str().unwrap();
        admin.close_session(id).await.unwrap();
    }
}

// =============================================================================
// Configuration and data store
// =============================================================================

mod configuration {
    use super::*;

    #[tokio::test]
    async fn test_update_and_validate() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        let configuration = json!({"log": {"level": "debug"}});
        Mock::given(method("POST"))
            .and(path(rest("admin/configuration/")))
            .and(body_json(json!({
                "configuration": {"log": {"level": "debug"}},
                "configurationChecks": [],
                "configurationMode": "validate",
                "configurationType": "log"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"configuration": {}, "messages": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(rest("admin/configuration/")))
            .and(wiremock::matchers::body_partial_json(json!({"configurationMode": "write"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(configuration.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        admin
            .validate_configuration(ConfigurationKind::Log, &configuration, &[])
            .await
            .unwrap();
        let stored = admin
            .update_configuration(ConfigurationKind::Log, &configuration, &[])
            .await
            .unwrap();
        assert_eq!(stored, configuration);
    }

    #[tokio::test]
    async fn test_executable_check() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        let configuration = json!({"executables": {"ghostscript": "/usr/bin/gs"}});
        Mock::given(method("POST"))
            .and(path(rest("admin/configuration/")))
            .and(body_json(json!({
                "configuration": {"executables": {"ghostscript": "/usr/bin/gs"}},
                "configurationChecks": [{"checkType": "executable", "executables": ["ghostscript"]}],
                "configurationMode": "validate",
                "configurationType": "application"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": []})))
            .expect(1)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        let result = admin
            .test_executables(&configuration, &["ghostscript".to_string()])
            .await
            .unwrap();
        assert_eq!(result["messages"], json!([]));

        let err = admin.test_executables(&configuration, &[]).await.unwrap_err();
        assert_eq!(err.client_error(), WsclientError::InvalidParameters);
    }

    #[tokio::test]
    async fn test_provider_and_cluster_sections() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/configuration/provider")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"userManagement": {}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(rest("admin/configuration/cluster")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"enabled": false})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(rest("admin/cluster/status")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"members": []})))
            .expect(1)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        let provider = admin.fetch_configuration(ConfigurationKind::Provider).await.unwrap();
        assert!(provider.get("userManagement").is_some());
        let cluster = admin.fetch_configuration(ConfigurationKind::Cluster).await.unwrap();
        assert_eq!(cluster["enabled"], false);
        let status = admin.fetch_cluster_status().await.unwrap();
        assert_eq!(status["members"], json!([]));
    }

    #[tokio::test]
    async fn test_datastore() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/datastore/css")))
            .and(query_param("name", "portal.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body {}"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(rest("admin/datastore/css")))
            .and(query_param("name", "portal.css"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let admin = session.administration_manager();
        let css = admin
            .fetch_datastore(DatastoreGroup::Css, Some("portal.css"))
            .await
            .unwrap();
        assert_eq!(&css[..], b"body {}");
        admin
            .delete_datastore(DatastoreGroup::Css, Some("portal.css"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_configuration() {
        let server = MockServer::start().await;
        let session = admin_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("admin/configuration/server")))
            .respond_with(ResponseTemplate::new(403).set_body_json(error_json(-60, "Forbidden")))
            .mount(&server)
            .await;

        let err = session
            .administration_manager()
            .fetch_configuration(ConfigurationKind::Server)
            .await
            .unwrap_err();

        assert!(err.is_server());
        assert_eq!(err.error_code(), -60);
        assert_eq!(err.http_status(), Some(403));
    }
}
