//! Session lifecycle tests against a mock server.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wsclient::{
    KeyStorePassword, Session, SessionContext, SessionState, StaticTokenProvider, TransportVariant,
    UserProvider, VersionReq, WsclientError,
};

// =============================================================================
// Handshake
// =============================================================================

mod handshake {
    use super::*;

    #[tokio::test]
    async fn test_basic_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .and(header("authorization", BASIC_ADMIN))
            .and(body_json(json!({"createRefreshToken": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "session-token",
                "refreshToken": "refresh-token",
                "expiresIn": 3600,
                "sessionId": "server-session-7"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.id(), "server-session-7");
    }

    #[tokio::test]
    async fn test_client_generated_id() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        assert!(uuid_like(&session.id()), "{}", session.id());
    }

    fn uuid_like(id: &str) -> bool {
        id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .respond_with(ResponseTemplate::new(401).set_body_json(error_json(-5, "Unauthorized")))
            .mount(&server)
            .await;

        let err = Session::create(context(&server), UserProvider::new("admin", "wrong"))
            .await
            .unwrap_err();

        assert!(err.is_auth());
        assert_eq!(err.error_code(), WsclientError::AuthenticationFailure.code());
        assert_eq!(err.http_status(), Some(401));
    }

    #[tokio::test]
    async fn test_empty_password_fails_locally() {
        let server = MockServer::start().await;

        let err = Session::create(context(&server), UserProvider::new("admin", ""))
            .await
            .unwrap_err();

        assert_eq!(err.client_error(), WsclientError::InvalidAuthMaterial);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bearer_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .and(header("authorization", "Bearer oauth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "session-token",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::create(context(&server), StaticTokenProvider::new("oauth-token"))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let context = SessionContext::new("http://127.0.0.1:1/webPDF")
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2));

        let err = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap_err();

        assert!(err.is_server());
        assert!(err.is_unreachable());
        assert_eq!(err.error_code(), WsclientError::HttpIoError.code());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"token": "session-token", "expiresIn": 3600}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let context = context(&server).with_timeout(Duration::from_millis(500));
        let err = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap_err();

        assert!(err.is_server());
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_unbounded_expiry_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "session-token",
                "expiresIn": 10_000_000_000_000i64
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(rest("documents/list")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Active);
        // the token never counts as expiring, so no refresh precedes the call
        assert!(session.document_manager().synchronize().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_session_skips_login() {
        let server = MockServer::start().await;

        let session = Session::anonymous(context(&server)).await.unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

// =============================================================================
// Version check
// =============================================================================

mod version {
    use super::*;

    async fn mount_version(server: &MockServer, version: &str) {
        Mock::given(method("GET"))
            .and(path(rest("server/version")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": version})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_compatible_version() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_version(&server, "10.0.2").await;

        let context = context(&server).with_api_version(VersionReq::parse(">=10.0").unwrap());
        let session = Session::create(context, UserProvider::new("admin", "admin")).await;

        assert!(session.is_ok());
    }

    #[tokio::test]
    async fn test_incompatible_version() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_version(&server, "9.0.1").await;

        let context = context(&server).with_api_version(VersionReq::parse(">=10.0").unwrap());
        let err = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap_err();

        assert_eq!(err.client_error(), WsclientError::ProtocolMismatch);
    }

    #[tokio::test]
    async fn test_incompatible_version_releases_session() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_version(&server, "9.0.1").await;
        Mock::given(method("GET"))
            .and(path(rest("authentication/user/logout/")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let context = context(&server).with_api_version(VersionReq::parse(">=10.0").unwrap());
        let err = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap_err();

        assert_eq!(err.client_error(), WsclientError::ProtocolMismatch);
    }
}

// =============================================================================
// Token refresh
// =============================================================================

mod refresh {
    use super::*;

    async fn mount_short_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/login/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "short-token",
                "refreshToken": "refresh-token",
                "expiresIn": 1
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_once() {
        let server = MockServer::start().await;
        mount_short_login(&server).await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/refresh/")))
            .and(header("authorization", "Bearer refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "fresh-token",
                "refreshToken": "refresh-token-2",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(rest("documents/list")))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        let manager = session.document_manager();
        let (first, second) = tokio::join!(manager.synchronize(), manager.synchronize());
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_refresh() {
        let server = MockServer::start().await;
        mount_short_login(&server).await;
        Mock::given(method("POST"))
            .and(path(rest("authentication/user/refresh/")))
            .respond_with(ResponseTemplate::new(401).set_body_json(error_json(-5, "expired")))
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();
        let err = session.document_manager().synchronize().await.unwrap_err();

        assert!(err.is_auth());
        assert_eq!(err.error_code(), WsclientError::SessionRefreshFailure.code());
    }

    #[tokio::test]
    async fn test_resume_uses_given_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(rest("documents/list")))
            .and(header("authorization", "Bearer resumed-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([document_json("doc-1", "invoice", "pdf")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::resume(
            context(&server),
            UserProvider::new("admin", "admin"),
            "resumed-token",
        )
        .await
        .unwrap();

        assert!(session.document_manager().get_documents().is_empty());
        let documents = session.document_manager().synchronize().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert!(session.document_manager().contains_document("doc-1"));
    }
}

// =============================================================================
// Close
// =============================================================================

mod close {
    use super::*;

    #[tokio::test]
    async fn test_close_twice() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("authentication/user/logout/")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_swallows_logout_failure() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("authentication/user/logout/")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let session = Session::create(context(&server), UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let server = MockServer::start().await;
        let session = open_session(&server).await;
        session.close().await;

        let err = session
            .upload_document(b"data".to_vec(), "a.txt")
            .await
            .unwrap_err();
        assert!(err.is_client());
        assert!(err.is_illegal_state());

        let err = session
            .create_web_service_instance(wsclient::WebServiceType::Converter)
            .unwrap_err();
        assert!(err.is_illegal_state());
    }

    #[tokio::test]
    async fn test_soap_close_is_local() {
        let server = MockServer::start().await;
        let context = context(&server).with_transport(TransportVariant::Soap);

        let session = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap();
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

// =============================================================================
// Certificates
// =============================================================================

mod certificates {
    use super::*;

    fn certificates_json(accessible: bool) -> serde_json::Value {
        json!({
            "keyStores": [{"keyStoreName": "PRINCIPAL_admin", "isKeyStoreAccessible": accessible}],
            "certificates": [{"alias": "signer"}]
        })
    }

    #[tokio::test]
    async fn test_certificates_are_cached() {
        let server = MockServer::start().await;
        let session = open_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("authentication/user/certificates/")))
            .and(header("authorization", SESSION_TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(certificates_json(false)))
            .expect(1)
            .mount(&server)
            .await;

        let first = session.certificates().await.unwrap();
        let second = session.certificates().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.key_stores[0].key_store_name, "PRINCIPAL_admin");
        assert!(!first.key_stores[0].is_key_store_accessible);
        assert_eq!(first.certificates.len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_key_store_refreshes_cache() {
        let server = MockServer::start().await;
        let session = open_session(&server).await;
        Mock::given(method("GET"))
            .and(path(rest("authentication/user/certificates/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(certificates_json(false)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(rest("authentication/user/certificates/passwords/PRINCIPAL_admin")))
            .and(body_json(json!({"keyStorePassword": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(certificates_json(true)))
            .expect(1)
            .mount(&server)
            .await;

        assert!(!session.certificates().await.unwrap().key_stores[0].is_key_store_accessible);
        let updated = session
            .update_certificates("PRINCIPAL_admin", &KeyStorePassword::new("secret"))
            .await
            .unwrap();

        assert!(updated.key_stores[0].is_key_store_accessible);
        assert_eq!(session.certificates().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_unknown_key_store() {
        let server = MockServer::start().await;
        let session = open_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(rest("authentication/user/certificates/passwords/error")))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_json(-34, "Bad key store")))
            .mount(&server)
            .await;

        let err = session
            .update_certificates("error", &KeyStorePassword::new("secret"))
            .await
            .unwrap_err();

        assert!(err.is_server());
        assert_eq!(err.http_status(), Some(400));
    }

    #[tokio::test]
    async fn test_soap_sessions_have_no_certificates() {
        let server = MockServer::start().await;
        let context = context(&server).with_transport(TransportVariant::Soap);
        let session = Session::create(context, UserProvider::new("admin", "admin"))
            .await
            .unwrap();

        let err = session.certificates().await.unwrap_err();

        assert!(err.is_client());
        assert_eq!(err.client_error(), WsclientError::UnknownSessionType);
    }
}
