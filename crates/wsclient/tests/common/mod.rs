//! Shared mock server setup for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wsclient::{Session, SessionContext, UserProvider};

pub const REST: &str = "/webPDF/rest";
pub const BASIC_ADMIN: &str = "Basic YWRtaW46YWRtaW4=";
pub const SESSION_TOKEN: &str = "Bearer session-token";

pub fn rest(suffix: &str) -> String {
    format!("{}/{}", REST, suffix)
}

pub fn context(server: &MockServer) -> SessionContext {
    SessionContext::new(&format!("{}/webPDF", server.uri())).unwrap()
}

pub fn document_json(id: &str, name: &str, extension: &str) -> Value {
    json!({
        "documentId": id,
        "fileName": name,
        "fileExtension": extension,
        "mimeType": "application/octet-stream",
        "fileSize": 1024,
        "isProtected": false,
        "error": {"errorCode": 0, "errorMessage": ""}
    })
}

pub fn error_json(code: i32, message: &str) -> Value {
    json!({
        "errorCode": code,
        "errorMessage": message,
        "stackTrace": "com.example.ResultException: ..."
    })
}

/// Login for admin/admin returning a long-lived session token
pub async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(rest("authentication/user/login/")))
        .and(header("authorization", BASIC_ADMIN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "session-token",
            "refreshToken": "refresh-token",
            "expiresIn": 3600
        })))
        .mount(server)
        .await;
}

pub async fn mount_logout(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(rest("authentication/user/logout/")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Upload of `file_name` answered with document `id`
pub async fn mount_upload(server: &MockServer, file_name: &str, id: &str) {
    let (name, extension) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    Mock::given(method("POST"))
        .and(path(rest("documents")))
        .and(header("authorization", SESSION_TOKEN))
        .and(wiremock::matchers::body_string_contains(format!(
            "filename=\"{}\"",
            file_name
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(document_json(id, name, extension)))
        .mount(server)
        .await;
}

pub async fn open_session(server: &MockServer) -> Session {
    mount_login(server).await;
    mount_logout(server).await;
    Session::create(context(server), UserProvider::new("admin", "admin"))
        .await
        .unwrap()
}
