//! CLI configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use wsclient::{
    Session, SessionContext, StaticTokenProvider, TlsOptions, TransportVariant, UserProvider,
};

/// Connection settings collected from flags and the environment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CliConfig {
    /// Server base URL, e.g. `http://localhost:8080/webPDF`
    pub url: String,
    /// `rest` or `soap`
    pub transport: String,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Bearer token used instead of user and password
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
    /// Accept untrusted server certificates
    pub insecure: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/webPDF".to_string(),
            transport: "rest".to_string(),
            user: None,
            password: None,
            token: None,
            timeout_secs: 60,
            insecure: false,
        }
    }
}

impl CliConfig {
    /// Build the session context
    pub fn context(&self) -> wsclient::Result<SessionContext> {
        let transport: TransportVariant = self.transport.parse()?;
        let mut context = SessionContext::new(&self.url)?
            .with_transport(transport)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_user_agent(concat!("wsclient-cli/", env!("CARGO_PKG_VERSION")));
        if self.insecure {
            context = context.with_tls(TlsOptions::default().accept_invalid_certificates());
        }
        Ok(context)
    }

    /// Open a session with whichever credentials were given
    pub async fn open_session(&self) -> wsclient::Result<Session> {
        let context = self.context()?;
        match (&self.token, &self.user) {
            (Some(token), _) => Session::create(context, StaticTokenProvider::new(token.clone())).await,
            (None, Some(user)) => {
                let password = self.password.clone().unwrap_or_default();
                Session::create(context, UserProvider::new(user.clone(), password)).await
            }
            (None, None) => Session::anonymous(context).await,
        }
    }
}
