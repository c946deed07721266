//! Tarka DNS control panel provider.
//!
//! The panel has no API, only HTML forms behind a cookie login. Records are
//! created through the "add record" form with a short auto-expiry, which is
//! why deletion is a no-op here. Listing is not available at all.

pub mod records;
pub mod session;
pub mod token;

use std::fmt;

use async_trait::async_trait;
use log::info;
use reqwest::{Client, Url};
use tokio::sync::Mutex;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::provider::{Record, RecordProvider, Zone};

pub use session::Session;
pub use token::TokenAuth;

pub const DEFAULT_BASE_URL: &str = "https://tarka.cloud/custdata";
pub const DEFAULT_DOMAIN_ID: &str = "77";

/// Login details for the control panel, with defaults already applied.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    domain_id: String,
    base_url: String,
    cookie_url: Url,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain_id", &self.domain_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return Err(Error::Config("missing username".to_string()));
        }
        if password.is_empty() {
            return Err(Error::Config("missing password".to_string()));
        }

        let mut domain_id = domain_id.into();
        if domain_id.is_empty() {
            domain_id = DEFAULT_DOMAIN_ID.to_string();
        }

        let mut base_url = base_url.into();
        if base_url.is_empty() {
            base_url = DEFAULT_BASE_URL.to_string();
        }
        let base_url = base_url.trim_end_matches('/').to_string();
        let cookie_url = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", base_url, e)))?;

        Ok(Self {
            username,
            password,
            domain_id,
            base_url,
            cookie_url,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL the session cookies are looked up against.
    pub fn cookie_url(&self) -> &Url {
        &self.cookie_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

enum Backend {
    Panel {
        credentials: Credentials,
        session: Mutex<Session>,
    },
    Token {
        auth: TokenAuth,
        client: Client,
    },
}

/// DNS-01 record provider backed by the Tarka control panel.
///
/// One login session is kept per instance. Each batch holds the session lock
/// from the validity check until its last record is submitted.
pub struct TarkaProvider {
    backend: Backend,
}

impl TarkaProvider {
    /// Builds a provider from a configuration entry.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;

        if let Some(token) = config.api_token.as_deref().filter(|t| !t.is_empty()) {
            let endpoint = config.token_endpoint.clone().unwrap_or_default();
            return Self::with_token(TokenAuth::new(token, endpoint)?);
        }

        let credentials = Credentials::new(
            config.username.as_str(),
            config.password.as_str(),
            config.domain_id.as_str(),
            config.base_url.as_str(),
        )?;
        Ok(Self::with_credentials(credentials))
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            backend: Backend::Panel {
                credentials,
                session: Mutex::new(Session::new()),
            },
        }
    }

    pub fn with_token(auth: TokenAuth) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::network("failed to build HTTP client", e))?;
        Ok(Self {
            backend: Backend::Token { auth, client },
        })
    }
}

/// Appends `batch` using a session owned by the caller.
///
/// The session is checked once for the whole batch. The batch is rejected
/// before any request if it contains a non-TXT record. Records already
/// created before a failure stay on the panel.
pub async fn append_with_session(
    credentials: &Credentials,
    session: &mut Session,
    batch: &[Record],
) -> Result<Vec<Record>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    check_record_types(batch)?;

    session::ensure_authenticated(session, credentials).await?;

    let mut appended = Vec::with_capacity(batch.len());
    for record in batch {
        records::add_txt_record(session, credentials, &record.name, &record.data, record.ttl)
            .await?;
        appended.push(record.clone());
    }
    Ok(appended)
}

fn check_record_types(records: &[Record]) -> Result<()> {
    match records.iter().find(|r| !r.is_txt()) {
        Some(record) => Err(Error::Validation(format!(
            "only TXT records are supported, got {}",
            record.record_type
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl RecordProvider for TarkaProvider {
    fn id(&self) -> &'static str {
        "tarka"
    }

    async fn get_records(&self, _zone: &str) -> Result<Vec<Record>> {
        Ok(Vec::new())
    }

    async fn append_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>> {
        match &self.backend {
            Backend::Panel {
                credentials,
                session,
            } => {
                let mut session = session.lock().await;
                append_with_session(credentials, &mut session, records).await
            }
            Backend::Token { auth, client } => {
                check_record_types(records)?;
                let mut appended = Vec::with_capacity(records.len());
                for record in records {
                    token::update_record(client, auth, zone, &record.name, &record.data).await?;
                    appended.push(record.clone());
                }
                Ok(appended)
            }
        }
    }

    /// Same as [`append_records`](Self::append_records): the panel cannot
    /// replace records, so an existing entry gets a duplicate.
    async fn set_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>> {
        self.append_records(zone, records).await
    }

    /// Reports the records as deleted; the panel expires them on its own.
    async fn delete_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>> {
        info!(
            "[tarka] Leaving {} record(s) in {} to auto-expire",
            records.len(),
            zone
        );
        Ok(records.to_vec())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn panel_config() -> ProviderConfig {
        toml::from_str(
            r#"
            name = "tarka"
            zone = "example.com"
            username = "testuser"
            password = "testpass"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn credentials_apply_defaults() {
        let credentials = Credentials::new("u", "p", "", "").unwrap();
        assert_eq!(credentials.base_url(), DEFAULT_BASE_URL);
        assert_eq!(credentials.domain_id(), DEFAULT_DOMAIN_ID);
        assert_eq!(
            credentials.endpoint("/login.php"),
            "https://tarka.cloud/custdata/login.php"
        );
    }

    #[test]
    fn credentials_strip_trailing_slash() {
        let credentials = Credentials::new("u", "p", "5", "http://localhost:8080/panel/").unwrap();
        assert_eq!(credentials.base_url(), "http://localhost:8080/panel");
        assert_eq!(credentials.domain_id(), "5");
    }

    #[test]
    fn credentials_require_username_and_password() {
        assert!(matches!(
            Credentials::new("", "p", "", ""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Credentials::new("u", "", "", ""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Credentials::new("u", "p", "", "::nope::"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials::new("u", "hunter2", "", "").unwrap();
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }

    #[test]
    fn factory_rejects_incomplete_config() {
        let mut config = panel_config();
        config.password.clear();
        assert!(matches!(TarkaProvider::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn listing_and_deletion_are_local() {
        let provider = TarkaProvider::new(&panel_config()).unwrap();
        let records = vec![Record::txt("_acme-challenge", "v", Duration::ZERO)];

        assert!(provider.get_records("example.com").await.unwrap().is_empty());
        assert!(provider.list_zones().await.unwrap().is_empty());
        assert_eq!(
            provider.delete_records("example.com", &records).await.unwrap(),
            records
        );
    }

    #[tokio::test]
    async fn empty_batch_needs_no_session() {
        let provider = TarkaProvider::new(&panel_config()).unwrap();
        assert!(provider
            .append_records("example.com", &[])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn non_txt_record_is_rejected_before_login() {
        let provider = TarkaProvider::new(&panel_config()).unwrap();
        let records = vec![Record {
            name: "www".to_string(),
            record_type: "A".to_string(),
            data: "192.0.2.1".to_string(),
            ttl: Duration::ZERO,
        }];

        let err = provider
            .append_records("example.com", &records)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
