//! Cookie-backed login session for the Tarka control panel.
//!
//! The panel exposes no way to ask whether a session is still alive, so
//! validity is always re-derived by fetching a protected page with redirects
//! disabled. A login redirect means the cookie is no longer accepted.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{redirect, Client, StatusCode, Url};

use super::Credentials;
use crate::error::{Error, Result};

/// Cookie the panel sets once the login form has been accepted.
pub const AUTH_COOKIE: &str = "tarka_netcraft_com_au-auth-cookie-2";

const LOGIN_PATH: &str = "/login.php";
const CHECK_PATH: &str = "/customer-view.php";

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated state for one set of credentials.
///
/// Starts out empty; every [`login`] installs a new cookie store and clients.
#[derive(Default)]
pub struct Session {
    state: Option<SessionState>,
}

struct SessionState {
    jar: Arc<Jar>,
    client: Client,
    // Shares the jar but never follows redirects.
    checker: Client,
}

impl SessionState {
    fn new() -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| Error::network("failed to build HTTP client", e))?;
        let checker = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| Error::network("failed to build HTTP client", e))?;
        Ok(Self { jar, client, checker })
    }

    fn cookie_names(&self, url: &Url) -> Vec<String> {
        let Some(header) = self.jar.cookies(url) else {
            return Vec::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim().to_string()))
            .collect()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a cookie store exists at all. Says nothing about validity.
    pub fn is_established(&self) -> bool {
        self.state.is_some()
    }

    /// Seeds the cookie store, e.g. with a cookie persisted from an earlier run.
    pub fn add_cookie(&mut self, cookie: &str, url: &Url) -> Result<()> {
        self.get_or_create()?.jar.add_cookie_str(cookie, url);
        Ok(())
    }

    pub fn has_cookies(&self, url: &Url) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.jar.cookies(url).is_some())
    }

    pub fn has_cookie(&self, url: &Url, name: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.cookie_names(url).iter().any(|n| n == name))
    }

    /// Client carrying the session cookies, if a session was ever started.
    pub(crate) fn client(&self) -> Option<&Client> {
        self.state.as_ref().map(|state| &state.client)
    }

    fn get_or_create(&mut self) -> Result<&SessionState> {
        let state = match self.state.take() {
            Some(state) => state,
            None => SessionState::new()?,
        };
        let state: &SessionState = self.state.insert(state);
        Ok(state)
    }

    /// Drops any previous cookies and clients.
    fn reset(&mut self) -> Result<&SessionState> {
        let state: &SessionState = self.state.insert(SessionState::new()?);
        Ok(state)
    }
}

/// Logs in unless the current session still passes the validity check.
pub async fn ensure_authenticated(session: &mut Session, credentials: &Credentials) -> Result<()> {
    if session.is_established() && is_session_valid(session, credentials).await {
        return Ok(());
    }
    info!("[tarka] Session is invalid or uninitialized, authenticating");
    login(session, credentials).await
}

/// Checks the panel with the stored cookies. Never fails: anything unexpected
/// counts as an invalid session.
pub async fn is_session_valid(session: &Session, credentials: &Credentials) -> bool {
    let Some(state) = session.state.as_ref() else {
        return false;
    };
    if state.jar.cookies(credentials.cookie_url()).is_none() {
        return false;
    }

    let url = credentials.endpoint(CHECK_PATH);
    let response = match state.checker.get(&url).timeout(CHECK_TIMEOUT).send().await {
        Ok(response) => response,
        Err(e) => {
            error!("[tarka] Session validation request failed: {}", e);
            return false;
        }
    };

    let status = response.status();
    if status == StatusCode::OK {
        info!("[tarka] Session validation successful");
        true
    } else {
        warn!("[tarka] Session validation failed with status {}", status.as_u16());
        false
    }
}

/// Submits the login form and checks that the auth cookie came back.
///
/// Every attempt starts from an empty cookie jar, so a stale auth cookie
/// can never pass for a fresh one. The response body is not inspected; the
/// cookie is the only success signal.
pub async fn login(session: &mut Session, credentials: &Credentials) -> Result<()> {
    let state = session.reset()?;

    let form = [
        ("do_login", "1"),
        ("username", credentials.username()),
        ("password", credentials.password()),
    ];

    let response = state
        .client
        .post(credentials.endpoint(LOGIN_PATH))
        .form(&form)
        .timeout(LOGIN_TIMEOUT)
        .send()
        .await
        .map_err(|e| Error::network("authentication failed: login request failed", e))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(Error::Auth(format!(
            "login failed with status: {}",
            status.as_u16()
        )));
    }

    if state
        .cookie_names(credentials.cookie_url())
        .iter()
        .any(|name| name == AUTH_COOKIE)
    {
        info!("[tarka] Successfully authenticated and obtained session cookie");
        Ok(())
    } else {
        Err(Error::Auth("no auth cookie received after login".to_string()))
    }
}
