use thiserror::Error;

/// Errors produced while talking to the Tarka control panel.
///
/// The panel answers with free-form HTML, so `Api` keeps the raw body around
/// for diagnosis instead of trying to parse it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context} failed with status {status}: {body}")]
    Api {
        context: String,
        status: u16,
        body: String,
    },
}

impl Error {
    pub(crate) fn network(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    /// True for login failures, including a 200 without the session cookie.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// HTTP status carried by the error, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
