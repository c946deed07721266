use std::fmt;
use std::time::Duration;

use log::info;
use reqwest::{Client, StatusCode};

use crate::error::{Error, Result};
use crate::provider::absolute_name;

// The endpoint may push the change upstream before answering.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Pre-shared token for the one-shot ACME endpoint. No login involved.
#[derive(Clone)]
pub struct TokenAuth {
    token: String,
    endpoint: String,
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuth")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl TokenAuth {
    pub fn new(token: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let endpoint = endpoint.into();
        if token.is_empty() {
            return Err(Error::Config("missing API token".to_string()));
        }
        if endpoint.is_empty() {
            return Err(Error::Config("missing token endpoint".to_string()));
        }
        Ok(Self { token, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Publishes a validation value for `name` inside `zone` through the token endpoint.
pub async fn update_record(
    client: &Client,
    auth: &TokenAuth,
    zone: &str,
    name: &str,
    value: &str,
) -> Result<()> {
    let fqdn = absolute_name(name, zone);
    info!("[tarka] Submitting validation for {} via token endpoint", fqdn);

    let form = [
        ("domain", fqdn.as_str()),
        ("token", auth.token.as_str()),
        ("validation", value),
    ];

    let response = client
        .post(&auth.endpoint)
        .form(&form)
        .timeout(TOKEN_TIMEOUT)
        .send()
        .await
        .map_err(|e| Error::network(format!("token update request for '{}' failed", fqdn), e))?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api {
            context: format!("token update for '{}'", fqdn),
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}
