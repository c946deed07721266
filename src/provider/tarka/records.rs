use std::time::Duration;

use log::{debug, info};
use reqwest::StatusCode;
use serde::Serialize;

use super::session::Session;
use super::Credentials;
use crate::error::{Error, Result};

const RECORD_EDIT_PATH: &str = "/domain-rr-edit.php";

/// Panel-internal numeric id of the TXT record type.
pub const TXT_RR_TYPE_ID: &str = "8";

// The panel has no delete endpoint we can reach, so every record removes itself.
const AUTO_EXPIRY: &str = "10 minutes";

/// Body of the "add record" form.
///
/// Field order matches what the panel's own form posts. The CAA fields are
/// shared by every record type and must be present even for TXT.
#[derive(Debug, Serialize)]
pub struct TxtRecordForm<'a> {
    pub domain_id: &'a str,
    pub do_change: &'static str,
    pub do_add: &'static str,
    pub name: &'a str,
    pub ttl: String,
    pub rr_type_id: &'static str,
    pub data: &'a str,
    pub caa_flags: &'static str,
    pub caa_tag: &'static str,
    pub caa_value: &'static str,
    pub expires: &'static str,
}

impl<'a> TxtRecordForm<'a> {
    pub fn new(domain_id: &'a str, name: &'a str, data: &'a str, ttl: Duration) -> Self {
        Self {
            domain_id,
            do_change: "1",
            do_add: "1",
            name: panel_name(name),
            ttl: ttl_field(ttl),
            rr_type_id: TXT_RR_TYPE_ID,
            data,
            caa_flags: "0",
            caa_tag: "issue",
            caa_value: "",
            expires: AUTO_EXPIRY,
        }
    }
}

/// The panel addresses the zone apex with an empty name.
fn panel_name(name: &str) -> &str {
    if name == "@" {
        ""
    } else {
        name
    }
}

/// Whole seconds, or empty to let the panel apply its default.
fn ttl_field(ttl: Duration) -> String {
    if ttl.is_zero() {
        String::new()
    } else {
        ttl.as_secs().to_string()
    }
}

/// Creates a TXT record through the panel's record edit form.
///
/// Needs a logged-in session. No timeout of its own: the caller's deadline applies.
pub async fn add_txt_record(
    session: &Session,
    credentials: &Credentials,
    name: &str,
    data: &str,
    ttl: Duration,
) -> Result<()> {
    let client = session
        .client()
        .ok_or_else(|| Error::Auth("no session established".to_string()))?;

    let domain_id = credentials.domain_id();
    let form = TxtRecordForm::new(domain_id, name, data, ttl);

    info!(
        "[tarka] Adding TXT record name={:?} ttl={:?} domain_id={}",
        form.name, form.ttl, domain_id
    );
    debug!("[tarka] Record form: {:?}", form);

    let response = client
        .post(credentials.endpoint(RECORD_EDIT_PATH))
        .query(&[("domain_id", domain_id), ("do_add", "1")])
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::network(format!("record creation request for '{}' failed", name), e))?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api {
            context: format!("record creation for '{}'", name),
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}
