pub mod tarka;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A DNS resource record as seen by ACME clients.
///
/// `name` is relative to the zone (`@` or empty for the apex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub record_type: String,
    pub data: String,
    /// Zero means "let the backend pick".
    pub ttl: Duration,
}

impl Record {
    pub fn txt(name: impl Into<String>, data: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            record_type: "TXT".to_string(),
            data: data.into(),
            ttl,
        }
    }

    pub fn is_txt(&self) -> bool {
        self.record_type.eq_ignore_ascii_case("TXT")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
}

/// Joins a relative record name onto its zone.
pub fn absolute_name(name: &str, zone: &str) -> String {
    let zone = zone.trim_start_matches('.');
    if name.is_empty() || name == "@" {
        return zone.to_string();
    }
    format!("{}.{}", name, zone)
}

/// Inverse of [`absolute_name`]: strips `zone` off `fqdn`.
///
/// Returns `None` when `fqdn` does not live inside `zone`. The apex maps to `@`.
pub fn relative_name(fqdn: &str, zone: &str) -> Option<String> {
    let fqdn = fqdn.trim_end_matches('.');
    let zone = zone.trim_end_matches('.').trim_start_matches('.');
    if zone.is_empty() {
        return None;
    }

    if fqdn.eq_ignore_ascii_case(zone) {
        return Some("@".to_string());
    }

    let split = fqdn.len().checked_sub(zone.len() + 1)?;
    if !fqdn.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = fqdn.split_at(split);
    if tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(zone) && !head.is_empty() {
        Some(head.to_string())
    } else {
        None
    }
}

/// Record operations an ACME DNS-01 solver needs from a DNS backend.
#[async_trait]
pub trait RecordProvider: Send + Sync {
    /// Short identifier used in log lines.
    fn id(&self) -> &'static str;

    async fn get_records(&self, zone: &str) -> Result<Vec<Record>>;

    async fn append_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>>;

    async fn set_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>>;

    async fn delete_records(&self, zone: &str, records: &[Record]) -> Result<Vec<Record>>;

    async fn list_zones(&self) -> Result<Vec<Zone>>;
}
