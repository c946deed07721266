//! ACME DNS-01 support for the Tarka DNS control panel.
//!
//! Tarka offers no API, so TXT records are created by logging into the panel
//! and submitting its "add record" form. See [`provider::tarka::TarkaProvider`].

pub mod config;
pub mod error;
pub mod provider;

pub use error::{Error, Result};
pub use provider::tarka::{Credentials, Session, TarkaProvider, TokenAuth};
pub use provider::{absolute_name, relative_name, Record, RecordProvider, Zone};
