//! In-band failure markers in otherwise successful responses.
//!
//! Each dialect spells failure differently, and the position of the marker is
//! dialect-specific, so there is one parser per dialect rather than a shared
//! one.

use crate::error::{Result, SwitcherError};
use serde::Deserialize;

/// Marker in the first field of a query-dialect reply
const QUERY_ERROR_MARKER: &str = "ER";

/// Message the config dialect uses for a successful write
const CONFIG_OK_MESSAGE: &str = "OK";

/// Semicolon-delimited plaintext reply from the query dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply<'a> {
    fields: Vec<&'a str>,
}

impl<'a> QueryReply<'a> {
    /// Split a raw body into its fields
    pub fn parse(body: &'a str) -> Self {
        Self {
            fields: body.trim().split(';').collect(),
        }
    }

    /// Whether the device flagged this reply as a failure
    pub fn is_error(&self) -> bool {
        self.fields.first().map(|f| f.trim()) == Some(QUERY_ERROR_MARKER)
    }

    /// All fields, in order
    pub fn fields(&self) -> &[&'a str] {
        &self.fields
    }

    /// Return the reply, or `VendorRejected` if it carries the error marker
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            return Err(SwitcherError::VendorRejected {
                detail: self.fields.join(";"),
            });
        }
        Ok(self)
    }
}

/// Check a raw query-dialect body for the error marker
pub fn check_query_body(body: &str) -> Result<()> {
    QueryReply::parse(body).into_result().map(|_| ())
}

/// `{status, message}` envelope returned by config-dialect writes
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConfigStatus {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub message: String,
}

impl ConfigStatus {
    pub fn is_ok(&self) -> bool {
        self.message.eq_ignore_ascii_case(CONFIG_OK_MESSAGE)
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(SwitcherError::VendorRejected {
            detail: format!("status {}: {}", self.status, self.message),
        })
    }
}

/// Decode a config-dialect write reply and check its status
pub fn check_config_body(body: &str) -> Result<()> {
    let status: ConfigStatus = serde_json::from_str(body).map_err(|e| {
        SwitcherError::InvalidResponse(format!("malformed status envelope: {} ({})", e, body))
    })?;
    status.into_result()
}
