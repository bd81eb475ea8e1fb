use crate::error::{Result, SwitcherError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC version string the devices expect
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier sent in every request
///
/// The devices echo it back unchanged; replies are matched by position, not
/// by this value.
pub const CONFIGURATION_ID: &str = "<configuration_id>";

/// Settings section holding routing and audio state
pub const AV_SETTINGS: &str = "AV Settings";

/// RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: RpcMethod,
    pub params: Value,
}

/// RPC reply envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// RPC methods
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    ConfigGet,
    ConfigSet,
}

impl RpcRequest {
    /// Create a new request with the given method and params
    pub fn new(method: RpcMethod, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: CONFIGURATION_ID.to_string(),
            method,
            params,
        }
    }

    /// Read whole settings sections
    pub fn config_get(sections: &[&str]) -> Self {
        Self::new(RpcMethod::ConfigGet, json!({ "sections": sections }))
    }

    /// Write fields of one settings section
    pub fn config_set(section: &str, fields: Value) -> Self {
        let mut params = serde_json::Map::new();
        params.insert(section.to_string(), fields);
        Self::new(RpcMethod::ConfigSet, Value::Object(params))
    }
}

impl RpcResponse {
    /// Decode a raw frame
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            SwitcherError::InvalidResponse(format!(
                "malformed RPC reply: {} ({})",
                e,
                String::from_utf8_lossy(bytes)
            ))
        })
    }

    /// Check if the response carries an error object
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The result, or `VendorRejected` if the device answered with an error
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(SwitcherError::VendorRejected {
                detail: format!("RPC error {}: {}", error.code, error.message),
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }

    /// Fetch a named section out of the result
    pub fn into_section(self, section: &str) -> Result<Value> {
        let mut result = self.into_result()?;
        result
            .get_mut(section)
            .map(Value::take)
            .ok_or_else(|| SwitcherError::InvalidResponse(format!("reply has no \"{}\" section", section)))
    }
}
