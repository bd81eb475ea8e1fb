use crate::volume::VolumeCurve;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized volume, 0-100
pub type VolumeLevel = u8;

/// Wire-protocol family a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Plain GETs with commands in the query string
    HttpQuery,
    /// POSTs of nested getConfig/setConfig documents
    JsonConfig,
    /// JSON-RPC messages over a persistent WebSocket
    WebSocketRpc,
}

/// Known switcher models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    /// 6x2 matrix switcher
    #[serde(rename = "AT-OME-PS62")]
    OmePs62,
    /// 5x1 switcher
    #[serde(rename = "AT-UHD-SW-52ED")]
    UhdSw52ed,
    /// 4x1 switcher
    #[serde(rename = "AT-JUNO-451-HDBT")]
    Juno451Hdbt,
    /// 2x1 wall plate
    #[serde(rename = "AT-HDVS-210U")]
    Hdvs210u,
    /// 60 W amplifier
    #[serde(rename = "AT-GAIN-60")]
    Gain60,
}

impl Model {
    pub const ALL: [Model; 5] = [
        Model::OmePs62,
        Model::UhdSw52ed,
        Model::Juno451Hdbt,
        Model::Hdvs210u,
        Model::Gain60,
    ];

    /// Model identifier as it appears in the device's web UI title
    pub fn name(&self) -> &'static str {
        match self {
            Model::OmePs62 => "AT-OME-PS62",
            Model::UhdSw52ed => "AT-UHD-SW-52ED",
            Model::Juno451Hdbt => "AT-JUNO-451-HDBT",
            Model::Hdvs210u => "AT-HDVS-210U",
            Model::Gain60 => "AT-GAIN-60",
        }
    }

    /// Look up a model by its identifier
    pub fn from_name(name: &str) -> Option<Model> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether detection may report this model
    ///
    /// Detection covers the switchers only; the amplifier is reached through
    /// an explicit [`DeviceDescriptor`].
    pub fn is_detectable(&self) -> bool {
        !matches!(self, Model::Gain60)
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Model::OmePs62 => Dialect::JsonConfig,
            Model::UhdSw52ed => Dialect::WebSocketRpc,
            Model::Juno451Hdbt | Model::Hdvs210u | Model::Gain60 => Dialect::HttpQuery,
        }
    }

    /// Volume mapping, for models with an audio section
    pub fn volume_curve(&self) -> Option<VolumeCurve> {
        match self {
            Model::OmePs62 => Some(VolumeCurve::OME_PS62),
            Model::UhdSw52ed => Some(VolumeCurve::UHD_SW_52ED),
            Model::Juno451Hdbt | Model::Hdvs210u | Model::Gain60 => None,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to talk to one physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Host or host:port of the device's web server
    pub address: String,
    pub username: String,
    pub password: String,
    pub model: Model,
}

impl DeviceDescriptor {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        model: Model,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            model,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.model.dialect()
    }

    /// Whether credentials were supplied for a vendor login
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// `http://{address}{path}`
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Host part of the address, without any port
    pub fn host(&self) -> &str {
        match self.address.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.address,
        }
    }
}

/// Network settings reported by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
}

/// Hardware details reported by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDetails {
    pub model_name: Option<String>,
    pub hostname: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub power_status: Option<String>,
    #[serde(default)]
    pub network: NetworkInfo,
}

/// Result of a hardware-info query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareInfo {
    /// The device reported these details
    Reported(HardwareDetails),
    /// The model exposes no hardware-info endpoint
    Unimplemented,
}
