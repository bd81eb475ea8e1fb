//! Adapter for amplifiers driven by action strings in the request path.
//!
//! The amplifier's web server takes no query string; the action and its
//! numbered fields are the path itself, with a throwaway `r` field so that
//! nothing between us and the device caches the reply:
//!
//! ```text
//! GET /action=deviceaudio_set&608=40&r=6f1c...
//! ```
//!
//! Replies are flat JSON objects keyed by the same field numbers. The device
//! has no video section, so routing calls are `Unsupported`.

use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::session::SessionCache;
use crate::settings::AdapterConfig;
use crate::switcher::{check_level, Switcher, SINGLE_OUTPUT};
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::types::{DeviceDescriptor, HardwareDetails, HardwareInfo, Model, NetworkInfo, VolumeLevel};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const LOGIN_ACTION: &str = "compare";
const AUDIO_GET_ACTION: &str = "deviceaudio_get";
const AUDIO_SET_ACTION: &str = "deviceaudio_set";
const STATUS_ACTION: &str = "devicestatus_get";

const USERNAME_FIELD: &str = "701";
const PASSWORD_FIELD: &str = "702";
const VOLUME_FIELD: &str = "608";
const MUTE_FIELD: &str = "609";

/// Numeric name of the amplifier's only audio block
pub const AMP_BLOCK: &str = "1";

/// Reply to the login action
#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(rename = "Login", alias = "login", default)]
    login: bool,
}

/// Reply to `deviceaudio_get`
#[derive(Debug, Deserialize)]
struct AudioState {
    #[serde(rename = "608")]
    volume: Option<String>,
    #[serde(rename = "609")]
    muted: Option<String>,
}

/// Reply to `devicestatus_get`
#[derive(Debug, Deserialize)]
struct DeviceStatus {
    #[serde(rename = "101")]
    model: Option<String>,
    #[serde(rename = "102")]
    firmware: Option<String>,
    #[serde(rename = "103")]
    mac_address: Option<String>,
    #[serde(rename = "104")]
    serial_number: Option<String>,
}

fn check_block(block: &str) -> Result<()> {
    match block.trim() {
        SINGLE_OUTPUT | AMP_BLOCK => Ok(()),
        other => Err(SwitcherError::InvalidParameter(format!(
            "unknown audio block {:?}, this amplifier has a single block",
            other
        ))),
    }
}

/// Adapter for the AT-GAIN-60
///
/// Volume is the amplifier's own 0-100 scale and passes through unchanged.
pub struct AmplifierAdapter {
    device: DeviceDescriptor,
    transport: Arc<dyn HttpTransport>,
    session: SessionCache,
}

impl AmplifierAdapter {
    pub fn new(device: DeviceDescriptor, config: &AdapterConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Self::with_transport(device, transport, SessionCache::new(config.session_ttl()))
    }

    pub fn with_transport(
        device: DeviceDescriptor,
        transport: Arc<dyn HttpTransport>,
        session: SessionCache,
    ) -> Result<Self> {
        if device.model != Model::Gain60 {
            return Err(SwitcherError::Unsupported {
                operation: "amplifier action dialect",
                model: device.model.name(),
            });
        }

        Ok(Self {
            device,
            transport,
            session,
        })
    }

    /// `http://{address}/action={action}&{field}={value}...&r={nonce}`
    fn action_url(&self, action: &str, fields: &[(&str, &str)]) -> String {
        let mut path = format!("/action={}", action);
        for (field, value) in fields {
            path.push_str(&format!("&{}={}", field, value));
        }
        path.push_str(&format!("&r={}", Uuid::new_v4().simple()));
        self.device.http_url(&path)
    }

    async fn login(&self, ctx: &RequestContext) -> Result<()> {
        tracing::info!("Logging in to {} at {}", self.device.model, self.device.address);

        let url = self.action_url(
            LOGIN_ACTION,
            &[
                (USERNAME_FIELD, self.device.username.as_str()),
                (PASSWORD_FIELD, self.device.password.as_str()),
            ],
        );
        let reply = self
            .transport
            .execute(ctx, HttpRequest::get(url))
            .await
            .map_err(|e| e.during("login"))?;

        let body = reply.into_success().map_err(|e| SwitcherError::LoginFailed {
            detail: e.to_string(),
        })?;
        let accepted = serde_json::from_str::<LoginReply>(&body)
            .map(|reply| reply.login)
            .unwrap_or(false);

        if !accepted {
            tracing::warn!("{} rejected login: {}", self.device.address, body.trim());
            return Err(SwitcherError::LoginFailed {
                detail: body.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn ensure_session(&self, ctx: &RequestContext) -> Result<()> {
        if !self.device.has_credentials() {
            return Ok(());
        }
        self.session.ensure(|| self.login(ctx)).await?;
        Ok(())
    }

    async fn send(&self, ctx: &RequestContext, action: &str, fields: &[(&str, &str)]) -> Result<String> {
        self.ensure_session(ctx).await?;

        let url = self.action_url(action, fields);
        self.transport
            .execute(ctx, HttpRequest::get(url))
            .await?
            .into_success()
    }

    async fn read<T: DeserializeOwned>(&self, ctx: &RequestContext, action: &str) -> Result<T> {
        let body = self.send(ctx, action, &[]).await?;
        serde_json::from_str(&body).map_err(|e| {
            SwitcherError::InvalidResponse(format!("unreadable {} reply: {} ({})", action, e, body))
        })
    }
}

#[async_trait]
impl Switcher for AmplifierAdapter {
    fn model(&self) -> Model {
        self.device.model
    }

    async fn get_input(&self, _ctx: &RequestContext, _output: &str) -> Result<String> {
        Err(self.unsupported("get input"))
    }

    async fn set_input(&self, _ctx: &RequestContext, _output: &str, _input: &str) -> Result<()> {
        Err(self.unsupported("set input"))
    }

    async fn audio_video_inputs(&self, _ctx: &RequestContext) -> Result<BTreeMap<String, String>> {
        Err(self.unsupported("get inputs"))
    }

    async fn get_volume(&self, ctx: &RequestContext, block: &str) -> Result<VolumeLevel> {
        check_block(block)?;

        let state: AudioState = self
            .read(ctx, AUDIO_GET_ACTION)
            .await
            .map_err(|e| e.during("get volume"))?;

        let raw = state.volume.unwrap_or_default();
        raw.trim()
            .parse::<VolumeLevel>()
            .map_err(|_| SwitcherError::InvalidResponse(format!("unexpected volume {:?}", raw)))
    }

    async fn set_volume(&self, ctx: &RequestContext, block: &str, level: VolumeLevel) -> Result<()> {
        check_block(block)?;
        check_level(level)?;

        let level = level.to_string();
        tracing::info!("Setting volume {} on {}", level, self.device.address);
        self.send(ctx, AUDIO_SET_ACTION, &[(VOLUME_FIELD, level.as_str())])
            .await
            .map(|_| ())
            .map_err(|e| e.during("set volume"))
    }

    async fn get_muted(&self, ctx: &RequestContext, block: &str) -> Result<bool> {
        check_block(block)?;

        let state: AudioState = self
            .read(ctx, AUDIO_GET_ACTION)
            .await
            .map_err(|e| e.during("get muted"))?;
        Ok(state.muted.as_deref().map(str::trim) == Some("1"))
    }

    async fn set_muted(&self, ctx: &RequestContext, block: &str, muted: bool) -> Result<()> {
        check_block(block)?;

        let flag = if muted { "1" } else { "0" };
        tracing::info!("Setting mute {} on {}", flag, self.device.address);
        self.send(ctx, AUDIO_SET_ACTION, &[(MUTE_FIELD, flag)])
            .await
            .map(|_| ())
            .map_err(|e| e.during("set muted"))
    }

    async fn hardware_info(&self, ctx: &RequestContext) -> Result<HardwareInfo> {
        let status: DeviceStatus = self
            .read(ctx, STATUS_ACTION)
            .await
            .map_err(|e| e.during("get hardware info"))?;

        Ok(HardwareInfo::Reported(HardwareDetails {
            model_name: status.model,
            serial_number: status.serial_number,
            firmware_version: status.firmware,
            network: NetworkInfo {
                mac_address: status.mac_address,
                ..NetworkInfo::default()
            },
            ..HardwareDetails::default()
        }))
    }
}
