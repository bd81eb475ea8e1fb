//! Adapter for switchers speaking JSON-RPC over a WebSocket on port 543.
//!
//! All routing and audio state lives in the `AV Settings` section. Reads
//! fetch the whole section; writes send only the changed fields. Every
//! message, including writes, is answered by exactly one frame, which the
//! [`RpcMultiplexer`] pairs with its request by position.

use crate::connection::RpcMultiplexer;
use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::protocol::{RpcRequest, AV_SETTINGS};
use crate::session::{vendor_login, SessionCache};
use crate::settings::AdapterConfig;
use crate::switcher::{check_level, parse_index, Switcher, SINGLE_OUTPUT};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{DeviceDescriptor, Dialect, Model, VolumeLevel};
use crate::volume::VolumeCurve;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const INPUT_COUNT: u32 = 5;
const SOURCE_PREFIX: &str = "input";

/// Numeric name of the only video output
pub const OUTPUT_NAME: &str = "1";

/// Audio stage whose mute flag is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBlock {
    Hdmi,
    Hdbt,
    Analog,
}

impl AudioBlock {
    /// Parse a caller block name; the empty string means the analog output
    pub fn parse(block: &str) -> Result<Self> {
        let block = block.trim();
        if block.is_empty() || block.eq_ignore_ascii_case("analog") {
            Ok(AudioBlock::Analog)
        } else if block.eq_ignore_ascii_case("hdmi") {
            Ok(AudioBlock::Hdmi)
        } else if block.eq_ignore_ascii_case("hdbt") {
            Ok(AudioBlock::Hdbt)
        } else {
            Err(SwitcherError::InvalidParameter(format!(
                "unknown audio block {:?}, expected HDMI, HDBT or Analog",
                block
            )))
        }
    }

    fn mute_key(&self) -> &'static str {
        match self {
            AudioBlock::Hdmi => "HDMI Audio Mute",
            AudioBlock::Hdbt => "HDBT Audio Mute",
            AudioBlock::Analog => "Analog Audio Mute",
        }
    }
}

/// The `AV Settings` section
#[derive(Debug, Clone, Deserialize)]
struct AvSettings {
    /// `"input N"`
    #[serde(default)]
    source: String,
    /// Device-native level; firmware sends it as a string
    #[serde(rename = "Volume", default)]
    volume: Value,
    #[serde(rename = "HDMI Audio Mute", default)]
    hdmi_audio_mute: i64,
    #[serde(rename = "HDBT Audio Mute", default)]
    hdbt_audio_mute: i64,
    #[serde(rename = "Analog Audio Mute", default)]
    analog_audio_mute: i64,
}

impl AvSettings {
    fn input(&self) -> Result<String> {
        self.source
            .trim()
            .strip_prefix(SOURCE_PREFIX)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SwitcherError::InvalidResponse(format!("unexpected source {:?}", self.source)))
    }

    fn volume(&self) -> Result<i32> {
        let level = match &self.volume {
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
        level
            .and_then(|l| i32::try_from(l).ok())
            .ok_or_else(|| SwitcherError::InvalidResponse(format!("unexpected Volume {}", self.volume)))
    }

    fn muted(&self, block: AudioBlock) -> bool {
        let flag = match block {
            AudioBlock::Hdmi => self.hdmi_audio_mute,
            AudioBlock::Hdbt => self.hdbt_audio_mute,
            AudioBlock::Analog => self.analog_audio_mute,
        };
        flag != 0
    }
}

fn check_output(output: &str) -> Result<()> {
    match output.trim() {
        SINGLE_OUTPUT | OUTPUT_NAME => Ok(()),
        other => Err(SwitcherError::InvalidParameter(format!(
            "unknown output {:?}, this model has a single output",
            other
        ))),
    }
}

/// Adapter for the AT-UHD-SW-52ED
pub struct RpcAdapter {
    device: DeviceDescriptor,
    curve: VolumeCurve,
    mux: RpcMultiplexer,
    /// Carries the vendor login, which is plain HTTP
    http: Arc<dyn HttpTransport>,
    session: SessionCache,
}

impl RpcAdapter {
    pub fn new(device: DeviceDescriptor, config: &AdapterConfig) -> Result<Self> {
        let url = format!("ws://{}:{}", device.host(), config.ws_port);
        let mux = RpcMultiplexer::from_config(url, config);
        let http = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Self::with_parts(device, mux, http, SessionCache::new(config.session_ttl()))
    }

    pub fn with_parts(
        device: DeviceDescriptor,
        mux: RpcMultiplexer,
        http: Arc<dyn HttpTransport>,
        session: SessionCache,
    ) -> Result<Self> {
        if device.dialect() != Dialect::WebSocketRpc {
            return Err(SwitcherError::Unsupported {
                operation: "WebSocket RPC dialect",
                model: device.model.name(),
            });
        }

        Ok(Self {
            curve: device.model.volume_curve().unwrap_or(VolumeCurve::UHD_SW_52ED),
            device,
            mux,
            http,
            session,
        })
    }

    pub fn multiplexer(&self) -> &RpcMultiplexer {
        &self.mux
    }

    async fn ensure_session(&self, ctx: &RequestContext) -> Result<()> {
        if !self.device.has_credentials() {
            return Ok(());
        }
        self.session
            .ensure(|| vendor_login(self.http.as_ref(), ctx, &self.device))
            .await?;
        Ok(())
    }

    async fn av_settings(&self, ctx: &RequestContext) -> Result<AvSettings> {
        self.ensure_session(ctx).await?;

        let section = self
            .mux
            .call(ctx, &RpcRequest::config_get(&[AV_SETTINGS]))
            .await?
            .into_section(AV_SETTINGS)?;

        serde_json::from_value(section)
            .map_err(|e| SwitcherError::InvalidResponse(format!("unexpected {}: {}", AV_SETTINGS, e)))
    }

    /// Write `fields` and wait for the device's answer
    async fn apply(&self, ctx: &RequestContext, fields: Value) -> Result<()> {
        self.ensure_session(ctx).await?;

        tracing::info!("Setting {} on {}", fields, self.device.address);
        self.mux
            .call(ctx, &RpcRequest::config_set(AV_SETTINGS, fields))
            .await?
            .into_result()?;
        Ok(())
    }
}

#[async_trait]
impl Switcher for RpcAdapter {
    fn model(&self) -> Model {
        self.device.model
    }

    async fn get_input(&self, ctx: &RequestContext, output: &str) -> Result<String> {
        check_output(output)?;
        self.av_settings(ctx)
            .await
            .and_then(|settings| settings.input())
            .map_err(|e| e.during("get input"))
    }

    async fn set_input(&self, ctx: &RequestContext, output: &str, input: &str) -> Result<()> {
        check_output(output)?;
        let input = parse_index("input", input)?;
        if !(1..=INPUT_COUNT).contains(&input) {
            return Err(SwitcherError::InvalidParameter(format!(
                "input must be between 1 and {}, got {}",
                INPUT_COUNT, input
            )));
        }

        self.apply(ctx, json!({ "source": format!("{} {}", SOURCE_PREFIX, input) }))
            .await
            .map_err(|e| e.during("set input"))
    }

    async fn audio_video_inputs(&self, ctx: &RequestContext) -> Result<BTreeMap<String, String>> {
        let input = self
            .av_settings(ctx)
            .await
            .and_then(|settings| settings.input())
            .map_err(|e| e.during("get inputs"))?;

        Ok(BTreeMap::from([(SINGLE_OUTPUT.to_string(), input)]))
    }

    async fn get_volume(&self, ctx: &RequestContext, block: &str) -> Result<VolumeLevel> {
        // one master volume; the block is only validated
        AudioBlock::parse(block)?;

        let level = self
            .av_settings(ctx)
            .await
            .and_then(|settings| settings.volume())
            .map_err(|e| e.during("get volume"))?;
        Ok(self.curve.from_device(level))
    }

    async fn set_volume(&self, ctx: &RequestContext, block: &str, level: VolumeLevel) -> Result<()> {
        AudioBlock::parse(block)?;
        check_level(level)?;

        let device_level = self.curve.to_device(level);
        self.apply(ctx, json!({ "Volume": device_level.to_string() }))
            .await
            .map_err(|e| e.during("set volume"))
    }

    async fn get_muted(&self, ctx: &RequestContext, block: &str) -> Result<bool> {
        let block = AudioBlock::parse(block)?;

        let settings = self
            .av_settings(ctx)
            .await
            .map_err(|e| e.during("get muted"))?;
        Ok(settings.muted(block))
    }

    async fn set_muted(&self, ctx: &RequestContext, block: &str, muted: bool) -> Result<()> {
        let block = AudioBlock::parse(block)?;

        let mut fields = serde_json::Map::new();
        fields.insert(block.mute_key().to_string(), json!(u8::from(muted)));
        self.apply(ctx, Value::Object(fields))
            .await
            .map_err(|e| e.during("set muted"))
    }
}
