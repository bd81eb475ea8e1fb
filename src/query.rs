//! Adapter for switchers driven by plain GETs against `/aj.html`.
//!
//! Reads fetch a named page (`?a=avs`, `?a=info`) that comes back as JSON;
//! writes send a command string (`?a=command&cmd=x2AVx1`) and get a
//! semicolon-delimited plaintext acknowledgement. Either reply may carry the
//! `ER` failure marker in its first field.

use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::sentinel::check_query_body;
use crate::session::{vendor_login, SessionCache};
use crate::settings::AdapterConfig;
use crate::switcher::{parse_index, Switcher, SINGLE_OUTPUT};
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::types::{DeviceDescriptor, HardwareDetails, HardwareInfo, Model};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

const PAGE_PATH: &str = "/aj.html";
const AV_SETTINGS_PAGE: &str = "avs";
const INFO_PAGE: &str = "info";

/// Channel layout of a query-dialect model
#[derive(Debug, Clone, Copy)]
struct QueryProfile {
    /// Fixed input count; `None` when the device reports it
    inputs: Option<u32>,
    outputs: u32,
    /// Caller identifiers start at 0 and are shifted up by one on the wire
    zero_based: bool,
    has_info_page: bool,
}

impl QueryProfile {
    fn for_model(model: Model) -> Option<Self> {
        match model {
            Model::Juno451Hdbt => Some(Self {
                inputs: None,
                outputs: 1,
                zero_based: true,
                has_info_page: true,
            }),
            Model::Hdvs210u => Some(Self {
                inputs: Some(2),
                outputs: 1,
                zero_based: false,
                has_info_page: false,
            }),
            Model::OmePs62 | Model::UhdSw52ed | Model::Gain60 => None,
        }
    }
}

/// The `avs` page
#[derive(Debug, Clone, Deserialize)]
struct AvSettings {
    #[serde(rename = "inp")]
    input: u32,
    /// One entry per input
    #[serde(rename = "HDCPSet", default)]
    hdcp_settings: Vec<i64>,
}

/// The `info` page
#[derive(Debug, Clone, Deserialize)]
struct InfoPage {
    /// Model name followed by firmware version
    #[serde(rename = "info_val1", default)]
    system_info: Vec<String>,
}

/// Adapter for the AT-JUNO-451-HDBT and AT-HDVS-210U
pub struct QueryAdapter {
    device: DeviceDescriptor,
    profile: QueryProfile,
    transport: Arc<dyn HttpTransport>,
    session: SessionCache,
    /// Input count learned from the device, for models that report it
    reported_inputs: OnceLock<u32>,
}

impl QueryAdapter {
    pub fn new(device: DeviceDescriptor, config: &AdapterConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Self::with_transport(device, transport, SessionCache::new(config.session_ttl()))
    }

    pub fn with_transport(
        device: DeviceDescriptor,
        transport: Arc<dyn HttpTransport>,
        session: SessionCache,
    ) -> Result<Self> {
        let profile = QueryProfile::for_model(device.model).ok_or(SwitcherError::Unsupported {
            operation: "HTTP query dialect",
            model: device.model.name(),
        })?;

        Ok(Self {
            device,
            profile,
            transport,
            session,
            reported_inputs: OnceLock::new(),
        })
    }

    async fn ensure_session(&self, ctx: &RequestContext) -> Result<()> {
        if !self.device.has_credentials() {
            return Ok(());
        }
        self.session
            .ensure(|| vendor_login(self.transport.as_ref(), ctx, &self.device))
            .await?;
        Ok(())
    }

    async fn get_page<T: DeserializeOwned>(&self, ctx: &RequestContext, page: &str) -> Result<T> {
        self.ensure_session(ctx).await?;

        let request = HttpRequest::get(self.device.http_url(PAGE_PATH)).with_query("a", page);
        let body = self.transport.execute(ctx, request).await?.into_success()?;
        check_query_body(&body)?;

        serde_json::from_str(&body).map_err(|e| {
            SwitcherError::InvalidResponse(format!("unreadable {} page: {} ({})", page, e, body))
        })
    }

    async fn send_command(&self, ctx: &RequestContext, command: &str) -> Result<()> {
        self.ensure_session(ctx).await?;

        tracing::info!("Sending {} to {}", command, self.device.address);
        let request = HttpRequest::get(self.device.http_url(PAGE_PATH))
            .with_query("a", "command")
            .with_query("cmd", command);
        let body = self.transport.execute(ctx, request).await?.into_success()?;
        check_query_body(&body)
    }

    async fn av_settings(&self, ctx: &RequestContext) -> Result<AvSettings> {
        let settings: AvSettings = self.get_page(ctx, AV_SETTINGS_PAGE).await?;
        if self.profile.inputs.is_none() {
            let _ = self
                .reported_inputs
                .set(settings.hdcp_settings.len() as u32);
        }
        Ok(settings)
    }

    async fn input_count(&self, ctx: &RequestContext) -> Result<u32> {
        if let Some(count) = self.profile.inputs.or(self.reported_inputs.get().copied()) {
            return Ok(count);
        }
        Ok(self.av_settings(ctx).await?.hdcp_settings.len() as u32)
    }

    /// Map a caller identifier to the device's one-based numbering
    fn to_wire(&self, kind: &str, value: &str, count: u32) -> Result<u32> {
        let index = parse_index(kind, value)?;
        let wire = if self.profile.zero_based {
            index.checked_add(1)
        } else {
            Some(index)
        };

        match wire {
            Some(wire) if (1..=count).contains(&wire) => Ok(wire),
            _ => Err(SwitcherError::InvalidParameter(format!(
                "{} {} is out of range for {} ({} available)",
                kind, value, self.device.model, count
            ))),
        }
    }

    /// Map an output identifier; the lone output may also be named by [`SINGLE_OUTPUT`]
    fn output_to_wire(&self, output: &str) -> Result<u32> {
        if self.profile.outputs == 1 && output.trim() == SINGLE_OUTPUT {
            return Ok(1);
        }
        self.to_wire("output", output, self.profile.outputs)
    }

    fn from_wire(&self, wire: u32) -> String {
        if self.profile.zero_based {
            wire.saturating_sub(1).to_string()
        } else {
            wire.to_string()
        }
    }
}

#[async_trait]
impl Switcher for QueryAdapter {
    fn model(&self) -> Model {
        self.device.model
    }

    async fn get_input(&self, ctx: &RequestContext, output: &str) -> Result<String> {
        self.output_to_wire(output)?;

        let settings = self
            .av_settings(ctx)
            .await
            .map_err(|e| e.during("get input"))?;
        Ok(self.from_wire(settings.input))
    }

    async fn set_input(&self, ctx: &RequestContext, output: &str, input: &str) -> Result<()> {
        let output = self.output_to_wire(output)?;
        if let Some(count) = self.profile.inputs {
            self.to_wire("input", input, count)?;
        } else {
            // fail on garbage before spending a round trip on the input count
            parse_index("input", input)?;
        }

        let count = self
            .input_count(ctx)
            .await
            .map_err(|e| e.during("set input"))?;
        let input = self.to_wire("input", input, count)?;

        self.send_command(ctx, &format!("x{}AVx{}", input, output))
            .await
            .map_err(|e| e.during("set input"))
    }

    async fn audio_video_inputs(&self, ctx: &RequestContext) -> Result<BTreeMap<String, String>> {
        let settings = self
            .av_settings(ctx)
            .await
            .map_err(|e| e.during("get inputs"))?;

        Ok(BTreeMap::from([(
            SINGLE_OUTPUT.to_string(),
            self.from_wire(settings.input),
        )]))
    }

    async fn hardware_info(&self, ctx: &RequestContext) -> Result<HardwareInfo> {
        if !self.profile.has_info_page {
            return Ok(HardwareInfo::Unimplemented);
        }

        let info: InfoPage = self
            .get_page(ctx, INFO_PAGE)
            .await
            .map_err(|e| e.during("get hardware info"))?;

        let mut fields = info.system_info.into_iter();
        Ok(HardwareInfo::Reported(HardwareDetails {
            model_name: fields.next(),
            firmware_version: fields.next(),
            ..HardwareDetails::default()
        }))
    }
}
