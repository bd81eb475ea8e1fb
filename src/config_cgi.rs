//! Adapter for switchers configured through `/cgi-bin/config.cgi`.
//!
//! Every exchange is a POST of a nested document scoped to the one field
//! being read or written:
//!
//! ```json
//! { "getConfig": { "video": { "vidOut": { "hdmiOut": {} } } } }
//! { "setConfig": { "audio": { "audOut": { "zoneOut1": { "audioVol": -20 } } } } }
//! ```
//!
//! Reads answer with the same nesting filled in; writes answer with a
//! `{status, message}` envelope. The embedded web server falls over when
//! hammered, so requests go through a [`RateLimitedTransport`].

use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::sentinel::{check_config_body, ConfigStatus};
use crate::settings::AdapterConfig;
use crate::switcher::{check_level, parse_index, Switcher};
use crate::transport::{HttpRequest, HttpTransport, RateLimitedTransport, ReqwestTransport};
use crate::types::{
    DeviceDescriptor, Dialect, HardwareDetails, HardwareInfo, Model, NetworkInfo, VolumeLevel,
};
use crate::volume::VolumeCurve;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const CONFIG_PATH: &str = "/cgi-bin/config.cgi";

/// Factory credentials, used when the caller supplies none
const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "Atlona";

const INPUT_COUNT: u32 = 6;

const HDMI_OUT: [&str; 3] = ["video", "vidOut", "hdmiOut"];
const AUD_OUT: [&str; 2] = ["audio", "audOut"];
const ETH0: [&str; 2] = ["network", "eth0"];
const SYSTEM: [&str; 1] = ["system"];

/// Key reported in place of the outputs while they mirror one source
pub const MIRROR_KEY: &str = "mirror";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HdmiOut {
    mirror: Mirror,
    hdmi_out_a: VideoOut,
    hdmi_out_b: VideoOut,
}

impl HdmiOut {
    fn source_of(&self, output: &str) -> i64 {
        if self.mirror.status {
            return self.mirror.video_src;
        }
        match output {
            "hdmiOutB" => self.hdmi_out_b.video_src,
            _ => self.hdmi_out_a.video_src,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Mirror {
    status: bool,
    video_src: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoOut {
    video_src: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Zone {
    audio_vol: i32,
    analog_out: AnalogOut,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalogOut {
    audio_mute: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Eth0 {
    mac_addr: Option<String>,
    ip_settings: IpSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpSettings {
    ipaddr: Option<String>,
    gateway: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct System {
    power_status: Option<String>,
    model: Option<String>,
    serial_number: Option<String>,
    firmware_version: FirmwareVersion,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FirmwareVersion {
    package: Option<String>,
}

/// Wrap `leaf` in one object per path segment, outermost first
fn nest(path: &[&str], leaf: Value) -> Value {
    path.iter().rev().fold(leaf, |inner, key| {
        let mut object = Map::new();
        object.insert((*key).to_string(), inner);
        Value::Object(object)
    })
}

/// JSON pointer to `path` (segments contain no `/` or `~`)
fn pointer(path: &[&str]) -> String {
    path.iter().map(|segment| format!("/{}", segment)).collect()
}

fn output_key(output: &str) -> Result<&'static str> {
    match output.trim() {
        "1" | "hdmiOutA" => Ok("hdmiOutA"),
        "2" | "hdmiOutB" => Ok("hdmiOutB"),
        other => Err(SwitcherError::InvalidParameter(format!(
            "unknown output {:?}, expected 1, 2, hdmiOutA or hdmiOutB",
            other
        ))),
    }
}

fn zone_key(zone: &str) -> Result<&'static str> {
    match zone.trim() {
        "1" | "zoneOut1" => Ok("zoneOut1"),
        "2" | "zoneOut2" => Ok("zoneOut2"),
        other => Err(SwitcherError::InvalidParameter(format!(
            "unknown audio zone {:?}, expected 1, 2, zoneOut1 or zoneOut2",
            other
        ))),
    }
}

/// Adapter for the AT-OME-PS62
pub struct ConfigAdapter {
    device: DeviceDescriptor,
    curve: VolumeCurve,
    transport: Arc<dyn HttpTransport>,
}

impl ConfigAdapter {
    /// Build an adapter whose requests are paced by `config.request_delay`
    pub fn new(device: DeviceDescriptor, config: &AdapterConfig) -> Result<Self> {
        let transport = RateLimitedTransport::new(
            ReqwestTransport::new(config.request_timeout())?,
            config.request_delay(),
            config.rate_burst,
        );
        Self::with_transport(device, Arc::new(transport))
    }

    /// Build an adapter on a caller-supplied transport
    ///
    /// No pacing is added; wrap `transport` in a [`RateLimitedTransport`]
    /// if the device needs it.
    pub fn with_transport(device: DeviceDescriptor, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        if device.dialect() != Dialect::JsonConfig {
            return Err(SwitcherError::Unsupported {
                operation: "JSON config dialect",
                model: device.model.name(),
            });
        }

        Ok(Self {
            curve: device.model.volume_curve().unwrap_or(VolumeCurve::OME_PS62),
            device,
            transport,
        })
    }

    /// Use a different volume mapping, for firmware with another range
    pub fn with_curve(mut self, curve: VolumeCurve) -> Self {
        self.curve = curve;
        self
    }

    fn credentials(&self) -> (&str, &str) {
        if self.device.has_credentials() {
            (self.device.username.as_str(), self.device.password.as_str())
        } else {
            (DEFAULT_USERNAME, DEFAULT_PASSWORD)
        }
    }

    async fn post(&self, ctx: &RequestContext, document: Value) -> Result<String> {
        let (username, password) = self.credentials();
        let request = HttpRequest::post_json(self.device.http_url(CONFIG_PATH), document)
            .with_basic_auth(username, password);

        self.transport.execute(ctx, request).await?.into_success()
    }

    /// Read the subtree at `path`
    async fn get_config<T: DeserializeOwned>(&self, ctx: &RequestContext, path: &[&str]) -> Result<T> {
        let body = self
            .post(ctx, json!({ "getConfig": nest(path, json!({})) }))
            .await?;

        let mut document: Value = serde_json::from_str(&body).map_err(|e| {
            SwitcherError::InvalidResponse(format!("malformed config reply: {} ({})", e, body))
        })?;

        // a refused read comes back as a status envelope instead of the tree
        if let Some(message) = document.get("message").and_then(Value::as_str) {
            ConfigStatus {
                status: document.get("status").and_then(Value::as_i64).unwrap_or_default(),
                message: message.to_string(),
            }
            .into_result()?;
        }

        let subtree = document
            .pointer_mut(&pointer(path))
            .map(Value::take)
            .ok_or_else(|| {
                SwitcherError::InvalidResponse(format!("config reply has no {}", path.join(".")))
            })?;

        serde_json::from_value(subtree).map_err(|e| {
            SwitcherError::InvalidResponse(format!("unexpected {}: {}", path.join("."), e))
        })
    }

    /// Write `leaf` at `path`
    async fn set_config(&self, ctx: &RequestContext, path: &[&str], leaf: Value) -> Result<()> {
        let document = json!({ "setConfig": nest(path, leaf) });
        tracing::info!("Setting {} on {}: {}", path.join("."), self.device.address, document);

        let body = self.post(ctx, document).await?;
        check_config_body(&body)
    }

    async fn hdmi_out(&self, ctx: &RequestContext) -> Result<HdmiOut> {
        self.get_config(ctx, &HDMI_OUT).await
    }

    async fn zone(&self, ctx: &RequestContext, zone: &str) -> Result<Zone> {
        let [audio, aud_out] = AUD_OUT;
        self.get_config(ctx, &[audio, aud_out, zone]).await
    }
}

#[async_trait]
impl Switcher for ConfigAdapter {
    fn model(&self) -> Model {
        self.device.model
    }

    async fn get_input(&self, ctx: &RequestContext, output: &str) -> Result<String> {
        let output = output_key(output)?;
        let hdmi = self.hdmi_out(ctx).await.map_err(|e| e.during("get input"))?;
        Ok(hdmi.source_of(output).to_string())
    }

    async fn set_input(&self, ctx: &RequestContext, output: &str, input: &str) -> Result<()> {
        let output = output_key(output)?;
        let input = parse_index("input", input)?;
        if !(1..=INPUT_COUNT).contains(&input) {
            return Err(SwitcherError::InvalidParameter(format!(
                "input {} is out of range for {} (1-{})",
                input, self.device.model, INPUT_COUNT
            )));
        }

        let [video, vid_out, hdmi_out] = HDMI_OUT;
        self.set_config(ctx, &[video, vid_out, hdmi_out, output], json!({ "videoSrc": input }))
            .await
            .map_err(|e| e.during("set input"))
    }

    async fn audio_video_inputs(&self, ctx: &RequestContext) -> Result<BTreeMap<String, String>> {
        let hdmi = self.hdmi_out(ctx).await.map_err(|e| e.during("get inputs"))?;

        let mut inputs = BTreeMap::new();
        if hdmi.mirror.status {
            inputs.insert(MIRROR_KEY.to_string(), hdmi.mirror.video_src.to_string());
        } else {
            inputs.insert("hdmiOutA".to_string(), hdmi.hdmi_out_a.video_src.to_string());
            inputs.insert("hdmiOutB".to_string(), hdmi.hdmi_out_b.video_src.to_string());
        }
        Ok(inputs)
    }

    async fn get_volume(&self, ctx: &RequestContext, block: &str) -> Result<VolumeLevel> {
        let zone = zone_key(block)?;
        let zone = self.zone(ctx, zone).await.map_err(|e| e.during("get volume"))?;
        Ok(self.curve.from_device(zone.audio_vol))
    }

    async fn set_volume(&self, ctx: &RequestContext, block: &str, level: VolumeLevel) -> Result<()> {
        let zone = zone_key(block)?;
        check_level(level)?;

        let [audio, aud_out] = AUD_OUT;
        self.set_config(
            ctx,
            &[audio, aud_out, zone],
            json!({ "audioVol": self.curve.to_device(level) }),
        )
        .await
        .map_err(|e| e.during("set volume"))
    }

    async fn get_muted(&self, ctx: &RequestContext, block: &str) -> Result<bool> {
        let zone = zone_key(block)?;
        let zone = self.zone(ctx, zone).await.map_err(|e| e.during("get muted"))?;
        Ok(zone.analog_out.audio_mute)
    }

    async fn set_muted(&self, ctx: &RequestContext, block: &str, muted: bool) -> Result<()> {
        let zone = zone_key(block)?;

        let [audio, aud_out] = AUD_OUT;
        self.set_config(
            ctx,
            &[audio, aud_out, zone, "analogOut"],
            json!({ "audioMute": muted }),
        )
        .await
        .map_err(|e| e.during("set muted"))
    }

    async fn hardware_info(&self, ctx: &RequestContext) -> Result<HardwareInfo> {
        let eth0: Eth0 = self
            .get_config(ctx, &ETH0)
            .await
            .map_err(|e| e.during("get network info"))?;
        let system: System = self
            .get_config(ctx, &SYSTEM)
            .await
            .map_err(|e| e.during("get system info"))?;

        Ok(HardwareInfo::Reported(HardwareDetails {
            // the device has no separate hostname setting
            hostname: system.model.clone(),
            model_name: system.model,
            serial_number: system.serial_number,
            firmware_version: system.firmware_version.package,
            power_status: system.power_status,
            network: NetworkInfo {
                mac_address: eth0.mac_addr,
                ip_address: eth0.ip_settings.ipaddr,
                gateway: eth0.ip_settings.gateway,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::testing::ScriptedTransport;

    fn adapter(username: &str) -> (ConfigAdapter, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let device = DeviceDescriptor::new("10.2.2.2", username, "secret", Model::OmePs62);
        let adapter = ConfigAdapter::with_transport(device, transport.clone()).unwrap();
        (adapter, transport)
    }

    #[test]
    fn nest_builds_scoped_document() {
        assert_eq!(
            nest(&["video", "vidOut", "hdmiOut"], json!({})),
            json!({ "video": { "vidOut": { "hdmiOut": {} } } })
        );
        assert_eq!(pointer(&["audio", "audOut"]), "/audio/audOut");
    }

    #[tokio::test]
    async fn set_input_posts_scoped_set_config() {
        let (adapter, transport) = adapter("");
        transport.push_reply(200, r#"{"status":200,"message":"OK"}"#);

        adapter
            .set_input(&RequestContext::background(), "hdmiOutB", "3")
            .await
            .unwrap();

        let request = transport.request(0);
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(request.url, "http://10.2.2.2/cgi-bin/config.cgi");
        assert_eq!(
            request.basic_auth,
            Some(("admin".to_string(), "Atlona".to_string()))
        );
        assert_eq!(
            request.json,
            Some(json!({
                "setConfig": { "video": { "vidOut": { "hdmiOut": { "hdmiOutB": { "videoSrc": 3 } } } } }
            }))
        );
    }

    #[tokio::test]
    async fn supplied_credentials_replace_factory_ones() {
        let (adapter, transport) = adapter("installer");
        transport.push_reply(200, r#"{"message":"OK"}"#);

        adapter
            .set_muted(&RequestContext::background(), "1", true)
            .await
            .unwrap();
        assert_eq!(
            transport.request(0).basic_auth,
            Some(("installer".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    async fn mirrored_outputs_report_one_entry() {
        let (adapter, transport) = adapter("");
        transport.push_reply(
            200,
            r#"{"video":{"vidOut":{"hdmiOut":{"mirror":{"status":true,"videoSrc":4},"hdmiOutA":{"videoSrc":1},"hdmiOutB":{"videoSrc":2}}}}}"#,
        );

        let inputs = adapter
            .audio_video_inputs(&RequestContext::background())
            .await
            .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[MIRROR_KEY], "4");
    }

    #[tokio::test]
    async fn independent_outputs_report_both() {
        let (adapter, transport) = adapter("");
        let reply = r#"{"video":{"vidOut":{"hdmiOut":{"mirror":{"status":false,"videoSrc":4},"hdmiOutA":{"videoSrc":1},"hdmiOutB":{"videoSrc":2}}}}}"#;
        transport.push_reply(200, reply);
        transport.push_reply(200, reply);

        let ctx = RequestContext::background();
        let inputs = adapter.audio_video_inputs(&ctx).await.unwrap();
        assert_eq!(inputs["hdmiOutA"], "1");
        assert_eq!(inputs["hdmiOutB"], "2");
        assert_eq!(adapter.get_input(&ctx, "2").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn volume_goes_through_curve() {
        let (adapter, transport) = adapter("");
        transport.push_reply(200, r#"{"audio":{"audOut":{"zoneOut2":{"audioVol":-30}}}}"#);
        transport.push_reply(200, r#"{"status":200,"message":"OK"}"#);
        transport.push_reply(200, r#"{"status":200,"message":"OK"}"#);

        let ctx = RequestContext::background();
        assert_eq!(adapter.get_volume(&ctx, "zoneOut2").await.unwrap(), 40);

        adapter.set_volume(&ctx, "1", 40).await.unwrap();
        assert_eq!(
            transport.request(1).json,
            Some(json!({ "setConfig": { "audio": { "audOut": { "zoneOut1": { "audioVol": -30 } } } } }))
        );

        adapter.set_volume(&ctx, "1", 0).await.unwrap();
        assert_eq!(
            transport.request(2).json.unwrap()["setConfig"]["audio"]["audOut"]["zoneOut1"]["audioVol"],
            -90
        );
    }

    #[tokio::test]
    async fn fail_message_is_vendor_rejection() {
        let (adapter, transport) = adapter("");
        transport.push_reply(200, r#"{"status":400,"message":"FAIL"}"#);

        let err = adapter
            .set_muted(&RequestContext::background(), "zoneOut1", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VendorRejected);
    }

    #[tokio::test]
    async fn refused_read_is_vendor_rejection() {
        let (adapter, transport) = adapter("");
        transport.push_reply(200, r#"{"message":"FAIL"}"#);

        let err = adapter
            .get_muted(&RequestContext::background(), "zoneOut1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VendorRejected);
    }

    #[tokio::test]
    async fn bad_identifiers_never_hit_the_wire() {
        let (adapter, transport) = adapter("");
        let ctx = RequestContext::background();

        let errors = [
            adapter.set_input(&ctx, "3", "1").await.unwrap_err(),
            adapter.set_input(&ctx, "1", "7").await.unwrap_err(),
            adapter.set_input(&ctx, "1", "two").await.unwrap_err(),
            adapter.set_volume(&ctx, "zoneOut3", 10).await.unwrap_err(),
            adapter.set_volume(&ctx, "1", 101).await.unwrap_err(),
            adapter.get_muted(&ctx, "").await.unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn hardware_info_combines_network_and_system() {
        let (adapter, transport) = adapter("");
        transport.push_reply(
            200,
            r#"{"network":{"eth0":{"macAddr":"b8:98:b0:00:00:01","ipSettings":{"ipaddr":"10.2.2.2","gateway":"10.2.2.1"}}}}"#,
        );
        transport.push_reply(
            200,
            r#"{"system":{"powerStatus":"on","model":"AT-OME-PS62","serialNumber":"1234","firmwareVersion":{"package":"1.2.3"}}}"#,
        );

        let info = adapter
            .hardware_info(&RequestContext::background())
            .await
            .unwrap();

        let HardwareInfo::Reported(details) = info else {
            panic!("expected hardware details");
        };
        assert_eq!(details.model_name.as_deref(), Some("AT-OME-PS62"));
        assert_eq!(details.hostname.as_deref(), Some("AT-OME-PS62"));
        assert_eq!(details.serial_number.as_deref(), Some("1234"));
        assert_eq!(details.firmware_version.as_deref(), Some("1.2.3"));
        assert_eq!(details.power_status.as_deref(), Some("on"));
        assert_eq!(details.network.mac_address.as_deref(), Some("b8:98:b0:00:00:01"));
        assert_eq!(details.network.gateway.as_deref(), Some("10.2.2.1"));
    }

    #[test]
    fn legacy_curve_can_be_selected() {
        let (adapter, _) = adapter("");
        let adapter = adapter.with_curve(VolumeCurve::LEGACY_6X2);
        assert_eq!(adapter.curve.to_device(100), 10);
    }
}
