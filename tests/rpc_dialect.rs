//! WebSocket-RPC model against an in-process fake switcher

use atlona_switchers::{
    AdapterConfig, DeviceDescriptor, ErrorKind, HardwareInfo, Model, RequestContext, RpcAdapter,
    Switcher, SINGLE_OUTPUT,
};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// A switcher that keeps its `AV Settings` in memory
#[derive(Clone)]
struct FakeSwitcher {
    settings: Arc<Mutex<Value>>,
    received: Arc<Mutex<Vec<Value>>>,
    reject_sets: bool,
}

impl FakeSwitcher {
    fn new(reject_sets: bool) -> Self {
        Self {
            settings: Arc::new(Mutex::new(json!({
                "source": "input 3",
                "Autoswitch": 0,
                "Volume": "-15",
                "HDMI Audio Mute": 0,
                "HDBT Audio Mute": 0,
                "Analog Audio Mute": 1
            }))),
            received: Arc::new(Mutex::new(Vec::new())),
            reject_sets,
        }
    }

    /// Start listening; returns the port
    async fn spawn(&self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = self.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let device = device.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let reply = device.handle(serde_json::from_str(&text).unwrap());
                        ws.send(Message::Text(reply.to_string())).await.unwrap();
                    }
                });
            }
        });

        port
    }

    fn handle(&self, request: Value) -> Value {
        self.received.lock().unwrap().push(request.clone());
        let id = request["id"].clone();

        match request["method"].as_str() {
            Some("config_get") => {
                let settings = self.settings.lock().unwrap().clone();
                json!({ "jsonrpc": "2.0", "id": id, "result": { "AV Settings": settings } })
            }
            Some("config_set") if self.reject_sets => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": "Invalid params" }
            }),
            Some("config_set") => {
                let mut settings = self.settings.lock().unwrap();
                if let Some(fields) = request["params"]["AV Settings"].as_object() {
                    for (key, value) in fields {
                        settings[key] = value.clone();
                    }
                }
                json!({ "jsonrpc": "2.0", "id": id, "result": {} })
            }
            _ => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "Method not found" } }),
        }
    }

    fn setting(&self, key: &str) -> Value {
        self.settings.lock().unwrap()[key].clone()
    }

    fn sets(&self) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["method"] == "config_set")
            .map(|r| r["params"]["AV Settings"].clone())
            .collect()
    }
}

async fn connect(device: &FakeSwitcher) -> RpcAdapter {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let port = device.spawn().await;
    let config = AdapterConfig {
        ws_port: port,
        ..AdapterConfig::default()
    };
    RpcAdapter::new(
        DeviceDescriptor::new("127.0.0.1", "", "", Model::UhdSw52ed),
        &config,
    )
    .unwrap()
}

#[tokio::test]
async fn routing_reads_and_writes_source() {
    let device = FakeSwitcher::new(false);
    let adapter = connect(&device).await;
    let ctx = RequestContext::background();

    assert_eq!(adapter.get_input(&ctx, "").await.unwrap(), "3");

    adapter.set_input(&ctx, "1", "5").await.unwrap();
    assert_eq!(device.setting("source"), "input 5");
    assert_eq!(adapter.get_input(&ctx, "1").await.unwrap(), "5");

    let inputs = adapter.audio_video_inputs(&ctx).await.unwrap();
    assert_eq!(inputs.get(SINGLE_OUTPUT).map(String::as_str), Some("5"));

    assert_eq!(adapter.multiplexer().connections_opened(), 1);
}

#[tokio::test]
async fn volume_uses_string_levels_on_the_wire() {
    let device = FakeSwitcher::new(false);
    let adapter = connect(&device).await;
    let ctx = RequestContext::background();

    // -15 is 20 steps above the -35 offset
    assert_eq!(adapter.get_volume(&ctx, "Analog").await.unwrap(), 40);

    adapter.set_volume(&ctx, "Analog", 50).await.unwrap();
    assert_eq!(device.setting("Volume"), "-10");
    assert_eq!(adapter.get_volume(&ctx, "").await.unwrap(), 50);

    adapter.set_volume(&ctx, "Analog", 0).await.unwrap();
    assert_eq!(device.setting("Volume"), "-80");
    assert_eq!(adapter.get_volume(&ctx, "").await.unwrap(), 0);
}

#[tokio::test]
async fn mute_flags_are_per_block() {
    let device = FakeSwitcher::new(false);
    let adapter = connect(&device).await;
    let ctx = RequestContext::background();

    assert!(adapter.get_muted(&ctx, "").await.unwrap());
    assert!(!adapter.get_muted(&ctx, "HDBT").await.unwrap());

    adapter.set_muted(&ctx, "hdbt", true).await.unwrap();
    adapter.set_muted(&ctx, "Analog", false).await.unwrap();

    assert_eq!(
        device.sets(),
        vec![json!({ "HDBT Audio Mute": 1 }), json!({ "Analog Audio Mute": 0 })]
    );
    assert!(adapter.get_muted(&ctx, "HDBT").await.unwrap());
    assert!(!adapter.get_muted(&ctx, "HDMI").await.unwrap());
}

#[tokio::test]
async fn concurrent_callers_share_one_socket() {
    let device = FakeSwitcher::new(false);
    let adapter = connect(&device).await;
    let ctx = RequestContext::background();

    let reads = (0..12).map(|_| adapter.get_input(&ctx, "1"));
    for input in join_all(reads).await {
        assert_eq!(input.unwrap(), "3");
    }

    assert_eq!(adapter.multiplexer().connections_opened(), 1);
}

#[tokio::test]
async fn rpc_error_is_vendor_rejection() {
    let device = FakeSwitcher::new(true);
    let adapter = connect(&device).await;

    let err = adapter
        .set_input(&RequestContext::background(), "1", "2")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VendorRejected);
    assert_eq!(device.setting("source"), "input 3");
}

#[tokio::test]
async fn hardware_info_is_unimplemented() {
    let device = FakeSwitcher::new(false);
    let adapter = connect(&device).await;

    let info = adapter
        .hardware_info(&RequestContext::background())
        .await
        .unwrap();

    assert_eq!(info, HardwareInfo::Unimplemented);
    assert_eq!(adapter.multiplexer().connections_opened(), 0);
}
