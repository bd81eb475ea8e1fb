use crate::amplifier::AmplifierAdapter;
use crate::config_cgi::ConfigAdapter;
use crate::context::RequestContext;
use crate::detection::Detector;
use crate::error::Result;
use crate::query::QueryAdapter;
use crate::rpc::RpcAdapter;
use crate::settings::AdapterConfig;
use crate::switcher::Switcher;
use crate::types::{DeviceDescriptor, Dialect, HardwareInfo, Model, VolumeLevel};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Client for one Atlona switcher
///
/// The `SwitcherClient` pairs a device with the adapter for its dialect. The
/// adapter is chosen once, when the client is built, and every call goes
/// straight to it.
pub struct SwitcherClient {
    descriptor: DeviceDescriptor,
    adapter: Box<dyn Switcher>,
}

impl SwitcherClient {
    /// Detect the model at `address` and connect to it
    ///
    /// # Example
    ///
    /// ```no_run
    /// use atlona_switchers::{AdapterConfig, RequestContext, SwitcherClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let ctx = RequestContext::background();
    ///     let client =
    ///         SwitcherClient::connect(&ctx, "10.0.0.20", "", "", &AdapterConfig::default()).await?;
    ///     client.set_input(&ctx, "1", "3").await?;
    ///     println!("now showing input {}", client.get_input(&ctx, "1").await?);
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(
        ctx: &RequestContext,
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        config: &AdapterConfig,
    ) -> Result<Self> {
        let address = address.into();
        let model = Detector::new(config)?.detect(ctx, &address).await?;
        Self::for_device(DeviceDescriptor::new(address, username, password, model), config)
    }

    /// Build a client for a device whose model is already known
    ///
    /// This is the only way to reach models that detection cannot identify,
    /// such as the AT-GAIN-60 amplifier.
    pub fn for_device(descriptor: DeviceDescriptor, config: &AdapterConfig) -> Result<Self> {
        let adapter: Box<dyn Switcher> = match (descriptor.model, descriptor.dialect()) {
            (Model::Gain60, _) => Box::new(AmplifierAdapter::new(descriptor.clone(), config)?),
            (_, Dialect::HttpQuery) => Box::new(QueryAdapter::new(descriptor.clone(), config)?),
            (_, Dialect::JsonConfig) => Box::new(ConfigAdapter::new(descriptor.clone(), config)?),
            (_, Dialect::WebSocketRpc) => Box::new(RpcAdapter::new(descriptor.clone(), config)?),
        };

        Ok(Self::with_adapter(descriptor, adapter))
    }

    /// Wrap an adapter built by the caller
    pub fn with_adapter(descriptor: DeviceDescriptor, adapter: Box<dyn Switcher>) -> Self {
        tracing::debug!(
            "Using {:?} adapter for {} at {}",
            descriptor.dialect(),
            descriptor.model,
            descriptor.address
        );
        Self {
            descriptor,
            adapter,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn address(&self) -> &str {
        &self.descriptor.address
    }

    pub fn model(&self) -> Model {
        self.descriptor.model
    }

    pub fn dialect(&self) -> Dialect {
        self.descriptor.dialect()
    }

    /// Input currently routed to `output`
    pub async fn get_input(&self, ctx: &RequestContext, output: &str) -> Result<String> {
        self.adapter.get_input(ctx, output).await
    }

    /// Route `input` to `output`
    pub async fn set_input(&self, ctx: &RequestContext, output: &str, input: &str) -> Result<()> {
        self.adapter.set_input(ctx, output, input).await
    }

    /// Routing of every output
    pub async fn audio_video_inputs(&self, ctx: &RequestContext) -> Result<BTreeMap<String, String>> {
        self.adapter.audio_video_inputs(ctx).await
    }

    /// Volume (0-100) of an audio zone or block
    pub async fn get_volume(&self, ctx: &RequestContext, block: &str) -> Result<VolumeLevel> {
        self.adapter.get_volume(ctx, block).await
    }

    /// Set the volume (0-100) of an audio zone or block
    pub async fn set_volume(&self, ctx: &RequestContext, block: &str, level: VolumeLevel) -> Result<()> {
        self.adapter.set_volume(ctx, block, level).await
    }

    pub async fn get_muted(&self, ctx: &RequestContext, block: &str) -> Result<bool> {
        self.adapter.get_muted(ctx, block).await
    }

    pub async fn set_muted(&self, ctx: &RequestContext, block: &str, muted: bool) -> Result<()> {
        self.adapter.set_muted(ctx, block, muted).await
    }

    /// Hardware details, or [`HardwareInfo::Unimplemented`]
    pub async fn hardware_info(&self, ctx: &RequestContext) -> Result<HardwareInfo> {
        self.adapter.hardware_info(ctx).await
    }
}

/// One client per device address
///
/// The first lookup of an address runs detection; concurrent first lookups
/// share that one detection. Once resolved, a client is reused for the life
/// of the registry and its device is never detected again. A failed
/// detection is not remembered, so the next lookup tries afresh.
pub struct SwitcherRegistry {
    config: AdapterConfig,
    detector: Detector,
    clients: Mutex<HashMap<String, Arc<OnceCell<Arc<SwitcherClient>>>>>,
}

impl SwitcherRegistry {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let detector = Detector::new(&config)?;
        Ok(Self::with_detector(config, detector))
    }

    pub fn with_detector(config: AdapterConfig, detector: Detector) -> Self {
        Self {
            config,
            detector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The client for `address`, detecting the device on first use
    pub async fn get_or_connect(
        &self,
        ctx: &RequestContext,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<SwitcherClient>> {
        let cell = {
            let mut clients = self.clients.lock().await;
            clients.entry(address.to_string()).or_default().clone()
        };

        let client = cell
            .get_or_try_init(|| async {
                let model = self.detector.detect(ctx, address).await?;
                let descriptor = DeviceDescriptor::new(address, username, password, model);
                SwitcherClient::for_device(descriptor, &self.config).map(Arc::new)
            })
            .await?;

        Ok(client.clone())
    }

    /// The client for `address`, if one has been resolved
    pub async fn get(&self, address: &str) -> Option<Arc<SwitcherClient>> {
        let clients = self.clients.lock().await;
        clients.get(address).and_then(|cell| cell.get().cloned())
    }

    /// Register a client built elsewhere, replacing any existing one
    pub async fn insert(&self, client: SwitcherClient) -> Arc<SwitcherClient> {
        let client = Arc::new(client);
        let cell = Arc::new(OnceCell::new_with(Some(client.clone())));

        let mut clients = self.clients.lock().await;
        clients.insert(client.address().to_string(), cell);
        client
    }

    /// Forget `address`; the next lookup detects it again
    pub async fn remove(&self, address: &str) -> Option<Arc<SwitcherClient>> {
        let mut clients = self.clients.lock().await;
        clients.remove(address).and_then(|cell| cell.get().cloned())
    }

    /// Addresses with a resolved client
    pub async fn addresses(&self) -> Vec<String> {
        let clients = self.clients.lock().await;
        let mut addresses: Vec<String> = clients
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::testing::ScriptedTransport;
    use futures_util::future::join_all;
    use std::time::Duration;

    fn registry(transport: Arc<ScriptedTransport>) -> SwitcherRegistry {
        let detector = Detector::with_transport(transport, Duration::from_secs(5)).unwrap();
        SwitcherRegistry::with_detector(AdapterConfig::default(), detector)
    }

    #[tokio::test]
    async fn adapter_follows_dialect() {
        let config = AdapterConfig::default();
        for model in Model::ALL {
            let client =
                SwitcherClient::for_device(DeviceDescriptor::new("10.0.0.1", "", "", model), &config)
                    .unwrap();
            assert_eq!(client.model(), model);
            assert_eq!(client.dialect(), model.dialect());
        }
    }

    #[tokio::test]
    async fn detection_runs_once_per_address() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(200, "<title>AT-HDVS-210U</title>");
        let registry = registry(transport.clone());
        let ctx = RequestContext::background();

        let lookups = (0..4).map(|_| registry.get_or_connect(&ctx, "10.0.0.7", "", ""));
        for client in join_all(lookups).await {
            assert_eq!(client.unwrap().model(), Model::Hdvs210u);
        }

        assert_eq!(transport.calls(), 1);
        assert_eq!(registry.addresses().await, vec!["10.0.0.7".to_string()]);
    }

    #[tokio::test]
    async fn failed_detection_is_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(200, "<title>Some Printer</title>");
        transport.push_reply(200, "<title>AT-OME-PS62 Login</title>");
        let registry = registry(transport.clone());
        let ctx = RequestContext::background();

        let err = registry
            .get_or_connect(&ctx, "10.0.0.8", "", "")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownDevice);
        assert!(registry.get("10.0.0.8").await.is_none());

        let client = registry.get_or_connect(&ctx, "10.0.0.8", "", "").await.unwrap();
        assert_eq!(client.model(), Model::OmePs62);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn inserted_client_skips_detection() {
        let transport = Arc::new(ScriptedTransport::new());
        let registry = registry(transport.clone());
        let descriptor = DeviceDescriptor::new("10.0.0.9", "", "", Model::UhdSw52ed);
        registry
            .insert(SwitcherClient::for_device(descriptor, registry.config()).unwrap())
            .await;

        let client = registry
            .get_or_connect(&RequestContext::background(), "10.0.0.9", "", "")
            .await
            .unwrap();
        assert_eq!(client.model(), Model::UhdSw52ed);
        assert_eq!(transport.calls(), 0);

        assert!(registry.remove("10.0.0.9").await.is_some());
        assert!(registry.addresses().await.is_empty());
    }
}
