use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::settings::AdapterConfig;
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::types::Model;
use regex_lite::Regex;
use std::sync::Arc;
use std::time::Duration;

/// First `<title>` element, with any attributes
///
/// Tag names match in any case. Only the captured text is compared against
/// the model table, and that comparison stays exact.
const TITLE_PATTERN: &str = r"(?i)<title[^>]*>([^<]+)</title>";

/// Literal the web UI appends to the model name on its login page
const LOGIN_SUFFIX: &str = "Login";

/// Works out which model sits at an address from its web UI's page title
///
/// # Example
///
/// ```no_run
/// use atlona_switchers::{AdapterConfig, Detector, RequestContext};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let detector = Detector::new(&AdapterConfig::default())?;
///     let model = detector.detect(&RequestContext::background(), "10.0.0.20").await?;
///     println!("{} speaks {:?}", model, model.dialect());
///     Ok(())
/// }
/// ```
pub struct Detector {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    title: Regex,
}

impl Detector {
    pub fn new(config: &AdapterConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.detect_timeout())?);
        Self::with_transport(transport, config.detect_timeout())
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Result<Self> {
        let title = Regex::new(TITLE_PATTERN)
            .map_err(|e| SwitcherError::InvalidParameter(format!("title pattern: {}", e)))?;

        Ok(Self {
            transport,
            timeout,
            title,
        })
    }

    /// Fetch `http://{address}/` once and classify the device
    pub async fn detect(&self, ctx: &RequestContext, address: &str) -> Result<Model> {
        tracing::info!("Detecting device at {}", address);

        let ctx = ctx.narrowed(self.timeout);
        let reply = self
            .transport
            .execute(&ctx, HttpRequest::get(format!("http://{}/", address)))
            .await
            .map_err(|e| e.during("detection"))?;

        if !reply.is_success() {
            tracing::warn!("{} answered detection with HTTP {}", address, reply.status);
        }

        let token = self.extract_model_token(&reply.body).ok_or_else(|| {
            SwitcherError::UnknownDevice(format!("{} has no page title", address))
        })?;

        let model = Model::from_name(&token)
            .filter(Model::is_detectable)
            .ok_or_else(|| SwitcherError::UnknownDevice(format!("{} reports {:?}", address, token)))?;

        tracing::info!("{} is an {}", address, model);
        Ok(model)
    }

    /// The model token in the first `<title>` of `html`
    ///
    /// The `Login` literal and all whitespace are removed, so
    /// `"AT-UHD-SW-52ED Login"` yields `"AT-UHD-SW-52ED"`.
    pub fn extract_model_token(&self, html: &str) -> Option<String> {
        let title = self.title.captures(html)?.get(1)?.as_str();
        let token: String = title
            .replace(LOGIN_SUFFIX, "")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        (!token.is_empty()).then_some(token)
    }
}
