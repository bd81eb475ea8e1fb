//! Rust library for controlling Atlona networked AV switchers
//!
//! This library provides one async API over the unrelated wire protocols
//! spoken by different Atlona models. It supports:
//!
//! - Model detection from the device's web UI
//! - Input routing on every supported model
//! - Volume and mute control where the model has an audio section
//! - Hardware information where the model exposes it
//!
//! # Quick Start
//!
//! ```no_run
//! use atlona_switchers::{AdapterConfig, RequestContext, SwitcherRegistry};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SwitcherRegistry::new(AdapterConfig::default())?;
//!     let ctx = RequestContext::with_timeout(Duration::from_secs(10));
//!
//!     // Detects the model on first use
//!     let switcher = registry.get_or_connect(&ctx, "10.0.0.20", "", "").await?;
//!     println!("{} speaks {:?}", switcher.model(), switcher.dialect());
//!
//!     switcher.set_input(&ctx, "1", "2").await?;
//!     switcher.set_volume(&ctx, "zoneOut1", 40).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Supported Models
//!
//! | Model | Dialect |
//! |---|---|
//! | AT-OME-PS62 | JSON documents POSTed to `/cgi-bin/config.cgi` |
//! | AT-UHD-SW-52ED | JSON-RPC over a WebSocket on port 543 |
//! | AT-JUNO-451-HDBT | query-string commands to `/aj.html` |
//! | AT-HDVS-210U | query-string commands to `/aj.html` |
//! | AT-GAIN-60 | action strings in the request path (audio and status only) |
//!
//! The AT-GAIN-60 amplifier cannot be detected; build its client with
//! [`SwitcherClient::for_device`].
//!
//! Capabilities a model lacks fail with [`ErrorKind::Unsupported`] without
//! touching the network.
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: detection-backed registry and per-device façade
//! - **Adapters**: one [`Switcher`] implementation per dialect, plus the
//!   amplifier
//! - **Connection**: session cache, rate-limited HTTP transport and the
//!   shared WebSocket multiplexer
//! - **Protocol**: JSON-RPC envelopes, error markers and volume mapping
//! - **Types**: models, descriptors and hardware info

mod amplifier;
mod client;
mod config_cgi;
mod connection;
mod context;
mod detection;
mod error;
mod protocol;
mod query;
mod ratelimit;
mod rpc;
mod sentinel;
mod session;
mod settings;
mod switcher;
mod transport;
mod types;
mod volume;

// Public exports
pub use amplifier::{AmplifierAdapter, AMP_BLOCK};
pub use client::{SwitcherClient, SwitcherRegistry};
pub use config_cgi::{ConfigAdapter, MIRROR_KEY};
pub use connection::RpcMultiplexer;
pub use context::RequestContext;
pub use detection::Detector;
pub use error::{ErrorKind, Result, SwitcherError};
pub use protocol::{RpcError, RpcMethod, RpcRequest, RpcResponse};
pub use query::QueryAdapter;
pub use ratelimit::TokenBucket;
pub use rpc::{AudioBlock, RpcAdapter};
pub use sentinel::{check_config_body, check_query_body, ConfigStatus, QueryReply};
pub use session::{vendor_login, Clock, SessionCache, SystemClock};
pub use settings::AdapterConfig;
pub use switcher::{Switcher, SINGLE_OUTPUT};
pub use transport::{HttpReply, HttpRequest, HttpTransport, RateLimitedTransport, ReqwestTransport};
pub use types::{
    DeviceDescriptor, Dialect, HardwareDetails, HardwareInfo, Model, NetworkInfo, VolumeLevel,
};
pub use volume::VolumeCurve;
