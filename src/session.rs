use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::sentinel::QueryReply;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::DeviceDescriptor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Source of the current time for session bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The runtime clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Remembers when a device last accepted our login
///
/// The timestamp lock is held only to read or stamp the time, never across
/// the login exchange itself. Callers that observe a stale session at the
/// same moment will each log in; the vendor login is idempotent, so this is
/// tolerated rather than serialized.
pub struct SessionCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    last_login: Mutex<Option<Instant>>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            last_login: Mutex::new(None),
        }
    }

    /// Whether a call made now may skip the login step
    pub async fn is_fresh(&self) -> bool {
        let last_login = *self.last_login.lock().await;
        match last_login {
            // a timestamp from the future is as good as none
            Some(at) => self
                .clock
                .now()
                .checked_duration_since(at)
                .is_some_and(|age| age < self.ttl),
            None => false,
        }
    }

    /// Log in via `login` unless the last login is younger than the TTL
    ///
    /// Returns whether a login was performed. A failed login leaves the
    /// previous state untouched.
    pub async fn ensure<F, Fut>(&self, login: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.is_fresh().await {
            return Ok(false);
        }

        login().await?;

        *self.last_login.lock().await = Some(self.clock.now());
        Ok(true)
    }

    /// Forget the current session so the next call logs in again
    pub async fn invalidate(&self) {
        *self.last_login.lock().await = None;
    }
}

/// Perform the web-UI login exchange with credentials in the query string
pub async fn vendor_login(
    transport: &dyn HttpTransport,
    ctx: &RequestContext,
    device: &DeviceDescriptor,
) -> Result<()> {
    tracing::info!("Logging in to {} at {}", device.model, device.address);

    let request = HttpRequest::get(device.http_url("/ajlogin.html"))
        .with_query("value", "login")
        .with_query("usn", device.username.as_str())
        .with_query("pwd", device.password.as_str());

    let reply = transport
        .execute(ctx, request)
        .await
        .map_err(|e| e.during("login"))?;

    let body = reply.into_success().map_err(|e| SwitcherError::LoginFailed {
        detail: e.to_string(),
    })?;

    if QueryReply::parse(&body).is_error() {
        tracing::warn!("{} rejected login: {}", device.address, body.trim());
        return Err(SwitcherError::LoginFailed {
            detail: body.trim().to_string(),
        });
    }

    Ok(())
}
