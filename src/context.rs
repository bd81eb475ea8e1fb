use crate::error::{Result, SwitcherError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline carried through every switcher operation
///
/// Dropping an operation's future cancels it. The deadline is additionally
/// consulted up front by components that can refuse work early, such as the
/// rate limiter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context without a deadline
    pub fn background() -> Self {
        Self { deadline: None }
    }

    /// A context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// This context, expiring no later than `timeout` from now
    pub fn narrowed(&self, timeout: Duration) -> Self {
        let bound = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(bound, |d| d.min(bound))),
        }
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run `fut`, failing with `DeadlineExceeded` if the deadline passes first
    pub async fn run<T, F>(&self, step: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(SwitcherError::DeadlineExceeded { step }),
            },
        }
    }
}
