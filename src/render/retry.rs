use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::RenderConfig;
use crate::error::{Error, Result};

/// Bounded retry with linear backoff, only for known transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub signatures: Vec<String>,
}

impl RetryPolicy {
    pub fn from_config(render: &RenderConfig) -> Self {
        Self {
            attempts: render.attempts.max(1),
            backoff: Duration::from_millis(render.backoff_ms),
            signatures: render.transient_signatures.clone(),
        }
    }

    pub fn is_transient(&self, message: &str) -> bool {
        self.signatures.iter().any(|s| message.contains(s.as_str()))
    }

    /// Wait before the attempt following `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let message = error.to_string();
            warn!(attempt, error = %message, "render attempt failed");

            if !self.is_transient(&message) {
                return Err(error);
            }
            if attempt >= self.attempts {
                return Err(Error::TransientRender(message));
            }
            info!(delay = ?self.delay(attempt), "transient error, retrying");
            sleep(self.delay(attempt)).await;
            attempt += 1;
        }
    }
}
