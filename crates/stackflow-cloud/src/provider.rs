//! Cloud provider trait definition

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Attribute values a provider reports for an applied resource
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Cloud provider abstraction trait
///
/// The engine treats a provider as an opaque create/update/delete API. It
/// knows nothing about vendor schemas; a provider that rejects properties
/// returns [`CloudError::Schema`](crate::CloudError::Schema), which the engine
/// surfaces verbatim.
///
/// Transient failures must be reported as `ProviderThrottled` or
/// `ProviderUnavailable` so the executor retries them.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "local", "aws")
    fn name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Create a resource and return its provider-side ID and outputs
    async fn create(&self, kind: &str, properties: &serde_json::Value) -> Result<Created>;

    /// Replace the properties of an existing resource
    async fn update(
        &self,
        provider_id: &str,
        kind: &str,
        properties: &serde_json::Value,
    ) -> Result<Outputs>;

    /// Delete a resource
    async fn delete(&self, provider_id: &str, kind: &str) -> Result<()>;
}

/// Result of a successful create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub provider_id: String,
    pub outputs: Outputs,
}

impl Created {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            outputs: Outputs::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_created_builder() {
        let created = Created::new("b-1").with_output("arn", serde_json::json!("arn:local:b-1"));
        assert_eq!(created.provider_id, "b-1");
        assert_eq!(created.outputs["arn"], serde_json::json!("arn:local:b-1"));
    }
}
