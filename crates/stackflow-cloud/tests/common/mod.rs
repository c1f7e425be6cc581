use async_trait::async_trait;
use serde_json::json;
use stackflow_cloud::{
    AuthStatus, CloudError, CloudProvider, Created, EngineConfig, Outputs, Result, RetryConfig,
};
use stackflow_core::{Stack, parse_kdl_string};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub name: String,
}

impl Call {
    #[allow(dead_code)]
    pub fn new(operation: &'static str, name: &str) -> Self {
        Self {
            operation,
            name: name.to_string(),
        }
    }
}

/// Injected behaviour for a resource name
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Fault {
    /// Permanent rejection
    Reject,
    /// Throttled for the first `n` calls
    Throttle(usize),
    /// Slow call
    Delay(Duration),
}

/// Provider double identified by each resource's `name` property
///
/// Outputs: `arn` and `domain_name` derived from the name.
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashMap<String, Fault>>,
    names: Mutex<HashMap<String, String>>,
    counter: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, name: &str, fault: Fault) {
        self.faults.lock().unwrap().insert(name.to_string(), fault);
    }

    pub fn heal(&self, name: &str) {
        self.faults.lock().unwrap().remove(name);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn position(&self, operation: &str, name: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.operation == operation && c.name == name)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: &'static str, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            operation,
            name: name.to_string(),
        });

        let fault = {
            let mut faults = self.faults.lock().unwrap();
            match faults.get_mut(name) {
                Some(Fault::Throttle(0)) => None,
                Some(Fault::Throttle(n)) => {
                    *n -= 1;
                    Some(Fault::Throttle(*n))
                }
                other => other.cloned(),
            }
        };

        match fault {
            Some(Fault::Reject) => Err(CloudError::ProviderRejected(format!("{name} is invalid"))),
            Some(Fault::Throttle(_)) => Err(CloudError::ProviderThrottled(format!("{name} throttled"))),
            Some(Fault::Delay(delay)) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn outputs(name: &str) -> Outputs {
        [
            ("arn".to_string(), json!(format!("arn:fake:{name}"))),
            ("domain_name".to_string(), json!(format!("{name}.fake.example"))),
        ]
        .into_iter()
        .collect()
    }
}

fn name_of(properties: &serde_json::Value) -> String {
    properties
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("unnamed")
        .to_string()
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("fake account"))
    }

    async fn create(&self, _kind: &str, properties: &serde_json::Value) -> Result<Created> {
        let name = name_of(properties);
        self.enter("create", &name).await?;

        let id = format!("{}-{}", name, self.counter.fetch_add(1, Ordering::SeqCst));
        self.names.lock().unwrap().insert(id.clone(), name.clone());
        Ok(Created {
            provider_id: id,
            outputs: Self::outputs(&name),
        })
    }

    async fn update(
        &self,
        provider_id: &str,
        _kind: &str,
        properties: &serde_json::Value,
    ) -> Result<Outputs> {
        let name = name_of(properties);
        self.enter("update", &name).await?;
        self.names
            .lock()
            .unwrap()
            .insert(provider_id.to_string(), name.clone());
        Ok(Self::outputs(&name))
    }

    async fn delete(&self, provider_id: &str, _kind: &str) -> Result<()> {
        let name = self
            .names
            .lock()
            .unwrap()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| CloudError::ResourceNotFound(provider_id.to_string()))?;
        self.enter("delete", &name).await
    }
}

/// Engine settings with millisecond backoff
#[allow(dead_code)]
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        concurrency: 4,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        },
        call_timeout: Duration::from_secs(5),
    }
}

pub fn stack(kdl: &str) -> Stack {
    parse_kdl_string(kdl, "test".to_string()).unwrap()
}
