//! Local provider implementation

use crate::error::{LocalError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use stackflow_cloud::{AuthStatus, CloudProvider, Created, Outputs};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const INVENTORY_FILE: &str = "inventory.json";

/// Default directory of the local cloud, relative to the project root
pub const LOCAL_CLOUD_DIR: &str = ".stackflow/local-cloud";

/// A resource held by the local cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalResource {
    pub kind: String,
    pub properties: serde_json::Value,
    pub outputs: Outputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the local cloud knows about, keyed by provider ID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Sequence for the next provider ID
    pub next_serial: u64,

    pub resources: BTreeMap<String, LocalResource>,
}

/// Provider that keeps resources in a JSON file on disk
///
/// Accepts any `service.type` kind whose properties are an object.
/// Every resource reports `arn`, `name`, `domain_name` and `url` outputs.
/// Origin access identities also report `canonical_user_id`.
pub struct LocalProvider {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Provider rooted at `<project_root>/.stackflow/local-cloud`
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(project_root.as_ref().join(LOCAL_CLOUD_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inventory_path(&self) -> PathBuf {
        self.root.join(INVENTORY_FILE)
    }

    /// Load the inventory
    pub async fn inventory(&self) -> Result<Inventory> {
        let path = self.inventory_path();
        if !path.exists() {
            return Ok(Inventory::default());
        }
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, inventory: &Inventory) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_string_pretty(inventory)?;
        fs::write(self.inventory_path(), content).await?;
        Ok(())
    }

    async fn create_resource(&self, kind: &str, properties: &serde_json::Value) -> Result<Created> {
        validate(kind, properties)?;

        let _guard = self.lock.lock().await;
        let mut inventory = self.inventory().await?;

        inventory.next_serial += 1;
        let id = format!("{}-{:06}", kind.replace('.', "-"), inventory.next_serial);
        let outputs = outputs_for(kind, &id, properties);
        let now = Utc::now();

        inventory.resources.insert(
            id.clone(),
            LocalResource {
                kind: kind.to_string(),
                properties: properties.clone(),
                outputs: outputs.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        self.save(&inventory).await?;

        tracing::debug!(kind, id = %id, "Created local resource");
        Ok(Created {
            provider_id: id,
            outputs,
        })
    }

    async fn update_resource(
        &self,
        id: &str,
        kind: &str,
        properties: &serde_json::Value,
    ) -> Result<Outputs> {
        validate(kind, properties)?;

        let _guard = self.lock.lock().await;
        let mut inventory = self.inventory().await?;

        let resource = inventory
            .resources
            .get_mut(id)
            .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;
        if resource.kind != kind {
            return Err(LocalError::KindMismatch {
                id: id.to_string(),
                actual: resource.kind.clone(),
                requested: kind.to_string(),
            });
        }

        resource.properties = properties.clone();
        resource.outputs = outputs_for(kind, id, properties);
        resource.updated_at = Utc::now();
        let outputs = resource.outputs.clone();
        self.save(&inventory).await?;

        tracing::debug!(kind, id, "Updated local resource");
        Ok(outputs)
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut inventory = self.inventory().await?;

        if inventory.resources.remove(id).is_none() {
            return Err(LocalError::ResourceNotFound(id.to_string()));
        }
        self.save(&inventory).await?;

        tracing::debug!(id, "Deleted local resource");
        Ok(())
    }
}

fn validate(kind: &str, properties: &serde_json::Value) -> Result<()> {
    let valid_kind = kind
        .split_once('.')
        .is_some_and(|(service, ty)| !service.is_empty() && !ty.is_empty());
    if !valid_kind {
        return Err(LocalError::InvalidKind(kind.to_string()));
    }
    if !properties.is_object() {
        return Err(LocalError::InvalidProperties {
            kind: kind.to_string(),
            message: "properties must be a map".to_string(),
        });
    }
    Ok(())
}

fn outputs_for(kind: &str, id: &str, properties: &serde_json::Value) -> Outputs {
    let name = properties
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(id)
        .to_string();
    let (service, _) = kind.split_once('.').unwrap_or((kind, ""));
    let domain_name = format!("{id}.{service}.local");

    let mut outputs = Outputs::new();
    outputs.insert("arn".to_string(), json!(format!("arn:local:{kind}:{id}")));
    outputs.insert("name".to_string(), json!(name));
    outputs.insert("url".to_string(), json!(format!("https://{domain_name}")));
    outputs.insert("domain_name".to_string(), json!(domain_name));
    if kind.ends_with(".origin_access_identity") {
        outputs.insert(
            "canonical_user_id".to_string(),
            json!(format!("canonical-{id}")),
        );
    }
    outputs
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        match self.inventory().await {
            Ok(inventory) => Ok(AuthStatus::ok(format!(
                "{} ({} resources)",
                self.root.display(),
                inventory.resources.len()
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn create(
        &self,
        kind: &str,
        properties: &serde_json::Value,
    ) -> stackflow_cloud::Result<Created> {
        Ok(self.create_resource(kind, properties).await?)
    }

    async fn update(
        &self,
        provider_id: &str,
        kind: &str,
        properties: &serde_json::Value,
    ) -> stackflow_cloud::Result<Outputs> {
        Ok(self.update_resource(provider_id, kind, properties).await?)
    }

    async fn delete(&self, provider_id: &str, _kind: &str) -> stackflow_cloud::Result<()> {
        Ok(self.delete_resource(provider_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::CloudError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_update_delete() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::for_project(temp_dir.path());

        let created = provider
            .create("s3.bucket", &json!({"name": "frontend", "versioned": false}))
            .await
            .unwrap();
        assert_eq!(created.provider_id, "s3-bucket-000001");
        assert_eq!(created.outputs["name"], json!("frontend"));
        assert_eq!(
            created.outputs["arn"],
            json!("arn:local:s3.bucket:s3-bucket-000001")
        );
        assert_eq!(
            created.outputs["domain_name"],
            json!("s3-bucket-000001.s3.local")
        );

        let outputs = provider
            .update(&created.provider_id, "s3.bucket", &json!({"versioned": true}))
            .await
            .unwrap();
        // name がなければ ID
        assert_eq!(outputs["name"], json!("s3-bucket-000001"));

        let inventory = provider.inventory().await.unwrap();
        assert_eq!(
            inventory.resources["s3-bucket-000001"].properties,
            json!({"versioned": true})
        );

        provider.delete(&created.provider_id, "s3.bucket").await.unwrap();
        assert!(provider.inventory().await.unwrap().resources.is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::new(temp_dir.path());

        let first = provider.create("ec2.vpc", &json!({})).await.unwrap();
        provider.delete(&first.provider_id, "ec2.vpc").await.unwrap();
        let second = provider.create("ec2.vpc", &json!({})).await.unwrap();

        assert_ne!(first.provider_id, second.provider_id);
    }

    #[tokio::test]
    async fn test_schema_errors() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::new(temp_dir.path());

        let err = provider.create("s3.bucket", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, CloudError::Schema(_)));

        let err = provider.create("bucket", &json!({})).await.unwrap_err();
        assert!(matches!(err, CloudError::Schema(_)));
    }

    #[tokio::test]
    async fn test_missing_and_mismatched_resources() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::new(temp_dir.path());

        let err = provider.delete("ghost", "s3.bucket").await.unwrap_err();
        assert!(matches!(err, CloudError::ResourceNotFound(_)));

        let created = provider.create("s3.bucket", &json!({})).await.unwrap();
        let err = provider
            .update(&created.provider_id, "s3.website", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::ProviderRejected(_)));
    }

    #[tokio::test]
    async fn test_origin_access_identity_outputs() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::new(temp_dir.path());

        let created = provider
            .create("cloudfront.origin_access_identity", &json!({}))
            .await
            .unwrap();
        assert_eq!(
            created.outputs["canonical_user_id"],
            json!("canonical-cloudfront-origin_access_identity-000001")
        );

        let bucket = provider.create("s3.bucket", &json!({})).await.unwrap();
        assert!(!bucket.outputs.contains_key("canonical_user_id"));
    }

    #[tokio::test]
    async fn test_check_auth() {
        let temp_dir = tempdir().unwrap();
        let provider = LocalProvider::new(temp_dir.path());

        let status = provider.check_auth().await.unwrap();
        assert!(status.authenticated);
    }
}
