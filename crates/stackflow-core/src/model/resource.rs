//! リソースモデル
//!
//! 宣言されたクラウドリソース（種別・論理ID・プロパティ・依存）の定義

use super::value::{Properties, Reference, Value};
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// 宣言されたリソース
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// リソース種別（例: "s3.bucket", "ecs.cluster"）
    pub kind: String,

    /// 宣言セット内で一意な論理ID
    pub logical_id: String,

    /// プロパティ
    pub properties: Properties,

    /// 明示的な依存（論理ID）
    pub depends_on: BTreeSet<String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            logical_id: logical_id.into(),
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    /// 明示的な依存を追加
    pub fn depends_on(&mut self, logical_id: impl Into<String>) {
        self.depends_on.insert(logical_id.into());
    }

    /// プロパティ内の全ての参照
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(|v| v.references())
            .collect()
    }

    /// 参照と明示的依存を合わせた依存先の論理ID
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.logical_id.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .collect()
    }
}

/// リソース宣言セット
///
/// 宣言順を保持します（トポロジカル順序のタイブレークに使用）。
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// リソースを宣言
    ///
    /// 同じ論理IDが既に宣言されている場合は `DuplicateId` エラー。
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        logical_id: impl Into<String>,
        properties: Properties,
    ) -> Result<&mut Resource> {
        let mut resource = Resource::new(kind, logical_id);
        resource.properties = properties;
        let position = self.insert(resource)?;
        Ok(&mut self.resources[position])
    }

    /// 構築済みのリソースを追加し、宣言位置を返す
    pub fn insert(&mut self, resource: Resource) -> Result<usize> {
        if self.index.contains_key(&resource.logical_id) {
            return Err(FlowError::DuplicateId(resource.logical_id));
        }
        let position = self.resources.len();
        self.index.insert(resource.logical_id.clone(), position);
        self.resources.push(resource);
        Ok(position)
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    /// 宣言順の位置
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).copied()
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.index.contains_key(logical_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
