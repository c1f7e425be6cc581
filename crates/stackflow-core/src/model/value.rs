//! プロパティ値モデル
//!
//! リテラル値と他リソースの出力への参照を表現します。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// プロパティ名 → 値のマップ（キー順で安定）
pub type Properties = BTreeMap<String, Value>;

/// 他リソースの出力属性への参照
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// 参照先の論理ID
    pub logical_id: String,

    /// 参照先の出力属性名
    pub attribute: String,
}

impl Reference {
    /// 属性省略時に参照される属性（プロバイダーID）
    pub const ID_ATTRIBUTE: &'static str = "id";

    pub fn new(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    /// `"bucket.arn"` / `"bucket"` 形式をパース
    ///
    /// 属性を省略した場合は `id` を参照します。
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (logical_id, attribute) = match input.split_once('.') {
            Some((id, attr)) => (id, attr),
            None => (input, Self::ID_ATTRIBUTE),
        };
        if logical_id.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Self::new(logical_id, attribute))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.logical_id, self.attribute)
    }
}

/// プロパティ値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// 確定済みのリテラル値
    Literal(serde_json::Value),

    /// 他リソースの出力への参照
    Reference(Reference),

    /// 文字列連結（`"${bucket.arn}/*"` など）
    Interpolate(Vec<Value>),

    /// リスト
    List(Vec<Value>),

    /// ネストしたマップ
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Value::Literal(value.into())
    }

    pub fn reference(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::Reference(Reference::new(logical_id, attribute))
    }

    /// 値に含まれる全ての参照を列挙（ネスト含む）
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Value::Literal(_) => {}
            Value::Reference(r) => refs.push(r),
            Value::Interpolate(parts) | Value::List(parts) => {
                for part in parts {
                    part.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for value in map.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// 参照を解決して確定値に変換
    ///
    /// 解決できない参照があった場合、最初に見つかった参照を `Err` で返します。
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<serde_json::Value, Reference>
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            Value::Literal(v) => Ok(v.clone()),
            Value::Reference(r) => lookup(r).ok_or_else(|| r.clone()),
            Value::Interpolate(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve(lookup)? {
                        serde_json::Value::String(s) => out.push_str(&s),
                        serde_json::Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(serde_json::Value::String(out))
            }
            Value::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Value::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(serde_json::Value::Object(out))
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Literal(value)
    }
}

/// プロパティ全体を解決してJSONオブジェクトに変換
pub fn resolve_properties<F>(
    properties: &Properties,
    lookup: &F,
) -> std::result::Result<serde_json::Value, Reference>
where
    F: Fn(&Reference) -> Option<serde_json::Value>,
{
    let mut out = serde_json::Map::new();
    for (key, value) in properties {
        out.insert(key.clone(), value.resolve(lookup)?);
    }
    Ok(serde_json::Value::Object(out))
}

/// 解決済みJSONからリテラルのみのプロパティを復元（ステート上のリソース用）
pub fn properties_from_json(value: &serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), Value::Literal(v.clone())))
            .collect(),
        _ => Properties::new(),
    }
}
