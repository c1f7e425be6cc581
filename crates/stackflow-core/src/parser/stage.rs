//! ステージ・設定値ノードのパース

use super::value::kdl_to_json;
use crate::error::{FlowError, Result};
use crate::model::Settings;
use kdl::KdlNode;

/// stage ノードをパース
///
/// ```kdl
/// stage "prod" {
///     setting "domain_names" "app.example.com" "www.example.com"
/// }
/// ```
pub fn parse_stage(node: &KdlNode) -> Result<(String, Settings)> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| FlowError::InvalidConfig("stage requires a name".to_string()))?
        .to_string();

    let mut settings = Settings::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "setting" => {
                    let (key, value) = parse_setting(child)?;
                    settings.insert(key, value);
                }
                other => {
                    return Err(FlowError::InvalidConfig(format!(
                        "stage '{name}' に未対応のノードがあります: {other}"
                    )));
                }
            }
        }
    }

    Ok((name, settings))
}

/// setting ノードをパース
///
/// 値が複数の場合はリストになります。
pub fn parse_setting(node: &KdlNode) -> Result<(String, serde_json::Value)> {
    let mut entries = node.entries().iter().filter(|e| e.name().is_none());
    let key = entries
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| FlowError::InvalidConfig("setting requires a name".to_string()))?
        .to_string();

    let mut values: Vec<serde_json::Value> = entries.map(|e| kdl_to_json(e.value())).collect();
    let value = match values.len() {
        0 => {
            return Err(FlowError::InvalidConfig(format!(
                "setting '{key}' に値がありません"
            )));
        }
        1 => values.remove(0),
        _ => serde_json::Value::Array(values),
    };

    Ok((key, value))
}
