//! リソースノードのパース

use super::value::entry_value;
use crate::error::{FlowError, Result};
use crate::model::{Properties, Resource, Settings, Value};
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;

/// resource ノードをパース
///
/// ```kdl
/// resource "ecs.cluster" "api_cluster" {
///     vpc (ref)"api_vpc"
///     depends-on "api_vpc"
/// }
/// ```
pub fn parse_resource(
    node: &KdlNode,
    settings: &Settings,
    stage: Option<&str>,
) -> Result<Resource> {
    let mut args = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string());

    let kind = args
        .next()
        .ok_or_else(|| FlowError::InvalidConfig("resource requires a kind".to_string()))?;
    let logical_id = args.next().ok_or_else(|| {
        FlowError::InvalidConfig(format!("resource '{kind}' requires a logical id"))
    })?;
    validate_logical_id(logical_id)?;

    let mut resource = Resource::new(kind, logical_id);

    if let Some(children) = node.children() {
        let mut body = KdlDocument::new();
        for child in children.nodes() {
            match child.name().value() {
                "depends_on" | "depends-on" => {
                    // 複数の依存先を引数として受け取る
                    for id in child.entries().iter().filter_map(|e| e.value().as_string()) {
                        resource.depends_on(id);
                    }
                }
                _ => body.nodes_mut().push(child.clone()),
            }
        }
        resource.properties = parse_block(&body, settings, stage)?;
    }

    Ok(resource)
}

/// 論理IDの検証（参照構文で `.` を区切りに使うため禁止）
pub fn validate_logical_id(logical_id: &str) -> Result<()> {
    let valid = !logical_id.is_empty()
        && logical_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(FlowError::InvalidConfig(format!(
            "無効な論理IDです: '{logical_id}'（英数字・'_'・'-' のみ使用できます）"
        )))
    }
}

/// 子ノードのブロックをプロパティマップとしてパース
///
/// 同じキーが繰り返された場合はリストにまとめます。
pub fn parse_block(doc: &KdlDocument, settings: &Settings, stage: Option<&str>) -> Result<Properties> {
    let mut collected: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for child in doc.nodes() {
        let value = parse_property(child, settings, stage)?;
        collected
            .entry(child.name().value().to_string())
            .or_default()
            .push(value);
    }

    Ok(collected
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::List(values)
            };
            (key, value)
        })
        .collect())
}

/// 1つのプロパティノードを値に変換
///
/// - 子ブロックまたは `key=value` 形式 → マップ
/// - 引数1つ → スカラー
/// - 引数複数 → リスト
/// - 引数なし → `true`（フラグ）
fn parse_property(node: &KdlNode, settings: &Settings, stage: Option<&str>) -> Result<Value> {
    let key = node.name().value();
    let (named, positional): (Vec<_>, Vec<_>) =
        node.entries().iter().partition(|e| e.name().is_some());

    if node.children().is_some() || !named.is_empty() {
        if !positional.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "'{key}' で引数とブロックを同時に指定することはできません"
            )));
        }
        let mut map = match node.children() {
            Some(children) => parse_block(children, settings, stage)?,
            None => Properties::new(),
        };
        for entry in named {
            if let Some(name) = entry.name() {
                map.insert(
                    name.value().to_string(),
                    entry_value(entry, settings, stage)?,
                );
            }
        }
        return Ok(Value::Map(map));
    }

    let mut values = positional
        .into_iter()
        .map(|e| entry_value(e, settings, stage))
        .collect::<Result<Vec<_>>>()?;

    Ok(match values.len() {
        0 => Value::literal(true),
        1 => values.remove(0),
        _ => Value::List(values),
    })
}
