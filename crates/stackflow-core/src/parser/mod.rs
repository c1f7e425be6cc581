//! KDLパーサー
//!
//! StackFlowのKDL宣言ファイルをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod resource;
mod stage;
mod value;

pub use resource::{parse_block, parse_resource, validate_logical_id};
pub use stage::{parse_setting, parse_stage};
pub use value::{entry_value, kdl_to_json, parse_interpolation};

use crate::error::{FlowError, Result};
use crate::model::{Declaration, Settings, Stack, StackOutput};
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてStackを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P, target_stage: Option<&str>) -> Result<Stack> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string_with_stage(&content, name, target_stage)
}

/// KDL文字列をパース（ステージ未指定）
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Stack> {
    parse_kdl_string_with_stage(content, default_name, None)
}

/// KDL文字列をステージ指定でパース
///
/// 1周目で stack 名とステージ設定を収集し、選択されたステージの設定値を
/// 確定させてから 2周目でリソースと出力をパースします。
pub fn parse_kdl_string_with_stage(
    content: &str,
    default_name: String,
    target_stage: Option<&str>,
) -> Result<Stack> {
    let doc: KdlDocument = content.parse()?;

    let mut name = default_name;
    let mut defaults = Settings::new();
    let mut stages: BTreeMap<String, Settings> = BTreeMap::new();
    let mut stage_order = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                if let Some(stack_name) = node.entries().first().and_then(|e| e.value().as_string())
                {
                    name = stack_name.to_string();
                }
            }
            "stage" => {
                let (stage_name, settings) = parse_stage(node)?;
                if stages.insert(stage_name.clone(), settings).is_some() {
                    return Err(FlowError::InvalidConfig(format!(
                        "ステージ '{stage_name}' が重複しています"
                    )));
                }
                stage_order.push(stage_name);
            }
            // トップレベルの setting は全ステージ共通のデフォルト値
            "setting" => {
                let (key, value) = parse_setting(node)?;
                defaults.insert(key, value);
            }
            _ => {}
        }
    }

    // ステージ固有の設定でデフォルトを上書き
    let mut settings = defaults;
    if let Some(stage) = target_stage {
        let stage_settings = stages
            .remove(stage)
            .ok_or_else(|| FlowError::StageNotFound(stage.to_string()))?;
        settings.extend(stage_settings);
    }

    let mut declaration = Declaration::new();
    let mut outputs: Vec<StackOutput> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" | "stage" | "setting" => {}
            "resource" => {
                let resource = parse_resource(node, &settings, target_stage)?;
                tracing::debug!(
                    kind = %resource.kind,
                    logical_id = %resource.logical_id,
                    "Parsed resource"
                );
                declaration.insert(resource)?;
            }
            "output" => {
                let output = parse_output(node, &settings, target_stage)?;
                if outputs.iter().any(|o| o.name == output.name) {
                    return Err(FlowError::InvalidConfig(format!(
                        "出力 '{}' が重複しています",
                        output.name
                    )));
                }
                outputs.push(output);
            }
            other => {
                return Err(FlowError::InvalidConfig(format!(
                    "未対応のトップレベルノードです: {other}"
                )));
            }
        }
    }

    Ok(Stack {
        name,
        stage: target_stage.map(str::to_string),
        declaration,
        outputs,
        stages: stage_order,
        settings,
    })
}

/// output ノードをパース
///
/// ```kdl
/// output "cdn_domain" (ref)"cdn.domain_name"
/// ```
fn parse_output(node: &KdlNode, settings: &Settings, stage: Option<&str>) -> Result<StackOutput> {
    let mut entries = node.entries().iter().filter(|e| e.name().is_none());
    let name = entries
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| FlowError::InvalidConfig("output requires a name".to_string()))?
        .to_string();
    let entry = entries
        .next()
        .ok_or_else(|| FlowError::InvalidConfig(format!("output '{name}' に値がありません")))?;

    Ok(StackOutput {
        value: entry_value(entry, settings, stage)?,
        name,
    })
}

#[cfg(test)]
mod tests;
