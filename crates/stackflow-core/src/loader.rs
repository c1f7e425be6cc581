//! 統合ローダー
//!
//! 宣言ファイルの読み込み、パース、依存グラフの検証を統合

use crate::error::{FlowError, Result};
use crate::graph::DependencyGraph;
use crate::model::Stack;
use crate::parser::parse_kdl_string_with_stage;
use std::path::Path;
use tracing::{debug, info, instrument};

/// 宣言ファイルをロード（ステージ未指定）
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_stack(path: &Path) -> Result<Stack> {
    load_stack_with_stage(path, None)
}

/// ステージ指定で宣言ファイルをロード
///
/// 以下の処理を実行:
/// 1. ファイル読み込み
/// 2. KDLパース（ステージ設定の解決を含む）
/// 3. 依存グラフの構築による参照・循環の検証
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_stack_with_stage(path: &Path, stage: Option<&str>) -> Result<Stack> {
    debug!("Step 1: Reading declaration file");
    let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!("Step 2: Parsing KDL");
    let default_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let stack = parse_kdl_string_with_stage(&content, default_name, stage)?;

    debug!("Step 3: Validating dependency graph");
    DependencyGraph::build(&stack.declaration)?;

    info!(
        stack = %stack.name,
        resources = stack.declaration.len(),
        outputs = stack.outputs.len(),
        "Stack loaded successfully"
    );
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stack_detects_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.kdl");
        std::fs::write(
            &path,
            r#"
            resource "a" "first" {
                peer (ref)"second"
            }
            resource "a" "second" {
                peer (ref)"first"
            }
        "#,
        )
        .unwrap();

        let err = load_stack(&path).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { .. }));
    }

    #[test]
    fn test_load_stack_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_stack(&dir.path().join("missing.kdl")).unwrap_err();
        assert!(matches!(err, FlowError::IoError { .. }));
    }
}
