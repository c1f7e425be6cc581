//! スタックモデル
//!
//! 宣言ファイル1つ分（リソース宣言・ステージ設定・出力）の定義

use super::resource::Declaration;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ステージごとの設定値（名前 → 値）
pub type Settings = BTreeMap<String, serde_json::Value>;

/// スタック全体
#[derive(Debug, Clone, Default)]
pub struct Stack {
    /// スタック名
    pub name: String,

    /// 選択されたステージ
    pub stage: Option<String>,

    /// リソース宣言
    pub declaration: Declaration,

    /// 呼び出し側に公開する出力（宣言順）
    pub outputs: Vec<StackOutput>,

    /// 宣言されたステージ名
    pub stages: Vec<String>,

    /// 選択されたステージで解決された設定値
    pub settings: Settings,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn output(&self, name: &str) -> Option<&StackOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// スタック出力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutput {
    /// 出力名
    pub name: String,

    /// 出力値（通常はリソース出力への参照）
    pub value: Value,
}
