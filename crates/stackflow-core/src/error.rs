use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("論理IDが重複しています: {0}")]
    DuplicateId(String),

    #[error("リソース '{from}' が存在しないリソース '{target}' を参照しています")]
    UnknownReference { from: String, target: String },

    #[error("循環依存が検出されました: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("ステージが見つかりません: {0}")]
    StageNotFound(String),

    #[error("設定値 '{name}' が定義されていません (ステージ: {})", stage.as_deref().unwrap_or("未指定"))]
    MissingSetting {
        name: String,
        stage: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, FlowError>;
