pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{EngineSettings, RetrySettings, STATE_DIR};

use std::path::{Path, PathBuf};

const CANDIDATES: [&str; 4] = ["stack.local.kdl", ".stack.local.kdl", "stack.kdl", ".stack.kdl"];

/// StackFlowのユーザー設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトの宣言ファイルを探す
///
/// 以下の優先順位で宣言ファイルを検索:
/// 1. 環境変数 STACK_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. ./.stackflow/ ディレクトリ内: 同様の順序
pub fn find_stack_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("STACK_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    find_stack_file_in(&current_dir)
}

/// 指定ディレクトリから宣言ファイルを探す（環境変数は参照しない）
pub fn find_stack_file_in(dir: &Path) -> Result<PathBuf> {
    // 2. ディレクトリ直下で検索
    for filename in &CANDIDATES {
        let path = dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.stackflow/ ディレクトリで検索
    let state_dir = dir.join(STATE_DIR);
    if state_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = state_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// 宣言ファイルのパスからプロジェクトルートを求める
///
/// `.stackflow/` 内に置かれた宣言ファイルはその親をルートとします。
pub fn project_root_of(stack_file: &Path) -> PathBuf {
    let parent = stack_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if parent.file_name().and_then(|n| n.to_str()) == Some(STATE_DIR) {
        parent.parent().map(Path::to_path_buf).unwrap_or(parent)
    } else {
        parent
    }
}
