//! エンジン設定（`.stackflow/engine.yaml`）

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// プロジェクト内の設定ディレクトリ
pub const STATE_DIR: &str = ".stackflow";

const SETTINGS_FILE: &str = "engine.yaml";

/// 適用エンジンの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// 独立したリソースを並列に適用する最大数
    pub concurrency: usize,

    /// プロバイダー呼び出し1回あたりのタイムアウト（秒）
    pub call_timeout_secs: u64,

    /// 一時的なエラーのリトライ設定
    pub retry: RetrySettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            call_timeout_secs: 120,
            retry: RetrySettings::default(),
        }
    }
}

/// リトライ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl EngineSettings {
    /// 設定ファイルのパス
    pub fn path(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR).join(SETTINGS_FILE)
    }

    /// プロジェクトの設定を読み込む
    ///
    /// ファイルが存在しない場合はデフォルト値を返します。
    pub fn load(project_root: &Path) -> Result<Self> {
        Self::load_with_user_dir(project_root, None)
    }

    /// プロジェクトの設定を読み込み、なければユーザー設定を使う
    ///
    /// 優先順位: `<project>/.stackflow/engine.yaml` → `<user_dir>/engine.yaml` → デフォルト値
    pub fn load_with_user_dir(project_root: &Path, user_dir: Option<&Path>) -> Result<Self> {
        let candidates = std::iter::once(Self::path(project_root))
            .chain(user_dir.map(|dir| dir.join(SETTINGS_FILE)));

        for path in candidates {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        tracing::debug!("Engine settings not found, using defaults");
        Ok(Self::default())
    }

    fn load_file(path: PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let settings: Self = serde_yaml::from_str(&content)
            .map_err(|source| ConfigError::InvalidSettings { path, source })?;
        settings.validate()?;

        tracing::debug!(?settings, "Loaded engine settings");
        Ok(settings)
    }

    /// 値の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "concurrency は 1 以上にしてください".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "call_timeout_secs は 1 以上にしてください".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts は 1 以上にしてください".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "retry.backoff_multiplier は 1.0 以上にしてください".to_string(),
            ));
        }
        Ok(())
    }
}
