use colored::Colorize;
use stackflow_cloud::{
    ActionType, ApplyResult, CancellationToken, Engine, EngineConfig, Plan, RetryConfig,
    StateManager,
};
use stackflow_cloud_local::LocalProvider;
use stackflow_config::EngineSettings;
use stackflow_core::Stack;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// 読み込んだプロジェクト
pub struct Project {
    pub root: PathBuf,
    pub stack_file: PathBuf,
    pub stack: Stack,
    pub settings: EngineSettings,
}

/// 宣言ファイルを決定する（-f 指定 → 自動検出）
pub fn resolve_stack_file(file: Option<&Path>) -> anyhow::Result<PathBuf> {
    match file {
        Some(path) if path.exists() => Ok(path.to_path_buf()),
        Some(path) => Err(anyhow::anyhow!(
            "宣言ファイルが見つかりません: {}",
            path.display()
        )),
        None => Ok(stackflow_config::find_stack_file()?),
    }
}

/// 宣言ファイルとエンジン設定を読み込む
pub fn load_project(file: Option<&Path>, stage: Option<&str>) -> anyhow::Result<Project> {
    let stack_file = resolve_stack_file(file)?;
    let root = stackflow_config::project_root_of(&stack_file);

    let stack = stackflow_core::load_stack_with_stage(&stack_file, stage)?;
    let user_dir = stackflow_config::get_config_dir().ok();
    let settings = EngineSettings::load_with_user_dir(&root, user_dir.as_deref())?;

    Ok(Project {
        root,
        stack_file,
        stack,
        settings,
    })
}

/// エンジン設定を組み立てる（CLIフラグが設定ファイルより優先）
pub fn engine_config(
    settings: &EngineSettings,
    concurrency: Option<usize>,
) -> anyhow::Result<EngineConfig> {
    let concurrency = concurrency.unwrap_or(settings.concurrency);
    if concurrency == 0 {
        anyhow::bail!("--concurrency は 1 以上にしてください");
    }

    Ok(EngineConfig {
        concurrency,
        retry: RetryConfig {
            max_attempts: settings.retry.max_attempts,
            initial_delay: Duration::from_millis(settings.retry.initial_delay_ms),
            max_delay: Duration::from_millis(settings.retry.max_delay_ms),
            backoff_multiplier: settings.retry.backoff_multiplier,
        },
        call_timeout: Duration::from_secs(settings.call_timeout_secs),
    })
}

/// ローカルプロバイダーとファイルステートでエンジンを構築
pub fn build_engine(project: &Project, concurrency: Option<usize>) -> anyhow::Result<Engine> {
    let config = engine_config(&project.settings, concurrency)?;
    let provider = Arc::new(LocalProvider::for_project(&project.root));
    let store = Arc::new(StateManager::new(&project.root));
    Ok(Engine::new(provider, store, config))
}

/// プロバイダーの認証状態を確認
pub async fn ensure_authenticated(engine: &Engine) -> anyhow::Result<()> {
    let provider = engine.provider();
    let status = provider.check_auth().await?;
    if !status.authenticated {
        anyhow::bail!(
            "プロバイダー '{}' に接続できません: {}",
            provider.name(),
            status.error.unwrap_or_default()
        );
    }
    if let Some(info) = status.account_info {
        tracing::debug!(provider = provider.name(), account = %info, "Provider authenticated");
    }
    Ok(())
}

/// 読み込んだ宣言ファイル情報を表示
pub fn print_loaded_stack(project: &Project) {
    println!(
        "📄 宣言ファイル: {}",
        project.stack_file.display().to_string().cyan()
    );
    match &project.stack.stage {
        Some(stage) => println!("スタック: {} (ステージ: {})", project.stack.name.cyan(), stage.cyan()),
        None => println!("スタック: {}", project.stack.name.cyan()),
    }
}

fn action_marker(action: ActionType) -> colored::ColoredString {
    match action {
        ActionType::Create => "+".green().bold(),
        ActionType::Update => "~".yellow().bold(),
        ActionType::Delete => "-".red().bold(),
        ActionType::NoOp => "=".dimmed(),
    }
}

/// 計画を表示
pub fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "適用計画:".bold());
    for step in &plan.steps {
        let line = format!("{} {} ({})", step.kind(), step.logical_id(), step.reason);
        if step.action == ActionType::NoOp {
            println!("  {} {}", action_marker(step.action), line.dimmed());
        } else {
            println!("  {} {}", action_marker(step.action), line);
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// 適用結果を表示し、失敗があれば最初のエラーを返す
pub fn report_apply(plan: &Plan, result: &ApplyResult) -> anyhow::Result<()> {
    println!();
    for (step, outcome) in plan.steps.iter().zip(&result.results) {
        match outcome {
            Ok(_) if step.action == ActionType::NoOp => {}
            Ok(_) => println!(
                "  {} {} {}",
                "✓".green(),
                step.action,
                step.logical_id().cyan()
            ),
            Err(e) => println!("  {} {}", "✗".red(), e),
        }
    }

    println!();
    println!(
        "完了: {}/{} ステップ成功, プロバイダー呼び出し {}回, {}ms",
        result.succeeded(),
        result.results.len(),
        result.provider_calls,
        result.duration_ms
    );

    match result.first_error() {
        None => Ok(()),
        Some(e) => Err(anyhow::anyhow!("{}", e)),
    }
}

/// Ctrl-C で適用を中断するトークン
///
/// 実行中のプロバイダー呼び出しは完了を待ち、未開始のステップのみ中断します。
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "中断要求を受け付けました。実行中の操作の完了を待っています...".yellow()
            );
            cancel.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_from_settings() {
        let settings = EngineSettings::default();
        let config = engine_config(&settings, None).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.call_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_concurrency_flag_overrides_settings() {
        let settings = EngineSettings::default();
        assert_eq!(engine_config(&settings, Some(1)).unwrap().concurrency, 1);
        assert!(engine_config(&settings, Some(0)).is_err());
    }
}
