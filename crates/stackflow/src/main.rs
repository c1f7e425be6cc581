mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "宣言して、適用する。インフラは、差分になった。", long_about = None)]
struct Cli {
    /// 宣言ファイルのパス（省略時は stack.kdl などを自動検出）
    #[arg(short = 'f', long = "file", global = true)]
    file: Option<PathBuf>,

    /// ステージ名 (dev, stg, prod)
    #[arg(short = 's', long = "stage", env = "STACK_STAGE", global = true)]
    stage: Option<String>,

    /// 並列に適用するリソース数の上限（engine.yaml より優先）
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 適用計画を表示
    Plan {
        /// JSON形式で出力
        #[arg(long)]
        json: bool,
    },
    /// 宣言をクラウドに適用
    Apply {
        /// 確認なしで適用する
        #[arg(short, long)]
        yes: bool,
    },
    /// 記録されている全リソースを削除
    Destroy {
        /// 確認なしで削除する
        #[arg(short, long)]
        yes: bool,
    },
    /// 宣言ファイルを検証
    Validate,
    /// スタックの出力値を表示
    Outputs {
        /// JSON形式で出力
        #[arg(long)]
        json: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrに出力（stdoutは計画やJSONの出力に使う）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // Versionコマンドは宣言ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Validateコマンドはエラーを整形して表示する
    if matches!(cli.command, Commands::Validate) {
        return commands::validate::handle(cli.file.as_deref(), cli.stage.as_deref());
    }

    let project = utils::load_project(cli.file.as_deref(), cli.stage.as_deref())?;

    // コマンドディスパッチ
    match cli.command {
        Commands::Plan { json } => {
            commands::plan::handle(&project, json).await?;
        }
        Commands::Apply { yes } => {
            commands::apply::handle(&project, cli.concurrency, yes).await?;
        }
        Commands::Destroy { yes } => {
            commands::destroy::handle(&project, cli.concurrency, yes).await?;
        }
        Commands::Validate => {
            unreachable!("Validate is handled before loading the stack");
        }
        Commands::Outputs { json } => {
            commands::outputs::handle(&project, json).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before loading the stack");
        }
    }

    Ok(())
}
