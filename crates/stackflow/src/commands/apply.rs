use crate::utils::{self, Project};
use colored::Colorize;
use stackflow_cloud::StateManager;

pub async fn handle(project: &Project, concurrency: Option<usize>, yes: bool) -> anyhow::Result<()> {
    println!("{}", "宣言を適用します...".blue().bold());
    utils::print_loaded_stack(project);

    let engine = utils::build_engine(project, concurrency)?;
    utils::ensure_authenticated(&engine).await?;

    // 他のプロセスによる同時適用を防ぐ
    let lock = StateManager::new(&project.root).acquire_lock().await?;

    let plan = engine.plan(&project.stack).await?;
    utils::print_plan(&plan);

    if !plan.has_changes {
        lock.release().await?;
        println!("{}", "✓ 変更はありません".green());
        return Ok(());
    }

    // 確認（--yesが指定されていない場合）
    if !yes {
        lock.release().await?;
        println!();
        println!("{}", "警告: 上記の計画でクラウドリソースを変更します。".yellow());
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let cancel = utils::cancel_on_ctrl_c();
    let result = engine.apply(&plan, &cancel).await;
    lock.release().await?;

    utils::report_apply(&plan, &result)?;

    let outputs = engine.outputs(&project.stack).await?;
    if !outputs.is_empty() {
        println!();
        println!("{}", "出力:".bold());
        for (name, value) in outputs {
            println!("  {} = {}", name.cyan(), value);
        }
    }

    println!();
    println!("{}", "✓ 適用が完了しました！".green().bold());
    Ok(())
}
