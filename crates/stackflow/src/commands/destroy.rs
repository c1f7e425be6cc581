use crate::utils::{self, Project};
use colored::Colorize;
use stackflow_cloud::StateManager;

pub async fn handle(project: &Project, concurrency: Option<usize>, yes: bool) -> anyhow::Result<()> {
    println!("{}", "記録されているリソースを削除します...".yellow().bold());
    utils::print_loaded_stack(project);

    let engine = utils::build_engine(project, concurrency)?;
    utils::ensure_authenticated(&engine).await?;

    let lock = StateManager::new(&project.root).acquire_lock().await?;

    let plan = engine.destroy_plan().await?;
    if plan.steps.is_empty() {
        lock.release().await?;
        println!("{}", "✓ 削除するリソースはありません".green());
        return Ok(());
    }
    utils::print_plan(&plan);

    if !yes {
        lock.release().await?;
        println!();
        println!("{}", "警告: 上記のリソースはすべて削除されます。".red());
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let cancel = utils::cancel_on_ctrl_c();
    let result = engine.apply(&plan, &cancel).await;
    lock.release().await?;

    utils::report_apply(&plan, &result)?;

    println!();
    println!("{}", "✓ 削除が完了しました".green().bold());
    Ok(())
}
