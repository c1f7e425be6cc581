use crate::utils::{self, Project};
use colored::Colorize;

pub async fn handle(project: &Project, json: bool) -> anyhow::Result<()> {
    let engine = utils::build_engine(project, None)?;
    let plan = engine.plan(&project.stack).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}", "適用計画を作成中...".blue());
    utils::print_loaded_stack(project);
    utils::print_plan(&plan);

    if !plan.has_changes {
        println!("{}", "✓ 変更はありません".green());
    }
    Ok(())
}
