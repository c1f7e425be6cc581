use crate::utils::{self, Project};
use colored::Colorize;

pub async fn handle(project: &Project, json: bool) -> anyhow::Result<()> {
    let engine = utils::build_engine(project, None)?;
    let outputs = engine.outputs(&project.stack).await?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = outputs.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("{}", "宣言された出力はありません".dimmed());
        return Ok(());
    }

    for (name, value) in outputs {
        match value {
            serde_json::Value::String(s) => println!("{} = {}", name.cyan(), s),
            other => println!("{} = {}", name.cyan(), other),
        }
    }
    Ok(())
}
