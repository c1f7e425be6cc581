use crate::utils;
use colored::Colorize;
use std::path::Path;

pub fn handle(file: Option<&Path>, stage: Option<&str>) -> anyhow::Result<()> {
    println!("{}", "宣言ファイルを検証中...".blue());

    let stack_file = match utils::resolve_stack_file(file) {
        Ok(path) => path,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 宣言ファイルが見つかりません".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    println!("宣言ファイル: {}", stack_file.display().to_string().cyan());

    // 読み込み時に依存グラフ（未定義の参照・循環）まで検証される
    match stackflow_core::load_stack_with_stage(&stack_file, stage) {
        Ok(stack) => {
            println!("{}", "✓ 宣言ファイルは正常です！".green().bold());
            println!();
            println!("サマリー:");
            println!("  スタック: {}", stack.name.cyan());
            println!("  リソース: {}個", stack.declaration.len());
            for resource in stack.declaration.iter() {
                println!("    - {} ({})", resource.logical_id.cyan(), resource.kind);
            }
            if !stack.stages.is_empty() {
                println!("  ステージ: {}", stack.stages.join(", "));
            }
            if !stack.outputs.is_empty() {
                println!("  出力: {}個", stack.outputs.len());
                for output in &stack.outputs {
                    println!("    - {}", output.name.cyan());
                }
            }
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 宣言エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
