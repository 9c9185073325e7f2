use crate::desired::StackSource;
use colored::Colorize;
use stackflow_core::{ResourceGraph, ResourceKind};

pub async fn handle(source: &StackSource) -> anyhow::Result<()> {
    println!("{}", "スタックを検証中...".blue());

    let loaded = match source.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", "✗ スタックを読み込めませんでした".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    };
    let stack = &loaded.stack;
    println!("スタックファイル: {}", loaded.origin.cyan());

    let errors = stackflow_core::validate::check(stack);
    if !errors.is_empty() {
        eprintln!(
            "{}",
            format!("✗ {}件のエラーがあります", errors.len()).red().bold()
        );
        for error in &errors {
            eprintln!("  - {}", error);
        }
        std::process::exit(1);
    }

    println!("{}", "✓ スタックは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  スタック: {}", stack.name.cyan());
    if let Some(region) = &stack.region {
        println!("  リージョン: {}", region);
    }
    println!("  リソース: {}個", stack.len());
    for kind in ResourceKind::ALL {
        for resource in stack.by_kind(kind) {
            let deps = resource.dependencies();
            if deps.is_empty() {
                println!("    - {} ({})", resource.id.cyan(), kind);
            } else {
                println!(
                    "    - {} ({}, 依存: {})",
                    resource.id.cyan(),
                    kind,
                    deps.join(", ")
                );
            }
        }
    }

    let levels = ResourceGraph::from_stack(stack).levels()?;
    println!("  作成順序:");
    for (i, level) in levels.iter().enumerate() {
        println!("    {}. {}", i + 1, level.join(", "));
    }

    Ok(())
}
