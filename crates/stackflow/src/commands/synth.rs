use crate::desired::StackSource;
use colored::Colorize;
use std::path::PathBuf;

pub async fn handle(source: &StackSource, output: Option<PathBuf>) -> anyhow::Result<()> {
    let loaded = source.load()?;
    let template = stackflow_core::synthesize(&loaded.stack)?;
    let json = template.to_json()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json)?;
            println!(
                "{} {} ({}個のリソース)",
                "✓ テンプレートを書き出しました:".green().bold(),
                path.display().to_string().cyan(),
                template.resources.len()
            );
        }
        // to_json は末尾の改行まで含む
        None => print!("{}", json),
    }
    Ok(())
}
