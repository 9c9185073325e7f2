use crate::utils;
use colored::Colorize;
use stackflow_cloud::StateManager;

/// 管理中のリソース一覧
pub async fn list() -> anyhow::Result<()> {
    let state = StateManager::new(utils::project_root()?).load().await?;

    if state.resources.is_empty() {
        println!("{}", "管理中のリソースはありません".dimmed());
        return Ok(());
    }

    println!(
        "スタック: {}  (serial {}, 更新 {})",
        state.stack.as_deref().unwrap_or("(未設定)").cyan(),
        state.serial,
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("{:<36} {:<16} {:<10}", "KEY", "ID", "STATUS");
    for (key, resource) in &state.resources {
        println!(
            "{:<36} {:<16} {:<10}",
            key,
            resource.id,
            resource.status.to_string()
        );
    }
    Ok(())
}

/// リソースの詳細を JSON で表示
pub async fn show(key: &str) -> anyhow::Result<()> {
    let state = StateManager::new(utils::project_root()?).load().await?;

    let resource = state
        .get_resource(key)
        .ok_or_else(|| anyhow::anyhow!("リソース '{}' は状態に記録されていません", key))?;
    println!("{}", serde_json::to_string_pretty(resource)?);
    Ok(())
}
