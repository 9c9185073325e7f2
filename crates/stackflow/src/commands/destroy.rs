use crate::progress::ApplyProgress;
use crate::utils::{self, Overrides};
use colored::Colorize;

pub async fn handle(yes: bool) -> anyhow::Result<()> {
    let engine = utils::build_engine(Overrides::default(), None)?;

    let plan = engine.plan_destroy().await?;
    if !plan.has_changes {
        println!("{}", "管理中のリソースはありません".dimmed());
        return Ok(());
    }

    utils::print_plan(&plan);
    println!();
    if !yes && !utils::confirm(&format!("{}", "すべてのリソースを削除しますか？".red()))? {
        println!("{}", "中止しました".yellow());
        return Ok(());
    }

    let progress = ApplyProgress::new("削除中...");
    let result = match engine.apply_plan(&plan).await {
        Ok(result) => result,
        Err(e) => {
            progress.finish_error();
            return Err(e.into());
        }
    };
    if result.is_success() {
        progress.finish_success();
    } else {
        progress.clear();
    }

    utils::print_apply_result(&result);
    if !result.is_success() {
        anyhow::bail!("削除に失敗しました");
    }

    println!("{}", "✓ すべてのリソースを削除しました".green().bold());
    Ok(())
}
