use crate::desired::{StackSource, to_resource_set};
use crate::progress::ApplyProgress;
use crate::utils::{self, Overrides};
use colored::Colorize;

pub async fn handle(source: &StackSource, yes: bool, overrides: Overrides) -> anyhow::Result<()> {
    let loaded = source.load()?;
    stackflow_core::validate(&loaded.stack)?;

    let engine = utils::build_engine(overrides, loaded.stack.region.as_deref())?;
    let desired = to_resource_set(&loaded.stack, engine.provider().name())?;

    println!(
        "スタック {} を {} に適用します",
        loaded.stack.name.cyan(),
        engine.provider().display_name().cyan()
    );
    println!();

    let plan = engine.plan(&desired).await?;
    utils::print_plan(&plan);
    if !plan.has_changes {
        return Ok(());
    }

    println!();
    if !yes && !utils::confirm("適用しますか？")? {
        println!("{}", "中止しました".yellow());
        return Ok(());
    }

    let progress = ApplyProgress::new("適用中...");
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
        anyhow::bail!("適用に失敗しました");
    }

    println!("{}", "✓ 適用が完了しました！".green().bold());
    Ok(())
}
