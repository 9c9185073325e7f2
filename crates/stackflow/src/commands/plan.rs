use crate::desired::{StackSource, to_resource_set};
use crate::utils::{self, Overrides};
use colored::Colorize;

pub async fn handle(source: &StackSource) -> anyhow::Result<()> {
    let loaded = source.load()?;
    stackflow_core::validate(&loaded.stack)?;

    let engine = utils::build_engine(Overrides::default(), loaded.stack.region.as_deref())?;
    let desired = to_resource_set(&loaded.stack, engine.provider().name())?;

    println!(
        "スタック {} ({}) をプロバイダー {} と比較中...",
        loaded.stack.name.cyan(),
        loaded.origin,
        engine.provider().display_name().cyan()
    );
    println!();

    let plan = engine.plan(&desired).await?;
    utils::print_plan(&plan);
    Ok(())
}
