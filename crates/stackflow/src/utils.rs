use colored::Colorize;
use stackflow_cloud::{
    ActionType, ApplyResult, Engine, EngineOptions, Plan, RetryConfig, StateManager,
};
use stackflow_cloud_sandbox::SandboxProvider;
use stackflow_config::Settings;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// コマンドラインで指定された設定の上書き
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub rollback: Option<bool>,
    pub parallelism: Option<usize>,
}

/// 状態ファイルとサンドボックスを置くプロジェクトルート（カレントディレクトリ）
pub fn project_root() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// 設定を読み込み、サンドボックスプロバイダーのエンジンを作る
///
/// `region` はスタックの `region`（未指定ならサンドボックスの既定リージョン）。
pub fn build_engine(overrides: Overrides, region: Option<&str>) -> anyhow::Result<Engine> {
    let root = project_root()?;
    let settings = Settings::load(&root)?;
    let mut options = engine_options(&settings);

    if let Some(rollback) = overrides.rollback {
        options.rollback = rollback;
    }
    if let Some(parallelism) = overrides.parallelism {
        anyhow::ensure!(parallelism > 0, "--parallelism は 1 以上を指定してください");
        options.parallelism = parallelism;
    }
    let mut provider = SandboxProvider::new(&root);
    if let Some(region) = region {
        provider = provider.with_region(region);
    }
    tracing::debug!(?options, root = %root.display(), region = provider.region(), "Engine options");

    Ok(Engine::new(Arc::new(provider), StateManager::new(&root)).with_options(options))
}

pub fn engine_options(settings: &Settings) -> EngineOptions {
    EngineOptions {
        retry: RetryConfig {
            max_attempts: settings.retry.max_attempts,
            initial_delay: Duration::from_millis(settings.retry.initial_delay_ms),
            max_delay: Duration::from_millis(settings.retry.max_delay_ms),
            backoff_multiplier: settings.retry.backoff_multiplier,
        },
        parallelism: settings.parallelism,
        rollback: settings.rollback,
    }
}

/// 計画を表示
pub fn print_plan(plan: &Plan) {
    if !plan.has_changes {
        println!("{}", "✓ 変更はありません".green().bold());
        return;
    }

    println!("{}", "実行計画:".bold());
    for action in plan.changes() {
        let (symbol, label) = match action.action_type {
            ActionType::Create => ("+".green(), "作成".green()),
            ActionType::Update => ("~".yellow(), "更新".yellow()),
            ActionType::Replace => ("±".magenta(), "再作成".magenta()),
            ActionType::Delete => ("-".red(), "削除".red()),
            ActionType::NoOp => (" ".normal(), "変更なし".normal()),
        };
        println!("  {} {} ({})", symbol, action.key().cyan(), label);

        if let Some(changes) = action.details.get("changes").and_then(|c| c.as_array()) {
            for change in changes {
                let path = change.get("path").and_then(|p| p.as_str()).unwrap_or("?");
                let before = change.get("before").map(compact).unwrap_or_default();
                let after = change.get("after").map(compact).unwrap_or_default();
                println!("      {}: {} → {}", path, before.dimmed(), after);
            }
        }
        if let Some(fields) = action.details.get("replace_fields").and_then(|f| f.as_array()) {
            let fields: Vec<String> = fields.iter().map(compact).collect();
            println!("      {} {}", "再作成の理由:".magenta(), fields.join(", "));
        }
        if let Some(cause) = action.details.get("cascade_from").and_then(|c| c.as_str()) {
            println!("      {} {} の再作成に伴う", "再作成の理由:".magenta(), cause);
        }
    }
    println!();
    println!("{}", plan.summary());
}

fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "(なし)".to_string(),
        other => other.to_string(),
    }
}

/// 適用結果を表示
pub fn print_apply_result(result: &ApplyResult) {
    for r in &result.succeeded {
        println!("  {} {}", "✓".green(), r.message);
    }
    for r in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red().bold(),
            r.action_id,
            r.error.as_deref().unwrap_or(&r.message)
        );
    }
    for r in &result.skipped {
        println!("  {} {} ({})", "-".yellow(), r.action_id, r.message);
    }
    if !result.rolled_back.is_empty() {
        println!();
        println!("{}", "ロールバック:".yellow().bold());
        for r in &result.rolled_back {
            if r.success {
                println!("  {} {}", "↺".yellow(), r.message);
            } else {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    r.action_id,
                    r.error.as_deref().unwrap_or(&r.message)
                );
            }
        }
    }

    println!();
    println!(
        "成功: {} / 失敗: {} / スキップ: {} ({}ms)",
        result.succeeded.len(),
        result.failed.len(),
        result.skipped.len(),
        result.duration_ms
    );
}

/// y/N の確認を求める（入力が無ければ No）
pub fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
