mod commands;
mod desired;
mod progress;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "KDLで宣言するクラウドインフラスタック", long_about = None)]
#[command(version)]
struct Cli {
    /// スタックファイルのパス（省略時は自動検出）
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// 組み込みのインフラスタックを使用
    #[arg(long, global = true, conflicts_with = "file")]
    builtin: bool,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// デプロイテンプレートを生成
    Synth {
        /// 出力先ファイル（省略時は標準出力）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// スタックを検証
    Validate,
    /// 変更計画を表示
    Plan,
    /// スタックを適用
    Apply {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,

        /// 失敗時のロールバックを無効化
        #[arg(long)]
        no_rollback: bool,

        /// 同時に実行するアクション数
        #[arg(long)]
        parallelism: Option<usize>,
    },
    /// 管理中のリソースをすべて削除
    Destroy {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 記録済みの状態を表示
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum StateCommands {
    /// 管理中のリソース一覧
    List,
    /// リソースの詳細
    Show {
        /// リソースキー（例: bucket:bucket2）
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let source = desired::StackSource::resolve(cli.file, cli.builtin);

    match cli.command {
        Commands::Synth { output } => commands::synth::handle(&source, output).await,
        Commands::Validate => commands::validate::handle(&source).await,
        Commands::Plan => commands::plan::handle(&source).await,
        Commands::Apply {
            yes,
            no_rollback,
            parallelism,
        } => {
            let overrides = utils::Overrides {
                rollback: no_rollback.then_some(false),
                parallelism,
            };
            commands::apply::handle(&source, yes, overrides).await
        }
        Commands::Destroy { yes } => commands::destroy::handle(yes).await,
        Commands::State(StateCommands::List) => commands::state::list().await,
        Commands::State(StateCommands::Show { key }) => commands::state::show(&key).await,
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// ログはstderrへ。RUST_LOG が無ければ warn、`-v` で debug
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
