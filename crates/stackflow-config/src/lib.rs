pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{RetrySettings, Settings};

use std::path::PathBuf;

/// スタックファイルのパスを直接指定する環境変数
pub const STACK_PATH_ENV: &str = "STACKFLOW_STACK_PATH";

/// プロジェクト内の StackFlow ディレクトリ
pub const PROJECT_DIR: &str = ".stackflow";

/// 検索するスタックファイル名（優先順）
pub const STACK_FILE_CANDIDATES: [&str; 4] = [
    "stack.local.kdl",
    ".stack.local.kdl",
    "stack.kdl",
    ".stack.kdl",
];

/// ~/.config/stackflow
pub(crate) fn global_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stackflow"))
}

/// プロジェクトのスタックファイルを探す
///
/// 優先順位:
/// 1. 環境変数 STACKFLOW_STACK_PATH
/// 2. カレントディレクトリの [`STACK_FILE_CANDIDATES`]
/// 3. ./.stackflow/ 内の同じ候補
/// 4. ~/.config/stackflow/stack.kdl
#[tracing::instrument]
pub fn find_stack_file() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(STACK_PATH_ENV).map(PathBuf::from) {
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", STACK_PATH_ENV);
    }

    let cwd = std::env::current_dir()?;
    let found = [cwd.clone(), cwd.join(PROJECT_DIR)]
        .iter()
        .flat_map(|dir| STACK_FILE_CANDIDATES.iter().map(move |name| dir.join(name)))
        .chain(global_dir().map(|dir| dir.join("stack.kdl")))
        .find(|path| path.is_file());

    match found {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Found stack file");
            Ok(path)
        }
        None => Err(ConfigError::StackFileNotFound),
    }
}
