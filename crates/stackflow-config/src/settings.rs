//! エンジン設定
//!
//! `~/.config/stackflow/config.yaml` とプロジェクトの
//! `.stackflow/config.yaml` を順に読み込み、後から読んだ値で上書きします。
//! 最後に環境変数 `STACKFLOW_PARALLELISM` / `STACKFLOW_ROLLBACK` を適用します。

use crate::{ConfigError, PROJECT_DIR, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "config.yaml";
pub const PARALLELISM_ENV: &str = "STACKFLOW_PARALLELISM";
pub const ROLLBACK_ENV: &str = "STACKFLOW_ROLLBACK";

/// apply/destroy の実行設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// 同時に実行するアクション数
    pub parallelism: usize,

    /// 失敗時に完了済みアクションを元に戻すか
    pub rollback: bool,

    pub retry: RetrySettings,
}

/// プロバイダー呼び出しのリトライ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// 初回を含む最大試行回数
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            rollback: true,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// 設定ファイル1枚分（書かれている項目だけを上書きする）
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsLayer {
    parallelism: Option<usize>,
    rollback: Option<bool>,
    retry: Option<RetryLayer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryLayer {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
}

impl Settings {
    /// グローバル設定、プロジェクト設定、環境変数の順に読み込む
    #[tracing::instrument(skip_all, fields(project_root = %project_root.as_ref().display()))]
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self> {
        let mut files = Vec::new();
        if let Some(global) = Self::global_path() {
            files.push(global);
        }
        files.push(Self::project_path(project_root));

        let mut settings = Self::load_files(&files)?;
        settings.apply_env()?;
        Ok(settings)
    }

    /// ~/.config/stackflow/config.yaml
    pub fn global_path() -> Option<PathBuf> {
        crate::global_dir().map(|dir| dir.join(SETTINGS_FILE))
    }

    /// <project_root>/.stackflow/config.yaml
    pub fn project_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(PROJECT_DIR).join(SETTINGS_FILE)
    }

    /// 存在するファイルだけを順に重ねる
    pub fn load_files(files: &[PathBuf]) -> Result<Self> {
        let mut settings = Self::default();
        for path in files {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            settings.merge_yaml(&content).map_err(|message| ConfigError::InvalidSettings {
                path: path.display().to_string(),
                message,
            })?;
            tracing::debug!(path = %path.display(), "Loaded settings");
        }
        settings.check()?;
        Ok(settings)
    }

    fn merge_yaml(&mut self, content: &str) -> std::result::Result<(), String> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let layer: SettingsLayer = serde_yaml::from_str(content).map_err(|e| e.to_string())?;

        if let Some(parallelism) = layer.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(rollback) = layer.rollback {
            self.rollback = rollback;
        }
        if let Some(retry) = layer.retry {
            if let Some(v) = retry.max_attempts {
                self.retry.max_attempts = v;
            }
            if let Some(v) = retry.initial_delay_ms {
                self.retry.initial_delay_ms = v;
            }
            if let Some(v) = retry.max_delay_ms {
                self.retry.max_delay_ms = v;
            }
            if let Some(v) = retry.backoff_multiplier {
                self.retry.backoff_multiplier = v;
            }
        }
        Ok(())
    }

    /// 環境変数による上書き
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(PARALLELISM_ENV) {
            self.parallelism = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: PARALLELISM_ENV.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Ok(value) = std::env::var(ROLLBACK_ENV) {
            self.rollback = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                name: ROLLBACK_ENV.to_string(),
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        let multiplier = self.retry.backoff_multiplier;
        let problem = if self.parallelism == 0 {
            Some("parallelism は 1 以上を指定してください")
        } else if self.retry.max_attempts == 0 {
            Some("retry.max_attempts は 1 以上を指定してください")
        } else if !(multiplier.is_finite() && multiplier >= 1.0) {
            Some("retry.backoff_multiplier は 1.0 以上の有限値を指定してください")
        } else if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            Some("retry.max_delay_ms は retry.initial_delay_ms 以上を指定してください")
        } else {
            None
        };

        match problem {
            Some(message) => Err(ConfigError::InvalidSettings {
                path: SETTINGS_FILE.to_string(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults_without_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_files(&[temp_dir.path().join("missing.yaml")]).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_project_overrides_global() {
        let temp_dir = tempfile::tempdir().unwrap();
        let global = temp_dir.path().join("global.yaml");
        let project = temp_dir.path().join("project.yaml");

        fs::write(
            &global,
            "parallelism: 8\nretry:\n  max_attempts: 5\n  initial_delay_ms: 200\n",
        )
        .unwrap();
        fs::write(&project, "parallelism: 2\nrollback: false\n").unwrap();

        let settings = Settings::load_files(&[global, project]).unwrap();
        assert_eq!(settings.parallelism, 2);
        assert!(!settings.rollback);
        // グローバルだけに書かれた項目は残る
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 200);
        assert_eq!(settings.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "paralelism: 2\n").unwrap();

        match Settings::load_files(&[path]) {
            Err(ConfigError::InvalidSettings { message, .. }) => {
                assert!(message.contains("paralelism"))
            }
            other => panic!("expected InvalidSettings, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "parallelism: 0\n").unwrap();

        assert!(matches!(
            Settings::load_files(&[path]),
            Err(ConfigError::InvalidSettings { .. })
        ));
    }

    /// 上限が初回より短い待ち時間や NaN の倍率は受け付けない
    #[test]
    fn test_inconsistent_retry_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");

        for (content, field) in [
            ("retry:\n  initial_delay_ms: 5000\n  max_delay_ms: 100\n", "max_delay_ms"),
            ("retry:\n  backoff_multiplier: .nan\n", "backoff_multiplier"),
            ("retry:\n  backoff_multiplier: .inf\n", "backoff_multiplier"),
        ] {
            fs::write(&path, content).unwrap();
            match Settings::load_files(std::slice::from_ref(&path)) {
                Err(ConfigError::InvalidSettings { message, .. }) => {
                    assert!(message.contains(field), "{}: {}", content, message)
                }
                other => panic!("expected InvalidSettings for {:?}, got {:?}", content, other),
            }
        }

        fs::write(&path, "retry:\n  initial_delay_ms: 100\n  max_delay_ms: 100\n").unwrap();
        assert!(Settings::load_files(&[path]).is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        temp_env::with_vars(
            [(PARALLELISM_ENV, Some("16")), (ROLLBACK_ENV, Some("no"))],
            || {
                let mut settings = Settings::default();
                settings.apply_env().unwrap();
                assert_eq!(settings.parallelism, 16);
                assert!(!settings.rollback);
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_env_is_reported() {
        temp_env::with_var(PARALLELISM_ENV, Some("many"), || {
            let mut settings = Settings::default();
            assert!(matches!(
                settings.apply_env(),
                Err(ConfigError::InvalidEnv { .. })
            ));
        });
    }

    #[test]
    #[serial]
    fn test_load_reads_project_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_dir = temp_dir.path().join(PROJECT_DIR);
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join(SETTINGS_FILE), "parallelism: 3\n").unwrap();

        temp_env::with_vars_unset([PARALLELISM_ENV, ROLLBACK_ENV], || {
            let settings = Settings::load(temp_dir.path()).unwrap();
            assert_eq!(settings.parallelism, 3);
        });
    }
}
