use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// apply/destroy 実行中のスピナー
pub struct ApplyProgress {
    progress_bar: ProgressBar,
}

impl ApplyProgress {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { progress_bar: pb }
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message("完了 ✓");
    }

    pub fn finish_error(&self) {
        self.progress_bar.finish_with_message("失敗 ✗");
    }

    /// スピナーを消して結果表示に譲る
    pub fn clear(&self) {
        self.progress_bar.finish_and_clear();
    }
}
