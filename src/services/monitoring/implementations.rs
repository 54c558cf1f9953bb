// 進捗監視の具象実装

use super::metrics::{format_rate, format_seconds_adaptive, EmaRate};
use crate::core::{ProgressReporter, RunSummary, TransformFailure};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

struct ProgressState {
    bar: ProgressBar,
    description: String,
    total: Option<usize>,
    processed: usize,
    failures: usize,
    started: Instant,
    rate: EmaRate,
}

impl ProgressState {
    fn idle(smoothing: f64) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            description: String::new(),
            total: None,
            processed: 0,
            failures: 0,
            started: Instant::now(),
            rate: EmaRate::new(smoothing),
        }
    }

    fn message(&self) -> String {
        let Some(spi) = self.rate.seconds_per_item() else {
            return self.description.clone();
        };
        let mut message = format!("{} {}", self.description, format_rate(spi));
        if let Some(remaining) = self.total.and_then(|total| self.rate.eta_secs(total)) {
            message.push_str(&format!(" {} left", format_seconds_adaptive(remaining, 5, 2)));
        }
        message
    }
}

/// indicatifのプログレスバーによる進捗報告実装
///
/// 速度はEMAで平滑化した秒/件から計算し、総数が分かっていれば残り時間も表示する。
pub struct ConsoleProgressReporter {
    quiet: bool,
    state: Mutex<ProgressState>,
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self {
            quiet: false,
            state: Mutex::new(ProgressState::idle(0.0)),
        }
    }

    /// バーも完了ログも出さない
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new()
        }
    }

    /// これまでに加算された進捗
    pub fn processed(&self) -> usize {
        self.lock().processed
    }

    /// 報告されたエラー件数
    pub fn failures(&self) -> usize {
        self.lock().failures
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // バー表示だけの状態なのでpoisonは無視して続行
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_bar(&self, total: Option<usize>) -> ProgressBar {
        let draw_target = if !self.quiet && std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };

        let template = match total {
            Some(_) => "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}",
            None => "{msg} [{elapsed_precise}] {pos}",
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = ProgressBar::with_draw_target(total.map(|t| t as u64), draw_target);
        bar.set_style(style);
        bar
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_started(&self, total: Option<usize>, description: &str, smoothing: f64) {
        let bar = self.create_bar(total);
        bar.set_message(description.to_string());

        let mut state = self.lock();
        *state = ProgressState::idle(smoothing);
        state.bar = bar;
        state.description = description.to_string();
        state.total = total;
    }

    fn report_progress(&self, amount: usize) {
        let mut state = self.lock();

        // ワーカー数がタスク数より多い場合などに総数を超えないようにする
        let amount = match state.total {
            Some(total) => amount.min(total.saturating_sub(state.processed)),
            None => amount,
        };
        if amount == 0 {
            return;
        }

        state.processed += amount;
        let elapsed = state.started.elapsed();
        state.rate.record(amount, elapsed);

        let message = state.message();
        state.bar.set_message(message);
        state.bar.inc(amount as u64);
    }

    fn report_error(&self, _failure: &TransformFailure) {
        // ログはワーカー側で出力済み
        self.lock().failures += 1;
    }

    fn report_completed(&self, summary: &RunSummary) {
        let state = self.lock();
        state.bar.finish_and_clear();
        if !self.quiet {
            tracing::info!("{}: {}", summary.description, summary.telemetry_line());
        }
    }
}

/// 何もしない進捗報告実装（テスト・ベンチマーク用）
#[derive(Debug, Default, Clone)]
pub struct NoOpProgressReporter;

impl NoOpProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoOpProgressReporter {
    fn report_started(&self, _total: Option<usize>, _description: &str, _smoothing: f64) {
        // 何もしない
    }

    fn report_progress(&self, _amount: usize) {
        // 何もしない
    }

    fn report_error(&self, _failure: &TransformFailure) {
        // 何もしない
    }

    fn report_completed(&self, _summary: &RunSummary) {
        // 何もしない
    }
}
