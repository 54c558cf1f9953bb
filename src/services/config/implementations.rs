// 設定管理の具象実装

use crate::core::{ProcessingError, ProcessingResult};
use std::time::Duration;

/// 有界キューの容量上限（tokioのセマフォが扱える最大許可数）
pub const MAX_QUEUE_CAPACITY: usize = usize::MAX >> 3;

/// ワーカープール共通の設定
///
/// ワーカー数はプールのコンストラクタで別途指定する。
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    ignore_errors: bool,
    with_output: bool,
    verbose: bool,
    total: Option<usize>,
    description: String,
    queue_factor: usize,
    refresh_interval: Duration,
    smoothing: f64,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// デフォルトのワーカー数（CPU数）
    pub fn default_workers() -> usize {
        num_cpus::get().max(1)
    }

    pub fn with_ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }

    pub fn with_output(mut self, with_output: bool) -> Self {
        self.with_output = with_output;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_queue_factor(mut self, queue_factor: usize) -> Self {
        self.queue_factor = queue_factor;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// 変換エラーをログに出して処理を続けるかどうか
    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    /// `WorkerPool`が出力を収集するかどうか
    pub fn collects_output(&self) -> bool {
        self.with_output
    }

    /// オーケストレーションのデバッグログを出すかどうか
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// 進捗表示用の総タスク数
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// キュー容量 = ワーカー数 × queue_factor
    ///
    /// 0件やオーバーフロー、`MAX_QUEUE_CAPACITY`超過は設定エラー
    pub fn queue_capacity(&self, workers: usize) -> ProcessingResult<usize> {
        workers
            .max(1)
            .checked_mul(self.queue_factor)
            .filter(|capacity| (1..=MAX_QUEUE_CAPACITY).contains(capacity))
            .ok_or_else(|| {
                ProcessingError::configuration(format!(
                    "キュー容量が範囲外です: workers={workers}, queue_factor={}",
                    self.queue_factor
                ))
            })
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    /// 設定値の検証
    pub fn validate(&self) -> ProcessingResult<()> {
        if self.queue_factor == 0 {
            return Err(ProcessingError::configuration(
                "queue_factorは1以上である必要があります",
            ));
        }
        if self.queue_factor > MAX_QUEUE_CAPACITY {
            return Err(ProcessingError::configuration(format!(
                "queue_factorは{MAX_QUEUE_CAPACITY}以下である必要があります: {}",
                self.queue_factor
            )));
        }
        if self.refresh_interval.is_zero() {
            return Err(ProcessingError::configuration(
                "refresh_intervalは0より大きい必要があります",
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(ProcessingError::configuration(format!(
                "smoothingは0から1の範囲である必要があります: {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            with_output: true,
            verbose: false,
            total: None,
            description: "Multiprocessing".to_string(),
            queue_factor: 2,
            refresh_interval: Duration::from_millis(200),
            smoothing: 0.0,
        }
    }
}
