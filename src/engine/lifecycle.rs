// ワーカーの終了待ちと進捗の帳簿付け
// ProducerConsumerPoolとWorkerPoolで共通

use crate::core::{ProcessingError, ProcessingResult, ProgressReporter, WorkerTimings};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// 専用スレッドで動くワーカーの終了結果の受け口
pub(crate) struct WorkerHandle {
    name: String,
    result_rx: oneshot::Receiver<ProcessingResult<WorkerTimings>>,
}

impl WorkerHandle {
    #[cfg(test)]
    pub async fn join(self) -> ProcessingResult<WorkerTimings> {
        let name = self.name;
        self.result_rx.await.unwrap_or_else(|_| Err(exited_without_result(name)))
    }
}

/// ワーカーを専用のOSスレッドで起動する
///
/// ワーカーは終了シグナルまで戻らないため、tokioのblockingスレッドプールは使わない。
/// パニックは`TaskError`として結果に変換される。
pub(crate) fn spawn_worker<F>(name: String, work: F) -> ProcessingResult<WorkerHandle>
where
    F: FnOnce() -> ProcessingResult<WorkerTimings> + Send + 'static,
{
    let (result_tx, result_rx) = oneshot::channel();
    let worker_name = name.clone();

    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| {
                    Err(ProcessingError::task(
                        worker_name,
                        panic_message(payload.as_ref()),
                    ))
                });
            // 受信側が破棄済みなら結果は不要
            let _ = result_tx.send(result);
        })
        .map_err(|e| {
            ProcessingError::internal(
                anyhow::Error::new(e).context(format!("{name} のスレッド起動に失敗しました")),
            )
        })?;

    Ok(WorkerHandle { name, result_rx })
}

fn exited_without_result(name: String) -> ProcessingError {
    ProcessingError::task(name, "結果を返さずに終了しました")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// 投入数と完了数から進捗を単調に進める
pub(crate) struct ProgressAccounting<R> {
    reporter: Arc<R>,
    warmup: usize,
    submitted: usize,
    reported: usize,
}

impl<R: ProgressReporter> ProgressAccounting<R> {
    /// `warmup`件を超えた投入から、投入1件ごとに進捗を1進める
    ///
    /// W個のワーカーでは最初のW件は即座に受け取られ、さらに2W件がキューに溜まる。
    /// そのため投入ベースの進捗は3W件目以降でないと実態より速く見える。
    pub fn new(reporter: Arc<R>, warmup: usize) -> Self {
        Self {
            reporter,
            warmup,
            submitted: 0,
            reported: 0,
        }
    }

    pub fn on_submit(&mut self) {
        self.submitted += 1;
        if self.submitted > self.warmup {
            self.advance(1);
        }
    }

    /// 実際の完了数に追いつく。進捗は戻らない
    pub fn catch_up(&mut self, completed: usize) {
        let target = completed.min(self.submitted);
        if target > self.reported {
            self.advance(target - self.reported);
        }
    }

    /// 投入済みの全件を完了扱いにする
    pub fn finish(&mut self) {
        self.catch_up(self.submitted);
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    #[cfg(test)]
    pub fn reported(&self) -> usize {
        self.reported
    }

    fn advance(&mut self, amount: usize) {
        self.reported += amount;
        self.reporter.report_progress(amount);
    }
}

/// 全ワーカーの終了を順に待つ。待機中は`interval`ごとに`on_tick`を呼ぶ
pub(crate) async fn join_workers<F>(
    handles: Vec<WorkerHandle>,
    interval: Duration,
    mut on_tick: F,
) -> Vec<ProcessingResult<WorkerTimings>>
where
    F: FnMut(),
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut results = Vec::with_capacity(handles.len());
    for mut handle in handles {
        let joined = loop {
            tokio::select! {
                joined = &mut handle.result_rx => break joined,
                _ = ticker.tick() => on_tick(),
            }
        };
        let name = handle.name;
        results.push(joined.unwrap_or_else(|_| Err(exited_without_result(name))));
    }
    results
}

/// 複数ワーカーのエラーから呼び出し元へ返す1つを選ぶ
///
/// チャンネルエラーは他のワーカーが先に停止した結果であることが多いため、
/// 原因側のエラーがあればそちらを優先する。
#[derive(Default)]
pub(crate) struct ErrorSlot {
    error: Option<ProcessingError>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: ProcessingError) {
        let replace = match &self.error {
            None => true,
            Some(ProcessingError::ChannelError { .. }) => {
                !matches!(error, ProcessingError::ChannelError { .. })
            }
            Some(_) => false,
        };
        if replace {
            self.error = Some(error);
        } else {
            tracing::debug!("additional worker error: {error}");
        }
    }

    /// 成功したワーカーのタイミングを集め、エラーは記録する
    pub fn collect(
        &mut self,
        results: Vec<ProcessingResult<WorkerTimings>>,
        timings: &mut Vec<WorkerTimings>,
    ) {
        for result in results {
            match result {
                Ok(timing) => timings.push(timing),
                Err(error) => self.record(error),
            }
        }
    }

    pub fn take(&mut self) -> Option<ProcessingError> {
        self.error.take()
    }

    pub fn into_result(self) -> ProcessingResult<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// オーケストレーションの段階ログ。verbose時はINFO、それ以外はDEBUG
pub(crate) fn log_step(verbose: bool, message: &str) {
    if verbose {
        tracing::info!("{message}");
    } else {
        tracing::debug!("{message}");
    }
}
