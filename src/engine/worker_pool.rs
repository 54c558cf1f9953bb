// WorkerPool - 1段のワーカープール
// 各タスクを変換し、出力を完了順に集める

use super::lifecycle::{join_workers, log_step, ErrorSlot, ProgressAccounting, WorkerHandle};
use super::producer::{shared_receiver, spawn_producer, OutputSink, WorkerContext};
use crate::core::{
    ExecutionMode, ProcessingError, ProcessingResult, Producer, ProgressReporter, RunSummary,
    TransformOutcome, WorkerMessage, WorkerRole, WorkerTimings,
};
use crate::services::monitoring::AvgMetric;
use crate::services::PoolConfig;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// W個のワーカーで`Producer`を並列に適用するプール
///
/// W = 0 の場合は投入されたタスクを溜めておき、`run`で呼び出し元が順に処理する。
/// W >= 1 では各ワーカーが専用のOSスレッドで動く。
pub struct WorkerPool<P: Producer, R> {
    workers: usize,
    config: PoolConfig,
    reporter: Arc<R>,
    progress: ProgressAccounting<R>,
    put_wait: AvgMetric,
    started: Instant,
    started_at: DateTime<Utc>,
    failed: bool,
    stage: PoolStage<P>,
}

enum PoolStage<P: Producer> {
    Foreground {
        producer: P,
        pending: VecDeque<P::Input>,
    },
    Background {
        task_tx: mpsc::Sender<WorkerMessage<P::Input>>,
        output_rx: Option<mpsc::UnboundedReceiver<TransformOutcome<P::Output>>>,
        handles: Vec<WorkerHandle>,
        completed: Arc<AtomicUsize>,
    },
}

type PoolOutput<P> = (Vec<TransformOutcome<<P as Producer>::Output>>, Vec<WorkerTimings>);

impl<P, R> WorkerPool<P, R>
where
    P: Producer,
    R: ProgressReporter + 'static,
{
    pub fn new<F>(
        workers: usize,
        config: PoolConfig,
        reporter: R,
        mut factory: F,
    ) -> ProcessingResult<Self>
    where
        F: FnMut(usize) -> P,
    {
        config.validate()?;
        let reporter = Arc::new(reporter);

        let (stage, warmup) = if workers == 0 {
            log_step(config.verbose(), "Running in foreground");
            let stage = PoolStage::Foreground {
                producer: factory(0),
                pending: VecDeque::new(),
            };
            // 処理はrunまで行われないので投入では進めない
            (stage, usize::MAX)
        } else {
            log_step(config.verbose(), &format!("Starting {workers} workers"));
            let (task_tx, task_rx) = mpsc::channel(config.queue_capacity(workers)?);
            let task_rx = shared_receiver(task_rx);
            let completed = Arc::new(AtomicUsize::new(0));

            let (sink, output_rx) = if config.collects_output() {
                let (output_tx, output_rx) = mpsc::unbounded_channel();
                (Some(output_tx), Some(output_rx))
            } else {
                (None, None)
            };

            let handles = (0..workers)
                .map(|worker_id| {
                    let sink = match &sink {
                        Some(output_tx) => OutputSink::Collect(output_tx.clone()),
                        None => OutputSink::Discard,
                    };
                    spawn_producer(
                        WorkerContext::new(WorkerRole::Worker, worker_id, config.ignore_errors()),
                        factory(worker_id),
                        Arc::clone(&task_rx),
                        sink,
                        Arc::clone(&completed),
                        Arc::clone(&reporter),
                    )
                })
                .collect::<ProcessingResult<Vec<_>>>()?;

            let stage = PoolStage::Background {
                task_tx,
                output_rx,
                handles,
                completed,
            };
            (stage, workers * 3)
        };

        reporter.report_started(config.total(), config.description(), config.smoothing());

        Ok(Self {
            workers,
            progress: ProgressAccounting::new(Arc::clone(&reporter), warmup),
            reporter,
            config,
            put_wait: AvgMetric::new(),
            started: Instant::now(),
            started_at: Utc::now(),
            failed: false,
            stage,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.stage {
            PoolStage::Foreground { .. } => ExecutionMode::Foreground,
            PoolStage::Background { .. } => ExecutionMode::Background,
        }
    }

    /// これまでに投入したタスク数
    pub fn submitted(&self) -> usize {
        self.progress.submitted()
    }

    /// タスクを1件投入する。キューが満杯の間は待機する
    pub async fn put(&mut self, input: P::Input) -> ProcessingResult<()> {
        if self.failed {
            return Err(ProcessingError::channel(
                "プールは既にエラーで停止しています",
            ));
        }

        match &mut self.stage {
            PoolStage::Foreground { pending, .. } => pending.push_back(input),
            PoolStage::Background {
                task_tx, handles, ..
            } => {
                let started = Instant::now();
                if task_tx.send(WorkerMessage::Task(input)).await.is_err() {
                    self.failed = true;
                    // 全ワーカーが停止済み。原因を回収して返す
                    let mut errors = ErrorSlot::new();
                    let mut timings = Vec::new();
                    let handles = std::mem::take(handles);
                    let interval = self.config.refresh_interval();
                    errors.collect(join_workers(handles, interval, || {}).await, &mut timings);
                    return Err(errors.take().unwrap_or_else(|| {
                        ProcessingError::channel("タスクキューが閉じられました")
                    }));
                }
                self.put_wait.update_duration(started.elapsed());
            }
        }

        self.progress.on_submit();
        Ok(())
    }

    /// 全タスクの処理を待ち、出力を返す
    ///
    /// 出力は完了順。`with_output(false)`の場合は空。
    /// `ignore_errors`有効時、失敗したタスクは`Err(TransformFailure)`として含まれる。
    pub async fn run(self) -> ProcessingResult<Vec<TransformOutcome<P::Output>>> {
        self.run_with_summary().await.map(|(outputs, _)| outputs)
    }

    pub async fn run_with_summary(
        self,
    ) -> ProcessingResult<(Vec<TransformOutcome<P::Output>>, RunSummary)> {
        let Self {
            workers,
            config,
            reporter,
            mut progress,
            put_wait,
            started,
            started_at,
            failed,
            stage,
        } = self;

        if failed {
            return Err(ProcessingError::channel(
                "プールは既にエラーで停止しています",
            ));
        }

        let (mode, (outputs, timings)) = match stage {
            PoolStage::Foreground { producer, pending } => (
                ExecutionMode::Foreground,
                run_foreground(producer, pending, &config, reporter.as_ref(), &mut progress)?,
            ),
            PoolStage::Background {
                task_tx,
                output_rx,
                handles,
                completed,
            } => {
                log_step(config.verbose(), &format!("Add {workers} term signals"));
                for _ in 0..workers {
                    if task_tx.send(WorkerMessage::Terminate).await.is_err() {
                        break;
                    }
                }
                drop(task_tx);

                log_step(config.verbose(), "Wait for workers to finish");
                let results = join_workers(handles, config.refresh_interval(), || {
                    progress.catch_up(completed.load(Ordering::Relaxed))
                })
                .await;
                let mut errors = ErrorSlot::new();
                let mut timings = Vec::with_capacity(workers);
                errors.collect(results, &mut timings);
                errors.into_result()?;

                // 全ワーカー終了済みなので送信側は全て閉じている
                let mut outputs = Vec::new();
                if let Some(mut output_rx) = output_rx {
                    while let Some(outcome) = output_rx.recv().await {
                        outputs.push(outcome);
                    }
                }
                progress.finish();
                (ExecutionMode::Background, (outputs, timings))
            }
        };

        let summary = RunSummary {
            mode,
            description: config.description().to_string(),
            started_at,
            total_tasks: progress.submitted(),
            failures: timings.iter().map(|t| t.failures).sum(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            avg_main_put_wait_secs: put_wait.avg(),
            workers: timings,
        };
        reporter.report_completed(&summary);

        Ok((outputs, summary))
    }
}

fn run_foreground<P, R>(
    mut producer: P,
    pending: VecDeque<P::Input>,
    config: &PoolConfig,
    reporter: &R,
    progress: &mut ProgressAccounting<R>,
) -> ProcessingResult<PoolOutput<P>>
where
    P: Producer,
    R: ProgressReporter,
{
    let ctx = WorkerContext::new(WorkerRole::Worker, 0, config.ignore_errors());
    producer
        .setup()
        .map_err(|e| ProcessingError::setup(ctx.role, ctx.worker_id, e))?;

    let mut outputs = Vec::new();
    let mut failures = 0;
    let mut items_processed = 0;
    for input in pending {
        let outcome = match producer.produce(input) {
            Ok(output) => Ok(output),
            Err(error) => {
                failures += 1;
                Err(ctx.handle_failure(error, reporter)?)
            }
        };
        if config.collects_output() {
            outputs.push(outcome);
        }
        items_processed += 1;
        progress.catch_up(items_processed);
    }

    let timings = vec![WorkerTimings {
        role: ctx.role,
        worker_id: ctx.worker_id,
        items_processed,
        failures,
        avg_wait_get_secs: 0.0,
        avg_wait_put_secs: None,
    }];
    Ok((outputs, timings))
}
