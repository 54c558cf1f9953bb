// Pipeline - Producer-Consumer パイプライン
// タスク投入、終了シグナル、結果回収のオーケストレーション

use super::consumer::spawn_consumer;
use super::lifecycle::{join_workers, log_step, ErrorSlot, ProgressAccounting, WorkerHandle};
use super::producer::{shared_receiver, spawn_producer, OutputSink, WorkerContext};
use crate::core::{
    Consumer, ExecutionMode, ProcessingError, ProcessingResult, Producer, ProgressReporter,
    RunSummary, TransformOutcome, WorkerMessage, WorkerRole, WorkerTimings,
};
use crate::services::monitoring::AvgMetric;
use crate::services::PoolConfig;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// N個のProducerとM個のConsumerからなる2段パイプライン
///
/// `put`で投入したタスクはいずれかのProducerで変換され、その出力はいずれかのConsumerに渡る。
/// `run`は全ワーカーに終了シグナルを送り、Consumerごとの`complete()`の結果を返す。
/// N = M = 0 の場合はワーカーを起動せず、呼び出し元で逐次処理する。
/// それ以外では各ワーカーが専用のOSスレッドで動く。
pub struct ProducerConsumerPool<P, C, R>
where
    P: Producer,
    C: Consumer<Item = P::Output>,
{
    producers: usize,
    consumers: usize,
    config: PoolConfig,
    reporter: Arc<R>,
    progress: ProgressAccounting<R>,
    put_wait: AvgMetric,
    started: Instant,
    started_at: DateTime<Utc>,
    failed: bool,
    stage: Stage<P, C>,
}

enum Stage<P: Producer, C: Consumer> {
    Foreground(ForegroundStage<P, C>),
    Background(BackgroundStage<P, C>),
}

/// N = M = 0: 1組のProducer / Consumerをその場で呼び出す
struct ForegroundStage<P, C> {
    producer: P,
    consumer: C,
    producer_ctx: WorkerContext,
    consumer_ctx: WorkerContext,
    produced: usize,
    consumed: usize,
    producer_failures: usize,
    consumer_failures: usize,
}

impl<P, C> ForegroundStage<P, C>
where
    P: Producer,
    C: Consumer<Item = P::Output>,
{
    fn start(mut producer: P, mut consumer: C, ignore_errors: bool) -> ProcessingResult<Self> {
        let producer_ctx = WorkerContext::new(WorkerRole::Producer, 0, ignore_errors);
        let consumer_ctx = WorkerContext::new(WorkerRole::Consumer, 0, ignore_errors);
        producer
            .setup()
            .map_err(|e| ProcessingError::setup(producer_ctx.role, 0, e))?;
        consumer
            .setup()
            .map_err(|e| ProcessingError::setup(consumer_ctx.role, 0, e))?;

        Ok(Self {
            producer,
            consumer,
            producer_ctx,
            consumer_ctx,
            produced: 0,
            consumed: 0,
            producer_failures: 0,
            consumer_failures: 0,
        })
    }

    fn process<R: ProgressReporter>(
        &mut self,
        input: P::Input,
        reporter: &R,
    ) -> ProcessingResult<()> {
        self.produced += 1;
        match self.producer.produce(input) {
            Ok(item) => {
                self.consumed += 1;
                if let Err(error) = self.consumer.consume(item) {
                    self.consumer_failures += 1;
                    self.consumer_ctx.handle_failure(error, reporter)?;
                }
            }
            Err(error) => {
                self.producer_failures += 1;
                let failure = self.producer_ctx.handle_failure(error, reporter)?;
                self.consumer.consume_failure(&failure);
            }
        }
        Ok(())
    }

    fn finish(self) -> ProcessingResult<(C::Output, Vec<WorkerTimings>)> {
        let output = self
            .consumer
            .complete()
            .map_err(|e| ProcessingError::transform(WorkerRole::Consumer, 0, e))?;

        let timings = vec![
            WorkerTimings {
                role: WorkerRole::Producer,
                worker_id: 0,
                items_processed: self.produced,
                failures: self.producer_failures,
                avg_wait_get_secs: 0.0,
                avg_wait_put_secs: Some(0.0),
            },
            WorkerTimings {
                role: WorkerRole::Consumer,
                worker_id: 0,
                items_processed: self.consumed,
                failures: self.consumer_failures,
                avg_wait_get_secs: 0.0,
                avg_wait_put_secs: None,
            },
        ];
        Ok((output, timings))
    }
}

/// N, M >= 1: ワーカースレッドとキュー
struct BackgroundStage<P: Producer, C: Consumer> {
    task_tx: mpsc::Sender<WorkerMessage<P::Input>>,
    item_tx: mpsc::Sender<WorkerMessage<TransformOutcome<P::Output>>>,
    result_rx: mpsc::UnboundedReceiver<C::Output>,
    producer_handles: Vec<WorkerHandle>,
    consumer_handles: Vec<WorkerHandle>,
    completed: Arc<AtomicUsize>,
}

impl<P, C> BackgroundStage<P, C>
where
    P: Producer,
    C: Consumer<Item = P::Output>,
{
    async fn shutdown<R: ProgressReporter>(
        self,
        producers: usize,
        consumers: usize,
        config: &PoolConfig,
        progress: &mut ProgressAccounting<R>,
    ) -> ProcessingResult<(Vec<C::Output>, Vec<WorkerTimings>)> {
        let Self {
            task_tx,
            item_tx,
            mut result_rx,
            producer_handles,
            consumer_handles,
            completed,
        } = self;
        let verbose = config.verbose();
        let mut errors = ErrorSlot::new();
        let mut timings = Vec::with_capacity(producers + consumers);

        log_step(verbose, &format!("Add {producers} term signals for producers"));
        for _ in 0..producers {
            // 全Producerが停止済みなら送れない。原因はjoinで回収する
            if task_tx.send(WorkerMessage::Terminate).await.is_err() {
                break;
            }
        }
        drop(task_tx);

        log_step(verbose, "Wait for producers to finish");
        let results = join_workers(producer_handles, config.refresh_interval(), || {
            progress.catch_up(completed.load(Ordering::Relaxed))
        })
        .await;
        errors.collect(results, &mut timings);
        progress.catch_up(completed.load(Ordering::Relaxed));

        log_step(verbose, &format!("Add {consumers} term signals for consumers"));
        for _ in 0..consumers {
            if item_tx.send(WorkerMessage::Terminate).await.is_err() {
                break;
            }
        }
        drop(item_tx);

        log_step(verbose, "Collect data from consumer output queue");
        let mut outputs = Vec::with_capacity(consumers);
        while outputs.len() < consumers {
            match result_rx.recv().await {
                Some(output) => outputs.push(output),
                None => break,
            }
        }

        log_step(verbose, "Joining consumers");
        let results = join_workers(consumer_handles, config.refresh_interval(), || {}).await;
        errors.collect(results, &mut timings);
        errors.into_result()?;

        if outputs.len() < consumers {
            return Err(ProcessingError::WorkerLost {
                role: WorkerRole::Consumer,
                expected: consumers,
                received: outputs.len(),
            });
        }
        progress.finish();
        Ok((outputs, timings))
    }
}

impl<P, C, R> ProducerConsumerPool<P, C, R>
where
    P: Producer,
    C: Consumer<Item = P::Output>,
    R: ProgressReporter + 'static,
{
    /// プールを作成し、バックグラウンドモードならワーカーを起動する
    ///
    /// ファクトリはワーカー番号を受け取り、そのワーカー専用のインスタンスを返す。
    /// N と M の一方だけが0の場合は設定エラーで、ワーカーは起動しない。
    pub fn new<PF, CF>(
        producers: usize,
        consumers: usize,
        config: PoolConfig,
        reporter: R,
        mut producer_factory: PF,
        mut consumer_factory: CF,
    ) -> ProcessingResult<Self>
    where
        PF: FnMut(usize) -> P,
        CF: FnMut(usize) -> C,
    {
        config.validate()?;
        if (producers == 0) != (consumers == 0) {
            return Err(ProcessingError::configuration(format!(
                "producers={producers}, consumers={consumers}: 両方0(フォアグラウンド)か両方1以上である必要があります"
            )));
        }

        let reporter = Arc::new(reporter);
        let ignore_errors = config.ignore_errors();

        let (stage, warmup) = if producers == 0 {
            log_step(config.verbose(), "Running in foreground");
            let stage =
                ForegroundStage::start(producer_factory(0), consumer_factory(0), ignore_errors)?;
            (Stage::Foreground(stage), 0)
        } else {
            log_step(
                config.verbose(),
                &format!("Starting {producers} producers and {consumers} consumers"),
            );
            let (task_tx, task_rx) = mpsc::channel(config.queue_capacity(producers)?);
            let (item_tx, item_rx) = mpsc::channel(config.queue_capacity(consumers)?);
            let (result_tx, result_rx) = mpsc::unbounded_channel();
            let task_rx = shared_receiver(task_rx);
            let item_rx = shared_receiver(item_rx);
            let completed = Arc::new(AtomicUsize::new(0));

            let producer_handles = (0..producers)
                .map(|worker_id| {
                    spawn_producer(
                        WorkerContext::new(WorkerRole::Producer, worker_id, ignore_errors),
                        producer_factory(worker_id),
                        Arc::clone(&task_rx),
                        OutputSink::Stage(item_tx.clone()),
                        Arc::clone(&completed),
                        Arc::clone(&reporter),
                    )
                })
                .collect::<ProcessingResult<Vec<_>>>()?;
            let consumer_handles = (0..consumers)
                .map(|worker_id| {
                    spawn_consumer(
                        WorkerContext::new(WorkerRole::Consumer, worker_id, ignore_errors),
                        consumer_factory(worker_id),
                        Arc::clone(&item_rx),
                        result_tx.clone(),
                        Arc::clone(&reporter),
                    )
                })
                .collect::<ProcessingResult<Vec<_>>>()?;

            let stage = BackgroundStage {
                task_tx,
                item_tx,
                result_rx,
                producer_handles,
                consumer_handles,
                completed,
            };
            (Stage::Background(stage), producers * 3)
        };

        reporter.report_started(config.total(), config.description(), config.smoothing());

        Ok(Self {
            producers,
            consumers,
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
            Stage::Foreground(_) => ExecutionMode::Foreground,
            Stage::Background(_) => ExecutionMode::Background,
        }
    }

    /// これまでに投入したタスク数
    pub fn submitted(&self) -> usize {
        self.progress.submitted()
    }

    /// タスクを1件投入する
    ///
    /// バックグラウンドモードではキューが満杯の間待機する。
    /// フォアグラウンドモードではその場でproduce / consumeまで実行する。
    pub async fn put(&mut self, input: P::Input) -> ProcessingResult<()> {
        if self.failed {
            return Err(ProcessingError::channel(
                "プールは既にエラーで停止しています",
            ));
        }

        let result = match &mut self.stage {
            Stage::Foreground(stage) => stage.process(input, self.reporter.as_ref()),
            Stage::Background(stage) => {
                let started = Instant::now();
                match stage.task_tx.send(WorkerMessage::Task(input)).await {
                    Ok(()) => {
                        self.put_wait.update_duration(started.elapsed());
                        Ok(())
                    }
                    Err(_) => Err(Self::abort(stage, self.consumers, &self.config).await),
                }
            }
        };

        match result {
            Ok(()) => {
                self.progress.on_submit();
                Ok(())
            }
            Err(error) => {
                self.failed = true;
                Err(error)
            }
        }
    }

    /// タスクキューが閉じた原因を全ワーカーの終了結果から取り出す
    ///
    /// Consumerが先に停止するとProducerはチャンネルエラーで終わるため、Consumerも終了させて回収する。
    async fn abort(
        stage: &mut BackgroundStage<P, C>,
        consumers: usize,
        config: &PoolConfig,
    ) -> ProcessingError {
        let mut errors = ErrorSlot::new();
        let mut timings = Vec::new();

        let producer_handles = std::mem::take(&mut stage.producer_handles);
        errors.collect(
            join_workers(producer_handles, config.refresh_interval(), || {}).await,
            &mut timings,
        );

        for _ in 0..consumers {
            if stage.item_tx.send(WorkerMessage::Terminate).await.is_err() {
                break;
            }
        }
        let consumer_handles = std::mem::take(&mut stage.consumer_handles);
        errors.collect(
            join_workers(consumer_handles, config.refresh_interval(), || {}).await,
            &mut timings,
        );

        errors
            .take()
            .unwrap_or_else(|| ProcessingError::channel("タスクキューが閉じられました"))
    }

    /// 全タスクの処理を待ち、Consumerごとの結果を返す
    ///
    /// 結果の順序はConsumerの終了順で、ワーカー番号順ではない。
    pub async fn run(self) -> ProcessingResult<Vec<C::Output>> {
        self.run_with_summary().await.map(|(outputs, _)| outputs)
    }

    /// `run`と同じだが、待ち時間などの実行サマリーも返す
    pub async fn run_with_summary(self) -> ProcessingResult<(Vec<C::Output>, RunSummary)> {
        let Self {
            producers,
            consumers,
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

        let (mode, outputs, workers) = match stage {
            Stage::Foreground(stage) => {
                let (output, timings) = stage.finish()?;
                progress.finish();
                (ExecutionMode::Foreground, vec![output], timings)
            }
            Stage::Background(stage) => {
                let (outputs, timings) = stage
                    .shutdown(producers, consumers, &config, &mut progress)
                    .await?;
                (ExecutionMode::Background, outputs, timings)
            }
        };

        let summary = RunSummary {
            mode,
            description: config.description().to_string(),
            started_at,
            total_tasks: progress.submitted(),
            failures: workers.iter().map(|w| w.failures).sum(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            avg_main_put_wait_secs: put_wait.avg(),
            workers,
        };
        reporter.report_completed(&summary);

        Ok((outputs, summary))
    }
}
