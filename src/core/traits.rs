// ワーカープールのトレイト定義
// 関数アダプタとユーザー定義型のどちらもこの能力セットを実装する

use super::types::{RunSummary, TransformFailure};
use anyhow::Result;
use mockall::automock;

/// タスクを1つずつ変換するワーカー
///
/// `ProducerConsumerPool`のProducerと`WorkerPool`のワーカーの両方で使われる。
/// インスタンスはワーカーごとに1つ作られ、そのワーカースレッドに移動する。
pub trait Producer: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// ワーカースレッド上で最初に一度だけ呼ばれる
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// 1タスクを変換
    fn produce(&mut self, input: Self::Input) -> Result<Self::Output>;
}

/// Producerの出力を集約し、終了時に1つの結果を返すワーカー
pub trait Consumer: Send + 'static {
    type Item: Send + 'static;
    type Output: Send + 'static;

    /// ワーカースレッド上で最初に一度だけ呼ばれる
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// 1件の出力を取り込む
    fn consume(&mut self, item: Self::Item) -> Result<()>;

    /// 上流で失敗したタスクの通知。デフォルトでは読み飛ばす
    fn consume_failure(&mut self, failure: &TransformFailure) {
        let _ = failure;
    }

    /// 終了シグナル受信後に一度だけ呼ばれる
    fn complete(self) -> Result<Self::Output>;
}

/// 進捗報告の抽象化トレイト
#[automock]
pub trait ProgressReporter: Send + Sync {
    /// 処理開始時の報告
    ///
    /// `smoothing`は速度表示の平滑化係数（0 = 開始からの平均, 1 = 直近の速度）
    fn report_started(&self, total: Option<usize>, description: &str, smoothing: f64);

    /// 進捗の加算
    fn report_progress(&self, amount: usize);

    /// `ignore_errors`で握りつぶしたエラーの報告
    fn report_error(&self, failure: &TransformFailure);

    /// 処理完了時の報告
    fn report_completed(&self, summary: &RunSummary);
}

impl ProgressReporter for Box<dyn ProgressReporter> {
    fn report_started(&self, total: Option<usize>, description: &str, smoothing: f64) {
        self.as_ref().report_started(total, description, smoothing)
    }

    fn report_progress(&self, amount: usize) {
        self.as_ref().report_progress(amount)
    }

    fn report_error(&self, failure: &TransformFailure) {
        self.as_ref().report_error(failure)
    }

    fn report_completed(&self, summary: &RunSummary) {
        self.as_ref().report_completed(summary)
    }
}
