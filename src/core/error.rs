// ワーカープール専用のカスタムエラー型定義

use super::types::WorkerRole;
use thiserror::Error;

/// ワーカープール固有のエラー型
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("設定エラー: {message}")]
    ConfigurationError { message: String },

    #[error("変換エラー: {role}#{worker_id} - {source:#}")]
    TransformError {
        role: WorkerRole,
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("セットアップエラー: {role}#{worker_id} - {source:#}")]
    SetupError {
        role: WorkerRole,
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("チャンネルエラー: {message}")]
    ChannelError { message: String },

    #[error("タスクエラー: {worker} - {message}")]
    TaskError { worker: String, message: String },

    #[error("ワーカー消失: {role} の結果 {received}/{expected} 件のみ受信")]
    WorkerLost {
        role: WorkerRole,
        expected: usize,
        received: usize,
    },

    #[error("内部エラー: {source}")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl ProcessingError {
    /// 設定エラーの作成
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// 変換エラーの作成
    pub fn transform(role: WorkerRole, worker_id: usize, source: anyhow::Error) -> Self {
        Self::TransformError {
            role,
            worker_id,
            source,
        }
    }

    /// セットアップエラーの作成
    pub fn setup(role: WorkerRole, worker_id: usize, source: anyhow::Error) -> Self {
        Self::SetupError {
            role,
            worker_id,
            source,
        }
    }

    /// チャンネルエラーの作成
    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelError {
            message: message.into(),
        }
    }

    /// タスクエラーの作成（ワーカースレッドのパニックなど）
    pub fn task(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskError {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// 内部エラーの作成
    pub fn internal(source: anyhow::Error) -> Self {
        Self::InternalError { source }
    }

    /// ワーカー側で発生したエラーかどうか
    ///
    /// 設定エラーは`new`の時点で返るため、ワーカーは一度も起動していない
    pub fn is_worker_failure(&self) -> bool {
        matches!(
            self,
            Self::TransformError { .. }
                | Self::SetupError { .. }
                | Self::TaskError { .. }
                | Self::WorkerLost { .. }
        )
    }

    /// 同じ入力で再実行すれば成功し得るかどうか
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConfigurationError { .. } => false,
            Self::TransformError { .. } | Self::SetupError { .. } => false,
            Self::ChannelError { .. } => true,
            Self::TaskError { .. } => true,
            Self::WorkerLost { .. } => true,
            Self::InternalError { .. } => false,
        }
    }
}

/// ワーカープールの結果型
pub type ProcessingResult<T> = std::result::Result<T, ProcessingError>;

impl From<anyhow::Error> for ProcessingError {
    fn from(error: anyhow::Error) -> Self {
        ProcessingError::InternalError { source: error }
    }
}
