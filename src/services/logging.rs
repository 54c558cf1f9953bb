// ログ設定
// グローバルな初期化に頼らず、設定オブジェクトを明示的に作って各エントリポイントで適用する

use crate::core::{ProcessingError, ProcessingResult};
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const FULL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const SHORT_TIME_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// ログ行の書式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// 日時(ミリ秒) + レベル + target + ファイル:行 + メッセージ
    Full,
    /// 日時 + レベル + target:行 + メッセージ
    Short,
    /// 日時 + レベル + メッセージ
    #[default]
    Shortest,
    /// レベル + メッセージ
    Timeless,
}

/// ログ出力の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    level: Level,
    format: LogFormat,
    ansi: bool,
}

/// `scoped`で適用したログ設定のガード。ドロップすると以前の設定に戻る
#[must_use = "ガードをドロップするとログ設定が元に戻ります"]
pub struct LogGuard {
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::default(),
            ansi: true,
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// CLIの -v / -q / --log-level からログ設定を作る
    ///
    /// -v は DEBUG、-q は WARN、指定なしは INFO。
    /// -v / -q と --log-level の併用は設定エラー。
    pub fn from_verbosity(
        verbose: bool,
        quiet: bool,
        log_level: Option<&str>,
    ) -> ProcessingResult<Self> {
        if verbose && quiet {
            return Err(ProcessingError::configuration(
                "-v/--verbose と -q/--quiet は同時に指定できません",
            ));
        }
        if (verbose || quiet) && log_level.is_some() {
            return Err(ProcessingError::configuration(
                "-v/--verbose または -q/--quiet と --log-level は同時に指定できません",
            ));
        }

        let level = match (verbose, quiet, log_level) {
            (true, _, _) => Level::DEBUG,
            (_, true, _) => Level::WARN,
            (_, _, Some(name)) => Self::parse_level(name)?,
            _ => Level::INFO,
        };
        Ok(Self::new(level))
    }

    /// レベル名を解釈する。WARNING / FATAL / CRITICAL も受け付ける
    pub fn parse_level(name: &str) -> ProcessingResult<Level> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::TRACE),
            "DEBUG" => Ok(Level::DEBUG),
            "INFO" => Ok(Level::INFO),
            "WARN" | "WARNING" => Ok(Level::WARN),
            "ERROR" | "CRITICAL" | "FATAL" => Ok(Level::ERROR),
            other => Err(ProcessingError::configuration(format!(
                "不明なログレベル: {other} (TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL)"
            ))),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn build_subscriber(&self) -> Box<dyn Subscriber + Send + Sync> {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.env_filter())
            .with_writer(std::io::stderr)
            .with_ansi(self.ansi);

        match self.format {
            LogFormat::Full => Box::new(
                builder
                    .with_timer(ChronoLocal::new(FULL_TIME_FORMAT.to_string()))
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .finish(),
            ),
            LogFormat::Short => Box::new(
                builder
                    .with_timer(ChronoLocal::new(SHORT_TIME_FORMAT.to_string()))
                    .with_target(true)
                    .with_line_number(true)
                    .finish(),
            ),
            LogFormat::Shortest => Box::new(
                builder
                    .with_timer(ChronoLocal::new(SHORT_TIME_FORMAT.to_string()))
                    .with_target(false)
                    .finish(),
            ),
            LogFormat::Timeless => Box::new(builder.without_time().with_target(false).finish()),
        }
    }

    /// プロセス全体のデフォルトとして適用する（バイナリのmain用）
    pub fn init_global(&self) -> ProcessingResult<()> {
        tracing::subscriber::set_global_default(self.build_subscriber()).map_err(|e| {
            ProcessingError::configuration(format!("ログ設定の初期化に失敗しました: {e}"))
        })
    }

    /// 現在のスレッドにだけ適用し、ガードのドロップで元に戻す
    pub fn scoped(&self) -> LogGuard {
        LogGuard {
            _guard: tracing::subscriber::set_default(self.build_subscriber()),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}
