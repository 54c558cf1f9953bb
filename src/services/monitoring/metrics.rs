// テレメトリ用の小さな計測ヘルパー

use crate::core::{ProcessingError, ProcessingResult};
use std::time::Duration;

/// 重み付きの累積平均
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvgMetric {
    count: usize,
    avg: f64,
}

impl AvgMetric {
    pub fn new() -> Self {
        Self::default()
    }

    /// `value`を`n`回分として平均に加える
    pub fn update_n(&mut self, value: f64, n: usize) -> ProcessingResult<()> {
        if n == 0 {
            return Err(ProcessingError::configuration(
                "AvgMetricの重みnは1以上である必要があります",
            ));
        }
        let previous = self.count;
        self.count += n;
        self.avg = (self.avg * previous as f64 + value * n as f64) / self.count as f64;
        Ok(())
    }

    pub fn update(&mut self, value: f64) {
        // n=1は常に有効
        let previous = self.count;
        self.count += 1;
        self.avg = (self.avg * previous as f64 + value) / self.count as f64;
    }

    pub fn update_duration(&mut self, elapsed: Duration) {
        self.update(elapsed.as_secs_f64());
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 1件あたり秒数の指数移動平均
///
/// `smoothing == 0.0`のときは開始からの単純平均、`1.0`のときは直近区間のみ。
#[derive(Debug, Clone, PartialEq)]
pub struct EmaRate {
    smoothing: f64,
    seconds_per_item: Option<f64>,
    processed: usize,
    last_elapsed: f64,
}

impl EmaRate {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            seconds_per_item: None,
            processed: 0,
            last_elapsed: 0.0,
        }
    }

    /// `elapsed`時点で`amount`件完了したことを記録し、更新後の秒/件を返す
    pub fn record(&mut self, amount: usize, elapsed: Duration) -> f64 {
        let elapsed = elapsed.as_secs_f64();
        self.processed += amount;

        let average = elapsed / self.processed.max(1) as f64;
        let interval = (elapsed - self.last_elapsed).max(0.0) / amount.max(1) as f64;
        self.last_elapsed = elapsed;

        let updated = match self.seconds_per_item {
            _ if self.smoothing == 0.0 => average,
            None => interval,
            Some(previous) => self.smoothing * interval + (1.0 - self.smoothing) * previous,
        };
        self.seconds_per_item = Some(updated);
        updated
    }

    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    pub fn seconds_per_item(&self) -> Option<f64> {
        self.seconds_per_item
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// 残り件数から見積もった残り秒数
    pub fn eta_secs(&self, total: usize) -> Option<f64> {
        self.seconds_per_item
            .map(|spi| spi * total.saturating_sub(self.processed) as f64)
    }
}

/// 秒数を大きさに応じた単位で整形する（s, min, h, d, w, y）
///
/// `decimals`は小数点以下の桁数、`width`は数値部分の最小幅。
pub fn format_seconds_adaptive(seconds: f64, width: usize, decimals: usize) -> String {
    const MINUTE: f64 = 60.0;
    const HOUR: f64 = 3600.0;
    const DAY: f64 = HOUR * 24.0;
    const WEEK: f64 = DAY * 7.0;
    const YEAR: f64 = DAY * 365.0;

    let abs_seconds = seconds.abs();
    let (number, unit) = if abs_seconds < MINUTE {
        (seconds, "s")
    } else if abs_seconds < HOUR {
        (seconds / MINUTE, "min")
    } else if abs_seconds < DAY {
        (seconds / HOUR, "h")
    } else if abs_seconds < WEEK {
        (seconds / DAY, "d")
    } else if abs_seconds < YEAR {
        (seconds / WEEK, "w")
    } else {
        (seconds / YEAR, "y")
    };
    format!("{number:width$.decimals$}{unit}")
}

/// 大きさに応じて小数点以下2/1/0桁で整形する
pub fn format_float_variable_precision(value: f64, width: usize) -> String {
    let abs_value = value.abs();
    if abs_value < 100.0 {
        format!("{value:width$.2}")
    } else if abs_value < 1000.0 {
        format!("{value:width$.1}")
    } else {
        format!("{value:width$.0}")
    }
}

/// 秒/件から "12.34it/s" または "1.50s/it" 形式の速度表記を作る
pub fn format_rate(seconds_per_item: f64) -> String {
    if seconds_per_item > 0.0 && seconds_per_item < 1.0 {
        format!("{}it/s", format_float_variable_precision(1.0 / seconds_per_item, 5))
    } else {
        format!("{}s/it", format_float_variable_precision(seconds_per_item, 5))
    }
}
