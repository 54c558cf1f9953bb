pub mod fn_pool;
pub mod producer_consumer;

pub use fn_pool::*;
pub use producer_consumer::*;

use crate::core::RunSummary;
use anyhow::Result;

/// 実行サマリーをJSONまたは人間向けの行で標準出力に出す
pub fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{}: {:?}", summary.description, summary.mode);
    println!("  tasks:    {}", summary.total_tasks);
    println!("  failures: {}", summary.failures);
    println!("  elapsed:  {:.2}s", summary.elapsed_secs);
    println!("  {}", summary.telemetry_line());
    Ok(())
}
