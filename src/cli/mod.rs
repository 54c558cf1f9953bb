// CLI層 - コマンドライン引数の定義とデモコマンド

pub mod args;
pub mod commands;

pub use args::*;
pub use commands::*;
