use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use multiproc::cli::{
    execute_fn_pool, execute_producer_consumer, Cli, Commands, FnPoolOptions,
    ProducerConsumerOptions,
};
use multiproc::services::{LogConfig, PoolConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    LogConfig::from_verbosity(cli.verbose, cli.quiet, cli.log_level.as_deref())?
        .with_format(cli.log_format)
        .init_global()?;

    match cli.command {
        Commands::FnPool {
            workers,
            count,
            no_output,
            ignore_errors,
            fail_every,
            delay_ms,
            smoothing,
        } => {
            execute_fn_pool(FnPoolOptions {
                workers: workers.unwrap_or_else(PoolConfig::default_workers),
                count,
                with_output: !no_output,
                ignore_errors,
                fail_every,
                delay: Duration::from_millis(delay_ms),
                smoothing,
                verbose: cli.verbose,
                json: cli.json,
            })
            .await
        }
        Commands::ProducerConsumer {
            producers,
            consumers,
            count,
            delay_ms,
        } => {
            execute_producer_consumer(ProducerConsumerOptions {
                producers,
                consumers,
                count,
                delay: Duration::from_millis(delay_ms),
                verbose: cli.verbose,
                json: cli.json,
            })
            .await
            .map(|_| ())
        }
    }
}
