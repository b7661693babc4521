// Main entry point - White Light daily position-trading engine.
//
// Thin CLI over the library: `run` executes (or dry-runs) one daily session,
// `sync` refreshes the bar cache, `backtest` replays the strategy over
// cached history. Exit codes: 0 success, 2 configuration error, 3 data
// unavailable, 4 broker failure after retries, 5 deadline missed.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::error;
use rust_decimal::Decimal;

use whitelight::backtesting::{BacktestConfig, BacktestEngine};
use whitelight::config::{DataSource, EngineConfig};
use whitelight::engine::TradingEngine;
use whitelight::error::EngineError;
use whitelight::secrets::EnvSecretStore;

#[derive(Parser)]
#[command(name = "whitelight", about = "Volatility-targeted TQQQ/SQQQ/BIL rotation engine")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, default_value = "whitelight.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Polygon,
    Yahoo,
    Cache,
}

impl From<SourceArg> for DataSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Polygon => DataSource::Polygon,
            SourceArg::Yahoo => DataSource::Yahoo,
            SourceArg::Cache => DataSource::Cache,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run today's session: signals, allocation, reconciliation, orders.
    Run {
        /// Compute and report the plan without submitting orders.
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh the bar cache from the configured provider.
    Sync,
    /// Replay the strategy over cached history.
    Backtest {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value = "100000")]
        capital: Decimal,
        /// Where bars come from; non-cache sources sync before replaying.
        #[arg(long, value_enum, default_value_t = SourceArg::Cache)]
        source: SourceArg,
        /// Optional path for a date,equity,drawdown CSV export.
        #[arg(long)]
        equity_csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    let mut config = if cli.config.exists() {
        EngineConfig::load_from_file(&cli.config)?
    } else {
        EngineConfig::default()
    };
    let secrets = EnvSecretStore;

    match cli.command {
        Command::Run { dry_run } => {
            let engine = TradingEngine::from_config(config, &secrets)?;
            let report = engine.run_session(Utc::now().date_naive(), dry_run).await?;
            println!(
                "session {}: {} | composite {:+.4} | TQQQ {} SQQQ {} BIL {} | {} orders",
                report.session_id,
                report.decision.state,
                report.composite_score,
                report.decision.allocation.tqqq,
                report.decision.allocation.sqqq,
                report.decision.allocation.bil,
                report.plan.len()
            );
            Ok(())
        }
        Command::Sync => {
            let engine = TradingEngine::market_data_only(config, &secrets)?;
            engine.sync(Utc::now().date_naive()).await
        }
        Command::Backtest {
            start,
            end,
            capital,
            source,
            equity_csv,
        } => {
            if end < start {
                return Err(EngineError::config("backtest end precedes start"));
            }
            config.data_source = source.into();
            let backtest_config = BacktestConfig {
                start,
                end,
                initial_capital: capital,
                slippage_bps: config.slippage_bps,
                bil_apr: config.bil_apr,
            };
            let engine = TradingEngine::market_data_only(config.clone(), &secrets)?;
            if config.data_source != DataSource::Cache {
                engine.sync_for_backtest(start, end).await?;
            }
            let histories = engine.load_backtest_histories()?;
            let replay = BacktestEngine::new(&config, backtest_config);
            let result = replay.run(&histories).await?;
            result.print_summary();
            if let Some(path) = equity_csv {
                result.write_equity_csv(&path)?;
                println!("equity curve written to {}", path.display());
            }
            Ok(())
        }
    }
}
