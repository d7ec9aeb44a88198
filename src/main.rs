use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use tradeloop::commands::{backtest, live};
use tradeloop::config::parse_parameter_map_from_json;
use tradeloop::feed::Interval;

#[derive(Parser)]
#[command(name = "tradeloop")]
#[command(about = "Multi-asset strategy replay and live trading loop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars through a strategy and report fee-aware PnL
    Backtest {
        /// Comma separated symbols to trade
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// Strategy identifier (rsi_rebound, ha_reversal, rsi_range)
        #[arg(long)]
        strategy: String,
        /// Bar interval (1m, 5m, 15m, 1h, ...)
        #[arg(long, default_value = "1m")]
        interval: String,
        /// Days of history to fetch
        #[arg(long, default_value_t = 10)]
        days: u32,
        /// Engine and strategy parameters as a JSON object of numbers
        #[arg(long)]
        params: Option<String>,
    },
    /// Run the identical strategy logic against live polled bars
    Live {
        /// Comma separated symbols to trade
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// Strategy identifier (rsi_rebound, ha_reversal, rsi_range)
        #[arg(long)]
        strategy: String,
        /// Bar interval (1m, 5m, 15m, 1h, ...)
        #[arg(long, default_value = "1m")]
        interval: String,
        /// Days of history used to warm the strategy and seed windows
        #[arg(long, default_value_t = 10)]
        days: u32,
        /// Rolling window length in bars
        #[arg(long, default_value_t = 14400)]
        window: usize,
        /// Seconds to wait after an interval boundary before polling
        #[arg(long, default_value_t = 10)]
        settle_seconds: u64,
        /// Engine and strategy parameters as a JSON object of numbers
        #[arg(long)]
        params: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("Starting tradeloop. Not financial advice. Use at your own risk.");

    match cli.command {
        Commands::Backtest {
            symbols,
            strategy,
            interval,
            days,
            params,
        } => {
            let interval: Interval = interval.parse()?;
            let parameters = parse_params(params)?;
            backtest::run(&symbols, &strategy, &interval, days, &parameters)
        }
        Commands::Live {
            symbols,
            strategy,
            interval,
            days,
            window,
            settle_seconds,
            params,
        } => {
            let interval: Interval = interval.parse()?;
            let parameters = parse_params(params)?;
            live::run(
                &symbols,
                &strategy,
                &interval,
                days,
                window,
                settle_seconds,
                &parameters,
            )
        }
    }
}

fn parse_params(raw: Option<String>) -> Result<HashMap<String, f64>> {
    match raw {
        Some(json) => parse_parameter_map_from_json(&json),
        None => Ok(HashMap::new()),
    }
}
