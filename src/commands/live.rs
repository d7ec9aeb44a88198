use crate::config::EngineConfig;
use crate::engine::ReplayEngine;
use crate::feed::{Interval, RestMarketFeed};
use crate::gateway::{GatewaySink, RestExecutionGateway};
use crate::live::LiveTrader;
use crate::strategy::create_strategy;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;

#[allow(clippy::too_many_arguments)]
pub fn run(
    symbols: &[String],
    strategy_id: &str,
    interval: &Interval,
    history_days: u32,
    window_len: usize,
    settle_seconds: u64,
    parameters: &HashMap<String, f64>,
) -> Result<()> {
    let config = EngineConfig::from_parameters(parameters);
    let strategy = create_strategy(strategy_id, parameters)?;

    let feed = RestMarketFeed::from_env()?;
    let gateway = RestExecutionGateway::from_env()?;

    let engine = ReplayEngine::new(strategy);
    let mut trader = LiveTrader::bootstrap(
        engine,
        Box::new(feed),
        symbols.to_vec(),
        interval.clone(),
        history_days,
        window_len,
        Duration::from_secs(settle_seconds),
        config.initial_balance,
        config.fee_rate,
    )?;

    let mut sink = GatewaySink::new(Box::new(gateway), config.initial_balance, config.fee_rate);
    trader.run(&mut sink)
}
