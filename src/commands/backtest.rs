use crate::config::EngineConfig;
use crate::engine::ReplayEngine;
use crate::feed::{Interval, MarketDataFeed, RestMarketFeed};
use crate::models::ReplayReport;
use crate::sink::SimulatedSink;
use crate::strategy::create_strategy;
use anyhow::Result;
use log::info;
use std::collections::HashMap;

pub fn run(
    symbols: &[String],
    strategy_id: &str,
    interval: &Interval,
    days: u32,
    parameters: &HashMap<String, f64>,
) -> Result<()> {
    let config = EngineConfig::from_parameters(parameters);
    let strategy = create_strategy(strategy_id, parameters)?;
    let annotators = strategy.annotators();

    let feed = RestMarketFeed::from_env()?;
    info!(
        "Fetching {} day(s) of {} history for {}",
        days,
        interval.as_str(),
        symbols.join(", ")
    );
    let mut data = feed.fetch_historical(symbols, interval, days)?;
    for series in &mut data {
        for annotator in &annotators {
            annotator.annotate(series);
        }
        info!("{}: {} bars", series.symbol(), series.len());
    }

    let mut engine = ReplayEngine::new(strategy);
    let mut sink = SimulatedSink::new(config.initial_balance, config.fee_rate);
    let report = engine.run(&data, &mut sink, true)?;

    log_summary(&report);
    Ok(())
}

fn log_summary(report: &ReplayReport) {
    info!(
        "Replay {} finished for {} ({:?} to {:?})",
        report.strategy_id,
        report.symbols.join(", "),
        report.start,
        report.end
    );
    info!("Initial balance: {:.2}", report.initial_balance);
    info!(
        "Final balance:   {:.2} (open positions included)",
        report.final_balance
    );
    info!("Total PnL:       {:.2}", report.total_pnl);
    info!("ROI:             {:.2}%", report.roi_percent);
    info!(
        "Fills: {} ({} long, {} short, {} still open)",
        report.total_fills, report.long_positions, report.short_positions, report.open_positions
    );
    info!(
        "Winning closes: {} / losing closes: {}",
        report.wins, report.losses
    );
}
