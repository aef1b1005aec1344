//! Signal-driven trading core simulation.
//!
//! Runs scripted decision sets through the full cycle machinery: price
//! snapshot, interpretation, ledger mutation, record emission.

use rust_decimal_macros::dec;
use std::sync::Arc;
use trader_core::*;

fn base_config() -> EngineConfig {
    EngineConfig {
        actors: vec![ActorId::new("alpha")],
        instruments: vec![Instrument::new("BTC"), Instrument::new("ETH")],
        cycle_interval_secs: 1,
        call_timeout_secs: 5,
        ..EngineConfig::default()
    }
}

fn build(
    config: EngineConfig,
) -> (
    Arc<CycleOrchestrator>,
    Arc<StaticFeed>,
    Arc<ScriptedService>,
    Arc<MemorySink>,
) {
    let ledger = Arc::new(PositionLedger::new(config.leverage_bounds));
    let feed = Arc::new(StaticFeed::new());
    let decisions = Arc::new(ScriptedService::new());
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(CycleOrchestrator::new(
        config,
        ledger,
        feed.clone(),
        decisions.clone(),
        sink.clone(),
    ));
    orchestrator.bootstrap().expect("fresh ledger");
    (orchestrator, feed, decisions, sink)
}

fn buy(quantity: &str, leverage: u32) -> RawDecision {
    RawDecision {
        signal: Some("buy_to_enter".into()),
        quantity: Some(quantity.parse().unwrap()),
        leverage: Some(leverage.into()),
        confidence: Some(dec!(0.8)),
        justification: Some("scripted".into()),
    }
}

fn close() -> RawDecision {
    RawDecision {
        signal: Some("close_position".into()),
        ..RawDecision::default()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("Signal-Driven Trading Core Simulation");
    println!("Scripted decisions, static prices, in-memory persistence\n");

    scenario_1_round_trip().await;
    scenario_2_malformed_signals().await;
    scenario_3_price_swing().await;
    scenario_4_outage_and_retry().await;

    println!("\nAll simulations completed.");
}

/// Open long, watch it appreciate, close it.
async fn scenario_1_round_trip() {
    println!("Scenario 1: Round Trip\n");

    let (orchestrator, feed, decisions, sink) = build(base_config());
    let alpha = ActorId::new("alpha");
    let btc = Instrument::new("BTC");

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(50000)));
    feed.set_price(Instrument::new("ETH"), Price::new_unchecked(dec!(3000)));

    decisions.push_raw(vec![(btc.clone(), buy("1", 10))]);
    orchestrator.run_cycle(&alpha).await.unwrap();

    let view = orchestrator.ledger().view(&alpha).unwrap();
    println!("  After open: cash ${}, margin ${}", view.cash, view.margin_used);

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(51000)));
    decisions.push_raw(vec![(btc.clone(), close())]);
    orchestrator.run_cycle(&alpha).await.unwrap();

    let view = orchestrator.ledger().view(&alpha).unwrap();
    println!("  After close: cash ${}, realized ${}", view.cash, view.realized_pnl);
    println!("  Trades recorded: {}\n", sink.trades().len());
}

/// Garbage in, rejections out, book untouched.
async fn scenario_2_malformed_signals() {
    println!("Scenario 2: Malformed Signals\n");

    let (orchestrator, feed, decisions, _sink) = build(base_config());
    let alpha = ActorId::new("alpha");
    let btc = Instrument::new("BTC");
    let eth = Instrument::new("ETH");

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(50000)));
    feed.set_price(eth.clone(), Price::new_unchecked(dec!(3000)));

    decisions.push_raw(vec![
        (btc.clone(), buy("-1", 10)),
        (eth.clone(), buy("1", 21)),
    ]);

    let outcome = orchestrator.run_cycle(&alpha).await.unwrap();
    if let CycleOutcome::Completed(report) = outcome {
        for (instrument, why) in &report.rejected {
            println!("  {instrument}: rejected ({why})");
        }
        println!("  Executed: {} (expected 0)\n", report.executed.len());
    }
}

/// One long, one short, same move, mirrored pnl.
async fn scenario_3_price_swing() {
    println!("Scenario 3: Price Swing\n");

    let mut config = base_config();
    config.actors = vec![ActorId::new("bull"), ActorId::new("bear")];
    config.instruments = vec![Instrument::new("BTC")];
    let (orchestrator, feed, decisions, _sink) = build(config);
    let btc = Instrument::new("BTC");

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(50000)));

    decisions.push_raw(vec![(btc.clone(), buy("1", 10))]);
    orchestrator.run_cycle(&ActorId::new("bull")).await.unwrap();

    let mut short = buy("1", 10);
    short.signal = Some("sell_to_enter".into());
    decisions.push_raw(vec![(btc.clone(), short)]);
    orchestrator.run_cycle(&ActorId::new("bear")).await.unwrap();

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(52000)));
    let prices = feed.snapshot(&[btc.clone()]).await.unwrap();

    for actor in ["bull", "bear"] {
        let snap = orchestrator
            .ledger()
            .snapshot(&ActorId::new(actor), &prices, Timestamp::now())
            .unwrap();
        println!(
            "  {actor}: unrealized ${}, total value ${}",
            snap.unrealized_pnl, snap.total_value
        );
    }
    println!();
}

/// Feed goes dark: the cycle is abandoned, the book untouched, and the next
/// tick succeeds once prices are back.
async fn scenario_4_outage_and_retry() {
    println!("Scenario 4: Outage and Retry\n");

    let (orchestrator, feed, decisions, _sink) = build(base_config());
    let alpha = ActorId::new("alpha");
    let btc = Instrument::new("BTC");

    decisions.push_raw(vec![(btc.clone(), buy("1", 10))]);
    match orchestrator.run_cycle(&alpha).await {
        Err(CycleError::ExternalUnavailable(why)) => println!("  Cycle abandoned: {why}"),
        other => println!("  Unexpected: {other:?}"),
    }

    feed.set_price(btc.clone(), Price::new_unchecked(dec!(50000)));
    feed.set_price(Instrument::new("ETH"), Price::new_unchecked(dec!(3000)));
    decisions.push_raw(vec![(btc.clone(), buy("1", 10))]);
    orchestrator.run_cycle(&alpha).await.unwrap();

    let view = orchestrator.ledger().view(&alpha).unwrap();
    println!("  Next tick recovered: {} open position(s)\n", view.positions.len());
}
