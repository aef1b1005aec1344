//! Orchestrator integration tests: error isolation, timeouts, overlap
//! protection, and the record-emission guarantees.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trader_core::*;

fn alpha() -> ActorId {
    ActorId::new("alpha")
}

fn btc() -> Instrument {
    Instrument::new("BTC")
}

fn eth() -> Instrument {
    Instrument::new("ETH")
}

fn config() -> EngineConfig {
    EngineConfig {
        actors: vec![alpha()],
        instruments: vec![btc(), eth()],
        cycle_interval_secs: 1,
        call_timeout_secs: 1,
        ..EngineConfig::default()
    }
}

struct Harness {
    orchestrator: Arc<CycleOrchestrator>,
    feed: Arc<StaticFeed>,
    decisions: Arc<ScriptedService>,
    sink: Arc<MemorySink>,
}

fn harness() -> Harness {
    let cfg = config();
    let ledger = Arc::new(PositionLedger::new(cfg.leverage_bounds));
    let feed = Arc::new(StaticFeed::new());
    feed.set_price(btc(), Price::new_unchecked(dec!(50000)));
    feed.set_price(eth(), Price::new_unchecked(dec!(3000)));
    let decisions = Arc::new(ScriptedService::new());
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(CycleOrchestrator::new(
        cfg,
        ledger,
        feed.clone(),
        decisions.clone(),
        sink.clone(),
    ));
    orchestrator.bootstrap().unwrap();
    Harness {
        orchestrator,
        feed,
        decisions,
        sink,
    }
}

fn buy(quantity: rust_decimal::Decimal, leverage: rust_decimal::Decimal) -> RawDecision {
    RawDecision {
        signal: Some("buy_to_enter".into()),
        quantity: Some(quantity),
        leverage: Some(leverage),
        confidence: Some(dec!(0.9)),
        justification: Some("test".into()),
    }
}

fn hold() -> RawDecision {
    RawDecision {
        signal: Some("hold".into()),
        ..RawDecision::default()
    }
}

fn report(outcome: CycleOutcome) -> CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Overlapped => panic!("unexpected overlap"),
    }
}

#[tokio::test]
async fn malformed_payload_mutates_nothing() {
    let h = harness();
    h.decisions
        .push_raw(vec![(btc(), buy(dec!(-1), dec!(10))), (eth(), buy(dec!(1), dec!(21)))]);

    let r = report(h.orchestrator.run_cycle(&alpha()).await.unwrap());
    assert_eq!(r.rejected.len(), 2);
    assert!(r.executed.is_empty());

    let view = h.orchestrator.ledger().view(&alpha()).unwrap();
    assert!(view.positions.is_empty());
    assert_eq!(view.cash.value(), dec!(10000));
    assert!(h.sink.trades().is_empty());
}

#[tokio::test]
async fn one_bad_instrument_never_aborts_the_rest() {
    let h = harness();
    h.decisions
        .push_raw(vec![(btc(), buy(dec!(-5), dec!(10))), (eth(), buy(dec!(1), dec!(10)))]);

    let r = report(h.orchestrator.run_cycle(&alpha()).await.unwrap());
    assert_eq!(r.rejected.len(), 1);
    assert_eq!(r.executed.len(), 1);
    assert_eq!(r.executed[0].instrument, eth());

    let view = h.orchestrator.ledger().view(&alpha()).unwrap();
    assert!(view.position(&eth(), Side::Long).is_some());
}

#[tokio::test]
async fn close_on_absent_position_is_a_skip_not_a_failure() {
    let h = harness();
    h.decisions.push_raw(vec![
        (
            btc(),
            RawDecision {
                signal: Some("close_position".into()),
                ..RawDecision::default()
            },
        ),
        (eth(), buy(dec!(1), dec!(10))),
    ]);

    let r = report(h.orchestrator.run_cycle(&alpha()).await.unwrap());
    assert!(r
        .skipped
        .iter()
        .any(|(i, reason)| *i == btc() && *reason == SkipReason::NothingToClose));
    assert_eq!(r.executed.len(), 1); // the cycle carried on
}

#[tokio::test]
async fn cycle_emits_account_snapshot() {
    let h = harness();
    h.decisions.push_raw(vec![(btc(), hold()), (eth(), hold())]);

    report(h.orchestrator.run_cycle(&alpha()).await.unwrap());

    let snapshots = h.sink.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].actor_id, alpha());
    assert_eq!(snapshots[0].total_value.value(), dec!(10000));
}

#[tokio::test]
async fn reopen_signal_becomes_an_increase() {
    let h = harness();
    h.decisions
        .push_raw(vec![(btc(), buy(dec!(0.1), dec!(10))), (eth(), hold())]);
    report(h.orchestrator.run_cycle(&alpha()).await.unwrap());

    h.decisions
        .push_raw(vec![(btc(), buy(dec!(0.1), dec!(10))), (eth(), hold())]);
    let r = report(h.orchestrator.run_cycle(&alpha()).await.unwrap());

    assert_eq!(r.executed.len(), 1);
    assert_eq!(r.executed[0].action, TradeAction::Increase);

    let view = h.orchestrator.ledger().view(&alpha()).unwrap();
    let pos = view.position(&btc(), Side::Long).unwrap();
    assert_eq!(pos.quantity.value(), dec!(0.2));
}

struct NeverResolvingFeed;

#[async_trait]
impl PriceFeed for NeverResolvingFeed {
    async fn snapshot(&self, _instruments: &[Instrument]) -> Result<PriceMap, FeedError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(FeedError::Unavailable("unreachable".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn slow_feed_abandons_the_cycle() {
    let cfg = config();
    let ledger = Arc::new(PositionLedger::new(cfg.leverage_bounds));
    let decisions = Arc::new(ScriptedService::new());
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(CycleOrchestrator::new(
        cfg,
        ledger,
        Arc::new(NeverResolvingFeed),
        decisions,
        sink.clone(),
    ));
    orchestrator.bootstrap().unwrap();

    let err = orchestrator.run_cycle(&alpha()).await.unwrap_err();
    assert!(matches!(err, CycleError::ExternalUnavailable(_)));
    assert!(sink.snapshots().is_empty());
}

struct BlockedService {
    gate: tokio::sync::Notify,
}

#[async_trait]
impl DecisionService for BlockedService {
    async fn decide(
        &self,
        _actor_id: &ActorId,
        _view: &ActorView,
        _prices: &PriceMap,
    ) -> Result<DecisionSet, DecisionError> {
        self.gate.notified().await;
        Ok(DecisionSet::new())
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycle_for_same_actor_skips() {
    let mut cfg = config();
    cfg.call_timeout_secs = 3600;
    let ledger = Arc::new(PositionLedger::new(cfg.leverage_bounds));
    let feed = Arc::new(StaticFeed::new());
    feed.set_price(btc(), Price::new_unchecked(dec!(50000)));
    feed.set_price(eth(), Price::new_unchecked(dec!(3000)));
    let service = Arc::new(BlockedService {
        gate: tokio::sync::Notify::new(),
    });
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(CycleOrchestrator::new(
        cfg,
        ledger,
        feed,
        service.clone(),
        sink,
    ));
    orchestrator.bootstrap().unwrap();

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle(&alpha()).await })
    };

    // let the first cycle reach its decision call and park there
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let second = orchestrator.run_cycle(&alpha()).await.unwrap();
    assert!(matches!(second, CycleOutcome::Overlapped));

    service.gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, CycleOutcome::Completed(_)));
}

struct FlakySink {
    failing: AtomicBool,
    inner: MemorySink,
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn record_trade(&self, record: &TradeRecord) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::WriteFailed("disk full".into()));
        }
        self.inner.record_trade(record).await
    }

    async fn record_snapshot(&self, snapshot: &AccountSnapshot) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::WriteFailed("disk full".into()));
        }
        self.inner.record_snapshot(snapshot).await
    }
}

#[tokio::test]
async fn failed_emission_is_retried_next_cycle_not_dropped() {
    let cfg = config();
    let ledger = Arc::new(PositionLedger::new(cfg.leverage_bounds));
    let feed = Arc::new(StaticFeed::new());
    feed.set_price(btc(), Price::new_unchecked(dec!(50000)));
    feed.set_price(eth(), Price::new_unchecked(dec!(3000)));
    let decisions = Arc::new(ScriptedService::new());
    let sink = Arc::new(FlakySink {
        failing: AtomicBool::new(true),
        inner: MemorySink::new(),
    });
    let orchestrator = Arc::new(CycleOrchestrator::new(
        cfg,
        ledger,
        feed,
        decisions.clone(),
        sink.clone(),
    ));
    orchestrator.bootstrap().unwrap();

    decisions.push_raw(vec![(btc(), buy(dec!(0.1), dec!(10))), (eth(), hold())]);
    let r = report(orchestrator.run_cycle(&alpha()).await.unwrap());
    assert_eq!(r.executed.len(), 1);
    // sink was down: nothing landed, but ledger state is authoritative
    assert!(sink.inner.trades().is_empty());
    let view = orchestrator.ledger().view(&alpha()).unwrap();
    assert_eq!(view.positions.len(), 1);

    // sink recovers; the parked records flush at the next cycle
    sink.failing.store(false, Ordering::SeqCst);
    decisions.push_raw(vec![(btc(), hold()), (eth(), hold())]);
    report(orchestrator.run_cycle(&alpha()).await.unwrap());

    assert_eq!(sink.inner.trades().len(), 1);
    assert_eq!(sink.inner.snapshots().len(), 2);
}

#[tokio::test]
async fn stale_view_rejects_but_never_corrupts() {
    // decisions are computed against a view read before apply; here the
    // script closes a position that was never opened under a different key,
    // and the ledger's own re-validation catches it.
    let h = harness();
    h.decisions
        .push_raw(vec![(btc(), buy(dec!(0.1), dec!(10))), (eth(), hold())]);
    report(h.orchestrator.run_cycle(&alpha()).await.unwrap());

    // simulate an out-of-band close between view and apply by closing
    // directly, then replaying a close through the cycle
    h.orchestrator
        .ledger()
        .close(
            &alpha(),
            btc(),
            Side::Long,
            Price::new_unchecked(dec!(50000)),
            dec!(0.001),
            None,
            Timestamp::now(),
        )
        .unwrap();

    h.decisions.push_raw(vec![
        (
            btc(),
            RawDecision {
                signal: Some("close_position".into()),
                ..RawDecision::default()
            },
        ),
        (eth(), hold()),
    ]);
    let r = report(h.orchestrator.run_cycle(&alpha()).await.unwrap());
    // view refreshed at cycle start sees nothing open: clean skip
    assert!(r
        .skipped
        .iter()
        .any(|(_, reason)| *reason == SkipReason::NothingToClose));

    let view = h.orchestrator.ledger().view(&alpha()).unwrap();
    assert!(view.positions.is_empty());
}

#[tokio::test]
async fn scheduler_shuts_down_cleanly() {
    let h = harness();
    h.feed.set_price(btc(), Price::new_unchecked(dec!(50000)));

    let (handle, rx) = shutdown_channel();
    let scheduler = Scheduler::new(h.orchestrator.clone(), rx);
    let running = tokio::spawn(scheduler.run());

    // at least the first tick fires immediately
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.shutdown();
    running.await.unwrap();

    assert!(!h.sink.snapshots().is_empty());
}
