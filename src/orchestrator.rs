// 11.0 orchestrator.rs: drives one trading cycle per actor.
//
// prices -> ledger view -> decisions -> interpret -> apply -> records.
// The ledger lock is never held across the external calls: the view is read
// and released, the slow work happens, and every apply re-validates against
// current state inside the lock. Staleness between view and apply can only
// surface as a rejected action, never as corruption.
//
// One instrument's failure never aborts the others in the same cycle, and a
// cycle that cannot obtain prices or decisions at all is abandoned for that
// actor and retried on the next tick. Mutations already committed stay
// committed; they were valid independent operations, not a transaction.

use crate::config::EngineConfig;
use crate::decision::DecisionService;
use crate::feed::{PriceFeed, PriceMap};
use crate::ledger::{ActorView, LedgerError, PositionLedger};
use crate::records::{AccountSnapshot, RecordSink, TradeRecord};
use crate::signal::{self, Action, MalformedSignal, Outcome, SkipReason};
use crate::types::{ActorId, Instrument, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::time::timeout;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    #[error("external collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What happened to each instrument in one completed cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub actor_id: ActorId,
    pub executed: Vec<TradeRecord>,
    pub skipped: Vec<(Instrument, SkipReason)>,
    pub rejected: Vec<(Instrument, MalformedSignal)>,
    pub failed: Vec<(Instrument, CycleError)>,
    pub snapshot: AccountSnapshot,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// A cycle for this actor was already in flight. Running two would risk
    /// double-spending capital within one tick, so the later one skips.
    Overlapped,
}

enum PendingRecord {
    Trade(TradeRecord),
    Snapshot(AccountSnapshot),
}

pub struct CycleOrchestrator {
    config: EngineConfig,
    ledger: Arc<PositionLedger>,
    feed: Arc<dyn PriceFeed>,
    decisions: Arc<dyn DecisionService>,
    sink: Arc<dyn RecordSink>,
    cycle_guards: RwLock<HashMap<ActorId, Arc<tokio::sync::Mutex<()>>>>,
    // Records whose emission failed twice. Never dropped; re-flushed at the
    // start of the next cycle.
    pending: Mutex<VecDeque<PendingRecord>>,
}

impl CycleOrchestrator {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<PositionLedger>,
        feed: Arc<dyn PriceFeed>,
        decisions: Arc<dyn DecisionService>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            ledger,
            feed,
            decisions,
            sink,
            cycle_guards: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    /// Registers every rostered actor with its starting capital. Safe to
    /// call once at startup; re-registration is an error surfaced here.
    pub fn bootstrap(&self) -> Result<(), LedgerError> {
        let now = Timestamp::now();
        for actor in &self.config.actors {
            self.ledger
                .create_actor(actor, self.config.initial_capital, now)?;
        }
        Ok(())
    }

    pub async fn run_cycle(&self, actor_id: &ActorId) -> Result<CycleOutcome, CycleError> {
        let guard = self.guard_for(actor_id);
        let Ok(_in_flight) = guard.try_lock() else {
            tracing::warn!(actor = %actor_id, "cycle already in flight, skipping tick");
            return Ok(CycleOutcome::Overlapped);
        };

        self.flush_pending().await;

        let prices = self.fetch_prices().await?;
        let view = self.ledger.view(actor_id)?;
        let decisions = self.fetch_decisions(actor_id, &view, &prices).await?;

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut rejected = Vec::new();
        let mut failed = Vec::new();

        for instrument in &self.config.instruments {
            let raw = decisions.get(instrument).cloned().unwrap_or_default();
            let outcome =
                signal::interpret(instrument, &raw, &view, self.config.leverage_bounds);

            match outcome {
                Outcome::Skip(reason) => {
                    tracing::debug!(actor = %actor_id, %instrument, ?reason, "skipped");
                    skipped.push((instrument.clone(), reason));
                }
                Outcome::Reject(why) => {
                    tracing::warn!(actor = %actor_id, %instrument, %why, "malformed signal");
                    rejected.push((instrument.clone(), why));
                }
                Outcome::Execute(action) => match self.apply(actor_id, action, &prices) {
                    Ok(record) => {
                        self.emit_trade(&record).await;
                        executed.push(record);
                    }
                    Err(err) => {
                        tracing::warn!(actor = %actor_id, %instrument, %err, "action rejected");
                        failed.push((instrument.clone(), err));
                    }
                },
            }
        }

        let snapshot = self.ledger.snapshot(actor_id, &prices, Timestamp::now())?;
        self.emit_snapshot(&snapshot).await;

        let report = CycleReport {
            actor_id: actor_id.clone(),
            executed,
            skipped,
            rejected,
            failed,
            snapshot,
        };

        tracing::info!(
            actor = %actor_id,
            executed = report.executed.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            total_value = %report.snapshot.total_value,
            "cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }

    fn apply(
        &self,
        actor_id: &ActorId,
        action: Action,
        prices: &PriceMap,
    ) -> Result<TradeRecord, CycleError> {
        let fee_rate = self.config.fee_rate;
        let now = Timestamp::now();
        let price_for = |instrument: &Instrument| {
            prices.get(instrument).copied().ok_or_else(|| {
                CycleError::ExternalUnavailable(format!("no price for {instrument}"))
            })
        };

        let record = match action {
            Action::Open {
                instrument,
                side,
                quantity,
                leverage,
            } => {
                let price = price_for(&instrument)?;
                self.ledger.open(
                    actor_id, instrument, side, quantity, price, leverage, fee_rate, now,
                )?
            }
            Action::Increase {
                instrument,
                side,
                quantity,
            } => {
                let price = price_for(&instrument)?;
                self.ledger
                    .adjust(actor_id, instrument, side, quantity, price, fee_rate, now)?
            }
            Action::Close { instrument, side } => {
                let price = price_for(&instrument)?;
                self.ledger
                    .close(actor_id, instrument, side, price, fee_rate, None, now)?
            }
        };
        Ok(record)
    }

    async fn fetch_prices(&self) -> Result<PriceMap, CycleError> {
        match timeout(
            self.config.call_timeout(),
            self.feed.snapshot(&self.config.instruments),
        )
        .await
        {
            Ok(Ok(prices)) => Ok(prices),
            Ok(Err(err)) => Err(CycleError::ExternalUnavailable(err.to_string())),
            Err(_) => Err(CycleError::ExternalUnavailable(
                "price feed timed out".to_string(),
            )),
        }
    }

    async fn fetch_decisions(
        &self,
        actor_id: &ActorId,
        view: &ActorView,
        prices: &PriceMap,
    ) -> Result<signal::DecisionSet, CycleError> {
        match timeout(
            self.config.call_timeout(),
            self.decisions.decide(actor_id, view, prices),
        )
        .await
        {
            Ok(Ok(set)) => Ok(set),
            Ok(Err(err)) => Err(CycleError::ExternalUnavailable(err.to_string())),
            Err(_) => Err(CycleError::ExternalUnavailable(
                "decision service timed out".to_string(),
            )),
        }
    }

    // Emission is retried once inline, then parked. In-memory ledger state
    // stays authoritative either way.
    async fn emit_trade(&self, record: &TradeRecord) {
        for _ in 0..2 {
            if self.sink.record_trade(record).await.is_ok() {
                return;
            }
        }
        tracing::error!(actor = %record.actor_id, "trade record emission failed, parking for retry");
        self.park(PendingRecord::Trade(record.clone()));
    }

    async fn emit_snapshot(&self, snapshot: &AccountSnapshot) {
        for _ in 0..2 {
            if self.sink.record_snapshot(snapshot).await.is_ok() {
                return;
            }
        }
        tracing::error!(actor = %snapshot.actor_id, "snapshot emission failed, parking for retry");
        self.park(PendingRecord::Snapshot(snapshot.clone()));
    }

    fn park(&self, record: PendingRecord) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(record);
    }

    async fn flush_pending(&self) {
        let parked: Vec<PendingRecord> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };
        for record in parked {
            let ok = match &record {
                PendingRecord::Trade(r) => self.sink.record_trade(r).await.is_ok(),
                PendingRecord::Snapshot(s) => self.sink.record_snapshot(s).await.is_ok(),
            };
            if !ok {
                self.park(record);
            }
        }
    }

    fn guard_for(&self, actor_id: &ActorId) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(guard) = self
            .cycle_guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(actor_id)
        {
            return guard.clone();
        }
        self.cycle_guards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(actor_id.clone())
            .or_default()
            .clone()
    }
}
