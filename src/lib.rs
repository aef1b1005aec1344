// trader-core: leveraged paper-trading engine driven by external signals.
// accounting-first architecture: exact decimal margin/fee/pnl math and a
// single mutation boundary take priority. external collaborators (price
// feed, decision service, persistence) are traits injected per cycle.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ActorId, Instrument, Side, Qty, Price, Quote, Leverage
//   2.x  fees.rs: margin, entry/exit fees, realized/unrealized pnl. pure functions
//   3.x  position.rs: position struct, weighted-average increase, reduce
//   4.x  portfolio.rs: per-actor balances, derived cash, invariant checks
//   5.x  records.rs: trade records + account snapshots, RecordSink seam
//   6.x  ledger.rs: the position ledger: open/adjust/close/snapshot, per-actor lock
//   7.x  signal.rs: decision payload validation, the trust boundary
//   8.x  feed.rs: price snapshot seam
//   9.x  decision.rs: decision service seam, provider variants
//   10.x config.rs: engine configuration
//   11.x orchestrator.rs: one trading cycle per actor
//   12.x scheduler.rs: recurring driver with explicit shutdown

// accounting core
pub mod fees;
pub mod ledger;
pub mod portfolio;
pub mod position;
pub mod records;
pub mod types;

// signal path
pub mod decision;
pub mod feed;
pub mod signal;

// cycle machinery
pub mod config;
pub mod orchestrator;
pub mod scheduler;

// re exports for convenience
pub use config::{EngineConfig, ProviderConfig};
pub use decision::{DecisionError, DecisionService, HttpDecisionService, ProviderKind, ScriptedService};
pub use feed::{FeedError, PriceFeed, PriceMap, StaticFeed};
pub use ledger::{ActorView, LedgerError, PositionLedger};
pub use orchestrator::{CycleError, CycleOrchestrator, CycleOutcome, CycleReport};
pub use portfolio::{InvariantViolation, Portfolio};
pub use position::{increase_position, reduce_position, Position, PositionKey, PositionReduction};
pub use records::{AccountSnapshot, MemorySink, RecordSink, SinkError, TradeAction, TradeRecord};
pub use scheduler::{shutdown_channel, Scheduler, ShutdownHandle};
pub use signal::{
    decode_decision_set, interpret, Action, DecisionSet, MalformedSignal, Outcome, RawDecision,
    SkipReason,
};
pub use types::{
    ActorId, Instrument, Leverage, LeverageBounds, Price, Qty, Quote, Side, Timestamp,
};
