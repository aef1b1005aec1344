// 5.0: append-only records the core hands to the persistence collaborator.
// trade records reconstruct portfolio state from scratch; account snapshots
// chart equity over time. neither is ever mutated after emission.

use crate::types::{ActorId, Instrument, Leverage, Price, Qty, Quote, Side, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Open,
    Increase,
    Decrease,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub actor_id: ActorId,
    pub instrument: Instrument,
    pub side: Side,
    pub action: TradeAction,
    pub quantity: Qty,
    pub price: Price,
    pub leverage: Leverage,
    pub fee: Quote,
    // The exact amount booked into realized_pnl by this operation: -fee on
    // open/increase, gross pnl minus exit fee on decrease/close. Replaying
    // these deltas rebuilds the portfolio.
    pub realized_pnl_delta: Quote,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub actor_id: ActorId,
    pub timestamp: Timestamp,
    pub cash: Quote,
    pub margin_used: Quote,
    pub unrealized_pnl: Quote,
    pub realized_pnl: Quote,
    pub total_value: Quote,
    pub open_positions: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("persistence write failed: {0}")]
    WriteFailed(String),
}

/// Persistence collaborator. Implementations own durability and retention;
/// the core only guarantees it never silently drops a record.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn record_trade(&self, record: &TradeRecord) -> Result<(), SinkError>;
    async fn record_snapshot(&self, snapshot: &AccountSnapshot) -> Result<(), SinkError>;
}

/// In-memory sink for the simulator and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    trades: Mutex<Vec<TradeRecord>>,
    snapshots: Mutex<Vec<AccountSnapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    async fn record_trade(&self, record: &TradeRecord) -> Result<(), SinkError> {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn record_snapshot(&self, snapshot: &AccountSnapshot) -> Result<(), SinkError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}
