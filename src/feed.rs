// 8.0 feed.rs: price snapshot collaborator. the engine is agnostic to where
// prices come from; the orchestrator is handed an implementation per cycle
// rather than reaching into a process-wide cache.

use crate::types::{Instrument, Price};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub type PriceMap = HashMap<Instrument, Price>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("price feed unavailable: {0}")]
    Unavailable(String),

    #[error("no price for {0}")]
    MissingInstrument(Instrument),
}

#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    /// One consistent snapshot covering every requested instrument. Partial
    /// data is an error; the orchestrator abandons the cycle and retries on
    /// the next tick.
    async fn snapshot(&self, instruments: &[Instrument]) -> Result<PriceMap, FeedError>;
}

/// Fixed prices, settable between cycles. The simulator and tests drive
/// market moves through this.
#[derive(Debug, Default)]
pub struct StaticFeed {
    prices: RwLock<PriceMap>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, instrument: Instrument, price: Price) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instrument, price);
    }
}

#[async_trait::async_trait]
impl PriceFeed for StaticFeed {
    async fn snapshot(&self, instruments: &[Instrument]) -> Result<PriceMap, FeedError> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = PriceMap::with_capacity(instruments.len());
        for instrument in instruments {
            let price = prices
                .get(instrument)
                .copied()
                .ok_or_else(|| FeedError::MissingInstrument(instrument.clone()))?;
            out.insert(instrument.clone(), price);
        }
        Ok(out)
    }
}
