// 10.0 config.rs: all settings in one place. fee rate, leverage policy,
// cycle timing, roster, provider selection. consumed read-only by the core.

use crate::decision::ProviderKind;
use crate::types::{ActorId, Instrument, LeverageBounds, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Charged on every entry and every exit.
    pub fee_rate: Decimal,
    pub leverage_bounds: LeverageBounds,
    // Starting capital per actor, fixed at registration.
    pub initial_capital: Quote,
    // Time between cycle ticks.
    pub cycle_interval_secs: u64,
    // Budget for each external call (price feed, decision service).
    pub call_timeout_secs: u64,
    pub actors: Vec<ActorId>,
    pub instruments: Vec<Instrument>,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

impl EngineConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::new(1, 3), // 0.001
            leverage_bounds: LeverageBounds::default(),
            initial_capital: Quote::new(Decimal::new(10_000, 0)),
            cycle_interval_secs: 3 * 60 * 60,
            call_timeout_secs: 30,
            actors: Vec::new(),
            instruments: Vec::new(),
            provider: ProviderConfig {
                kind: ProviderKind::OpenAiCompatible,
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4o".to_string(),
            },
        }
    }
}
