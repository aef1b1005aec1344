// 7.0 signal.rs: the trust boundary between the decision service and the
// ledger. the service is an external, non-deterministic actor (an LLM or any
// automated strategy), so nothing it sends is trusted: every payload is
// validated structurally, then mapped, then policy-checked, producing a typed
// Outcome. the interpreter never touches the ledger; it works from an
// immutable ActorView, which keeps it unit-testable in isolation.

use crate::ledger::ActorView;
use crate::types::{Instrument, Leverage, LeverageBounds, Qty, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Untrusted per-instrument payload, exactly as the decision service sent
/// it. Every field is optional; absence is a validation concern, not a
/// parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDecision {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub confidence: Option<Decimal>,
    #[serde(default)]
    pub justification: Option<String>,
}

pub type DecisionSet = BTreeMap<Instrument, RawDecision>;

/// Decodes a decision-service response body into a per-instrument set.
/// Tolerates markdown code fences around the JSON. A value that is not an
/// object degrades to an empty payload, which the interpreter then rejects
/// for that instrument only.
pub fn decode_decision_set(text: &str) -> Result<DecisionSet, serde_json::Error> {
    let stripped = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(stripped)?;
    let object = match value {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected object keyed by instrument, got {other}"
            )))
        }
    };

    let mut set = DecisionSet::new();
    for (symbol, raw) in object {
        let decision = serde_json::from_value(raw).unwrap_or_default();
        set.insert(Instrument::new(symbol), decision);
    }
    Ok(set)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MalformedSignal {
    #[error("signal field missing")]
    MissingSignal,

    #[error("unknown signal {0:?}")]
    UnknownSignal(String),

    #[error("quantity missing for an entering signal")]
    MissingQuantity,

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("leverage missing for an entering signal")]
    MissingLeverage,

    #[error("leverage must be an integer, got {0}")]
    NonIntegerLeverage(Decimal),

    #[error("leverage {leverage} outside [{}, {}]", .bounds.min, .bounds.max)]
    LeverageOutOfRange {
        leverage: Decimal,
        bounds: LeverageBounds,
    },

    #[error("confidence must be in [0, 1], got {0}")]
    ConfidenceOutOfRange(Decimal),
}

/// A ledger-safe operation derived from one validated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Open {
        instrument: Instrument,
        side: Side,
        quantity: Qty,
        leverage: Leverage,
    },
    Increase {
        instrument: Instrument,
        side: Side,
        quantity: Qty,
    },
    Close {
        instrument: Instrument,
        side: Side,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Explicit hold signal.
    Hold,
    /// close_position with nothing open. Not an error: the decision service
    /// cannot be assumed to track ledger state precisely.
    NothingToClose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Execute(Action),
    Skip(SkipReason),
    Reject(MalformedSignal),
}

// 7.1: validation in order: structure, then mapping, then policy.
pub fn interpret(
    instrument: &Instrument,
    raw: &RawDecision,
    view: &ActorView,
    bounds: LeverageBounds,
) -> Outcome {
    if let Some(confidence) = raw.confidence {
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Outcome::Reject(MalformedSignal::ConfidenceOutOfRange(confidence));
        }
    }

    let side = match raw.signal.as_deref() {
        None => return Outcome::Reject(MalformedSignal::MissingSignal),
        Some("hold") => return Outcome::Skip(SkipReason::Hold),
        Some("close_position") => {
            return match view.open_side(instrument) {
                Some(side) => Outcome::Execute(Action::Close {
                    instrument: instrument.clone(),
                    side,
                }),
                None => Outcome::Skip(SkipReason::NothingToClose),
            }
        }
        Some("buy_to_enter") => Side::Long,
        Some("sell_to_enter") => Side::Short,
        Some(other) => return Outcome::Reject(MalformedSignal::UnknownSignal(other.to_string())),
    };

    let quantity = match raw.quantity {
        None => return Outcome::Reject(MalformedSignal::MissingQuantity),
        Some(q) => match Qty::new(q) {
            Some(qty) => qty,
            None => return Outcome::Reject(MalformedSignal::NonPositiveQuantity(q)),
        },
    };

    let leverage = match raw.leverage {
        None => return Outcome::Reject(MalformedSignal::MissingLeverage),
        Some(l) => {
            if !l.fract().is_zero() {
                return Outcome::Reject(MalformedSignal::NonIntegerLeverage(l));
            }
            let leverage = match l.to_u32().and_then(Leverage::new) {
                Some(lev) => lev,
                None => return Outcome::Reject(MalformedSignal::NonIntegerLeverage(l)),
            };
            if !bounds.contains(leverage) {
                return Outcome::Reject(MalformedSignal::LeverageOutOfRange { leverage: l, bounds });
            }
            leverage
        }
    };

    // Re-entering a live key is an adjustment, never a second position.
    if view.position(instrument, side).is_some() {
        Outcome::Execute(Action::Increase {
            instrument: instrument.clone(),
            side,
            quantity,
        })
    } else {
        Outcome::Execute(Action::Open {
            instrument: instrument.clone(),
            side,
            quantity,
            leverage,
        })
    }
}
