// 9.0 decision.rs: the decision service seam. providers are a closed variant
// set selected by explicit configuration; there is no dispatch-by-URL-shape
// guessing. each variant speaks its native wire format over reqwest and all
// of them reduce to one thing: a JSON decision set keyed by instrument.

use crate::feed::PriceMap;
use crate::ledger::ActorView;
use crate::signal::{decode_decision_set, DecisionSet, RawDecision};
use crate::types::{ActorId, Instrument};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecisionError {
    #[error("decision request failed: {0}")]
    Transport(String),

    #[error("decision service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("decision text is not a valid decision set: {0}")]
    Undecodable(String),
}

#[async_trait::async_trait]
pub trait DecisionService: Send + Sync {
    /// One decision payload per instrument for the current cycle. A failure
    /// here abandons the actor's cycle; per-instrument problems inside a
    /// successfully returned set are the interpreter's business.
    async fn decide(
        &self,
        actor_id: &ActorId,
        view: &ActorView,
        prices: &PriceMap,
    ) -> Result<DecisionSet, DecisionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompatible,
    AnthropicStyle,
    GeminiStyle,
}

/// HTTP-backed decision service. The prompt carries the actor's current
/// book and the price snapshot; the model is expected to answer with a
/// decision set, optionally fenced.
pub struct HttpDecisionService {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpDecisionService {
    pub fn new(kind: ProviderKind, endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            kind,
            endpoint,
            api_key,
            model,
        }
    }

    fn prompt(view: &ActorView, prices: &PriceMap) -> String {
        let positions: Vec<Value> = view
            .positions
            .iter()
            .map(|p| {
                json!({
                    "instrument": p.instrument.as_str(),
                    "side": p.side,
                    "quantity": p.quantity,
                    "entry_price": p.entry_price,
                    "leverage": p.leverage.get(),
                })
            })
            .collect();
        let prices: Vec<Value> = prices
            .iter()
            .map(|(i, p)| json!({ "instrument": i.as_str(), "price": p }))
            .collect();

        format!(
            "You manage a leveraged trading account.\n\
             Cash: {cash}. Realized PnL: {pnl}. Open positions: {positions}.\n\
             Current prices: {prices}.\n\
             For each instrument respond with a JSON object keyed by symbol, each value \
             {{\"signal\": \"buy_to_enter|sell_to_enter|close_position|hold\", \
             \"quantity\": <number>, \"leverage\": <integer>, \"confidence\": <0..1>, \
             \"justification\": \"<text>\"}}. Respond with JSON only.",
            cash = view.cash,
            pnl = view.realized_pnl,
            positions = Value::Array(positions),
            prices = Value::Array(prices),
        )
    }

    async fn request_text(&self, prompt: &str) -> Result<String, DecisionError> {
        let request = match self.kind {
            ProviderKind::OpenAiCompatible => self
                .client
                .post(format!("{}/chat/completions", self.endpoint))
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": self.model,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            ProviderKind::AnthropicStyle => self
                .client
                .post(format!("{}/v1/messages", self.endpoint))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&json!({
                    "model": self.model,
                    "max_tokens": 2048,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            ProviderKind::GeminiStyle => self
                .client
                .post(format!(
                    "{}/v1beta/models/{}:generateContent?key={}",
                    self.endpoint, self.model, self.api_key
                ))
                .json(&json!({
                    "contents": [{"parts": [{"text": prompt}]}],
                })),
        };

        let response = request
            .send()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(DecisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| DecisionError::Shape(e.to_string()))?;
        extract_text(self.kind, &value)
    }
}

// Each provider buries the model text somewhere different.
fn extract_text(kind: ProviderKind, value: &Value) -> Result<String, DecisionError> {
    let text = match kind {
        ProviderKind::OpenAiCompatible => value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str),
        ProviderKind::AnthropicStyle => value
            .pointer("/content/0/text")
            .and_then(Value::as_str),
        ProviderKind::GeminiStyle => value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    };
    text.map(str::to_string)
        .ok_or_else(|| DecisionError::Shape(format!("no text at expected path for {kind:?}")))
}

#[async_trait::async_trait]
impl DecisionService for HttpDecisionService {
    async fn decide(
        &self,
        _actor_id: &ActorId,
        view: &ActorView,
        prices: &PriceMap,
    ) -> Result<DecisionSet, DecisionError> {
        let prompt = Self::prompt(view, prices);
        let text = self.request_text(&prompt).await?;
        decode_decision_set(&text).map_err(|e| DecisionError::Undecodable(e.to_string()))
    }
}

/// Replays a queue of pre-built decision sets, one per call. Empty queue
/// means hold everything. Drives the simulator and the orchestrator tests.
#[derive(Debug, Default)]
pub struct ScriptedService {
    script: Mutex<VecDeque<DecisionSet>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, set: DecisionSet) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(set);
    }

    pub fn push_raw(&self, decisions: Vec<(Instrument, RawDecision)>) {
        self.push(decisions.into_iter().collect());
    }
}

#[async_trait::async_trait]
impl DecisionService for ScriptedService {
    async fn decide(
        &self,
        _actor_id: &ActorId,
        _view: &ActorView,
        _prices: &PriceMap,
    ) -> Result<DecisionSet, DecisionError> {
        Ok(self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default())
    }
}
