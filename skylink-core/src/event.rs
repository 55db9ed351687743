//! Inbound stream events, validated once at the boundary.
//!
//! A message is terminal iff it carries `completed: true`. Everything else must be a
//! well-formed progress record; anything that is neither becomes [`InboundEvent::Malformed`].

use serde::{Deserialize, Serialize};

/// One round of the exchange as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub round: u32,
    pub sent: String,
    pub measured: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Per-round summary carried by the terminal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub sent: String,
    pub measured: String,
}

/// Final record of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    #[serde(alias = "originalText")]
    pub original_text: String,
    #[serde(alias = "decodedText")]
    pub decoded_text: String,
    pub success: bool,
    #[serde(default, alias = "firstTwoCircuits")]
    pub first_two_circuits: Vec<String>,
    #[serde(default, alias = "roundSummaries")]
    pub round_summaries: Vec<RoundSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Progress(ProgressEvent),
    Terminal(TerminalEvent),
    Malformed { reason: String },
}

impl InboundEvent {
    pub fn decode(raw: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => return Self::malformed(format!("not JSON: {e}")),
        };
        if !value.is_object() {
            return Self::malformed("not a JSON object");
        }
        if value.get("completed").and_then(|c| c.as_bool()) == Some(true) {
            return match serde_json::from_value::<TerminalEvent>(value) {
                Ok(t) => Self::Terminal(t),
                Err(e) => Self::malformed(format!("terminal record: {e}")),
            };
        }
        match serde_json::from_value::<ProgressEvent>(value) {
            Ok(p) => match validate_progress(&p) {
                Ok(()) => Self::Progress(p),
                Err(reason) => Self::malformed(reason),
            },
            Err(e) => Self::malformed(format!("progress record: {e}")),
        }
    }

    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

fn validate_progress(p: &ProgressEvent) -> Result<(), String> {
    if p.round == 0 {
        return Err("round index must start at 1".into());
    }
    for (name, symbol) in [("sent", &p.sent), ("measured", &p.measured)] {
        if symbol.is_empty() || !symbol.chars().all(|c| c == '0' || c == '1') {
            return Err(format!("{name} symbol {symbol:?} is not a bit string"));
        }
    }
    Ok(())
}
