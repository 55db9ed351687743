//! Backend contract: request and response bodies for key exchange, streaming and transmit.

use serde::{Deserialize, Serialize};

use crate::bits::BitString;

/// Qubit counts the key-exchange backend accepts.
pub const SUPPORTED_QUBIT_COUNTS: [u32; 3] = [10, 50, 100];

/// Keys whose measured error rate reaches this value are rejected.
pub const MAX_ERROR_RATE: f64 = 0.11;

/// Key-exchange request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    pub num_qubits: u32,
    /// Ask the backend to simulate an eavesdropper.
    #[serde(default)]
    pub eve: bool,
}

/// Key-exchange response: the sifted key and its measured error rate (QBER).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyExchange {
    #[serde(rename = "qkd_key", alias = "key")]
    pub key: String,
    #[serde(rename = "qber", alias = "errorRate", alias = "error_rate")]
    pub error_rate: f64,
}

impl KeyExchange {
    /// True when the error rate is a number below `threshold`.
    pub fn is_secure(&self, threshold: f64) -> bool {
        self.error_rate < threshold
    }
}

/// Query parameters that open a streaming transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub latitude: String,
    pub longitude: String,
    pub restricted_status: String,
}

impl StreamRequest {
    pub fn from_fields(latitude: &BitString, longitude: &BitString, restricted: &BitString) -> Self {
        Self {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            restricted_status: restricted.to_string(),
        }
    }

    /// The text the backend transmits and echoes back as `original_text`.
    pub fn message_text(&self) -> String {
        format!(
            "{},{},{}",
            self.latitude, self.longitude, self.restricted_status
        )
    }
}

/// Two-bit symbols the non-streaming transmit endpoint accepts.
pub const TRANSMIT_SYMBOLS: [&str; 4] = ["00", "01", "10", "11"];

/// Non-streaming transmit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitRequest {
    pub message: String,
    pub qkd_key: String,
    #[serde(default)]
    pub eve: bool,
}

impl TransmitRequest {
    /// Validate the symbol and key before anything is sent.
    pub fn new(message: &str, key: &str, eve: bool) -> Result<Self, TransmitRequestError> {
        if !TRANSMIT_SYMBOLS.contains(&message) {
            return Err(TransmitRequestError::InvalidSymbol(message.to_string()));
        }
        if key.len() < 2 {
            return Err(TransmitRequestError::KeyTooShort(key.len()));
        }
        Ok(Self {
            message: message.to_string(),
            qkd_key: key.to_string(),
            eve,
        })
    }
}

/// One-shot key exchange plus transmit, run entirely on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSimulationRequest {
    pub message: String,
    pub num_qubits: u32,
}

impl FullSimulationRequest {
    pub fn new(message: &str, num_qubits: u32) -> Result<Self, TransmitRequestError> {
        if !TRANSMIT_SYMBOLS.contains(&message) {
            return Err(TransmitRequestError::InvalidSymbol(message.to_string()));
        }
        if !SUPPORTED_QUBIT_COUNTS.contains(&num_qubits) {
            return Err(TransmitRequestError::QubitCount(num_qubits));
        }
        Ok(Self {
            message: message.to_string(),
            num_qubits,
        })
    }
}

/// Full-simulation response: the key exchange and the transmit that used its first two bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSimulationResponse {
    pub qkd: KeyExchange,
    pub sdc: TransmitResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransmitRequestError {
    #[error("message {0:?} is not one of 00, 01, 10, 11")]
    InvalidSymbol(String),
    #[error("key has {0} bits, at least 2 required")]
    KeyTooShort(usize),
    #[error("{0} qubits requested, expected 10, 50 or 100")]
    QubitCount(u32),
}

/// Non-streaming transmit response. Visualization data is kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitResponse {
    #[serde(default)]
    pub encrypted_message: Option<serde_json::Value>,
    #[serde(default)]
    pub decrypted_message: Option<serde_json::Value>,
    #[serde(default)]
    pub communication_status: Option<String>,
    #[serde(flatten)]
    pub auxiliary: serde_json::Map<String, serde_json::Value>,
}

/// Backend health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub message: String,
}
