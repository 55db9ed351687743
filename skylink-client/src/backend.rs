//! HTTP collaborators: key exchange, streaming transmission, non-streaming transmit, health
//! and flight tracking.

use serde::Deserialize;
use skylink_core::protocol::{Health, TransmitRequest, TransmitRequestError, TransmitResponse};
use skylink_core::{
    Flight, FlightList, FlightPrediction, FullSimulationRequest, FullSimulationResponse, KeyExchange,
    KeyExchangeRequest, StreamRequest,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::sse::SseDecoder;

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Item delivered by an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// One event payload, undecoded.
    Event(String),
    /// Transport-level failure; the stream delivers nothing after this.
    Failed { retryable: bool, reason: String },
}

/// Open push connection. The reader task is owned by the handle and aborted when it is
/// dropped, which closes the underlying connection.
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamItem>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn new(rx: mpsc::Receiver<StreamItem>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next item; `None` once the reader task has gone away.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }

    /// Release the connection.
    pub fn close(self) {}
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!("stream closed");
    }
}

/// The endpoints a run depends on.
pub trait Backend {
    async fn exchange_key(&self, req: &KeyExchangeRequest) -> Result<KeyExchange, BackendError>;
    async fn open_stream(&self, req: &StreamRequest) -> Result<StreamHandle, BackendError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    key_exchange_url: String,
    stream_url: String,
    navigation_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpBackend {
    pub fn new(cfg: &Config) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skylink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            key_exchange_url: cfg.key_exchange_url.trim_end_matches('/').to_string(),
            stream_url: cfg.stream_url.trim_end_matches('/').to_string(),
            navigation_url: cfg.navigation_url.trim_end_matches('/').to_string(),
        })
    }

    /// Alternate, non-streaming path: send one two-bit symbol with its key.
    pub async fn transmit(&self, req: &TransmitRequest) -> Result<TransmitResponse, BackendError> {
        let resp = self
            .client
            .post(format!("{}/sdc", self.key_exchange_url))
            .json(req)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// Key exchange and transmit in one backend call, keyed by the first two key bits.
    pub async fn full_simulation(
        &self,
        req: &FullSimulationRequest,
    ) -> Result<FullSimulationResponse, BackendError> {
        let resp = self
            .client
            .post(format!("{}/full-simulation", self.key_exchange_url))
            .json(req)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// Flights currently tracked by the navigation backend.
    pub async fn flights(&self) -> Result<Vec<Flight>, BackendError> {
        let resp = self
            .client
            .get(format!("{}/api/flights", self.navigation_url))
            .send()
            .await?;
        let list: FlightList = check_status(resp).await?.json().await?;
        Ok(list.flights)
    }

    /// One flight with its recorded track.
    pub async fn flight(&self, icao24: &str) -> Result<FlightPrediction, BackendError> {
        let resp = self
            .client
            .get(format!("{}/api/predict", self.navigation_url))
            .query(&[("icao24", icao24)])
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    pub async fn health(&self) -> Result<Health, BackendError> {
        let resp = self
            .client
            .get(format!("{}/health", self.key_exchange_url))
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }
}

impl Backend for HttpBackend {
    async fn exchange_key(&self, req: &KeyExchangeRequest) -> Result<KeyExchange, BackendError> {
        let resp = self
            .client
            .post(format!("{}/qkd", self.key_exchange_url))
            .json(req)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn open_stream(&self, req: &StreamRequest) -> Result<StreamHandle, BackendError> {
        let resp = self
            .client
            .get(format!("{}/sdc/send-stream", self.stream_url))
            .query(req)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let mut resp = check_status(resp).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let failure = loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => match decoder.feed(&bytes) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(StreamItem::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            break StreamItem::Failed {
                                retryable: false,
                                reason: e.to_string(),
                            }
                        }
                    },
                    Ok(None) => {
                        break StreamItem::Failed {
                            retryable: true,
                            reason: "stream closed by server".to_string(),
                        }
                    }
                    Err(e) => {
                        break StreamItem::Failed {
                            retryable: true,
                            reason: e.to_string(),
                        }
                    }
                }
            };
            let _ = tx.send(failure).await;
        });
        Ok(StreamHandle::new(rx, task))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] TransmitRequestError),
}

impl BackendError {
    /// Connection-level failures and server errors may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            BackendError::Status { status, .. } => *status >= 500,
            BackendError::InvalidRequest(_) => false,
        }
    }
}
