//! Serialized pipeline runs: a new run cancels the previous one, and only the latest may publish.

use skylink_core::{
    GeoPoint, KeyExchangeRequest, PipelineCoordinator, PipelineError, ProtocolSession, RunId,
    VerifiedResult,
};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn, Instrument};

use crate::backend::{Backend, BackendError};
use crate::driver::{cancelled, drive};

pub struct Runner<B> {
    backend: B,
    coordinator: Mutex<PipelineCoordinator>,
    /// Cancel signal of the most recently started run.
    active: Mutex<Option<watch::Sender<bool>>>,
    num_qubits: u32,
}

fn transport(e: BackendError) -> PipelineError {
    PipelineError::Transport {
        retryable: e.is_retryable(),
        reason: e.to_string(),
    }
}

impl<B: Backend> Runner<B> {
    pub fn new(backend: B, coordinator: PipelineCoordinator, num_qubits: u32) -> Self {
        Self {
            backend,
            coordinator: Mutex::new(coordinator),
            active: Mutex::new(None),
            num_qubits,
        }
    }

    /// Register a new run and cancel the one before it.
    async fn begin(&self) -> (RunId, watch::Receiver<bool>) {
        let run = self.coordinator.lock().await.begin();
        let (tx, rx) = watch::channel(false);
        if let Some(previous) = self.active.lock().await.replace(tx) {
            let _ = previous.send(true);
        }
        (run, rx)
    }

    /// Cancel the active run, if any.
    pub async fn cancel(&self) {
        if let Some(tx) = self.active.lock().await.take() {
            let _ = tx.send(true);
        }
    }

    /// Key exchange, encryption, streaming and verification for one position.
    pub async fn run(&self, point: GeoPoint) -> Result<VerifiedResult, PipelineError> {
        let (run, cancel) = self.begin().await;
        let result = self
            .run_inner(run, point, cancel)
            .instrument(tracing::info_span!("run", %run))
            .await;
        if let Err(e) = &result {
            warn!(%run, error = %e, "run failed");
        }
        result
    }

    async fn run_inner(
        &self,
        run: RunId,
        point: GeoPoint,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<VerifiedResult, PipelineError> {
        info!(lat = point.latitude, lon = point.longitude, "run started");
        let req = KeyExchangeRequest {
            num_qubits: self.num_qubits,
            eve: false,
        };
        let exchange = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return Err(PipelineError::Cancelled),
            r = self.backend.exchange_key(&req) => r.map_err(transport)?,
        };
        info!(error_rate = exchange.error_rate, key_bits = exchange.key.len(), "key exchanged");

        let prepared = self.coordinator.lock().await.prepare(run, point, &exchange)?;

        let mut session = ProtocolSession::new();
        drive(&self.backend, &mut session, prepared.request.clone(), &mut cancel)
            .await
            .map_err(|e| PipelineError::Protocol(e.to_string()))?;
        let outcome = session
            .into_outcome()
            .ok_or_else(|| PipelineError::Protocol("session ended without outcome".into()))?;

        self.coordinator.lock().await.finish(&prepared, outcome)
    }
}
