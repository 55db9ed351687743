//! Run coordinator: classify, encode, encrypt, hand off to the session, then verify what came back.
//!
//! Host-driven like [`crate::session`]: the host performs key exchange and streaming and
//! reports the results here. Runs are ordered by [`RunId`]; only the latest run may publish.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bits::BitString;
use crate::cipher::CipherKey;
use crate::codec::{BinaryPayload, PayloadLayout};
use crate::error::{PipelineError, VerificationFailure};
use crate::geofence::{GeoPoint, ZoneSet};
use crate::protocol::{KeyExchange, StreamRequest, MAX_ERROR_RATE};
use crate::session::{ProtocolRound, SessionOutcome, SessionResult};

/// Monotonically increasing run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything the host needs to open the stream, plus what is needed to verify the echo.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run: RunId,
    pub point: GeoPoint,
    pub restricted: bool,
    pub plaintext: BinaryPayload,
    pub ciphertext: BitString,
    pub request: StreamRequest,
    key: CipherKey,
}

/// Authoritative result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedResult {
    pub run: RunId,
    /// Coordinates reconstructed from the verified plaintext.
    pub point: GeoPoint,
    /// Restricted flag taken from the verified plaintext.
    pub restricted: bool,
    pub plaintext: BitString,
    pub ciphertext: BitString,
    pub rounds: Vec<ProtocolRound>,
}

pub struct PipelineCoordinator {
    zones: ZoneSet,
    layout: PayloadLayout,
    max_error_rate: f64,
    latest_run: RunId,
    latest: Option<VerifiedResult>,
}

impl PipelineCoordinator {
    pub fn new(zones: ZoneSet, layout: PayloadLayout) -> Self {
        Self {
            zones,
            layout,
            max_error_rate: MAX_ERROR_RATE,
            latest_run: RunId(0),
            latest: None,
        }
    }

    /// Override the error-rate threshold for key acceptance.
    pub fn set_max_error_rate(&mut self, rate: f64) {
        self.max_error_rate = rate;
    }

    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn layout(&self) -> PayloadLayout {
        self.layout
    }

    /// Start a new run. Every earlier run becomes stale.
    pub fn begin(&mut self) -> RunId {
        self.latest_run = RunId(self.latest_run.0 + 1);
        self.latest_run
    }

    pub fn current_run(&self) -> RunId {
        self.latest_run
    }

    /// Latest verified result, if the latest successful run has published one.
    pub fn latest(&self) -> Option<&VerifiedResult> {
        self.latest.as_ref()
    }

    fn ensure_current(&self, run: RunId) -> Result<(), PipelineError> {
        if run != self.latest_run {
            return Err(PipelineError::Stale {
                run,
                latest: self.latest_run,
            });
        }
        Ok(())
    }

    /// Classify and encode the point, gate the key, encrypt. No session is involved yet.
    pub fn prepare(
        &self,
        run: RunId,
        point: GeoPoint,
        exchange: &KeyExchange,
    ) -> Result<PreparedRun, PipelineError> {
        self.ensure_current(run)?;
        point.validate()?;
        let restricted = self.zones.is_restricted(&point);
        let plaintext = self.layout.encode(&point, restricted)?;

        if !exchange.is_secure(self.max_error_rate) {
            warn!(%run, error_rate = exchange.error_rate, "refusing insecure key");
            return Err(PipelineError::Security {
                error_rate: exchange.error_rate,
                threshold: self.max_error_rate,
            });
        }
        let key = CipherKey::parse(&exchange.key)?;
        let ciphertext = key.encrypt(plaintext.bits());

        let w = self.layout.field_width as usize;
        let request = StreamRequest::from_fields(
            &ciphertext.slice(0, w),
            &ciphertext.slice(w, 2 * w),
            &ciphertext.slice(2 * w, 2 * w + 1),
        );
        info!(%run, restricted, key_bits = key.bits().len(), "run prepared");
        Ok(PreparedRun {
            run,
            point,
            restricted,
            plaintext,
            ciphertext,
            request,
            key,
        })
    }

    /// Verify the session outcome for `prepared` and publish it if the run is still current.
    pub fn finish(
        &mut self,
        prepared: &PreparedRun,
        outcome: SessionOutcome,
    ) -> Result<VerifiedResult, PipelineError> {
        self.ensure_current(prepared.run)?;
        let result = match outcome {
            SessionOutcome::Completed(result) => result,
            SessionOutcome::Failed { retryable, reason } => {
                return Err(PipelineError::Transport { retryable, reason })
            }
            SessionOutcome::Cancelled => return Err(PipelineError::Cancelled),
        };
        let verified = self.verify(prepared, result)?;
        info!(
            run = %prepared.run,
            restricted = verified.restricted,
            rounds = verified.rounds.len(),
            "run verified"
        );
        self.latest = Some(verified.clone());
        Ok(verified)
    }

    fn verify(
        &self,
        prepared: &PreparedRun,
        result: SessionResult,
    ) -> Result<VerifiedResult, PipelineError> {
        if !result.success {
            return Err(PipelineError::Protocol(format!(
                "backend reported failure after {} rounds",
                result.rounds.len()
            )));
        }
        let sent = prepared.request.message_text();
        if result.original_payload != sent {
            return Err(VerificationFailure::EchoMismatch {
                sent,
                echoed: result.original_payload,
            }
            .into());
        }

        let echoed = self.parse_echo(&result.decoded_payload)?;
        let decrypted = prepared.key.decrypt(&echoed);
        if decrypted != *prepared.plaintext.bits() {
            warn!(run = %prepared.run, "decrypted payload differs from local plaintext");
            return Err(VerificationFailure::PlaintextMismatch.into());
        }
        let payload = self.layout.payload(decrypted)?;
        let decoded = self.layout.decode(&payload)?;

        Ok(VerifiedResult {
            run: prepared.run,
            point: decoded.point,
            restricted: decoded.restricted,
            plaintext: payload.bits().clone(),
            ciphertext: echoed,
            rounds: result.rounds,
        })
    }

    /// Split `lat,lon,flag` back into ciphertext bits, checking each field's width.
    fn parse_echo(&self, text: &str) -> Result<BitString, VerificationFailure> {
        let fields: Vec<&str> = text.split(',').collect();
        let [lat, lon, flag] = fields.as_slice() else {
            return Err(VerificationFailure::MalformedEcho(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        };
        let w = self.layout.field_width as usize;
        let mut out = BitString::new();
        for (name, field, width) in [("latitude", lat, w), ("longitude", lon, w), ("restricted", flag, 1)] {
            let bits: BitString = field
                .parse()
                .map_err(|e| VerificationFailure::MalformedEcho(format!("{name}: {e}")))?;
            if bits.len() != width {
                return Err(VerificationFailure::MalformedEcho(format!(
                    "{name} has {} bits, expected {width}",
                    bits.len()
                )));
            }
            out.extend_from(&bits);
        }
        Ok(out)
    }
}
