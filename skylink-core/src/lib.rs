//! SkyLink pipeline reference implementation.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod bits;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod event;
pub mod geofence;
pub mod navigation;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod trajectory;

pub use bits::{BitString, ParseBitsError};
pub use cipher::{CipherError, CipherKey};
pub use codec::{BinaryPayload, DecodedPayload, EncodeError, PayloadLayout};
pub use error::{PipelineError, VerificationFailure};
pub use event::{InboundEvent, ProgressEvent, TerminalEvent};
pub use geofence::{default_zones, GeoPoint, GeometryError, Polygon, ZoneSet};
pub use navigation::{Flight, FlightList, FlightPrediction, TrackPoint};
pub use pipeline::{PipelineCoordinator, PreparedRun, RunId, VerifiedResult};
pub use protocol::{
    FullSimulationRequest, FullSimulationResponse, KeyExchange, KeyExchangeRequest, StreamRequest,
    MAX_ERROR_RATE,
};
pub use session::{
    ProtocolRound, ProtocolSession, RoundRecord, SessionAction, SessionError, SessionOutcome,
    SessionResult, SessionState,
};
pub use trajectory::{Motion, TrackSample, TrajectoryPoint};
