//! Drive a [`ProtocolSession`] over a [`Backend`] stream until the session reaches a terminal state.

use skylink_core::{ProtocolSession, SessionAction, SessionError, StreamRequest};
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{Backend, StreamHandle, StreamItem};

/// Resolves once `cancel` is set to true. Never resolves if the sender is gone.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Open the stream for `request` and feed every item to `session` until it is completed,
/// failed or cancelled. The stream is released on every exit path.
pub async fn drive<B: Backend>(
    backend: &B,
    session: &mut ProtocolSession,
    request: StreamRequest,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let mut stream: Option<StreamHandle> = None;
    for action in session.start(request)? {
        let SessionAction::Open(params) = action else {
            continue;
        };
        let opened = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                session.cancel()?;
                return Ok(());
            }
            r = backend.open_stream(&params) => r,
        };
        match opened {
            Ok(handle) => stream = Some(handle),
            Err(e) => {
                session.on_transport_failure(e.is_retryable(), &e.to_string());
                return Ok(());
            }
        }
    }
    let Some(mut stream) = stream else {
        return Ok(());
    };

    loop {
        let item = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                session.cancel()?;
                break;
            }
            item = stream.next() => item,
        };
        let actions = match item {
            Some(StreamItem::Event(raw)) => session.on_event(&raw),
            Some(StreamItem::Failed { retryable, reason }) => {
                session.on_transport_failure(retryable, &reason)
            }
            None => session.on_transport_failure(true, "stream reader stopped"),
        };
        if actions.contains(&SessionAction::Close) {
            break;
        }
    }
    debug!(session = %session.id(), state = ?session.state(), "releasing stream");
    stream.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, Script};
    use skylink_core::{SessionOutcome, SessionState};
    use std::time::Duration;

    fn request() -> StreamRequest {
        StreamRequest {
            latitude: "0110".into(),
            longitude: "1001".into(),
            restricted_status: "0".into(),
        }
    }

    #[tokio::test]
    async fn completes_with_all_rounds() {
        let backend = FakeBackend::new(
            "1",
            0.0,
            vec![Script::Echo {
                rounds: 5,
                success: true,
            }],
        );
        let (_tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        drive(&backend, &mut session, request(), &mut rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        match session.into_outcome() {
            Some(SessionOutcome::Completed(r)) => {
                assert_eq!(r.rounds.len(), 5);
                assert_eq!(r.original_payload, "0110,1001,0");
                assert_eq!(r.decoded_payload, "0110,1001,0");
                assert!(r.success);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_after_three_rounds_keeps_three() {
        let backend = FakeBackend::new("1", 0.0, vec![Script::Hold { rounds: 3 }]);
        let (tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        let held = backend.held.clone();
        let (res, _) = tokio::join!(drive(&backend, &mut session, request(), &mut rx), async {
            held.notified().await;
            tx.send(true).unwrap();
        });
        res.unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.round_count(), 3);
        // Late events are discarded.
        assert!(session.on_event(&crate::testing::progress(4)).is_empty());
        assert_eq!(session.round_count(), 3);
    }

    #[tokio::test]
    async fn dropping_drive_mid_stream_stops_reader() {
        let backend = FakeBackend::new("1", 0.0, vec![Script::Hold { rounds: 2 }]);
        let (_tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        let held = backend.held.clone();
        tokio::select! {
            _ = drive(&backend, &mut session, request(), &mut rx) => panic!("held stream ended"),
            _ = held.notified() => {}
        }
        tokio::time::timeout(Duration::from_secs(5), backend.reader_closed.notified())
            .await
            .expect("reader task still running after drive was dropped");
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.round_count(), 2);
    }

    #[tokio::test]
    async fn dropping_handle_stops_reader() {
        let backend = FakeBackend::new("1", 0.0, vec![Script::Hold { rounds: 0 }]);
        let stream = backend.open_stream(&request()).await.unwrap();
        backend.held.notified().await;
        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), backend.reader_closed.notified())
            .await
            .expect("reader task still running after handle was dropped");
    }

    #[tokio::test]
    async fn cancel_before_open_never_streams() {
        let backend = FakeBackend::new("1", 0.0, vec![]);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut session = ProtocolSession::new();
        drive(&backend, &mut session, request(), &mut rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test]
    async fn transport_failure_mid_stream() {
        let backend = FakeBackend::new(
            "1",
            0.0,
            vec![Script::Fail {
                rounds: 2,
                retryable: true,
            }],
        );
        let (_tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        drive(&backend, &mut session, request(), &mut rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Failed { retryable: true });
        assert_eq!(session.round_count(), 2);
    }

    #[tokio::test]
    async fn refused_open_fails_session() {
        let backend = FakeBackend::new("1", 0.0, vec![Script::Refuse { retryable: false }]);
        let (_tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        drive(&backend, &mut session, request(), &mut rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Failed { retryable: false });
        assert_eq!(session.round_count(), 0);
    }

    #[tokio::test]
    async fn session_cannot_be_driven_twice() {
        let backend = FakeBackend::new("1", 0.0, vec![]);
        let (_tx, mut rx) = watch::channel(false);
        let mut session = ProtocolSession::new();
        drive(&backend, &mut session, request(), &mut rx).await.unwrap();
        let err = drive(&backend, &mut session, request(), &mut rx).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyStarted(_)));
    }
}
