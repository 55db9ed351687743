//! Scripted in-process backend for driver and runner tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use skylink_core::{KeyExchange, KeyExchangeRequest, StreamRequest};
use tokio::sync::{mpsc, Notify};

use crate::backend::{Backend, BackendError, StreamHandle, StreamItem};

/// How one opened stream behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// `rounds` progress events, then a terminal event echoing the request.
    Echo { rounds: u32, success: bool },
    /// Like `Echo`, but the echoed restricted flag is flipped.
    Corrupt { rounds: u32 },
    /// `rounds` progress events, then the stream stays open until dropped.
    Hold { rounds: u32 },
    /// `rounds` progress events, then a transport failure.
    Fail { rounds: u32, retryable: bool },
    /// The stream cannot be opened.
    Refuse { retryable: bool },
}

pub struct FakeBackend {
    pub key: KeyExchange,
    scripts: Mutex<VecDeque<Script>>,
    pub streams_opened: AtomicUsize,
    /// Signalled once a `Hold` stream has had all its rounds consumed.
    pub held: Arc<Notify>,
    /// Signalled when a stream's reader task is dropped, finished or aborted.
    pub reader_closed: Arc<Notify>,
}

/// Notifies when the reader task's future is dropped.
struct ReaderGuard(Arc<Notify>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

impl FakeBackend {
    pub fn new(key: &str, error_rate: f64, scripts: Vec<Script>) -> Self {
        Self {
            key: KeyExchange {
                key: key.to_string(),
                error_rate,
            },
            scripts: Mutex::new(scripts.into()),
            streams_opened: AtomicUsize::new(0),
            held: Arc::new(Notify::new()),
            reader_closed: Arc::new(Notify::new()),
        }
    }

    pub fn opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

pub fn progress(round: u32) -> String {
    format!(r#"{{"round":{round},"sent":"10","measured":"10","message":"Round {round} completed"}}"#)
}

pub fn terminal(original: &str, decoded: &str, success: bool) -> String {
    serde_json::json!({
        "completed": true,
        "original_text": original,
        "decoded_text": decoded,
        "success": success,
    })
    .to_string()
}

impl Backend for FakeBackend {
    async fn exchange_key(&self, _req: &KeyExchangeRequest) -> Result<KeyExchange, BackendError> {
        Ok(self.key.clone())
    }

    async fn open_stream(&self, req: &StreamRequest) -> Result<StreamHandle, BackendError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Echo {
                rounds: 0,
                success: true,
            });
        if let Script::Refuse { retryable } = script {
            let status = if retryable { 503 } else { 400 };
            return Err(BackendError::Status {
                status,
                message: "refused".into(),
            });
        }
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        let text = req.message_text();
        let held = self.held.clone();
        let guard = ReaderGuard(self.reader_closed.clone());
        // Capacity 1: a send completes only once the previous item has been taken.
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let rounds = match &script {
                Script::Echo { rounds, .. }
                | Script::Corrupt { rounds }
                | Script::Hold { rounds }
                | Script::Fail { rounds, .. } => *rounds,
                Script::Refuse { .. } => 0,
            };
            for r in 1..=rounds {
                if tx.send(StreamItem::Event(progress(r))).await.is_err() {
                    return;
                }
            }
            let last = match script {
                Script::Echo { success, .. } => StreamItem::Event(terminal(&text, &text, success)),
                Script::Corrupt { .. } => {
                    let mut echoed = text.clone();
                    let flag = if echoed.ends_with('1') { "0" } else { "1" };
                    echoed.pop();
                    echoed.push_str(flag);
                    StreamItem::Event(terminal(&text, &echoed, true))
                }
                Script::Hold { .. } => {
                    if let Ok(permit) = tx.reserve().await {
                        held.notify_one();
                        std::future::pending::<()>().await;
                        drop(permit);
                    }
                    return;
                }
                Script::Fail { retryable, .. } => StreamItem::Failed {
                    retryable,
                    reason: "connection reset".into(),
                },
                Script::Refuse { .. } => return,
            };
            let _ = tx.send(last).await;
        });
        Ok(StreamHandle::new(rx, task))
    }
}
