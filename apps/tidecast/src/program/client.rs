//! The per-session client program: wraps a UI model, feeds it the bootstrap
//! replay and coalesced live batches from the bus, forwards its outbound
//! messages to the engine, and reports connect/disconnect over the session's
//! lifetime.

use std::time::Instant;

use ringcast::{CancelToken, RecvError, Subscriber};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::message::{Event, Record, SessionId, WorldMsg};

use super::engine::{EngineClosed, EngineHandle};
use super::BATCH_DEADLINE;

/// Depth of the session's own inbox (batches, keys, resizes).
const SESSION_INBOX: usize = 64;

/// Messages delivered to a [`ClientModel`].
#[derive(Debug)]
pub enum ClientMsg {
    /// One-shot delivery of the engine handle; from here on the model may
    /// queue outbound messages via [`ClientCx::send`].
    Engine(EngineHandle),
    /// The recorded history replayed on join. Always precedes any batch.
    Bootstrap(Vec<Record>),
    /// One coalesced slice of live bus traffic, oldest first. A trailing
    /// error is terminal for the session.
    Batch(Vec<Result<Event, RecvError>>),
    Key(Key),
    Resize { cols: u16, rows: u16 },
}

/// Terminal input, pre-decoded by the transport adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Esc,
    CtrlC,
}

/// Why a client session ended, as surfaced by [`ClientModel::err`].
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Bus(#[from] RecvError),
    #[error("server shutdown: {0}")]
    Shutdown(String),
}

/// Side effects a model may request during `update`. The session loop drains
/// them after each handler runs, keeping the model itself synchronous.
#[derive(Default)]
pub struct ClientCx {
    pub(crate) outbound: Vec<WorldMsg>,
    pub(crate) quit: bool,
}

impl ClientCx {
    /// Queue a message for the authoritative engine.
    pub fn send(&mut self, msg: WorldMsg) {
        self.outbound.push(msg);
    }

    /// End the session after this update.
    pub fn quit(&mut self) {
        self.quit = true;
    }
}

/// What the core requires of any per-session UI.
pub trait ClientModel: Send + 'static {
    /// Session identity used for the roster and the subscription name.
    fn id(&self) -> SessionId;

    fn init(&mut self, cx: &mut ClientCx) {
        let _ = cx;
    }

    fn update(&mut self, msg: ClientMsg, cx: &mut ClientCx);

    /// Render the current state to a frame.
    fn view(&mut self) -> String;

    /// Terminal error observed by the model, if any.
    fn err(&self) -> Option<ClientError>;
}

/// Control surface for a running client program. Dropping the handle ends
/// the session: the transport owning it going away is a disconnect.
pub struct ClientHandle {
    tx: mpsc::Sender<ClientMsg>,
    token: CancelToken,
    done: oneshot::Receiver<Option<ClientError>>,
}

impl ClientHandle {
    /// Deliver transport input to the session. Returns `false` once the
    /// session has ended.
    pub async fn send(&self, msg: ClientMsg) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Ask the session to stop.
    pub fn quit(&self) {
        self.token.cancel();
    }

    /// Wait for the session to finish and collect its terminal error.
    pub async fn wait(&mut self) -> Option<ClientError> {
        match (&mut self.done).await {
            Ok(err) => err,
            Err(_) => None,
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Subscribe `model` to the world and start its session loop.
///
/// Rendered frames are published to `frames` (latest wins); the transport
/// forwards them to the terminal. `token` bounds the session: it should be
/// derived from both the transport connection and the engine lifetime.
pub async fn spawn<M: ClientModel>(
    engine: EngineHandle,
    model: M,
    token: CancelToken,
    frames: watch::Sender<String>,
) -> Result<ClientHandle, EngineClosed> {
    let id = model.id();
    let subscription = engine.subscribe(id.clone(), token.child()).await?;
    let (tx, rx) = mpsc::channel(SESSION_INBOX);
    let (done_tx, done_rx) = oneshot::channel();
    let batch_tx = tx.clone();

    let session = tokio::spawn(run_session(
        engine.clone(),
        model,
        subscription,
        rx,
        batch_tx,
        token.clone(),
        frames,
    ));

    // Supervisor: however the UI loop ends, crash included, the disconnect
    // goes out so the roster never leaks a dead session.
    tokio::spawn(async move {
        let err = match session.await {
            Ok(err) => err,
            Err(join_err) => {
                warn!(
                    target = "program::client",
                    id = %id,
                    error = %join_err,
                    "client program crashed"
                );
                None
            }
        };
        let _ = engine.send(WorldMsg::Disconnected(id.clone())).await;
        debug!(target = "program::client", id = %id, "session ended");
        let _ = done_tx.send(err);
    });

    Ok(ClientHandle {
        tx,
        token,
        done: done_rx,
    })
}

async fn run_session<M: ClientModel>(
    engine: EngineHandle,
    mut model: M,
    subscription: super::engine::Subscription,
    mut rx: mpsc::Receiver<ClientMsg>,
    batch_tx: mpsc::Sender<ClientMsg>,
    token: CancelToken,
    frames: watch::Sender<String>,
) -> Option<ClientError> {
    let id = model.id();
    let mut cx = ClientCx::default();

    model.init(&mut cx);
    let mut alive = flush(&engine, &mut cx).await && render(&frames, &mut model);

    if alive {
        model.update(ClientMsg::Engine(engine.clone()), &mut cx);
        alive = flush(&engine, &mut cx).await;
    }
    if alive {
        alive = engine.send(WorldMsg::Connected(id)).await.is_ok();
    }
    if alive {
        model.update(ClientMsg::Bootstrap(subscription.bootstrap), &mut cx);
        alive = flush(&engine, &mut cx).await && render(&frames, &mut model);
    }

    let reader = tokio::spawn(read_batches(subscription.subscriber, batch_tx));

    while alive && !cx.quit {
        tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                None => break,
                Some(msg) => {
                    model.update(msg, &mut cx);
                    alive = flush(&engine, &mut cx).await && render(&frames, &mut model);
                }
            }
        }
    }

    reader.abort();
    model.err()
}

/// Forward the model's queued messages; false when the engine is gone.
async fn flush(engine: &EngineHandle, cx: &mut ClientCx) -> bool {
    for msg in cx.outbound.drain(..) {
        if engine.send(msg).await.is_err() {
            return false;
        }
    }
    true
}

/// Publish a frame; false once the transport dropped its receiver.
fn render<M: ClientModel>(frames: &watch::Sender<String>, model: &mut M) -> bool {
    frames.send(model.view()).is_ok()
}

/// Drain the subscriber into batches. Each batch blocks for its first
/// message, then coalesces whatever is immediately available until the
/// batch deadline passes. A terminal error is appended to the final batch.
async fn read_batches(mut sub: Subscriber<Event>, tx: mpsc::Sender<ClientMsg>) {
    loop {
        let mut batch: Vec<Result<Event, RecvError>> = Vec::with_capacity(16);
        let first = sub.next().await;
        let mut failed = first.is_err();
        batch.push(first);

        let start = Instant::now();
        while !failed {
            // Non-blocking availability probe before blocking on next.
            if !sub.skip(|_| false) {
                break;
            }
            if start.elapsed() > BATCH_DEADLINE {
                break;
            }
            match sub.next().await {
                Ok(ev) => batch.push(Ok(ev)),
                Err(err) => {
                    batch.push(Err(err));
                    failed = true;
                }
            }
        }

        if tx.send(ClientMsg::Batch(batch)).await.is_err() {
            return;
        }
        if failed {
            return;
        }
    }
}
