//! The authoritative engine: a single task that owns the shared-state world,
//! the broadcast bus, and the event store. Handlers run to completion one at
//! a time, which is what lets the world mutate freely without locks.

use chrono::Utc;
use ringcast::{Broadcast, CancelToken, SubscribeOpts, Subscriber};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::message::{Event, Record, SessionId, WorldMsg};
use crate::record::Recorder;
use crate::world::{World, WorldCx};

use super::{BROADCAST_RING, INITIAL_REPLAY, LIVENESS_TICK, MAX_BEHIND};

/// Depth of the many-to-one inbox feeding the engine.
const INBOX_DEPTH: usize = 256;

/// Operator-tunable knobs, defaulting to the documented constants.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub ring_capacity: usize,
    pub max_behind: u64,
    pub initial_replay: usize,
    pub liveness_tick: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: BROADCAST_RING,
            max_behind: MAX_BEHIND,
            initial_replay: INITIAL_REPLAY,
            liveness_tick: LIVENESS_TICK,
        }
    }
}

/// Messages accepted by the engine's inbox.
pub enum Request {
    Subscribe(Subscribe),
    World(WorldMsg),
}

impl From<WorldMsg> for Request {
    fn from(msg: WorldMsg) -> Self {
        Request::World(msg)
    }
}

pub struct Subscribe {
    pub id: SessionId,
    pub token: CancelToken,
    pub reply: oneshot::Sender<Subscription>,
}

/// What a new subscriber receives: recent durable history plus a live cursor
/// positioned at the current head of the bus.
pub struct Subscription {
    pub bootstrap: Vec<Record>,
    pub subscriber: Subscriber<Event>,
}

#[derive(Debug, Clone, Error)]
#[error("authoritative engine unavailable")]
pub struct EngineClosed;

/// Cloneable producer side of the engine's many-to-one inbox.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
    token: CancelToken,
}

impl EngineHandle {
    /// Forward a message to the engine. Races the engine's shutdown so a
    /// producer can never hang on a dying loop.
    pub async fn send(&self, req: impl Into<Request>) -> Result<(), EngineClosed> {
        tokio::select! {
            _ = self.token.cancelled() => Err(EngineClosed),
            sent = self.tx.send(req.into()) => sent.map_err(|_| EngineClosed),
        }
    }

    /// Register a new bus subscriber and fetch its bootstrap replay.
    pub async fn subscribe(
        &self,
        id: SessionId,
        token: CancelToken,
    ) -> Result<Subscription, EngineClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Subscribe(Subscribe {
            id,
            token: token.clone(),
            reply,
        }))
        .await?;
        tokio::select! {
            _ = token.cancelled() => Err(EngineClosed),
            resp = rx => resp.map_err(|_| EngineClosed),
        }
    }

    /// Token that fires when the engine shuts down; transports derive
    /// session lifetimes from it.
    pub fn shutdown_token(&self) -> &CancelToken {
        &self.token
    }
}

impl From<Subscribe> for Request {
    fn from(sub: Subscribe) -> Self {
        Request::Subscribe(sub)
    }
}

/// Start the engine and return its input handle. The loop exits when `token`
/// cancels, after which one final [`Event::Shutdown`] wakes every subscriber
/// and the bus closes.
pub fn spawn<W, R>(world: W, store: R, config: EngineConfig, token: CancelToken) -> EngineHandle
where
    W: World,
    R: Recorder,
{
    let bus: Broadcast<Event> = Broadcast::new(config.ring_capacity);
    let (tx, rx) = mpsc::channel(INBOX_DEPTH);
    let cx = WorldCx::new(bus.clone(), tx.clone(), token.clone());
    let handle = EngineHandle {
        tx,
        token: token.clone(),
    };
    tokio::spawn(run(world, store, config, bus, rx, cx, token));
    handle
}

async fn run<W, R>(
    mut world: W,
    mut store: R,
    config: EngineConfig,
    bus: Broadcast<Event>,
    mut rx: mpsc::Receiver<Request>,
    cx: WorldCx,
    token: CancelToken,
) where
    W: World,
    R: Recorder,
{
    world.init(&cx);

    let mut ticker = interval_at(
        Instant::now() + config.liveness_tick,
        config.liveness_tick,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let now = Utc::now();
                bus.write(Event::Tick(now));
                world.update(WorldMsg::Tick(now), &cx);
            }
            req = rx.recv() => match req {
                None => break,
                Some(req) => handle_request(req, &mut world, &mut store, &bus, &config, &cx),
            }
        }
    }

    // One last pulse so every caught-up subscriber wakes and observes the
    // shutdown instead of parking on the wake condition forever.
    bus.write(Event::Shutdown("server shutting down".to_string()));
    bus.close();
}

fn handle_request<W, R>(
    req: Request,
    world: &mut W,
    store: &mut R,
    bus: &Broadcast<Event>,
    config: &EngineConfig,
    cx: &WorldCx,
) where
    W: World,
    R: Recorder,
{
    match req {
        Request::Subscribe(sub) => {
            let bootstrap = match store.read(config.initial_replay) {
                Ok(records) => records,
                Err(err) => {
                    warn!(
                        target = "program::engine",
                        error = %err,
                        id = %sub.id,
                        "bootstrap load failed; subscribing with empty replay"
                    );
                    Vec::new()
                }
            };
            let subscriber = bus.subscribe(SubscribeOpts {
                name: sub.id.to_string(),
                start_behind: 0,
                max_behind: config.max_behind,
                token: sub.token,
            });
            let _ = sub.reply.send(Subscription {
                bootstrap,
                subscriber,
            });
        }

        Request::World(mut msg) => {
            if let WorldMsg::Chat(chat) = &mut msg {
                chat.server_at.get_or_insert_with(Utc::now);
                match store.save(Record::Chat(chat.clone())) {
                    Ok(Record::Chat(saved)) => *chat = saved,
                    Err(err) => {
                        // An unrecorded message would vanish on restart while
                        // live clients remember it; drop it instead.
                        warn!(
                            target = "program::engine",
                            error = %err,
                            "message save failed; not broadcasting"
                        );
                        return;
                    }
                }
            }

            match &msg {
                WorldMsg::Connected(id) => {
                    info!(target = "program::engine", id = %id, "connected");
                    bus.write(Event::Connected(id.clone()));
                }
                WorldMsg::Disconnected(id) => {
                    info!(target = "program::engine", id = %id, "disconnected");
                    bus.write(Event::Disconnected(id.clone()));
                }
                _ => {}
            }

            world.update(msg, cx);
        }
    }
}
