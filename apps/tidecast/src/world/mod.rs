//! Shared-state worlds: pluggable models owned by the authoritative engine.

pub mod chat;
pub mod stackfall;

use std::time::Duration;

use ringcast::{Broadcast, CancelToken};
use tokio::sync::mpsc;

use crate::message::{Event, WorldMsg};
use crate::program::engine::Request;

/// A shared-state model. Exactly one instance lives inside the authoritative
/// engine; `update` runs to completion before the next message is handled,
/// so the implementation never needs interior locking.
pub trait World: Send + 'static {
    fn init(&mut self, cx: &WorldCx) {
        let _ = cx;
    }

    fn update(&mut self, msg: WorldMsg, cx: &WorldCx);
}

/// Capabilities the engine grants its world: publishing to the broadcast bus
/// and scheduling deferred self-messages (gravity ticks, lock timers) that
/// re-enter the engine's cooperative queue.
#[derive(Clone)]
pub struct WorldCx {
    bus: Broadcast<Event>,
    tx: mpsc::Sender<Request>,
    token: CancelToken,
}

impl WorldCx {
    pub(crate) fn new(bus: Broadcast<Event>, tx: mpsc::Sender<Request>, token: CancelToken) -> Self {
        Self { bus, tx, token }
    }

    pub fn broadcast(&self, event: Event) {
        self.bus.write(event);
    }

    /// Deliver `msg` back to the world after `delay`, unless the engine shuts
    /// down first.
    pub fn schedule(&self, delay: Duration, msg: WorldMsg) {
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Request::World(msg)).await;
                }
            }
        });
    }
}
