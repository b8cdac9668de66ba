use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::cancel::CancelToken;
use crate::ring::Ring;

/// Terminal conditions for a [`Subscriber`]. Every variant is permanent:
/// after `next` returns an error the subscriber is detached from the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The subscriber lagged the writer by more than its `max_behind`
    /// budget and was evicted so the writer never throttles.
    #[error("subscriber evicted after falling {behind} messages behind")]
    Evicted { behind: u64 },
    /// The bus shut down and everything before the shutdown was consumed.
    #[error("broadcast bus closed")]
    Closed,
    /// The subscriber's own cancellation token fired.
    #[error("subscriber canceled")]
    Canceled,
}

#[derive(Debug, Clone)]
pub struct SubscribeOpts {
    /// Diagnostic name, reported in logs. Conventionally the session id.
    pub name: String,
    /// How many already-written messages to replay, clamped to what the
    /// ring still holds.
    pub start_behind: u64,
    /// Cursor lag at which the subscriber is evicted. Clamped to the ring
    /// capacity, past which messages would be unrecoverable anyway.
    pub max_behind: u64,
    /// Cancels `next` with [`RecvError::Canceled`].
    pub token: CancelToken,
}

struct SubState {
    name: String,
    cursor: u64,
    max_behind: u64,
    evicted: bool,
}

struct State<T> {
    ring: Ring<T>,
    /// Absolute index of the next write. Subscriber cursors are absolute
    /// indexes into the same sequence.
    head: u64,
    subs: HashMap<u64, SubState>,
    next_sub_id: u64,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// Bounded broadcast bus: one logical writer, any number of subscribers,
/// each with an independent absolute cursor into a shared ring.
///
/// The writer never blocks. A subscriber that falls more than its
/// `max_behind` budget behind is marked evicted during `write` and observes
/// [`RecvError::Evicted`] on its next read. All subscribers see writes in
/// the exact order they occurred.
pub struct Broadcast<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    ring: Ring::new(capacity),
                    head: 0,
                    subs: HashMap::new(),
                    next_sub_id: 0,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a message and wake every waiter. Subscribers whose lag now
    /// exceeds their budget are marked evicted here, on the write path, so
    /// a slow consumer can never hold the ring hostage.
    pub fn write(&self, msg: T) {
        {
            let mut s = self.shared.state.lock();
            s.ring.push(msg);
            s.head += 1;
            let head = s.head;
            for sub in s.subs.values_mut() {
                if !sub.evicted && head - sub.cursor > sub.max_behind {
                    sub.evicted = true;
                }
            }
        }
        self.shared.notify.notify_waiters();
    }

    pub fn subscribe(&self, opts: SubscribeOpts) -> Subscriber<T> {
        let mut s = self.shared.state.lock();
        let id = s.next_sub_id;
        s.next_sub_id += 1;
        let replay = opts.start_behind.min(s.ring.len() as u64);
        let capacity = s.ring.capacity() as u64;
        let cursor = s.head - replay;
        s.subs.insert(
            id,
            SubState {
                name: opts.name.clone(),
                cursor,
                max_behind: opts.max_behind.min(capacity),
                evicted: false,
            },
        );
        Subscriber {
            shared: Arc::clone(&self.shared),
            id,
            name: opts.name,
            token: opts.token,
        }
    }

    /// Shut the bus down. Subscribers drain whatever they have not yet
    /// consumed and then observe [`RecvError::Closed`].
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subs.len()
    }
}

/// One read position on a [`Broadcast`]. Dropping the subscriber removes it
/// from the roster.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    id: u64,
    name: String,
    token: CancelToken,
}

impl<T: Clone> Subscriber<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next message.
    ///
    /// Wakes on any of: a new write, bus close, eviction, or cancellation
    /// of the subscriber's token. Errors are terminal; the subscriber is
    /// detached before one is returned.
    pub async fn next(&mut self) -> Result<T, RecvError> {
        loop {
            // Register interest before inspecting state so a write between
            // the check and the await cannot be missed.
            let notified = self.shared.notify.notified();
            if let Some(res) = self.poll_next() {
                return res;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.token.cancelled() => {
                    self.detach();
                    return Err(RecvError::Canceled);
                }
            }
        }
    }

    fn poll_next(&self) -> Option<Result<T, RecvError>> {
        let mut s = self.shared.state.lock();
        if self.token.is_cancelled() {
            s.subs.remove(&self.id);
            return Some(Err(RecvError::Canceled));
        }
        let head = s.head;
        let len = s.ring.len() as u64;
        let sub = match s.subs.get(&self.id) {
            Some(sub) => sub,
            // Already detached; only close can race us here.
            None => return Some(Err(RecvError::Closed)),
        };
        let behind = head - sub.cursor;
        if sub.evicted || behind > len {
            s.subs.remove(&self.id);
            return Some(Err(RecvError::Evicted { behind }));
        }
        if behind > 0 {
            let idx = (sub.cursor - (head - len)) as usize;
            match s.ring.at_in_window(idx, len as usize).cloned() {
                Some(msg) => {
                    if let Some(sub) = s.subs.get_mut(&self.id) {
                        sub.cursor += 1;
                    }
                    return Some(Ok(msg));
                }
                // Unreachable while `behind <= len`; treat as a lap.
                None => {
                    s.subs.remove(&self.id);
                    return Some(Err(RecvError::Evicted { behind }));
                }
            }
        }
        if s.closed {
            s.subs.remove(&self.id);
            return Some(Err(RecvError::Closed));
        }
        None
    }

    /// Non-blocking peek-and-consume.
    ///
    /// Returns `false` immediately when no message is available. Otherwise
    /// consumes messages for as long as `pred` approves them and returns
    /// `true`. `skip(|_| false)` is the pure availability probe.
    pub fn skip(&mut self, mut pred: impl FnMut(&T) -> bool) -> bool {
        let mut s = self.shared.state.lock();
        let head = s.head;
        let len = s.ring.len() as u64;
        let (mut cursor, evicted) = match s.subs.get(&self.id) {
            Some(sub) => (sub.cursor, sub.evicted),
            None => return false,
        };
        if evicted || cursor >= head {
            return false;
        }
        while cursor < head {
            let idx = (cursor - (head - len)) as usize;
            match s.ring.at_in_window(idx, len as usize) {
                Some(msg) if pred(msg) => cursor += 1,
                _ => break,
            }
        }
        if let Some(sub) = s.subs.get_mut(&self.id) {
            sub.cursor = cursor;
        }
        true
    }

    fn detach(&self) {
        self.shared.state.lock().subs.remove(&self.id);
        self.shared.notify.notify_waiters();
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.shared.state.lock().subs.remove(&self.id);
        self.shared.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn opts(name: &str) -> SubscribeOpts {
        SubscribeOpts {
            name: name.to_string(),
            start_behind: 0,
            max_behind: u64::MAX,
            token: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn subscribers_observe_identical_order() {
        let bus = Broadcast::new(16);
        let mut a = bus.subscribe(opts("a"));
        let mut b = bus.subscribe(opts("b"));
        for i in 0..10 {
            bus.write(i);
        }
        let got_a: Vec<i32> = {
            let mut v = Vec::new();
            for _ in 0..10 {
                v.push(a.next().await.expect("a"));
            }
            v
        };
        let mut got_b = Vec::new();
        for _ in 0..10 {
            got_b.push(b.next().await.expect("b"));
        }
        assert_eq!(got_a, (0..10).collect::<Vec<_>>());
        assert_eq!(got_a, got_b);
    }

    #[tokio::test]
    async fn start_behind_replays_recent_history() {
        let bus = Broadcast::new(8);
        for i in 0..20 {
            bus.write(i);
        }
        let mut sub = bus.subscribe(SubscribeOpts {
            start_behind: 3,
            ..opts("late")
        });
        assert_eq!(sub.next().await, Ok(17));
        assert_eq!(sub.next().await, Ok(18));
        assert_eq!(sub.next().await, Ok(19));
        assert!(!sub.skip(|_| false));
    }

    #[tokio::test]
    async fn start_behind_clamps_to_ring_contents() {
        let bus = Broadcast::new(4);
        bus.write(1);
        bus.write(2);
        let mut sub = bus.subscribe(SubscribeOpts {
            start_behind: 100,
            ..opts("eager")
        });
        assert_eq!(sub.next().await, Ok(1));
        assert_eq!(sub.next().await, Ok(2));
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_not_the_writer() {
        let bus = Broadcast::new(64);
        let mut slow = bus.subscribe(SubscribeOpts {
            max_behind: 5,
            ..opts("slow")
        });
        let mut ok = bus.subscribe(opts("ok"));
        for i in 0..10 {
            bus.write(i);
        }
        match slow.next().await {
            Err(RecvError::Evicted { behind }) => assert!(behind > 5),
            other => panic!("expected eviction, got {other:?}"),
        }
        // The healthy subscriber is unaffected.
        assert_eq!(ok.next().await, Ok(0));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn skip_consumes_while_predicate_holds() {
        let bus = Broadcast::new(8);
        let mut sub = bus.subscribe(opts("s"));
        assert!(!sub.skip(|_| true), "nothing available yet");

        for i in 0..4 {
            bus.write(i);
        }
        // Peek only: leaves everything in place.
        assert!(sub.skip(|_| false));
        assert_eq!(sub.next().await, Ok(0));

        // Consume while value < 3.
        assert!(sub.skip(|v| *v < 3));
        assert_eq!(sub.next().await, Ok(3));
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let bus = Broadcast::new(8);
        let mut sub = bus.subscribe(opts("s"));
        bus.write("last");
        bus.close();
        assert_eq!(sub.next().await, Ok("last"));
        assert_eq!(sub.next().await, Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn close_wakes_blocked_subscriber() {
        let bus: Broadcast<u8> = Broadcast::new(8);
        let mut sub = bus.subscribe(opts("s"));
        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        bus.close();
        let res = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woke")
            .expect("join");
        assert_eq!(res, Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn cancel_wakes_blocked_subscriber() {
        let bus: Broadcast<u8> = Broadcast::new(8);
        let token = CancelToken::new();
        let mut sub = bus.subscribe(SubscribeOpts {
            token: token.clone(),
            ..opts("s")
        });
        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        token.cancel();
        let res = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woke")
            .expect("join");
        assert_eq!(res, Err(RecvError::Canceled));
    }

    #[tokio::test]
    async fn write_wakes_blocked_subscriber() {
        let bus = Broadcast::new(8);
        let mut sub = bus.subscribe(opts("s"));
        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        bus.write(7);
        let res = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woke")
            .expect("join");
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn dropping_subscriber_leaves_roster() {
        let bus: Broadcast<u8> = Broadcast::new(8);
        let sub = bus.subscribe(opts("s"));
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
