//! The two cooperative event loops that make the system multiplayer: the
//! authoritative engine (one per process, sole bus writer) and the client
//! program (one per session, bus subscriber + input forwarder).

pub mod client;
pub mod engine;

use std::time::Duration;

/// Broadcast ring capacity.
pub const BROADCAST_RING: usize = 10_000;
/// Cursor lag at which a slow subscriber is evicted.
pub const MAX_BEHIND: u64 = 9_000;
/// Recordables replayed to a new subscriber before live traffic.
pub const INITIAL_REPLAY: usize = 100;
/// Wall-clock width of one live delivery batch.
pub const BATCH_DEADLINE: Duration = Duration::from_millis(50);
/// Period of the tick that keeps quiescent subscribers responsive.
pub const LIVENESS_TICK: Duration = Duration::from_secs(1);
