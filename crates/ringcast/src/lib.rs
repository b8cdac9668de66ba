//! Fan-out primitives for single-writer, many-reader event distribution.
//!
//! The crate is two layers:
//!
//! - [`ring::Ring`] — a fixed-capacity FIFO with windowed random access and
//!   no interior synchronization. Exclusive access is the caller's problem.
//! - [`bus::Broadcast`] — a bounded broadcast bus built on the ring. One
//!   logical writer appends; every subscriber owns an absolute read cursor
//!   and drains at its own pace. Subscribers that fall too far behind are
//!   evicted rather than ever stalling the writer.
//!
//! [`cancel::CancelToken`] is the small cancellation primitive both layers
//! and their callers share.

pub mod bus;
pub mod cancel;
pub mod ring;

pub use bus::{Broadcast, RecvError, SubscribeOpts, Subscriber};
pub use cancel::CancelToken;
pub use ring::Ring;
