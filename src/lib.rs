//! `sipd`: a SIP signaling daemon for active call recording.
//!
//! The daemon answers INVITE/ACK/BYE/CANCEL/OPTIONS over UDP, asks an
//! external RTP engine for media ports, and keeps track of live calls so that
//! retransmitted INVITEs are not negotiated twice.
//!
//! * [`cache`] - LRU memoization and a bounded insertion ordered map
//! * [`sip`] - datagram model, codec and memoized response rendering
//! * [`worker`] - the per-transaction state machine
//! * [`rtp`] - media engine client
//! * [`gc`] - call membership and deferred teardown
//! * [`transport`] - UDP socket allocation
//! * [`server`] - receive loop and worker pool
pub use error::{Error, Result};

pub mod cache;
pub mod config;
pub mod error;
pub mod gc;
pub mod logging;
pub mod rtp;
pub mod server;
pub mod sip;
pub mod transport;
pub mod worker;
