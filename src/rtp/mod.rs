//! Media negotiation collaborator.
//!
//! The worker asks an external RTP engine to allocate (or release) media
//! ports for a call. [`RtpHandle`] is the seam; [`UdpRtpRouter`] talks to an
//! engine over UDP.
use crate::sip::Datagram;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod router;

pub use router::{UdpRtpConnector, UdpRtpRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpAction {
    Negotiate,
    Stop,
}

impl fmt::Display for RtpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtpAction::Negotiate => write!(f, "negotiate"),
            RtpAction::Stop => write!(f, "stop"),
        }
    }
}

/// A live connection to the media engine.
#[async_trait]
pub trait RtpHandle: Send + Sync {
    /// Returns the datagram rewritten with the negotiated session description,
    /// or `None` when the engine did not provide media ports.
    async fn negotiate(&self, datagram: &Datagram) -> Result<Option<Datagram>>;

    async fn stop(&self, datagram: &Datagram) -> Result<()>;
}

/// Produces [`RtpHandle`]s for workers that lost (or never had) one.
#[async_trait]
pub trait RtpConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RtpHandle>>;
}
