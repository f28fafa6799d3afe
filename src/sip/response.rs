use super::{Codec, Datagram, ResponseKind};
use crate::cache::Memoized;
use crate::{Error, Result};
use std::sync::Arc;

pub const DEFAULT_RESPONSE_CACHE_SIZE: usize = 32;

type RenderKey = (Datagram, ResponseKind);

/// Memoized response generator
///
/// Renders the canned template for a [`ResponseKind`] with the codec and keeps
/// the last `capacity` renderings. Retransmissions of the same request produce
/// identical `(datagram, kind)` pairs, so they are served from the cache
/// without touching the codec again.
///
/// One renderer is shared by every worker of a server.
pub struct ResponseRenderer {
    cache: Memoized<RenderKey, Vec<u8>, Error>,
}

impl ResponseRenderer {
    pub fn new(codec: Arc<dyn Codec>, capacity: usize) -> Self {
        let cache = Memoized::new(capacity, move |(datagram, kind): &RenderKey| {
            codec.render_template(&kind.template(), datagram)
        });
        Self { cache }
    }

    pub fn render(&self, datagram: &Datagram, kind: ResponseKind) -> Result<Vec<u8>> {
        self.cache.get_or_compute((datagram.clone(), kind))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
