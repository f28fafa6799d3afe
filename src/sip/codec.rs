use super::{Datagram, Template};
use crate::Result;
use rsip::{Header, SipMessage};
use tracing::trace;

/// Headers that a template either recomputes or must not echo back.
const SKIPPED_HEADERS: &[&str] = &[
    "Content-Length",
    "Content-Type",
    "Max-Forwards",
    "Allow",
    "Accept",
];

/// Byte level SIP codec
///
/// The worker only talks to the wire through this trait: it checks that a
/// datagram looks like a SIP request, turns it into a [`Datagram`], and turns
/// a [`Template`] plus a datagram back into bytes.
pub trait Codec: Send + Sync {
    fn validate_signature(&self, work: &[u8]) -> bool;
    fn parse(&self, work: &[u8]) -> Result<Datagram>;
    fn render_template(&self, template: &Template, datagram: &Datagram) -> Result<Vec<u8>>;
}

/// [`Codec`] backed by `rsip`.
#[derive(Debug, Clone, Default)]
pub struct RsipCodec;

impl RsipCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for RsipCodec {
    fn validate_signature(&self, work: &[u8]) -> bool {
        matches!(SipMessage::try_from(work), Ok(SipMessage::Request(_)))
    }

    fn parse(&self, work: &[u8]) -> Result<Datagram> {
        let request: rsip::Request = SipMessage::try_from(work)?.try_into()?;
        let headers = request
            .headers
            .iter()
            .filter_map(|header| {
                let line = header.to_string();
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Datagram {
            method: Some(request.method.to_string()),
            headers,
            body: request.body,
        })
    }

    fn render_template(&self, template: &Template, datagram: &Datagram) -> Result<Vec<u8>> {
        let mut headers: Vec<Header> = datagram
            .headers
            .iter()
            .filter(|(name, _)| {
                !SKIPPED_HEADERS
                    .iter()
                    .any(|skipped| skipped.eq_ignore_ascii_case(name))
            })
            .map(|(name, value)| Header::Other(name.clone(), value.clone()))
            .collect();

        for (name, value) in &template.headers {
            headers.push(Header::Other(name.to_string(), value.to_string()));
        }

        let body = if template.with_body {
            datagram.body.clone()
        } else {
            Vec::new()
        };
        if !body.is_empty() {
            headers.push(Header::ContentType("application/sdp".into()));
        }
        headers.push(rsip::headers::ContentLength::from(body.len() as u32).into());

        let response = rsip::Response {
            version: rsip::Version::V2,
            status_code: template.status_code.clone(),
            headers: headers.into(),
            body,
        };
        trace!(status = %response.status_code, "rendered response");
        Ok(response.to_string().into_bytes())
    }
}
