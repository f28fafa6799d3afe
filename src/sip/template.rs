use std::fmt;

/// Canned response selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Trying,
    Ringing,
    /// 200 OK carrying the negotiated session description.
    OkWithSdp,
    /// 200 OK without a body.
    OkNoSdp,
    Options,
    Terminate,
    Default,
}

/// Shape of a canned response. Dialog headers always come from the datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub status_code: rsip::StatusCode,
    pub headers: Vec<(&'static str, &'static str)>,
    pub with_body: bool,
}

pub const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL, OPTIONS";

impl ResponseKind {
    pub fn template(&self) -> Template {
        match self {
            ResponseKind::Trying => Template::empty(rsip::StatusCode::Trying),
            ResponseKind::Ringing => Template::empty(rsip::StatusCode::Ringing),
            ResponseKind::OkWithSdp => Template {
                status_code: rsip::StatusCode::OK,
                headers: Vec::new(),
                with_body: true,
            },
            ResponseKind::Options => Template {
                status_code: rsip::StatusCode::OK,
                headers: vec![("Allow", ALLOWED_METHODS), ("Accept", "application/sdp")],
                with_body: false,
            },
            ResponseKind::Terminate => Template::empty(rsip::StatusCode::RequestTerminated),
            ResponseKind::OkNoSdp | ResponseKind::Default => Template::empty(rsip::StatusCode::OK),
        }
    }
}

impl Template {
    fn empty(status_code: rsip::StatusCode) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            with_body: false,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseKind::Trying => "TRYING",
            ResponseKind::Ringing => "RINGING",
            ResponseKind::OkWithSdp => "OK +SDP",
            ResponseKind::OkNoSdp => "OK -SDP",
            ResponseKind::Options => "OPTIONS",
            ResponseKind::Terminate => "TERMINATE",
            ResponseKind::Default => "DEFAULT",
        };
        f.write_str(name)
    }
}
