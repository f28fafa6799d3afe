use std::fmt;

pub mod codec;
pub mod response;
pub mod template;

pub use codec::{Codec, RsipCodec};
pub use response::ResponseRenderer;
pub use template::{ResponseKind, Template};

pub const CALL_ID: &str = "Call-ID";
pub const CONTACT: &str = "Contact";

/// Parsed SIP request
///
/// `Datagram` is the header/body mapping the worker operates on. Headers keep
/// their wire order; lookups are case-insensitive on the header name. It is
/// `Eq + Hash` so that it can be used as part of a response cache key: two
/// datagrams with the same method, headers (in the same order) and body render
/// to the same bytes.
///
/// # Examples
///
/// ```rust
/// use sipd::sip::Datagram;
///
/// let mut datagram = Datagram::default();
/// datagram.set_header("Call-ID", "a84b4c76e66710");
/// datagram.set_header("call-id", "replaced");
/// assert_eq!(datagram.call_id(), Some("replaced"));
/// assert_eq!(datagram.headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Datagram {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Datagram {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first header named `name` in place, or append it.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header(CALL_ID).filter(|v| !v.is_empty())
    }

    pub fn method(&self) -> Option<SipMethod> {
        self.method.as_deref().map(SipMethod::from)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Request methods the worker distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Ack,
    Bye,
    Cancel,
    Invite,
    Options,
    Other(String),
}

impl From<&str> for SipMethod {
    fn from(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "INVITE" => SipMethod::Invite,
            "OPTIONS" => SipMethod::Options,
            _ => SipMethod::Other(method.to_string()),
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMethod::Ack => write!(f, "ACK"),
            SipMethod::Bye => write!(f, "BYE"),
            SipMethod::Cancel => write!(f, "CANCEL"),
            SipMethod::Invite => write!(f, "INVITE"),
            SipMethod::Options => write!(f, "OPTIONS"),
            SipMethod::Other(m) => write!(f, "{}", m),
        }
    }
}
