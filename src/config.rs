use crate::gc::{DEFAULT_CALL_LIFETIME, DEFAULT_CHECK_INTERVAL, DEFAULT_HISTORY_SIZE};
use crate::rtp::router::DEFAULT_RTP_TIMEOUT;
use crate::sip::response::DEFAULT_RESPONSE_CACHE_SIZE;
use crate::transport::MIN_UNPRIVILEGED_PORT;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SIP_PORT: u16 = 5060;
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Daemon settings, usually loaded from `sipd.json`.
///
/// Every section and field is optional; missing values take the defaults
/// below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sip: SipSettings,
    pub rtp: RtpSettings,
    pub gc: GcSettings,
    pub cache: CacheSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SipSettings {
    pub server: ServerSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address advertised in `Contact`. Detected from the routing table when
    /// empty.
    pub address: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_SIP_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub count: usize,
    /// Static headers merged into every response.
    pub headers: BTreeMap<String, String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpSettings {
    /// RTP engine endpoint.
    pub address: SocketAddr,
    pub max_retry: u32,
    pub timeout_ms: u64,
}

impl Default for RtpSettings {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DEFAULT_SIP_PORT + 1),
            max_retry: 1,
            timeout_ms: DEFAULT_RTP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl RtpSettings {
    /// Attempts per INVITE, never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retry.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcSettings {
    /// Seconds.
    pub call_lifetime: u64,
    /// Seconds.
    pub check_interval: u64,
    pub history_size: usize,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            call_lifetime: DEFAULT_CALL_LIFETIME.as_secs(),
            check_interval: DEFAULT_CHECK_INTERVAL.as_secs(),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl GcSettings {
    pub fn call_lifetime(&self) -> Duration {
        if self.call_lifetime == 0 {
            DEFAULT_CALL_LIFETIME
        } else {
            Duration::from_secs(self.call_lifetime)
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub responses: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            responses: DEFAULT_RESPONSE_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sip.server.port < MIN_UNPRIVILEGED_PORT {
            return Err(Error::ConfigError(format!(
                "cannot use privileged port: {}",
                self.sip.server.port
            )));
        }
        if self.sip.worker.count == 0 {
            return Err(Error::ConfigError(
                "sip.worker.count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Address placed in `Contact`, detecting one when none is configured.
    pub fn server_address(&self) -> String {
        let configured = self.sip.server.address.trim();
        if configured.is_empty() {
            detect_server_address()
        } else {
            configured.to_string()
        }
    }

    pub fn contact(&self) -> String {
        format!("<sip:{}:{}>", self.server_address(), self.sip.server.port)
    }
}

/// Local address of the default route, falling back to loopback.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which source
/// address it would use.
pub fn detect_server_address() -> String {
    let detected = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 53))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified());
    match detected {
        Some(ip) => ip.to_string(),
        None => {
            warn!("failed to detect server address, using 127.0.0.1");
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}
