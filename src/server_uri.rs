//! Upstream server addresses as they appear in config files, DNS SRV
//! answers, and the forwarding engine's candidate lists.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Any,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Kerberos,
    Kpasswd,
}

impl Service {
    pub fn default_port(self) -> u16 {
        match self {
            Service::Kerberos => 88,
            Service::Kpasswd => 464,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Kerberos => "kerberos",
            Service::Kpasswd => "kpasswd",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not a valid server URI: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("unrecognized scheme {0:?}")]
    UnknownScheme(String),
    #[error("server URI is missing a host")]
    MissingHost,
}

/// A parsed `kerberos://`, `kerberos+tcp://`, `kerberos+udp://`,
/// `kpasswd://`, `kpasswd+tcp://` or `kpasswd+udp://` reference to an
/// upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerUri {
    repr: String,
    host_end: usize,
    port: u16,
    service_is_kpasswd: bool,
    transport: TransportTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TransportTag {
    Any,
    Tcp,
    Udp,
}

impl ServerUri {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let url = Url::parse(s)?;

        let (service_is_kpasswd, transport) = match url.scheme() {
            "kerberos" => (false, TransportTag::Any),
            "kerberos+tcp" => (false, TransportTag::Tcp),
            "kerberos+udp" => (false, TransportTag::Udp),
            "kpasswd" => (true, TransportTag::Any),
            "kpasswd+tcp" => (true, TransportTag::Tcp),
            "kpasswd+udp" => (true, TransportTag::Udp),
            other => return Err(Error::UnknownScheme(other.to_owned())),
        };

        let host = url.host_str().ok_or(Error::MissingHost)?.to_owned();
        let service = if service_is_kpasswd { Service::Kpasswd } else { Service::Kerberos };
        let port = url.port().unwrap_or_else(|| service.default_port());

        let host_end = host.len();
        Ok(ServerUri {
            repr: host,
            host_end,
            port,
            service_is_kpasswd,
            transport,
        })
    }

    pub fn new(service: Service, transport: Transport, host: &str, port: u16) -> Self {
        let transport = match transport {
            Transport::Any => TransportTag::Any,
            Transport::Tcp => TransportTag::Tcp,
            Transport::Udp => TransportTag::Udp,
        };
        ServerUri {
            host_end: host.len(),
            repr: host.to_owned(),
            port,
            service_is_kpasswd: matches!(service, Service::Kpasswd),
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.repr[..self.host_end]
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service(&self) -> Service {
        if self.service_is_kpasswd {
            Service::Kpasswd
        } else {
            Service::Kerberos
        }
    }

    pub fn transport(&self) -> Transport {
        match self.transport {
            TransportTag::Any => Transport::Any,
            TransportTag::Tcp => Transport::Tcp,
            TransportTag::Udp => Transport::Udp,
        }
    }

    pub fn allows_tcp(&self) -> bool {
        !matches!(self.transport, TransportTag::Udp)
    }

    pub fn allows_udp(&self) -> bool {
        !matches!(self.transport, TransportTag::Tcp)
    }
}

impl FromStr for ServerUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerUri::parse(s)
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match (self.service_is_kpasswd, self.transport) {
            (false, TransportTag::Any) => "kerberos",
            (false, TransportTag::Tcp) => "kerberos+tcp",
            (false, TransportTag::Udp) => "kerberos+udp",
            (true, TransportTag::Any) => "kpasswd",
            (true, TransportTag::Tcp) => "kpasswd+tcp",
            (true, TransportTag::Udp) => "kpasswd+udp",
        };
        write!(f, "{scheme}://{}:{}", self.host(), self.port)
    }
}
