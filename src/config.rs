//! Connector configuration
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::enums::Version;
use crate::error::Error;


/// URL scheme of a connector, only `Http` can actually be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl FromStr for Scheme {
    type Err = Error;
    fn from_str(s: &str) -> Result<Scheme, Error> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            _ => Err(Error::UnsupportedScheme),
        }
    }
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Server side configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub(crate) host: IpAddr,
    pub(crate) port: u16,
    pub(crate) scheme: Scheme,
    pub(crate) version: Version,
    pub(crate) socket_idle_timeout: Option<Duration>,
}

/// Client side configuration
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub(crate) scheme: Scheme,
    pub(crate) version: Version,
    pub(crate) socket_idle_timeout: Option<Duration>,
    pub(crate) force_http2: bool,
}

/// Configuration of the `ConnectorFactory`
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub(crate) handler_threads: usize,
}

fn idle_timeout(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, Error> {
    value.trim().parse()
        .map_err(|_| Error::InvalidOption(name.to_string(), value.to_string()))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match &value.trim().to_ascii_lowercase()[..] {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::InvalidOption(name.to_string(), value.to_string())),
    }
}

impl ListenerConfig {
    /// Create a config with defaults
    pub fn new() -> ListenerConfig {
        ListenerConfig {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 0,
            scheme: Scheme::Http,
            version: Version::Http11,
            socket_idle_timeout: idle_timeout(60_000),
        }
    }
    /// Address to listen on
    pub fn host(&mut self, value: IpAddr) -> &mut Self {
        self.host = value;
        self
    }
    /// Port to listen on, zero picks an ephemeral one
    pub fn port(&mut self, value: u16) -> &mut Self {
        self.port = value;
        self
    }
    pub fn scheme(&mut self, value: Scheme) -> &mut Self {
        self.scheme = value;
        self
    }
    /// With `Http2` the listener also accepts prior knowledge connections
    /// and `Upgrade: h2c`
    pub fn http_version(&mut self, value: Version) -> &mut Self {
        self.version = value;
        self
    }
    /// Connection is closed after being idle for this long
    ///
    /// Zero disables the timeout.
    pub fn socket_idle_timeout(&mut self, value: Duration) -> &mut Self {
        self.socket_idle_timeout = if value == Duration::new(0, 0) {
            None
        } else {
            Some(value)
        };
        self
    }
    /// Sets an option by its textual name
    ///
    /// Known names: `host`, `port`, `scheme`, `httpVersion`,
    /// `socketIdleTimeoutMillis`.
    pub fn set_option(&mut self, name: &str, value: &str)
        -> Result<&mut Self, Error>
    {
        match name {
            "host" => self.host = parse(name, value)?,
            "port" => self.port = parse(name, value)?,
            "scheme" => self.scheme = value.parse()?,
            "httpVersion" => self.version = value.parse()?,
            "socketIdleTimeoutMillis" => {
                self.socket_idle_timeout = idle_timeout(parse(name, value)?);
            }
            _ => return Err(Error::UnknownOption(name.to_string())),
        }
        Ok(self)
    }
    /// Address the listener is going to bind
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<ListenerConfig> {
        Arc::new(self.clone())
    }
}

impl SenderConfig {
    /// Create a config with defaults
    pub fn new() -> SenderConfig {
        SenderConfig {
            scheme: Scheme::Http,
            version: Version::Http11,
            socket_idle_timeout: idle_timeout(60_000),
            force_http2: false,
        }
    }
    pub fn scheme(&mut self, value: Scheme) -> &mut Self {
        self.scheme = value;
        self
    }
    /// With `Http2` the first request carries `Upgrade: h2c` unless
    /// `force_http2` is set
    pub fn http_version(&mut self, value: Version) -> &mut Self {
        self.version = value;
        self
    }
    /// Zero disables the timeout
    pub fn socket_idle_timeout(&mut self, value: Duration) -> &mut Self {
        self.socket_idle_timeout = if value == Duration::new(0, 0) {
            None
        } else {
            Some(value)
        };
        self
    }
    /// Speak HTTP/2 right away (prior knowledge)
    pub fn force_http2(&mut self, value: bool) -> &mut Self {
        self.force_http2 = value;
        self
    }
    /// Sets an option by its textual name
    ///
    /// Known names: `scheme`, `httpVersion`, `socketIdleTimeoutMillis`,
    /// `forceHttp2`.
    pub fn set_option(&mut self, name: &str, value: &str)
        -> Result<&mut Self, Error>
    {
        match name {
            "scheme" => self.scheme = value.parse()?,
            "httpVersion" => self.version = value.parse()?,
            "socketIdleTimeoutMillis" => {
                self.socket_idle_timeout = idle_timeout(parse(name, value)?);
            }
            "forceHttp2" => self.force_http2 = parse_bool(name, value)?,
            _ => return Err(Error::UnknownOption(name.to_string())),
        }
        Ok(self)
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<SenderConfig> {
        Arc::new(self.clone())
    }
}

impl FactoryConfig {
    /// Create a config with defaults
    pub fn new() -> FactoryConfig {
        FactoryConfig { handler_threads: 4 }
    }
    /// Number of threads handlers run on
    pub fn handler_threads(&mut self, value: usize) -> &mut Self {
        self.handler_threads = if value == 0 { 1 } else { value };
        self
    }
    pub fn done(&mut self) -> FactoryConfig {
        self.clone()
    }
}
