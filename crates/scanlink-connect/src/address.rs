//! Scanner service addresses
//!
//! Services are addressed as `scan+tcp://host:port?service=name`. The plain
//! `tcp://` scheme is accepted as well. The port defaults to
//! [`DEFAULT_PORT`] and the service name to [`DEFAULT_SERVICE`].

use crate::error::ConnectError;
use scanlink_proto::{DEFAULT_PORT, DEFAULT_SERVICE};
use std::fmt;
use std::str::FromStr;
use url::Url;

const SCHEMES: &[&str] = &["scan+tcp", "tcp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    host: String,
    port: u16,
    service: String,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            service: service.into(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: &str| ConnectError::InvalidAddress {
            address: uri.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;

        if !SCHEMES.contains(&url.scheme()) {
            return Err(invalid(&format!(
                "unsupported scheme '{}' (expected scan+tcp)",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();

        let port = url.port().unwrap_or(DEFAULT_PORT);

        let service = url
            .query_pairs()
            .find(|(k, _)| k == "service")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        if service.is_empty() {
            return Err(invalid("empty service name"));
        }

        Ok(Self {
            host,
            port,
            service,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// `host:port`, suitable for `TcpStream::connect`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ServiceAddress {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scan+tcp://{}:{}?service={}",
            self.host, self.port, self.service
        )
    }
}
