//! Graphite plaintext protocol over TCP.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info};

use super::{MetricSink, midnight};
use crate::error::TransportError;
use crate::metrics::MetricValue;

pub const DEFAULT_PORT: u16 = 2003;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix used when none is given: `buildbench.<host>.<compiler>`, with
/// dots in the host and compiler version replaced by `_`.
pub fn default_prefix(hostname: &str, compiler_version: &str) -> String {
    format!(
        "buildbench.{}.{}",
        hostname.replace('.', "_"),
        compiler_version.replace('.', "_")
    )
}

/// Splits `host[:port]`.
pub fn parse_address(address: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidAddress(address.to_string());
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_PORT)),
        None => Err(invalid()),
    }
}

/// One line of the plaintext protocol.
pub fn format_line(prefix: &str, name: &str, value: MetricValue, timestamp: NaiveDate) -> String {
    format!(
        "{}.{} {:.6} {}\n",
        prefix,
        name,
        value.as_f64(),
        midnight(timestamp).and_utc().timestamp()
    )
}

/// A connected Graphite carbon receiver.
#[derive(Debug)]
pub struct GraphiteSink {
    stream: TcpStream,
    prefix: String,
}

impl GraphiteSink {
    /// Connects to `host[:port]`, trying each resolved address in turn.
    pub fn connect(address: &str, prefix: impl Into<String>) -> Result<Self, TransportError> {
        let (host, port) = parse_address(address)?;
        let addrs = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let mut last_error = String::from("no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    info!("Connected to graphite at {}", addr);
                    return Ok(Self {
                        stream,
                        prefix: prefix.into(),
                    });
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = e.to_string();
                }
            }
        }
        Err(TransportError::Connect {
            address: address.to_string(),
            reason: last_error,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl MetricSink for GraphiteSink {
    fn send(
        &mut self,
        name: &str,
        value: MetricValue,
        timestamp: NaiveDate,
    ) -> Result<(), TransportError> {
        let line = format_line(&self.prefix, name, value, timestamp);
        debug!("Sending {}", line.trim_end());
        self.stream.write_all(line.as_bytes())?;
        Ok(())
    }
}
