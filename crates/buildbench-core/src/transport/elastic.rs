//! Elasticsearch document sink.
//!
//! Every metric becomes one document, PUT at
//! `<address>/<basename>/<metric name>/<id>`. The id is a SHA-256 over host,
//! compiler, metric name and date, so re-running a date overwrites instead
//! of duplicating.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{MetricSink, midnight};
use crate::error::TransportError;
use crate::metrics::MetricValue;

pub const DEFAULT_BASENAME: &str = "buildbench_profile";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of one metric document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDocument {
    pub value: MetricValue,
    pub host: String,
    pub compiler: String,
    pub date: String,
}

/// Stable document id for one (host, compiler, metric, date).
pub fn document_id(host: &str, compiler: &str, name: &str, date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(compiler.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(date.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct ElasticsearchSink {
    client: Client,
    base_url: String,
    host: String,
    compiler: String,
}

impl ElasticsearchSink {
    /// Checks `address` with a GET and fails if it does not answer with
    /// success.
    pub fn connect(
        address: &str,
        basename: &str,
        host: impl Into<String>,
        compiler: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let address = address.trim_end_matches('/');
        if address.is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        client.get(address).send()?.error_for_status()?;
        info!("Connected to elasticsearch at {}", address);

        Ok(Self {
            client,
            base_url: format!("{}/{}", address, basename),
            host: host.into(),
            compiler: compiler.into(),
        })
    }

    fn url(&self, name: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, name, id)
    }
}

impl MetricSink for ElasticsearchSink {
    fn send(
        &mut self,
        name: &str,
        value: MetricValue,
        timestamp: NaiveDate,
    ) -> Result<(), TransportError> {
        let date = midnight(timestamp).format("%Y-%m-%dT%H:%M:%S").to_string();
        let id = document_id(&self.host, &self.compiler, name, &date);
        let document = MetricDocument {
            value,
            host: self.host.clone(),
            compiler: self.compiler.clone(),
            date,
        };

        let url = self.url(name, &id);
        debug!("PUT {}", url);
        let response = self.client.put(&url).json(&document).send()?;
        let rejected = response.error_for_status_ref().err();
        if let Some(e) = rejected {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            warn!("Elasticsearch rejected {} ({}): {}", name, status, body);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Answers `statuses.len()` requests, one per connection, and returns
    /// each request line with its body.
    fn serve(statuses: Vec<&'static str>) -> (String, JoinHandle<Vec<(String, String)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for status in statuses {
                let (mut conn, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(conn.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                    if let Some((key, value)) = header.split_once(':')
                        && key.eq_ignore_ascii_case("content-length")
                    {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0; content_length];
                reader.read_exact(&mut body).unwrap();

                write!(
                    conn,
                    "HTTP/1.1 {status}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
                )
                .unwrap();
                requests.push((
                    request_line.trim_end().to_string(),
                    String::from_utf8(body).unwrap(),
                ));
            }
            requests
        });
        (address, handle)
    }

    #[test]
    fn test_document_id_is_stable() {
        let a = document_id("h", "11.4.0", "make.foo.cpu_user", "2016-01-02T00:00:00");
        let b = document_id("h", "11.4.0", "make.foo.cpu_user", "2016-01-02T00:00:00");
        let c = document_id("h", "11.4.0", "make.foo.cpu_user", "2016-01-03T00:00:00");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(
            document_id("", "", "", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_put_document() {
        let (address, server) = serve(vec!["200 OK", "201 Created"]);
        let date = NaiveDate::from_ymd_opt(2016, 1, 2).unwrap();

        let mut sink = ElasticsearchSink::connect(&address, "bb", "node1", "11.4.0").unwrap();
        sink.send("cmake.memory_max", MetricValue::Int(4096), date)
            .unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests[0].0, "GET / HTTP/1.1");
        let id = document_id("node1", "11.4.0", "cmake.memory_max", "2016-01-02T00:00:00");
        assert_eq!(
            requests[1].0,
            format!("PUT /bb/cmake.memory_max/{id} HTTP/1.1")
        );
        let body: serde_json::Value = serde_json::from_str(&requests[1].1).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "value": 4096,
                "host": "node1",
                "compiler": "11.4.0",
                "date": "2016-01-02T00:00:00",
            })
        );
    }

    #[test]
    fn test_rejected_put_is_error() {
        let (address, server) = serve(vec!["200 OK", "400 Bad Request"]);
        let date = NaiveDate::from_ymd_opt(2016, 1, 2).unwrap();

        let mut sink = ElasticsearchSink::connect(&address, "bb", "node1", "11.4.0").unwrap();
        let err = sink
            .send("x", MetricValue::Float(1.0), date)
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
        server.join().unwrap();
    }

    #[test]
    fn test_failed_health_check_is_error() {
        let (address, server) = serve(vec!["503 Service Unavailable"]);

        let err = ElasticsearchSink::connect(&address, "bb", "node1", "11.4.0").unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
        server.join().unwrap();
    }
}
