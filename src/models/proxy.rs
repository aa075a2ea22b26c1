use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    #[default]
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured proxy endpoint, before any health state is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// Parse `scheme://host:port` or bare `host:port` (SOCKS5 assumed)
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (protocol, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => {
                let protocol = ProxyProtocol::from_str(scheme)
                    .ok_or_else(|| PoolError::UnsupportedProtocol(scheme.to_string()))?;
                (protocol, rest)
            }
            None => (ProxyProtocol::Socks5, raw),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            PoolError::InvalidProxyAddress(format!("missing port in '{}'", raw))
        })?;
        if host.is_empty() {
            return Err(PoolError::InvalidProxyAddress(format!(
                "missing host in '{}'",
                raw
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| PoolError::InvalidProxyAddress(format!("invalid port in '{}'", raw)))?;

        Ok(Self::new(host, port, protocol))
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Proxy settings in the shape HTTP clients expect (`{http, https}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub http: String,
    pub https: String,
}

/// One forward proxy and its live health state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Last observed probe latency in seconds
    pub response_time: f64,
    pub error_count: u32,
    pub success_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            is_healthy: true,
            last_check: None,
            response_time: 0.0,
            error_count: 0,
            success_count: 0,
            last_used: None,
        }
    }

    /// `host:port`, the record's identity within the pool and the store
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let url = self.proxy_url();
        ProxyConfig {
            http: url.clone(),
            https: url,
        }
    }

    /// Encode as the string-keyed hash kept by the external store
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(9);
        fields.insert("host".to_string(), self.host.clone());
        fields.insert("port".to_string(), self.port.to_string());
        fields.insert("protocol".to_string(), self.protocol.as_str().to_string());
        fields.insert("is_healthy".to_string(), self.is_healthy.to_string());
        fields.insert("last_check".to_string(), format_timestamp(self.last_check));
        fields.insert("response_time".to_string(), self.response_time.to_string());
        fields.insert("error_count".to_string(), self.error_count.to_string());
        fields.insert("success_count".to_string(), self.success_count.to_string());
        fields.insert("last_used".to_string(), format_timestamp(self.last_used));
        fields
    }

    /// Decode the string-keyed hash. Optional fields may be absent or empty.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let host = fields
            .get("host")
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PoolError::malformed("<unknown>", "missing host"))?
            .to_string();

        let raw_port = fields.get("port").map(String::as_str).unwrap_or("");
        let port = raw_port
            .trim()
            .parse::<u16>()
            .map_err(|_| PoolError::malformed(&host, format!("invalid port '{}'", raw_port)))?;
        let key = format!("{}:{}", host, port);

        let protocol = match non_empty(fields, "protocol") {
            Some(raw) => ProxyProtocol::from_str(raw)
                .ok_or_else(|| PoolError::malformed(&key, format!("unknown protocol '{}'", raw)))?,
            None => ProxyProtocol::default(),
        };

        let is_healthy = non_empty(fields, "is_healthy")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(Self {
            host,
            port,
            protocol,
            is_healthy,
            last_check: parse_timestamp(&key, "last_check", non_empty(fields, "last_check"))?,
            response_time: parse_number(&key, "response_time", non_empty(fields, "response_time"))?,
            error_count: parse_number(&key, "error_count", non_empty(fields, "error_count"))?,
            success_count: parse_number(&key, "success_count", non_empty(fields, "success_count"))?,
            last_used: parse_timestamp(&key, "last_used", non_empty(fields, "last_used"))?,
        })
    }

    pub fn detail(&self) -> ProxyDetail {
        ProxyDetail {
            key: self.key(),
            is_healthy: self.is_healthy,
            response_time: self.response_time,
            error_count: self.error_count,
            success_count: self.success_count,
            last_check: self.last_check.map(|t| t.to_rfc3339()),
            last_used: self.last_used.map(|t| t.to_rfc3339()),
        }
    }
}

impl From<&ProxyEndpoint> for ProxyRecord {
    fn from(endpoint: &ProxyEndpoint) -> Self {
        ProxyRecord::new(endpoint.host.clone(), endpoint.port, endpoint.protocol)
    }
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_number<T>(key: &str, field: &str, raw: Option<&str>) -> Result<T>
where
    T: std::str::FromStr + Default,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| PoolError::malformed(key, format!("invalid {} '{}'", field, raw))),
        None => Ok(T::default()),
    }
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn parse_timestamp(key: &str, field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    // Older writers stored naive local ISO-8601 without an offset.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| PoolError::malformed(key, format!("invalid {} '{}'", field, raw)))
}

/// Per-proxy entry of the pool status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDetail {
    pub key: String,
    pub is_healthy: bool,
    pub response_time: f64,
    pub error_count: u32,
    pub success_count: u64,
    pub last_check: Option<String>,
    pub last_used: Option<String>,
}

/// Aggregate pool health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_proxies: usize,
    pub healthy_proxies: usize,
    pub unhealthy_proxies: usize,
    pub health_rate: f64,
    pub proxies: Vec<ProxyDetail>,
}

impl PoolStatus {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ProxyRecord>) -> Self {
        let proxies: Vec<ProxyDetail> = records.into_iter().map(ProxyRecord::detail).collect();
        let total = proxies.len();
        let healthy = proxies.iter().filter(|p| p.is_healthy).count();

        PoolStatus {
            total_proxies: total,
            healthy_proxies: healthy,
            unhealthy_proxies: total - healthy,
            health_rate: if total > 0 {
                healthy as f64 / total as f64
            } else {
                0.0
            },
            proxies,
        }
    }

    /// Zeroed status reported when no pool is available
    pub fn empty() -> Self {
        Self::from_records(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_record() -> ProxyRecord {
        ProxyRecord::new("localhost", 40001, ProxyProtocol::Socks5)
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_proxy_protocol_parsing_and_helpers() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(ProxyProtocol::from_str("socks5h"), Some(ProxyProtocol::Socks5));
        assert_eq!(ProxyProtocol::from_str("unknown"), None);

        assert!(ProxyProtocol::Socks5.is_socks());
        assert!(!ProxyProtocol::Https.is_socks());
        assert!(ProxyProtocol::Https.is_http());
        assert!(!ProxyProtocol::Socks4.is_http());

        assert_eq!(ProxyProtocol::Socks4.to_string(), "socks4");
        assert_eq!(ProxyProtocol::default(), ProxyProtocol::Socks5);
    }

    #[test]
    fn test_endpoint_parse() {
        let ep = ProxyEndpoint::parse("socks5://localhost:40001").unwrap();
        assert_eq!(ep, ProxyEndpoint::new("localhost", 40001, ProxyProtocol::Socks5));
        assert_eq!(ep.key(), "localhost:40001");

        let ep = ProxyEndpoint::parse(" http://10.0.0.2:3128/ ").unwrap();
        assert_eq!(ep.protocol, ProxyProtocol::Http);
        assert_eq!(ep.port, 3128);

        let ep = ProxyEndpoint::parse("127.0.0.1:1080").unwrap();
        assert_eq!(ep.protocol, ProxyProtocol::Socks5);

        assert!(matches!(
            ProxyEndpoint::parse("ftp://host:21"),
            Err(PoolError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            ProxyEndpoint::parse("localhost"),
            Err(PoolError::InvalidProxyAddress(_))
        ));
        assert!(matches!(
            ProxyEndpoint::parse("localhost:99999"),
            Err(PoolError::InvalidProxyAddress(_))
        ));
    }

    #[test]
    fn test_proxy_url_and_config() {
        let record = base_record();
        assert_eq!(record.key(), "localhost:40001");
        assert_eq!(record.proxy_url(), "socks5://localhost:40001");

        let config = record.proxy_config();
        assert_eq!(config.http, "socks5://localhost:40001");
        assert_eq!(config.https, "socks5://localhost:40001");

        let record = ProxyRecord::new("1.2.3.4", 8080, ProxyProtocol::Http);
        assert_eq!(record.proxy_url(), "http://1.2.3.4:8080");
    }

    #[test]
    fn test_new_record_is_healthy_and_zeroed() {
        let record = base_record();
        assert!(record.is_healthy);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.success_count, 0);
        assert_eq!(record.response_time, 0.0);
        assert!(record.last_check.is_none());
        assert!(record.last_used.is_none());
    }

    #[test]
    fn test_to_fields_encodes_everything_as_strings() {
        let mut record = base_record();
        record.is_healthy = false;
        record.error_count = 3;
        record.success_count = 12;
        record.response_time = 0.25;
        record.last_check = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());

        let f = record.to_fields();
        assert_eq!(f["host"], "localhost");
        assert_eq!(f["port"], "40001");
        assert_eq!(f["protocol"], "socks5");
        assert_eq!(f["is_healthy"], "false");
        assert_eq!(f["error_count"], "3");
        assert_eq!(f["success_count"], "12");
        assert_eq!(f["response_time"], "0.25");
        assert_eq!(f["last_check"], "2024-05-01T12:30:00+00:00");
        assert_eq!(f["last_used"], "");
    }

    #[test]
    fn test_fields_round_trip_preserves_health_state() {
        let mut record = base_record();
        record.is_healthy = false;
        record.error_count = 4;
        record.success_count = 99;
        record.response_time = 1.875;
        record.last_check = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        record.last_used = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 5, 0).unwrap());

        let decoded = ProxyRecord::from_fields(&record.to_fields()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_from_fields_tolerates_missing_optional_fields() {
        let record =
            ProxyRecord::from_fields(&fields(&[("host", "localhost"), ("port", "40002")])).unwrap();

        assert_eq!(record.key(), "localhost:40002");
        assert_eq!(record.protocol, ProxyProtocol::Socks5);
        assert!(record.is_healthy);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.success_count, 0);
        assert!(record.last_check.is_none());

        let record = ProxyRecord::from_fields(&fields(&[
            ("host", "localhost"),
            ("port", "40002"),
            ("last_check", ""),
            ("error_count", ""),
            ("is_healthy", "TRUE"),
        ]))
        .unwrap();
        assert!(record.is_healthy);
        assert!(record.last_check.is_none());
    }

    #[test]
    fn test_from_fields_accepts_naive_timestamps() {
        let record = ProxyRecord::from_fields(&fields(&[
            ("host", "localhost"),
            ("port", "40003"),
            ("last_check", "2024-03-04T05:06:07.123456"),
        ]))
        .unwrap();

        let ts = record.last_check.unwrap();
        assert_eq!(ts.timestamp(), Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap().timestamp());
    }

    #[test]
    fn test_from_fields_rejects_malformed_port() {
        for port in ["abc", "", "70000", "-1"] {
            let result = ProxyRecord::from_fields(&fields(&[("host", "localhost"), ("port", port)]));
            assert!(
                matches!(result, Err(PoolError::MalformedRecord { .. })),
                "port {:?} should be rejected",
                port
            );
        }

        let result = ProxyRecord::from_fields(&fields(&[("host", "localhost")]));
        assert!(matches!(result, Err(PoolError::MalformedRecord { .. })));
    }

    #[test]
    fn test_from_fields_rejects_malformed_values() {
        let bad = [
            ("error_count", "many"),
            ("success_count", "-3"),
            ("response_time", "fast"),
            ("last_used", "yesterday"),
            ("protocol", "gopher"),
        ];

        for (field, value) in bad {
            let result = ProxyRecord::from_fields(&fields(&[
                ("host", "localhost"),
                ("port", "40001"),
                (field, value),
            ]));
            assert!(
                matches!(result, Err(PoolError::MalformedRecord { .. })),
                "{}={} should be rejected",
                field,
                value
            );
        }
    }

    #[test]
    fn test_pool_status_rates() {
        let empty = PoolStatus::empty();
        assert_eq!(empty.total_proxies, 0);
        assert_eq!(empty.health_rate, 0.0);
        assert!(empty.proxies.is_empty());

        let mut sick = ProxyRecord::new("localhost", 40002, ProxyProtocol::Socks5);
        sick.is_healthy = false;
        let records = vec![base_record(), sick];

        let status = PoolStatus::from_records(&records);
        assert_eq!(status.total_proxies, 2);
        assert_eq!(status.healthy_proxies, 1);
        assert_eq!(status.unhealthy_proxies, 1);
        assert!((status.health_rate - 0.5).abs() < 1e-9);
        assert_eq!(status.proxies[1].key, "localhost:40002");
        assert!(status.proxies[1].last_check.is_none());
    }
}
