//! Runtime configuration, built by validating and converting `cli::CliArgs`.
//! Kept separate from the CLI struct so construction can be unit tested
//! without going through `clap`.

use std::time::Duration;

use crate::error::{Result, WatchError};
use crate::model::{Field, Mode};

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interface: Option<String>,
    pub port: u16,
    pub ring_size_mb: usize,
    pub clean_period: Duration,
    pub fields: Vec<Field>,
    pub log_level: String,
    pub mode: Mode,
    pub exporter_listen: Option<std::net::SocketAddr>,
    pub csv: Option<String>,
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    /// Streaming mode only: dig-style detail blocks instead of compact lines.
    pub detailed: bool,
    /// Streaming mode only: whether a tick flushes still-incomplete
    /// Transactions (rendered with `UNK` fields) before clearing the map, or
    /// drops them silently.
    pub flush_incomplete: bool,
    /// Nettop mode only: bucket rows by the query peer address rather than
    /// the response peer address.
    pub nettop_by_query_addr: bool,
}

pub const DEFAULT_FIELDS: &[&str] = &["PID", "PNAME", "LAT", "TYPE", "QNAME", "RCODE", "RIP"];

impl WatchConfig {
    /// Parses the comma-separated `fields` option, rejecting unknown column
    /// names as a setup error rather than silently dropping them.
    pub fn parse_fields(raw: &str) -> Result<Vec<Field>> {
        raw.split(',')
            .map(|name| {
                Field::parse(name).ok_or_else(|| WatchError::UnknownField(name.trim().to_string()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_size_mb == 0 {
            return Err(WatchError::InvalidConfig(
                "ring_size_mb must be greater than zero".to_string(),
            ));
        }
        if self.fields.is_empty() {
            return Err(WatchError::InvalidConfig(
                "fields list must not be empty".to_string(),
            ));
        }
        if self.mode == Mode::Prometheus && self.exporter_listen.is_none() {
            return Err(WatchError::InvalidConfig(
                "prometheus mode requires exporter_listen".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fields_rejects_unknown_columns() {
        assert!(WatchConfig::parse_fields("PID,BOGUS").is_err());
    }

    #[test]
    fn parse_fields_accepts_known_columns_case_insensitively() {
        let fields = WatchConfig::parse_fields("pid, pname ,rcode").unwrap();
        assert_eq!(fields, vec![Field::Pid, Field::PName, Field::RCode]);
    }

    fn base_config() -> WatchConfig {
        WatchConfig {
            interface: None,
            port: 53,
            ring_size_mb: 10,
            clean_period: Duration::from_secs(3),
            fields: vec![Field::Pid],
            log_level: "info".to_string(),
            mode: Mode::Streaming,
            exporter_listen: None,
            csv: None,
            where_clause: None,
            order_by: None,
            group_by: None,
            detailed: false,
            flush_incomplete: true,
            nettop_by_query_addr: true,
        }
    }

    #[test]
    fn validate_rejects_zero_ring_size() {
        let mut cfg = base_config();
        cfg.ring_size_mb = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_exporter_listen_in_prometheus_mode() {
        let mut cfg = base_config();
        cfg.mode = Mode::Prometheus;
        assert!(cfg.validate().is_err());
        cfg.exporter_listen = Some("0.0.0.0:9420".parse().unwrap());
        assert!(cfg.validate().is_ok());
    }
}
