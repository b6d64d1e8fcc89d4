//! Command-line surface, merged into a `config::WatchConfig`.

use std::time::Duration;

use clap::Parser;

use crate::config::{WatchConfig, DEFAULT_FIELDS};
use crate::error::{Result, WatchError};
use crate::model::Mode;

/// Host-local DNS capture and correlation.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Network interface to capture on. Captures on all interfaces if unset.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// DNS port to match in the capture filter.
    #[arg(long, default_value_t = 53)]
    pub port: u16,

    /// Packet ring buffer size, in megabytes.
    #[arg(long, default_value_t = 10)]
    pub ring_size_mb: usize,

    /// Snapshot/tick period in seconds.
    #[arg(long, default_value_t = 3)]
    pub clean_period_secs: u64,

    /// Comma-separated streaming column list.
    #[arg(long)]
    pub fields: Option<String>,

    /// trace/debug/info/warning/error.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Per-event dig-style detail blocks instead of compact lines.
    #[arg(long)]
    pub detailed: bool,

    /// Per-process aggregate view.
    #[arg(long)]
    pub toplike: bool,

    /// Per-peer-address aggregate view.
    #[arg(long)]
    pub nettop: bool,

    /// One-shot SQL-like row dump.
    #[arg(long)]
    pub sqllike: bool,

    /// Prometheus exporter.
    #[arg(long)]
    pub exporter: bool,

    /// Prometheus exporter bind address, required with --exporter.
    #[arg(long)]
    pub exporter_listen: Option<String>,

    /// SQL-like mode: output path.
    #[arg(long)]
    pub csv: Option<String>,

    /// SQL-like mode: row filter expression.
    #[arg(long)]
    pub r#where: Option<String>,

    /// SQL-like mode: sort column.
    #[arg(long)]
    pub orderby: Option<String>,

    /// SQL-like mode: grouping column.
    #[arg(long)]
    pub groupby: Option<String>,

    /// Streaming mode: drop still-incomplete transactions on tick instead of
    /// flushing them once with UNK fields.
    #[arg(long)]
    pub no_flush_incomplete: bool,

    /// Nettop mode: bucket rows by the response peer address instead of the
    /// query peer address.
    #[arg(long)]
    pub nettop_by_response_addr: bool,
}

impl CliArgs {
    pub fn into_config(self) -> Result<WatchConfig> {
        let mode = self.resolve_mode()?;

        let fields_raw = self.fields.unwrap_or_else(|| DEFAULT_FIELDS.join(","));
        let fields = WatchConfig::parse_fields(&fields_raw)?;

        let exporter_listen = self
            .exporter_listen
            .map(|addr| {
                addr.parse()
                    .map_err(|_| WatchError::InvalidConfig(format!("bad exporter_listen: {addr}")))
            })
            .transpose()?;

        let config = WatchConfig {
            interface: self.interface,
            port: self.port,
            ring_size_mb: self.ring_size_mb,
            clean_period: Duration::from_secs(self.clean_period_secs),
            fields,
            log_level: self.log_level,
            mode,
            exporter_listen,
            csv: self.csv,
            where_clause: self.r#where,
            order_by: self.orderby,
            group_by: self.groupby,
            detailed: self.detailed,
            flush_incomplete: !self.no_flush_incomplete,
            nettop_by_query_addr: !self.nettop_by_response_addr,
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_mode(&self) -> Result<Mode> {
        let selected = [
            self.detailed,
            self.toplike,
            self.nettop,
            self.sqllike,
            self.exporter,
        ]
        .iter()
        .filter(|&&on| on)
        .count();
        if selected > 1 {
            return Err(WatchError::UnknownMode(
                "at most one of detailed/toplike/nettop/sqllike/exporter may be set".to_string(),
            ));
        }
        Ok(if self.toplike {
            Mode::Top
        } else if self.nettop {
            Mode::NetTop
        } else if self.sqllike {
            Mode::SqlLike
        } else if self.exporter {
            Mode::Prometheus
        } else {
            // `--detailed` and the no-flags default both stream per-event
            // output; the difference is purely in the printer's format and
            // is resolved by `consumer::StreamingConsumer`, not by `Mode`.
            Mode::Streaming
        })
    }
}
