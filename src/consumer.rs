//! Consumers: the render/export side of a Snapshot. The trait mirrors the
//! Correlator's external contract (`on_snapshot`, `on_stop`); the stop
//! signal itself travels over the plain `mpsc::Sender<()>` handed out by
//! `correlator::publisher::channel`, so implementors don't need to expose
//! it as a trait method.
//!
//! `StreamingConsumer` and `MetricsConsumer` are the two reference
//! implementations this crate ships; the interactive top/nettop TUI, the
//! CSV writer, and the where/orderby/groupby SQL-like engine render from
//! the same `Snapshot`/`TopRow`/`NetTopRow` data but are not implemented
//! here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::Result;
use crate::metrics::DnsMetrics;
use crate::model::{Field, Snapshot, Transaction};

pub trait Consumer: Send {
    fn on_snapshot(&mut self, snapshot: Snapshot);
    fn on_stop(&mut self) {}
}

/// Per-event printer: a compact fixed-width line per completed transaction,
/// or (when `detailed` is set) a dig-style block.
pub struct StreamingConsumer {
    fields: Vec<Field>,
    detailed: bool,
}

impl StreamingConsumer {
    pub fn new(fields: Vec<Field>, detailed: bool) -> Self {
        StreamingConsumer { fields, detailed }
    }

    fn render(&self, txn: &Transaction) -> String {
        if self.detailed {
            render_detailed(txn)
        } else {
            render_compact(&self.fields, txn)
        }
    }
}

impl Consumer for StreamingConsumer {
    fn on_snapshot(&mut self, snapshot: Snapshot) {
        for txn in &snapshot.transactions {
            println!("{}", self.render(txn));
        }
    }
}

fn render_compact(fields: &[Field], txn: &Transaction) -> String {
    fields
        .iter()
        .map(|field| pad(&field_value(*field, txn), field.width()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn pad(value: &str, width: usize) -> String {
    if value.len() >= width {
        value[..width].to_string()
    } else {
        format!("{value:<width$}")
    }
}

fn field_value(field: Field, txn: &Transaction) -> String {
    let question = txn
        .query
        .as_ref()
        .or(txn.response.as_ref())
        .and_then(|m| m.first_question());
    match field {
        Field::Pid => txn
            .proc
            .as_ref()
            .map(|p| p.pid.to_string())
            .unwrap_or_else(|| "-1".to_string()),
        Field::PName => txn
            .proc
            .as_ref()
            .map(|p| p.pname.clone())
            .unwrap_or_else(|| "UNK".to_string()),
        Field::Lat => txn
            .latency_us()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "UNK".to_string()),
        Field::Type => question
            .map(|q| q.qtype.label().to_string())
            .unwrap_or_else(|| "UNK".to_string()),
        Field::QName => question.map(|q| q.qname.clone()).unwrap_or_default(),
        Field::RCode => txn
            .response
            .as_ref()
            .map(|r| r.rcode.label().to_string())
            .unwrap_or_else(|| "UNK".to_string()),
        Field::Rip => txn
            .response
            .as_ref()
            .and_then(|r| r.first_answer_ip())
            .unwrap_or_default(),
        Field::QTime => txn.q_ts.to_string(),
        Field::RTime => txn.r_ts.to_string(),
        Field::Tid => txn
            .proc
            .as_ref()
            .map(|p| p.tid.to_string())
            .unwrap_or_else(|| "-1".to_string()),
        Field::CmdLine => txn
            .proc
            .as_ref()
            .map(|p| p.cmdline.clone())
            .unwrap_or_default(),
        Field::QAddr => txn.query_addr.map(|a| a.to_string()).unwrap_or_default(),
        Field::RAddr => txn.response_addr.map(|a| a.to_string()).unwrap_or_default(),
    }
}

fn render_detailed(txn: &Transaction) -> String {
    let pname = txn
        .proc
        .as_ref()
        .map(|p| p.pname.as_str())
        .unwrap_or("UNK");
    let pid = txn.proc.as_ref().map(|p| p.pid as i64).unwrap_or(-1);
    let latency = txn
        .latency_us()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "UNK".to_string());

    let mut out = format!(
        "; {pname}[{pid}] latency={latency}us\n;; ->>HEADER<<- opcode: QUERY, status: {}, id: {}\n",
        txn.response
            .as_ref()
            .map(|r| r.rcode.label())
            .unwrap_or("UNK"),
        txn.response.as_ref().or(txn.query.as_ref()).map(|m| m.id).unwrap_or(0),
    );

    if let Some(response) = &txn.response {
        out.push_str(&format!(
            ";; flags: {}{}{}{}{}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}\n",
            if response.qr { "qr " } else { "" },
            if response.aa { "aa " } else { "" },
            if response.tc { "tc " } else { "" },
            if response.rd { "rd " } else { "" },
            if response.ra { "ra " } else { "" },
            response.questions.len(),
            response.answers.len(),
            response.authorities.len(),
            response.additional.len(),
        ));
        out.push_str(";; QUESTION SECTION:\n");
        for q in &response.questions {
            out.push_str(&format!(";{}\tIN\t{}\n", q.qname, q.qtype.label()));
        }
        out.push_str(";; ANSWER SECTION:\n");
        for rr in &response.answers {
            out.push_str(&format!(
                "{}\t{}\tIN\t{}\t{:?}\n",
                rr.name,
                rr.ttl,
                rr.rtype.label(),
                rr.rdata
            ));
        }
    }
    out
}

/// Feeds Prometheus counter deltas from each aggregating-mode Snapshot and
/// serves them over `/metrics`.
pub struct MetricsConsumer {
    metrics: Arc<DnsMetrics>,
}

impl MetricsConsumer {
    pub fn new(metrics: Arc<DnsMetrics>) -> Self {
        MetricsConsumer { metrics }
    }

    pub async fn serve(metrics: Arc<DnsMetrics>, bind_addr: SocketAddr) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(export_metrics))
            .with_state(metrics)
            .layer(CorsLayer::permissive());

        info!(%bind_addr, "prometheus exporter listening");
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

impl Consumer for MetricsConsumer {
    fn on_snapshot(&mut self, snapshot: Snapshot) {
        self.metrics.add_delta(
            "all",
            snapshot.a,
            snapshot.aaaa,
            snapshot.ptr,
            snapshot.servfail,
            snapshot.nxdomain,
            snapshot.noerror,
        );
        for row in &snapshot.top_rows {
            self.metrics.add_delta(
                &row.comm,
                row.counts.a,
                row.counts.aaaa,
                row.counts.ptr,
                row.counts.servfail,
                row.counts.nxdomain,
                row.counts.noerror,
            );
        }
    }
}

async fn export_metrics(State(metrics): State<Arc<DnsMetrics>>) -> Response {
    match metrics.export() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .unwrap()
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to export metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DnsMessage, ProcInfo, QType, Question, RCode};

    fn completed_txn() -> Transaction {
        Transaction {
            q_ts: 1_000_000,
            r_ts: 2_500_000,
            query: Some(DnsMessage {
                id: 0x1234,
                qr: false,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: false,
                z: 0,
                rcode: RCode::NoError,
                questions: vec![Question {
                    qname: "github.com".to_string(),
                    qtype: QType::A,
                }],
                answers: vec![],
                authorities: vec![],
                additional: vec![],
            }),
            response: Some(DnsMessage {
                id: 0x1234,
                qr: true,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: true,
                z: 0,
                rcode: RCode::NoError,
                questions: vec![Question {
                    qname: "github.com".to_string(),
                    qtype: QType::A,
                }],
                answers: vec![crate::model::ResourceRecord {
                    name: "github.com".to_string(),
                    rtype: QType::A,
                    ttl: 60,
                    rdata: crate::model::RData::A("140.82.121.3".parse().unwrap()),
                }],
                authorities: vec![],
                additional: vec![],
            }),
            query_addr: Some("198.51.100.10".parse().unwrap()),
            response_addr: Some("192.0.2.1".parse().unwrap()),
            proc: Some(ProcInfo {
                pid: 4242,
                tid: 4242,
                pname: "curl".to_string(),
                cmdline: "curl example.com".to_string(),
            }),
        }
    }

    #[test]
    fn compact_line_matches_scenario_2_field_order() {
        let fields = vec![
            Field::Pid,
            Field::PName,
            Field::Type,
            Field::QName,
            Field::Rip,
            Field::RCode,
        ];
        let line = render_compact(&fields, &completed_txn());
        let values: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(values, vec!["4242", "curl", "A", "github.com", "140.82.121.3", "NOERROR"]);
    }

    #[test]
    fn metrics_consumer_feeds_all_and_per_process_labels() {
        let metrics = Arc::new(DnsMetrics::new().unwrap());
        let mut consumer = MetricsConsumer::new(metrics.clone());
        let mut snapshot = Snapshot::default();
        snapshot.a = 10;
        snapshot.top_rows = vec![
            crate::model::TopRow {
                pid: 1,
                comm: "curl".to_string(),
                counts: crate::model::RowCounts {
                    total: 6,
                    a: 6,
                    ..Default::default()
                },
            },
            crate::model::TopRow {
                pid: 2,
                comm: "dig".to_string(),
                counts: crate::model::RowCounts {
                    total: 4,
                    a: 4,
                    ..Default::default()
                },
            },
        ];
        consumer.on_snapshot(snapshot);
        let text = metrics.export().unwrap();
        assert!(text.contains("a_queries{process=\"all\"} 10"));
        assert!(text.contains("a_queries{process=\"curl\"} 6"));
        assert!(text.contains("a_queries{process=\"dig\"} 4"));
    }
}
