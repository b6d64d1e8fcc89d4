//! Pure Snapshot aggregation: walks the transaction map once and buckets
//! completed (and in-flight) transactions into rows, either by pid (top) or
//! by peer address (nettop). Kept free of `tokio` so it can be unit tested
//! directly against a hand-built transaction map.

use std::collections::HashMap;

use crate::model::{
    Mode, NetTopRow, ProcInfo, RowCounts, Snapshot, Transaction, TransactionKey,
};

pub fn build(tx: &HashMap<TransactionKey, Transaction>, mode: Mode, by_query_addr: bool) -> Snapshot {
    let mut snapshot = Snapshot::default();

    for txn in tx.values() {
        let rcode = txn.response.as_ref().map(|r| r.rcode);
        let qtype = txn
            .query
            .as_ref()
            .or(txn.response.as_ref())
            .and_then(|m| m.first_question())
            .map(|q| q.qtype);

        snapshot.total += 1;
        match rcode {
            Some(crate::model::RCode::NxDomain) => snapshot.nxdomain += 1,
            Some(crate::model::RCode::NoError) => snapshot.noerror += 1,
            Some(crate::model::RCode::ServFail) => snapshot.servfail += 1,
            _ => {}
        }
        match qtype {
            Some(crate::model::QType::A) => snapshot.a += 1,
            Some(crate::model::QType::AAAA) => snapshot.aaaa += 1,
            Some(crate::model::QType::PTR) => snapshot.ptr += 1,
            _ => {}
        }
    }

    match mode {
        Mode::NetTop => snapshot.nettop_rows = bucket_by_peer(tx, by_query_addr),
        _ => snapshot.top_rows = bucket_by_pid(tx),
    }

    snapshot
}

fn bucket_by_pid(
    tx: &HashMap<TransactionKey, Transaction>,
) -> Vec<crate::model::TopRow> {
    let mut rows: HashMap<i64, (String, RowCounts)> = HashMap::new();
    for txn in tx.values() {
        let (pid, comm) = match &txn.proc {
            Some(ProcInfo { pid, pname, .. }) => (*pid as i64, pname.clone()),
            None => (ProcInfo::UNKNOWN_PID, "UNK".to_string()),
        };
        let rcode = txn.response.as_ref().map(|r| r.rcode);
        let qtype = txn
            .query
            .as_ref()
            .or(txn.response.as_ref())
            .and_then(|m| m.first_question())
            .map(|q| q.qtype);
        let entry = rows.entry(pid).or_insert_with(|| (comm, RowCounts::default()));
        entry.1.record(rcode, qtype);
    }
    let mut out: Vec<_> = rows
        .into_iter()
        .map(|(pid, (comm, counts))| crate::model::TopRow { pid, comm, counts })
        .collect();
    out.sort_by(|a, b| b.counts.total.cmp(&a.counts.total));
    out
}

/// Buckets by the query peer address when `by_query_addr` is set (the
/// interactive toggle's default), falling back to the response peer
/// address otherwise or when the preferred side is missing.
fn bucket_by_peer(tx: &HashMap<TransactionKey, Transaction>, by_query_addr: bool) -> Vec<NetTopRow> {
    let mut rows: HashMap<String, RowCounts> = HashMap::new();
    for txn in tx.values() {
        let peer = if by_query_addr {
            txn.query_addr.or(txn.response_addr)
        } else {
            txn.response_addr.or(txn.query_addr)
        }
        .map(|a| a.to_string())
        .unwrap_or_else(|| "UNK".to_string());
        let rcode = txn.response.as_ref().map(|r| r.rcode);
        let qtype = txn
            .query
            .as_ref()
            .or(txn.response.as_ref())
            .and_then(|m| m.first_question())
            .map(|q| q.qtype);
        rows.entry(peer).or_default().record(rcode, qtype);
    }
    let mut out: Vec<_> = rows
        .into_iter()
        .map(|(peer_addr, counts)| NetTopRow { peer_addr, counts })
        .collect();
    out.sort_by(|a, b| b.counts.total.cmp(&a.counts.total));
    out
}

/// `row_total / global_total * 100`, `0.0` when the global total is zero.
pub fn percent(row_total: u64, global_total: u64) -> f64 {
    if global_total == 0 {
        0.0
    } else {
        (row_total as f64 / global_total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DnsMessage, QType, Question, RCode};
    use std::net::IpAddr;

    fn msg(qr: bool, rcode: RCode, qtype: QType) -> DnsMessage {
        DnsMessage {
            id: 1,
            qr,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode,
            questions: vec![Question {
                qname: "github.com".to_string(),
                qtype,
            }],
            answers: vec![],
            authorities: vec![],
            additional: vec![],
        }
    }

    fn completed_txn(pid: u32, pname: &str, peer: &str) -> Transaction {
        Transaction {
            q_ts: 1,
            r_ts: 2,
            query: Some(msg(false, RCode::NoError, QType::A)),
            response: Some(msg(true, RCode::NoError, QType::A)),
            query_addr: Some(peer.parse::<IpAddr>().unwrap()),
            response_addr: Some("192.0.2.1".parse().unwrap()),
            proc: Some(ProcInfo {
                pid,
                tid: pid,
                pname: pname.to_string(),
                cmdline: String::new(),
            }),
        }
    }

    #[test]
    fn unknown_pid_buckets_as_unk() {
        let mut tx = HashMap::new();
        for id in 1..=5u16 {
            tx.insert(
                TransactionKey {
                    local_port: 40001,
                    dns_id: id,
                },
                Transaction {
                    q_ts: 1,
                    r_ts: 0,
                    query: Some(msg(false, RCode::NoError, QType::A)),
                    response: None,
                    query_addr: Some("198.51.100.10".parse().unwrap()),
                    response_addr: None,
                    proc: None,
                },
            );
        }
        let snap = build(&tx, Mode::Top, true);
        assert_eq!(snap.top_rows.len(), 1);
        assert_eq!(snap.top_rows[0].pid, ProcInfo::UNKNOWN_PID);
        assert_eq!(snap.top_rows[0].comm, "UNK");
        assert_eq!(snap.top_rows[0].counts.total, 5);
        assert_eq!(snap.top_rows[0].counts.a, 5);
    }

    #[test]
    fn nettop_sorts_descending_by_total() {
        let mut tx = HashMap::new();
        let counts = [("198.51.100.1", 7), ("198.51.100.2", 2), ("198.51.100.3", 11)];
        let mut dns_id = 1u16;
        for (peer, n) in counts {
            for _ in 0..n {
                tx.insert(
                    TransactionKey {
                        local_port: 40000,
                        dns_id,
                    },
                    completed_txn(1, "curl", peer),
                );
                dns_id += 1;
            }
        }
        let snap = build(&tx, Mode::NetTop, true);
        assert_eq!(snap.nettop_rows[0].counts.total, 11);
    }

    #[test]
    fn nettop_by_query_addr_toggle_selects_which_peer_is_bucketed() {
        let mut tx = HashMap::new();
        tx.insert(
            TransactionKey {
                local_port: 40000,
                dns_id: 1,
            },
            Transaction {
                q_ts: 1,
                r_ts: 2,
                query: Some(msg(false, RCode::NoError, QType::A)),
                response: Some(msg(true, RCode::NoError, QType::A)),
                query_addr: Some("198.51.100.10".parse().unwrap()),
                response_addr: Some("192.0.2.1".parse().unwrap()),
                proc: None,
            },
        );

        let by_query = build(&tx, Mode::NetTop, true);
        assert_eq!(by_query.nettop_rows[0].peer_addr, "198.51.100.10");

        let by_response = build(&tx, Mode::NetTop, false);
        assert_eq!(by_response.nettop_rows[0].peer_addr, "192.0.2.1");
    }

    #[test]
    fn percent_against_zero_total_is_zero() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(5, 10), 50.0);
    }
}
