//! End-to-end pipeline tests: decoded wire bytes, through the Correlator,
//! into a published Snapshot. Exercises the same path `main::run` wires
//! together, without needing a real packet socket or probe loader.

use std::collections::HashMap;
use std::net::IpAddr;

use dnswatch::correlator::snapshot;
use dnswatch::correlator::Correlator;
use dnswatch::decode::decode_frame;
use dnswatch::model::{Mode, ProcessEvent, Transaction, TransactionKey};

fn dns_query_bytes(id: u16, qname: &str) -> Vec<u8> {
    let mut b = vec![0u8; 12];
    b[0] = (id >> 8) as u8;
    b[1] = (id & 0xff) as u8;
    b[5] = 1;
    for label in qname.split('.') {
        b.push(label.len() as u8);
        b.extend_from_slice(label.as_bytes());
    }
    b.push(0);
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes());
    b
}

fn dns_response_bytes(id: u16, qname: &str, rcode: u8, ip: [u8; 4]) -> Vec<u8> {
    let mut b = vec![0u8; 12];
    b[0] = (id >> 8) as u8;
    b[1] = (id & 0xff) as u8;
    b[2] = 0x81;
    b[3] = 0x80 | (rcode & 0x0f);
    b[5] = 1;
    b[7] = 1;
    for label in qname.split('.') {
        b.push(label.len() as u8);
        b.extend_from_slice(label.as_bytes());
    }
    b.push(0);
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes());

    b.extend_from_slice(&[0xc0, 0x0c]);
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&60u32.to_be_bytes());
    b.extend_from_slice(&4u16.to_be_bytes());
    b.extend_from_slice(&ip);
    b
}

fn udp_ipv4_eth_frame(payload: &[u8], src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Vec<u8> {
    let mut udp = Vec::new();
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    let udp_len = (8 + payload.len()) as u16;
    udp.extend_from_slice(&udp_len.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    let total_len = (20 + udp.len()) as u16;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    ip.extend_from_slice(&udp);

    let mut eth = vec![0u8; 12];
    eth.extend_from_slice(&0x0800u16.to_be_bytes());
    eth.extend_from_slice(&ip);
    eth
}

/// A client (198.51.100.10:40000) queries a resolver (192.0.2.1:53) for
/// github.com/A, gets back a NOERROR answer, and the query's local port was
/// already attributed to `curl` by the probe before either packet arrived.
/// In streaming mode the Correlator must emit exactly one completed
/// Transaction, on the response packet, carrying that attribution.
#[test]
fn streaming_query_then_response_emits_once_with_attribution() {
    let mut correlator = Correlator::new(Mode::Streaming, true, true);
    correlator.handle_process(ProcessEvent {
        tgid: 4242,
        tid: 4242,
        comm: "curl".to_string(),
        cmdline: "curl https://github.com".to_string(),
        local_port: 40000,
    });

    let query_frame = udp_ipv4_eth_frame(
        &dns_query_bytes(0xbeef, "github.com"),
        [198, 51, 100, 10],
        40000,
        [192, 0, 2, 1],
        53,
    );
    let query_event = decode_frame(&query_frame, 1_000_000).expect("decode query");
    assert!(correlator.handle_packet(query_event).is_none());

    let response_frame = udp_ipv4_eth_frame(
        &dns_response_bytes(0xbeef, "github.com", 0, [140, 82, 121, 3]),
        [192, 0, 2, 1],
        53,
        [198, 51, 100, 10],
        40000,
    );
    let response_event = decode_frame(&response_frame, 1_250_000).expect("decode response");
    let completed = correlator
        .handle_packet(response_event)
        .expect("query+response+proc should complete the transaction");

    assert_eq!(completed.proc.unwrap().pname, "curl");
    assert_eq!(completed.latency_us(), Some(250));
    assert_eq!(
        completed.response.unwrap().first_answer_ip().unwrap(),
        "140.82.121.3"
    );
}

/// Three distinct resolvers answer queries from the same process at
/// different volumes; nettop aggregation must rank them by total query
/// count, descending, independent of arrival order.
#[test]
fn decoded_packets_aggregate_into_nettop_ranking() {
    let mut tx: HashMap<TransactionKey, Transaction> = HashMap::new();
    let peers = [([203, 0, 113, 1], 3u16), ([203, 0, 113, 2], 9u16), ([203, 0, 113, 3], 1u16)];

    let mut id = 1u16;
    for (peer, count) in peers {
        for _ in 0..count {
            let query_frame = udp_ipv4_eth_frame(
                &dns_query_bytes(id, "example.com"),
                [10, 0, 0, 1],
                50000,
                peer,
                53,
            );
            let query_event = decode_frame(&query_frame, id as u64).unwrap();
            let key = TransactionKey {
                local_port: query_event.local_port(),
                dns_id: query_event.dns.id,
            };
            let entry = tx.entry(key).or_default();
            entry.q_ts = query_event.timestamp_ns;
            entry.query_addr = Some(query_event.src_addr);
            entry.response_addr = Some(query_event.dst_addr);
            entry.query = Some(query_event.dns);
            id += 1;
        }
    }

    let snapshot = snapshot::build(&tx, Mode::NetTop, true);
    assert_eq!(snapshot.total, 13);
    assert_eq!(snapshot.nettop_rows[0].peer_addr, IpAddr::from([203, 0, 113, 2]).to_string());
    assert_eq!(snapshot.nettop_rows[0].counts.total, 9);
    assert_eq!(snapshot.nettop_rows.last().unwrap().counts.total, 1);
}

/// NXDOMAIN and SERVFAIL responses must be tallied separately from NOERROR
/// in the global Snapshot totals, matching the rcode breakdown a `prometheus`
/// exporter or `toplike` view depends on.
#[test]
fn rcode_breakdown_is_tallied_across_modes() {
    let mut tx: HashMap<TransactionKey, Transaction> = HashMap::new();
    let scenarios = [(1u16, 0u8), (2u16, 3u8), (3u16, 2u8)]; // noerror, nxdomain, servfail

    for (id, rcode) in scenarios {
        let frame = udp_ipv4_eth_frame(
            &dns_response_bytes(id, "nonexistent.example", rcode, [0, 0, 0, 0]),
            [192, 0, 2, 1],
            53,
            [198, 51, 100, 10],
            40000,
        );
        let event = decode_frame(&frame, id as u64).unwrap();
        let key = TransactionKey {
            local_port: event.local_port(),
            dns_id: event.dns.id,
        };
        let entry = tx.entry(key).or_default();
        entry.r_ts = event.timestamp_ns;
        entry.response_addr = Some(event.src_addr);
        entry.query_addr = Some(event.dst_addr);
        entry.response = Some(event.dns);
    }

    let snapshot = snapshot::build(&tx, Mode::Top, true);
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.noerror, 1);
    assert_eq!(snapshot.nxdomain, 1);
    assert_eq!(snapshot.servfail, 1);
}
