use std::net::IpAddr;

use serde::Serialize;

/// A decoded DNS resource record question, owning its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub qname: String,
    pub qtype: QType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QType {
    A,
    AAAA,
    PTR,
    Other(u16),
}

impl QType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => QType::A,
            28 => QType::AAAA,
            12 => QType::PTR,
            other => QType::Other(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QType::A => "A",
            QType::AAAA => "AAAA",
            QType::PTR => "PTR",
            QType::Other(_) => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RCode {
    NoError,
    NxDomain,
    ServFail,
    Other(u8),
}

impl RCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => RCode::NoError,
            2 => RCode::ServFail,
            3 => RCode::NxDomain,
            other => RCode::Other(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RCode::NoError => "NOERROR",
            RCode::NxDomain => "NXDOMAIN",
            RCode::ServFail => "SERVFAIL",
            RCode::Other(_) => "OTHER",
        }
    }
}

/// One answer/authority/additional record. Rdata is always a fully owned
/// copy (see decode::dns for the deep-copy discipline this supports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: QType,
    pub ttl: u32,
    pub rdata: RData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RData {
    A(std::net::Ipv4Addr),
    Aaaa(std::net::Ipv6Addr),
    Name(String),
    Bytes(Vec<u8>),
}

/// A fully decoded, fully owned DNS message. No field may reference the
/// ring buffer frame it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsMessage {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: RCode,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl DnsMessage {
    /// The query's first question, used for qtype/qname categorization
    /// (taken from the query to avoid double-counting echoed questions in
    /// responses).
    pub fn first_question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// First A/AAAA/PTR answer address rendered as a string, for the
    /// streaming printer's RIP column.
    pub fn first_answer_ip(&self) -> Option<String> {
        self.answers.iter().find_map(|rr| match &rr.rdata {
            RData::A(ip) => Some(ip.to_string()),
            RData::Aaaa(ip) => Some(ip.to_string()),
            _ => None,
        })
    }
}

/// One captured, decoded frame. Every byte reachable from `dns` is owned.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub timestamp_ns: u64,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub dns: DnsMessage,
}

impl PacketEvent {
    /// The non-53 side of the packet; src_port if both sides are 53.
    pub fn local_port(&self) -> u16 {
        if self.dst_port != crate::constants::DNS_PORT {
            self.dst_port
        } else {
            self.src_port
        }
    }
}

/// One probe record as received from the external kernel-probe loader,
/// already sanitized (see probe::sanitize_cmdline).
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    pub tgid: u32,
    pub tid: u32,
    pub comm: String,
    pub cmdline: String,
    pub local_port: u16,
}

/// Process attribution learned via the probe, keyed by local port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcInfo {
    pub pid: u32,
    pub tid: u32,
    pub pname: String,
    pub cmdline: String,
}

impl ProcInfo {
    pub const UNKNOWN_PID: i64 = -1;

    pub fn unknown() -> Self {
        ProcInfo {
            pid: 0,
            tid: 0,
            pname: "UNK".to_string(),
            cmdline: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub local_port: u16,
    pub dns_id: u16,
}

/// One in-flight or completed query/response join.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transaction {
    pub q_ts: u64,
    pub r_ts: u64,
    pub query: Option<DnsMessage>,
    pub response: Option<DnsMessage>,
    pub query_addr: Option<IpAddr>,
    pub response_addr: Option<IpAddr>,
    pub proc: Option<ProcInfo>,
}

impl Transaction {
    pub fn is_complete(&self) -> bool {
        self.query.is_some() && self.response.is_some() && self.proc.is_some()
    }

    /// `UNK` (reported as `None` here) when the response raced ahead of the
    /// query and produced a non-positive delta.
    pub fn latency_us(&self) -> Option<i64> {
        if self.q_ts == 0 || self.r_ts == 0 {
            return None;
        }
        let delta = self.r_ts as i64 - self.q_ts as i64;
        if delta <= 0 { None } else { Some(delta / 1000) }
    }
}

/// Which field a completed transaction emits over the streaming printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Pid,
    PName,
    Lat,
    Type,
    QName,
    RCode,
    Rip,
    QTime,
    RTime,
    Tid,
    CmdLine,
    QAddr,
    RAddr,
}

impl Field {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_uppercase().as_str() {
            "PID" => Field::Pid,
            "PNAME" => Field::PName,
            "LAT" => Field::Lat,
            "TYPE" => Field::Type,
            "QNAME" => Field::QName,
            "RCODE" => Field::RCode,
            "RIP" => Field::Rip,
            "QTIME" => Field::QTime,
            "RTIME" => Field::RTime,
            "TID" => Field::Tid,
            "CMDLINE" => Field::CmdLine,
            "QADDR" => Field::QAddr,
            "RADDR" => Field::RAddr,
            _ => return None,
        })
    }

    /// Fixed column width for the streaming printer.
    pub fn width(&self) -> usize {
        match self {
            Field::Pid => 7,
            Field::PName => 15,
            Field::Lat => 5,
            Field::Type => 5,
            Field::QName => 80,
            Field::RCode => 8,
            Field::Rip => 40,
            Field::QTime => 16,
            Field::RTime => 16,
            Field::Tid => 7,
            Field::CmdLine => 120,
            Field::QAddr => 40,
            Field::RAddr => 40,
        }
    }
}

/// Selects the Correlator's per-event emission policy. The streaming vs.
/// aggregating distinction is a per-event policy value, not a separate
/// correlator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Streaming,
    Top,
    NetTop,
    Prometheus,
    SqlLike,
}

impl Mode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Mode::Streaming)
    }

    /// Prometheus clears the transaction map on every tick (delta
    /// semantics); Top/NetTop/SqlLike keep it (cumulative semantics, with
    /// SqlLike stopping after its one tick).
    pub fn clears_on_tick(&self) -> bool {
        matches!(self, Mode::Prometheus | Mode::Streaming)
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Mode::SqlLike)
    }
}

/// Per-row rcode/qtype totals shared by both top and nettop aggregation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowCounts {
    pub total: u64,
    pub nxdomain: u64,
    pub noerror: u64,
    pub servfail: u64,
    pub a: u64,
    pub aaaa: u64,
    pub ptr: u64,
}

impl RowCounts {
    pub fn record(&mut self, rcode: Option<RCode>, qtype: Option<QType>) {
        self.total += 1;
        match rcode {
            Some(RCode::NxDomain) => self.nxdomain += 1,
            Some(RCode::NoError) => self.noerror += 1,
            Some(RCode::ServFail) => self.servfail += 1,
            _ => {}
        }
        match qtype {
            Some(QType::A) => self.a += 1,
            Some(QType::AAAA) => self.aaaa += 1,
            Some(QType::PTR) => self.ptr += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopRow {
    pub pid: i64,
    pub comm: String,
    pub counts: RowCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetTopRow {
    pub peer_addr: String,
    pub counts: RowCounts,
}

/// An immutable summary of the transaction map at tick time. In streaming
/// mode `transactions` carries the one or more Transactions emitted since
/// the last publish and every other field is left at its default; in
/// aggregating modes `transactions` is empty and the row/total fields are
/// populated instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub total: u64,
    pub a: u64,
    pub aaaa: u64,
    pub ptr: u64,
    pub nxdomain: u64,
    pub noerror: u64,
    pub servfail: u64,
    pub top_rows: Vec<TopRow>,
    pub nettop_rows: Vec<NetTopRow>,
    pub transactions: Vec<Transaction>,
}
