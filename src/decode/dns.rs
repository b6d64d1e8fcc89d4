//! DNS message parsing: manual wire-format decode of the header and all
//! four sections, including label-compression pointer following. Simplified
//! to a single free function per section since this decoder only ever reads
//! captured wire frames (no serialization side needed).

use crate::model::{DnsMessage, QType, Question, RCode, RData, ResourceRecord};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("dns header truncated")]
    InvalidHeader,
    #[error("invalid or truncated label")]
    InvalidLabel,
    #[error("truncated question section")]
    InvalidQuestionSection,
    #[error("truncated resource record")]
    InvalidResourceRecord,
    #[error("compression pointer loop or out-of-bounds jump")]
    BadPointer,
}

const HEADER_LEN: usize = 12;
const MAX_LABEL_JUMPS: usize = 64;

pub fn parse(buf: &[u8]) -> Result<DnsMessage, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::InvalidHeader);
    }

    let id = u16::from_be_bytes([buf[0], buf[1]]);
    let flags0 = buf[2];
    let flags1 = buf[3];
    let qr = (flags0 & 0x80) != 0;
    let opcode = (flags0 >> 3) & 0x0f;
    let aa = (flags0 & 0x04) != 0;
    let tc = (flags0 & 0x02) != 0;
    let rd = (flags0 & 0x01) != 0;
    let ra = (flags1 & 0x80) != 0;
    let z = (flags1 >> 4) & 0x07;
    let rcode = RCode::from_u8(flags1 & 0x0f);

    let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
    let ancount = u16::from_be_bytes([buf[6], buf[7]]);
    let nscount = u16::from_be_bytes([buf[8], buf[9]]);
    let arcount = u16::from_be_bytes([buf[10], buf[11]]);

    let mut offset = HEADER_LEN;
    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        let (q, next) = parse_question(buf, offset)?;
        questions.push(q);
        offset = next;
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let (rr, next) = parse_record(buf, offset)?;
        answers.push(rr);
        offset = next;
    }

    let mut authorities = Vec::with_capacity(nscount as usize);
    for _ in 0..nscount {
        let (rr, next) = parse_record(buf, offset)?;
        authorities.push(rr);
        offset = next;
    }

    let mut additional = Vec::with_capacity(arcount as usize);
    for _ in 0..arcount {
        let (rr, next) = parse_record(buf, offset)?;
        additional.push(rr);
        offset = next;
    }

    Ok(DnsMessage {
        id,
        qr,
        opcode,
        aa,
        tc,
        rd,
        ra,
        z,
        rcode,
        questions,
        answers,
        authorities,
        additional,
    })
}

fn parse_question(buf: &[u8], offset: usize) -> Result<(Question, usize), ParseError> {
    let (qname, mut next) = parse_name(buf, offset)?;
    if buf.len() < next + 4 {
        return Err(ParseError::InvalidQuestionSection);
    }
    let qtype = QType::from_u16(u16::from_be_bytes([buf[next], buf[next + 1]]));
    next += 4; // qtype + qclass
    Ok((Question { qname, qtype }, next))
}

fn parse_record(buf: &[u8], offset: usize) -> Result<(ResourceRecord, usize), ParseError> {
    let (name, mut next) = parse_name(buf, offset)?;
    if buf.len() < next + 10 {
        return Err(ParseError::InvalidResourceRecord);
    }
    let rtype = QType::from_u16(u16::from_be_bytes([buf[next], buf[next + 1]]));
    let ttl = u32::from_be_bytes([buf[next + 4], buf[next + 5], buf[next + 6], buf[next + 7]]);
    let rdlength = u16::from_be_bytes([buf[next + 8], buf[next + 9]]) as usize;
    next += 10;
    if buf.len() < next + rdlength {
        return Err(ParseError::InvalidResourceRecord);
    }
    let rdata_bytes = &buf[next..next + rdlength];
    let rdata = parse_rdata(buf, rtype, rdata_bytes, next)?;
    next += rdlength;
    Ok((
        ResourceRecord {
            name,
            rtype,
            ttl,
            rdata,
        },
        next,
    ))
}

fn parse_rdata(
    buf: &[u8],
    rtype: QType,
    rdata_bytes: &[u8],
    rdata_offset: usize,
) -> Result<RData, ParseError> {
    Ok(match rtype {
        QType::A if rdata_bytes.len() == 4 => RData::A(std::net::Ipv4Addr::new(
            rdata_bytes[0],
            rdata_bytes[1],
            rdata_bytes[2],
            rdata_bytes[3],
        )),
        QType::AAAA if rdata_bytes.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata_bytes);
            RData::Aaaa(std::net::Ipv6Addr::from(octets))
        }
        QType::PTR => {
            let (name, _) = parse_name(buf, rdata_offset)?;
            RData::Name(name)
        }
        _ => RData::Bytes(rdata_bytes.to_vec()),
    })
}

/// Parses a (possibly compressed) domain name starting at `offset`,
/// returning the dotted name and the offset immediately after the name as
/// it appears in the message (i.e. after a pointer if one was followed,
/// the "next" offset is right after the 2-byte pointer, not inside the
/// jump target).
fn parse_name(buf: &[u8], offset: usize) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end_offset: Option<usize> = None;
    let mut jumps = 0;

    loop {
        if pos >= buf.len() {
            return Err(ParseError::InvalidLabel);
        }
        let len = buf[pos];

        if len == 0 {
            if end_offset.is_none() {
                end_offset = Some(pos + 1);
            }
            break;
        }

        if (len & 0xc0) == 0xc0 {
            if pos + 1 >= buf.len() {
                return Err(ParseError::BadPointer);
            }
            if end_offset.is_none() {
                end_offset = Some(pos + 2);
            }
            let pointer = (((len & 0x3f) as usize) << 8) | buf[pos + 1] as usize;
            jumps += 1;
            if jumps > MAX_LABEL_JUMPS || pointer >= pos {
                return Err(ParseError::BadPointer);
            }
            pos = pointer;
            continue;
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }
        let len = len as usize;
        if pos + 1 + len > buf.len() {
            return Err(ParseError::InvalidLabel);
        }
        let label = String::from_utf8_lossy(&buf[pos + 1..pos + 1 + len]).into_owned();
        labels.push(label);
        pos += 1 + len;
    }

    Ok((labels.join("."), end_offset.expect("loop always sets this before breaking")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: u16, qr: bool, qd: u16, an: u16) -> Vec<u8> {
        let mut b = vec![0u8; 12];
        b[0..2].copy_from_slice(&id.to_be_bytes());
        b[2] = if qr { 0x80 } else { 0x00 };
        b[3] = 0x00;
        b[4..6].copy_from_slice(&qd.to_be_bytes());
        b[6..8].copy_from_slice(&an.to_be_bytes());
        b
    }

    fn name_bytes(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    #[test]
    fn parses_simple_query() {
        let mut buf = header(0x1234, false, 1, 0);
        buf.extend(name_bytes("github.com"));
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());

        let msg = parse(&buf).unwrap();
        assert_eq!(msg.id, 0x1234);
        assert!(!msg.qr);
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].qname, "github.com");
        assert_eq!(msg.questions[0].qtype, QType::A);
    }

    #[test]
    fn follows_compression_pointer() {
        let mut buf = header(0x1234, true, 1, 1);
        let name_offset = buf.len() as u8;
        buf.extend(name_bytes("github.com"));
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());

        // Answer: name is a pointer back to the question's name.
        buf.extend_from_slice(&[0xc0, name_offset]);
        buf.extend_from_slice(&1u16.to_be_bytes()); // type A
        buf.extend_from_slice(&1u16.to_be_bytes()); // class IN
        buf.extend_from_slice(&60u32.to_be_bytes()); // ttl
        buf.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        buf.extend_from_slice(&[140, 82, 121, 3]);

        let msg = parse(&buf).unwrap();
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name, "github.com");
        assert_eq!(msg.answers[0].rdata, RData::A("140.82.121.3".parse().unwrap()));
    }

    #[test]
    fn rejects_forward_pointer_loop() {
        let mut buf = header(1, false, 1, 0);
        let pointer_offset = buf.len();
        buf.extend_from_slice(&[0xc0, pointer_offset as u8]);
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        assert!(matches!(parse(&buf), Err(ParseError::BadPointer)));
    }
}
