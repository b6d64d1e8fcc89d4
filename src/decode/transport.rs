use super::DecodeError;
use super::ip::{PROTO_TCP, PROTO_UDP};

pub struct TransportHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_offset: usize,
}

const UDP_HEADER_LEN: usize = 8;
const TCP_MIN_HEADER_LEN: usize = 20;

pub fn parse(buf: &[u8], offset: usize, protocol: u8) -> Result<TransportHeader, DecodeError> {
    match protocol {
        PROTO_UDP => parse_udp(buf, offset),
        PROTO_TCP => parse_tcp(buf, offset),
        other => Err(DecodeError::UnsupportedProtocol(other)),
    }
}

fn parse_udp(buf: &[u8], offset: usize) -> Result<TransportHeader, DecodeError> {
    if buf.len() < offset + UDP_HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    Ok(TransportHeader {
        src_port: u16::from_be_bytes([buf[offset], buf[offset + 1]]),
        dst_port: u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]),
        payload_offset: offset + UDP_HEADER_LEN,
    })
}

fn parse_tcp(buf: &[u8], offset: usize) -> Result<TransportHeader, DecodeError> {
    if buf.len() < offset + TCP_MIN_HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let data_offset = ((buf[offset + 12] >> 4) as usize) * 4;
    if data_offset < TCP_MIN_HEADER_LEN || buf.len() < offset + data_offset {
        return Err(DecodeError::Truncated);
    }
    // DNS-over-TCP messages are prefixed by a 2-byte big-endian length (RFC
    // 1035 4.2.2); the decoder only ever reads the message that follows it,
    // never the length itself.
    let payload_offset = offset + data_offset + 2;
    if buf.len() < payload_offset {
        return Err(DecodeError::Truncated);
    }
    Ok(TransportHeader {
        src_port: u16::from_be_bytes([buf[offset], buf[offset + 1]]),
        dst_port: u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]),
        payload_offset,
    })
}
