use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::DecodeError;
use super::ethernet::{ETHERTYPE_IPV4, ETHERTYPE_IPV6};

pub struct IpHeader {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub payload_offset: usize,
}

const IPV4_MIN_LEN: usize = 20;
const IPV6_LEN: usize = 40;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub fn parse(buf: &[u8], offset: usize, ethertype: u16) -> Result<IpHeader, DecodeError> {
    match ethertype {
        ETHERTYPE_IPV4 => parse_v4(buf, offset),
        ETHERTYPE_IPV6 => parse_v6(buf, offset),
        other => Err(DecodeError::UnsupportedEtherType(other)),
    }
}

fn parse_v4(buf: &[u8], offset: usize) -> Result<IpHeader, DecodeError> {
    if buf.len() < offset + IPV4_MIN_LEN {
        return Err(DecodeError::Truncated);
    }
    let version = buf[offset] >> 4;
    if version != 4 {
        return Err(DecodeError::Truncated);
    }
    let ihl = (buf[offset] & 0x0f) as usize * 4;
    if ihl < IPV4_MIN_LEN || buf.len() < offset + ihl {
        return Err(DecodeError::Truncated);
    }
    let protocol = buf[offset + 9];
    let src = Ipv4Addr::new(
        buf[offset + 12],
        buf[offset + 13],
        buf[offset + 14],
        buf[offset + 15],
    );
    let dst = Ipv4Addr::new(
        buf[offset + 16],
        buf[offset + 17],
        buf[offset + 18],
        buf[offset + 19],
    );
    Ok(IpHeader {
        src: IpAddr::V4(src),
        dst: IpAddr::V4(dst),
        protocol,
        payload_offset: offset + ihl,
    })
}

fn parse_v6(buf: &[u8], offset: usize) -> Result<IpHeader, DecodeError> {
    if buf.len() < offset + IPV6_LEN {
        return Err(DecodeError::Truncated);
    }
    let next_header = buf[offset + 6];
    let mut src_bytes = [0u8; 16];
    src_bytes.copy_from_slice(&buf[offset + 8..offset + 24]);
    let mut dst_bytes = [0u8; 16];
    dst_bytes.copy_from_slice(&buf[offset + 24..offset + 40]);
    Ok(IpHeader {
        src: IpAddr::V6(Ipv6Addr::from(src_bytes)),
        dst: IpAddr::V6(Ipv6Addr::from(dst_bytes)),
        protocol: next_header,
        payload_offset: offset + IPV6_LEN,
    })
}
