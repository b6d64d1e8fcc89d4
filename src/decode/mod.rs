//! Protocol Decoder: turns a raw captured frame into an owned `PacketEvent`.
//!
//! Walks Ethernet -> (VLAN)? -> {IPv4|IPv6} -> {UDP|TCP} -> DNS, at most 10
//! layers. A frame is only handed to the caller once every
//! byte reachable from its `DnsMessage` has been copied out of the frame
//! buffer: the ring buffer that produced `raw` may be reused the moment this
//! function returns, so no slice of `raw` is allowed to outlive this call.

mod dns;
mod ethernet;
mod ip;
mod transport;

pub use dns::ParseError;

use crate::model::PacketEvent;

const MAX_LAYERS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame too short")]
    Truncated,
    #[error("unsupported ethertype 0x{0:04x}")]
    UnsupportedEtherType(u16),
    #[error("unsupported ip protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("dns parse error: {0}")]
    Dns(#[from] ParseError),
    #[error("frame is not a dns packet (id == 0 or no dns layer)")]
    NotDns,
    #[error("too many nested layers")]
    TooManyLayers,
}

/// Decode one frame. `raw` is copied into an owned buffer before any
/// parsing happens, satisfying the ownership invariant even if a bug in a
/// sub-parser were to hand back a borrowed slice.
pub fn decode_frame(raw: &[u8], timestamp_ns: u64) -> Result<PacketEvent, DecodeError> {
    let owned: Vec<u8> = raw.to_vec();
    decode_owned(&owned, timestamp_ns)
}

fn decode_owned(buf: &[u8], timestamp_ns: u64) -> Result<PacketEvent, DecodeError> {
    let mut layers = 0usize;
    let mut offset = 0usize;

    layers += 1;
    let (mut ethertype, mut off) = ethernet::parse(buf, offset)?;
    offset = off;

    // Unwrap a single 802.1Q VLAN tag if present; not counted separately
    // against the layer budget beyond the one extra step it costs.
    if ethertype == ethernet::ETHERTYPE_VLAN {
        layers += 1;
        if layers > MAX_LAYERS {
            return Err(DecodeError::TooManyLayers);
        }
        let (inner_ethertype, inner_off) = ethernet::parse_vlan_tag(buf, offset)?;
        ethertype = inner_ethertype;
        off = inner_off;
        offset = off;
    }

    layers += 1;
    if layers > MAX_LAYERS {
        return Err(DecodeError::TooManyLayers);
    }
    let ip_header = ip::parse(buf, offset, ethertype)?;
    offset = ip_header.payload_offset;

    layers += 1;
    if layers > MAX_LAYERS {
        return Err(DecodeError::TooManyLayers);
    }
    let transport_header = transport::parse(buf, offset, ip_header.protocol)?;
    offset = transport_header.payload_offset;

    layers += 1;
    if layers > MAX_LAYERS {
        return Err(DecodeError::TooManyLayers);
    }
    let message = dns::parse(&buf[offset..])?;

    if message.id == 0 {
        return Err(DecodeError::NotDns);
    }

    Ok(PacketEvent {
        timestamp_ns,
        src_addr: ip_header.src,
        dst_addr: ip_header.dst,
        src_port: transport_header.src_port,
        dst_port: transport_header.dst_port,
        dns: message,
    })
}
