//! Compiles the one textual BPF rule this crate supports
//! (`src port 53 or dst port 53`) into classical-BPF instructions suitable
//! for `SO_ATTACH_FILTER`. A general tcpdump-expression grammar is out of
//! scope: the compiler only special-cases this one rule and rejects
//! anything else as a setup error.

use crate::constants::DNS_FILTER_RULE;
use crate::error::{Result, WatchError};

/// Mirrors `struct sock_filter` from `linux/filter.h`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        SockFilter { code, jt, jf, k }
    }
}

// BPF opcodes used below, named the way <linux/bpf_common.h> does.
const BPF_LD_H_ABS: u16 = 0x28;
const BPF_JMP_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

/// IPv4 header is a fixed 14 (Ethernet) + 9 (protocol byte offset within
/// IPv4) bytes in; the UDP/TCP source and destination port fields sit right
/// after a (assumed) 20-byte IPv4 header with no options, which is the
/// common case this filter targets — the real decoder in `decode/` handles
/// variable-length headers and VLAN tags; the kernel-side filter is a cheap
/// pre-filter only, real validation happens after decode.
const SRC_PORT_OFFSET: u32 = 14 + 20;
const DST_PORT_OFFSET: u32 = 14 + 20 + 2;

pub fn compile(rule: &str) -> Result<Vec<SockFilter>> {
    if rule != DNS_FILTER_RULE {
        return Err(WatchError::InvalidFilterRule(rule.to_string()));
    }

    // if (src_port == 53) return -1 (accept, snap whole packet);
    // if (dst_port == 53) return -1;
    // return 0 (drop);
    Ok(vec![
        SockFilter::new(BPF_LD_H_ABS, 0, 0, SRC_PORT_OFFSET),
        SockFilter::new(BPF_JMP_JEQ_K, 2, 0, 53),
        SockFilter::new(BPF_LD_H_ABS, 0, 0, DST_PORT_OFFSET),
        SockFilter::new(BPF_JMP_JEQ_K, 0, 1, 53),
        SockFilter::new(BPF_RET_K, 0, 0, 0xffff),
        SockFilter::new(BPF_RET_K, 0, 0, 0),
    ])
}
