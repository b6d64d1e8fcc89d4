use std::time::Duration;

pub const DNS_PORT: u16 = 53;
pub const DEFAULT_RING_SIZE_MB: usize = 10;
pub const DEFAULT_CLEAN_PERIOD: Duration = Duration::from_secs(3);
pub const MAX_PACKET_LEN: usize = 65535;
pub const DEFAULT_BLOCKS_PER_ALLOCATION: usize = 64;

/// Depth of the bounded packet/probe channels feeding the correlator.
pub const EVENT_CHANNEL_DEPTH: usize = 1000;

/// Fixed-layout probe record shape the external probe loader emits.
pub const PROBE_COMM_LEN: usize = 16;
pub const PROBE_CMDLINE_SLOTS: usize = 4;
pub const PROBE_CMDLINE_SLOT_LEN: usize = 30;
pub const PROBE_CMDLINE_LEN: usize = PROBE_CMDLINE_SLOTS * PROBE_CMDLINE_SLOT_LEN;

/// Textual BPF rule this crate knows how to compile. Only this exact rule is
/// supported; anything else is a setup error.
pub const DNS_FILTER_RULE: &str = "src port 53 or dst port 53";
