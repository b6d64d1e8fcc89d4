//! Process-Port Source: consumes probe records produced by an externally
//! loaded eBPF program (loading/attaching it is out of scope here) and turns
//! them into sanitized `ProcessEvent`s.

#[cfg(feature = "aya-probe")]
mod aya_source;
#[cfg(feature = "aya-probe")]
pub use aya_source::AyaProbeSource;

use tokio::sync::{mpsc, oneshot};

use crate::constants::{PROBE_CMDLINE_LEN, PROBE_CMDLINE_SLOT_LEN, PROBE_COMM_LEN};
use crate::model::ProcessEvent;

/// Fixed-layout record the loader hands to userspace:
/// `{ tgid: u32, pid: u32, sock_port_nr: i32, comm: [u8; 16], cmdline: [u8; 120] }`,
/// host byte order.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProbeRecord {
    pub tgid: u32,
    pub pid: u32,
    pub sock_port_nr: i32,
    pub comm: [u8; PROBE_COMM_LEN],
    pub cmdline: [u8; PROBE_CMDLINE_LEN],
}

impl RawProbeRecord {
    pub fn into_event(self) -> ProcessEvent {
        ProcessEvent {
            tgid: self.tgid,
            tid: self.pid,
            comm: comm_to_string(&self.comm),
            cmdline: sanitize_cmdline(&self.cmdline),
            local_port: self.sock_port_nr as u16,
        }
    }
}

fn comm_to_string(comm: &[u8]) -> String {
    let end = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    String::from_utf8_lossy(&comm[..end]).into_owned()
}

/// Cleans the raw cmdline buffer: it is a sequence of fixed-length slots,
/// each holding a NUL-terminated argument. Bytes after the first NUL in a
/// slot are kernel-stack garbage and are dropped in favor of a single space
/// separator between arguments. Output length always equals input length
/// (idempotent: `sanitize(sanitize(x)) == sanitize(x)`).
pub fn sanitize_cmdline(raw: &[u8]) -> String {
    let mut stream = String::new();
    for slot in raw.chunks(PROBE_CMDLINE_SLOT_LEN) {
        let nul_pos = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        let core = String::from_utf8_lossy(&slot[..nul_pos]);
        let core = core.trim_end_matches(' ');
        if !core.is_empty() {
            stream.push_str(core);
            stream.push(' ');
        }
    }
    // Pad (or, for a malformed over-long stream, truncate) to the original
    // buffer length so sanitization never changes the record's size.
    let target_len = raw.len();
    if stream.len() < target_len {
        stream.push_str(&"\0".repeat(target_len - stream.len()));
    } else {
        stream.truncate(target_len);
    }
    stream
}

/// Records a completed "setup done" signal from the external probe loader.
/// The Packet Source must not start until this fires, so probe-attachment
/// races cannot make the first packets unattributable.
pub struct ProbeReady {
    pub tx: oneshot::Sender<()>,
}

pub type ProbeReadySignal = oneshot::Receiver<()>;

/// The external contract: a bounded, single-producer channel of
/// `ProcessEvent`s. `ProbeSource` implementations own the producer side and
/// are spawned as their own task by `main`; the Correlator only ever sees
/// the receiver.
pub trait ProbeSource: Send {
    /// Runs until the probe loader signals shutdown or the channel closes.
    /// Blocking; intended to be spawned on a dedicated task.
    fn run(self: Box<Self>, tx: mpsc::Sender<ProcessEvent>, ready: oneshot::Sender<()>);
}

/// A `ProbeSource` fed directly from a channel, used in tests and by any
/// external loader that prefers to push records itself rather than have
/// this crate poll a perf buffer.
pub struct ChannelProbeSource {
    rx: mpsc::Receiver<RawProbeRecord>,
}

impl ChannelProbeSource {
    pub fn new(rx: mpsc::Receiver<RawProbeRecord>) -> Self {
        ChannelProbeSource { rx }
    }
}

impl ProbeSource for ChannelProbeSource {
    fn run(mut self: Box<Self>, tx: mpsc::Sender<ProcessEvent>, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        while let Some(raw) = self.rx.blocking_recv() {
            if tx.blocking_send(raw.into_event()).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(s: &str, garbage: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; PROBE_CMDLINE_SLOT_LEN];
        v[..s.len()].copy_from_slice(s.as_bytes());
        v[s.len()] = 0;
        let start = s.len() + 1;
        for (i, g) in garbage.iter().enumerate() {
            if start + i < v.len() {
                v[start + i] = *g;
            }
        }
        v
    }

    #[test]
    fn sanitizes_and_joins_slots() {
        let mut raw = Vec::new();
        raw.extend(slot("curl", b"\xde\xad\xbe\xef"));
        raw.extend(slot("example.com", b"\x01\x02"));
        raw.extend(slot("--silent", b"\x03"));
        raw.extend(vec![0u8; PROBE_CMDLINE_SLOT_LEN]);
        assert_eq!(raw.len(), PROBE_CMDLINE_LEN);

        let cleaned = sanitize_cmdline(&raw);
        assert!(cleaned.starts_with("curl example.com --silent"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut raw = Vec::new();
        raw.extend(slot("dig", b"\xff\xff"));
        raw.extend(slot("+short", b"\x00\x00"));
        raw.extend(vec![0u8; PROBE_CMDLINE_SLOT_LEN]);
        raw.extend(vec![0u8; PROBE_CMDLINE_SLOT_LEN]);

        let once = sanitize_cmdline(&raw);
        let twice = sanitize_cmdline(once.as_bytes());
        assert_eq!(once, twice);
    }

    #[test]
    fn comm_truncates_at_first_nul() {
        let mut comm = [0u8; PROBE_COMM_LEN];
        comm[..4].copy_from_slice(b"curl");
        assert_eq!(comm_to_string(&comm), "curl");
    }
}
