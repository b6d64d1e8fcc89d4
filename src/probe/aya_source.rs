//! Real `ProbeSource` backed by an `aya` perf event array. Loading and
//! attaching the eBPF object is left to the caller (an external loader, or
//! a future `xtask`-style build step) — this adapter only owns the
//! userspace side of an already-opened `aya::Ebpf` handle: draining its
//! `EVENTS` perf buffer per CPU and forwarding sanitized `ProcessEvent`s.

use aya::maps::perf::{AsyncPerfEventArray, Events};
use aya::util::online_cpus;
use aya::Ebpf;
use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::model::ProcessEvent;

use super::{ProbeSource, RawProbeRecord};

const PERF_MAP_NAME: &str = "EVENTS";
const BUFFERS_PER_CPU: usize = 8;

/// Drains the `EVENTS` perf event array map of a loaded eBPF object, one
/// async task per online CPU, and forwards decoded records over `tx`.
pub struct AyaProbeSource {
    ebpf: Ebpf,
}

impl AyaProbeSource {
    pub fn new(ebpf: Ebpf) -> Self {
        AyaProbeSource { ebpf }
    }
}

impl ProbeSource for AyaProbeSource {
    fn run(mut self: Box<Self>, tx: mpsc::Sender<ProcessEvent>, ready: oneshot::Sender<()>) {
        let rt = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("aya probe source started outside a tokio runtime");
                return;
            }
        };

        let mut perf_array: AsyncPerfEventArray<_> =
            match self.ebpf.take_map(PERF_MAP_NAME) {
                Some(map) => match AsyncPerfEventArray::try_from(map) {
                    Ok(array) => array,
                    Err(e) => {
                        error!(error = %e, "EVENTS map has the wrong type");
                        return;
                    }
                },
                None => {
                    error!("loaded object has no EVENTS perf map");
                    return;
                }
            };

        let cpus = match online_cpus() {
            Ok(cpus) => cpus,
            Err(e) => {
                error!(?e, "failed to enumerate online cpus");
                return;
            }
        };

        let mut handles = Vec::with_capacity(cpus.len());
        for cpu_id in cpus {
            let mut buf = match perf_array.open(cpu_id, None) {
                Ok(buf) => buf,
                Err(e) => {
                    error!(cpu_id, error = %e, "failed to open perf buffer for cpu");
                    continue;
                }
            };
            let tx = tx.clone();
            handles.push(rt.spawn(async move {
                let mut buffers = (0..BUFFERS_PER_CPU)
                    .map(|_| BytesMut::with_capacity(std::mem::size_of::<RawProbeRecord>()))
                    .collect::<Vec<_>>();
                loop {
                    let Events { read, lost } = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            error!(cpu_id, error = %e, "perf buffer read failed");
                            break;
                        }
                    };
                    if lost > 0 {
                        warn!(cpu_id, lost, "probe perf buffer dropped samples");
                    }
                    for buf in buffers.iter().take(read) {
                        match record_from_bytes(buf) {
                            Some(record) => {
                                if tx.send(record.into_event()).await.is_err() {
                                    return;
                                }
                            }
                            None => warn!(cpu_id, "short probe record, dropping"),
                        }
                    }
                }
            }));
        }

        let _ = ready.send(());
        for handle in handles {
            let _ = rt.block_on(handle);
        }
    }
}

fn record_from_bytes(buf: &[u8]) -> Option<RawProbeRecord> {
    if buf.len() < std::mem::size_of::<RawProbeRecord>() {
        return None;
    }
    // SAFETY: `RawProbeRecord` is `#[repr(C)]` with no padding-sensitive
    // invariants beyond its own fields, and `buf` holds at least
    // `size_of::<RawProbeRecord>()` bytes written by the kernel side.
    Some(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const RawProbeRecord) })
}
