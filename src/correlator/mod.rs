//! Correlator: the single-owner actor that joins the Packet Source and
//! Process-Port Source streams into Transactions and, on a periodic tick,
//! publishes a Snapshot to the active consumer.
//!
//! Owns two plain `HashMap`s rather than the `dashmap` used elsewhere in
//! this crate's ancestry: every access happens from this one task, selected
//! over with `tokio::select!`, so a concurrent map would buy nothing but
//! extra atomics on the hot path.

pub mod snapshot;
pub mod publisher;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::model::{Mode, PacketEvent, ProcInfo, ProcessEvent, Snapshot, Transaction, TransactionKey};

pub use publisher::{Publisher, Subscription};

pub struct Correlator {
    port_to_proc: HashMap<u16, ProcInfo>,
    tx: HashMap<TransactionKey, Transaction>,
    mode: Mode,
    /// Streaming mode only: whether a tick flushes still-incomplete
    /// Transactions (as `UNK`-rendered rows) before clearing the map.
    flush_incomplete: bool,
    /// Nettop mode only: bucket by the query peer address rather than the
    /// response peer address.
    nettop_by_query_addr: bool,
}

impl Correlator {
    pub fn new(mode: Mode, flush_incomplete: bool, nettop_by_query_addr: bool) -> Self {
        Correlator {
            port_to_proc: HashMap::new(),
            tx: HashMap::new(),
            mode,
            flush_incomplete,
            nettop_by_query_addr,
        }
    }

    /// Folds one decoded packet into the transaction map. Returns the
    /// completed Transaction when running in streaming mode and this packet
    /// was the one that completed it (query + response + proc all
    /// present) — the caller is expected to emit and drop it immediately;
    /// other modes leave completed entries in the map for the next tick.
    pub fn handle_packet(&mut self, event: PacketEvent) -> Option<Transaction> {
        let local_port = event.local_port();
        let key = TransactionKey {
            local_port,
            dns_id: event.dns.id,
        };
        let entry = self.tx.entry(key).or_default();

        if !event.dns.qr {
            entry.q_ts = event.timestamp_ns;
            if entry.query_addr.is_none() {
                entry.query_addr = Some(event.src_addr);
            }
            if entry.response_addr.is_none() {
                entry.response_addr = Some(event.dst_addr);
            }
            entry.query = Some(event.dns);
        } else {
            entry.r_ts = event.timestamp_ns;
            if entry.response_addr.is_none() {
                entry.response_addr = Some(event.src_addr);
            }
            if entry.query_addr.is_none() {
                entry.query_addr = Some(event.dst_addr);
            }
            entry.response = Some(event.dns);
        }

        if let Some(proc) = self.port_to_proc.get(&local_port) {
            entry.proc = Some(proc.clone());
        }

        if self.mode.is_streaming() && entry.is_complete() {
            return self.tx.remove(&key);
        }
        None
    }

    /// Process attribution is last-writer-wins: a later probe record for the
    /// same port always replaces whatever was there, even if it belonged to
    /// a different, now-exited process.
    pub fn handle_process(&mut self, event: ProcessEvent) {
        self.port_to_proc.insert(
            event.local_port,
            ProcInfo {
                pid: event.tgid,
                tid: event.tid,
                pname: event.comm,
                cmdline: event.cmdline,
            },
        );
    }

    /// Builds the Snapshot to publish this tick and reports whether the
    /// Correlator should stop after publishing it (true only for the
    /// one-shot SQL-like mode).
    fn on_tick(&mut self) -> (Snapshot, bool) {
        if self.mode.is_streaming() {
            let mut snap = Snapshot::default();
            let completed: Vec<TransactionKey> = self
                .tx
                .iter()
                .filter(|(_, t)| t.is_complete())
                .map(|(k, _)| *k)
                .collect();
            for key in completed {
                if let Some(txn) = self.tx.remove(&key) {
                    snap.transactions.push(txn);
                }
            }
            // Ports may have been reused since the last tick, so whatever is
            // still incomplete is never carried forward to the next one —
            // it is either flushed once here (UNK-rendered) or dropped.
            if self.flush_incomplete {
                for (_, txn) in self.tx.drain() {
                    snap.transactions.push(txn);
                }
            } else {
                self.tx.clear();
            }
            return (snap, false);
        }

        let snap = snapshot::build(&self.tx, self.mode, self.nettop_by_query_addr);
        let should_stop = self.mode.is_one_shot();
        if self.mode.clears_on_tick() {
            self.tx.clear();
        }
        (snap, should_stop)
    }

    /// Runs until a source channel closes, the consumer requests stop, or
    /// (in one-shot modes) the first tick completes.
    pub async fn run(
        mut self,
        mut packet_rx: mpsc::Receiver<PacketEvent>,
        mut probe_rx: mpsc::Receiver<ProcessEvent>,
        publisher: Publisher,
        mut stop_rx: mpsc::Receiver<()>,
        clean_period: Duration,
    ) {
        let mut ticker = tokio::time::interval(clean_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_packet = packet_rx.recv() => {
                    match maybe_packet {
                        Some(event) => {
                            if let Some(txn) = self.handle_packet(event) {
                                let mut snap = Snapshot::default();
                                snap.transactions.push(txn);
                                if !publisher.publish(snap) {
                                    debug!("consumer dropped snapshot channel");
                                    break;
                                }
                            }
                        }
                        None => {
                            info!("packet source closed, correlator stopping");
                            break;
                        }
                    }
                }
                maybe_proc = probe_rx.recv() => {
                    match maybe_proc {
                        Some(event) => self.handle_process(event),
                        None => {
                            warn!("probe source closed, correlator stopping");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let (snap, should_stop) = self.on_tick();
                    if !publisher.publish(snap) {
                        debug!("consumer dropped snapshot channel");
                        break;
                    }
                    if should_stop {
                        info!("one-shot mode completed its tick, correlator stopping");
                        break;
                    }
                }
                _ = stop_rx.recv() => {
                    info!("consumer requested stop");
                    break;
                }
            }
        }
    }
}
