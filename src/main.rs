use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dnswatch::capture::PacketSource;
use dnswatch::cli::CliArgs;
use dnswatch::config::WatchConfig;
use dnswatch::consumer::{Consumer, MetricsConsumer, StreamingConsumer};
use dnswatch::constants::{DNS_FILTER_RULE, EVENT_CHANNEL_DEPTH};
use dnswatch::correlator::{publisher, Correlator};
use dnswatch::decode::decode_frame;
use dnswatch::metrics::DnsMetrics;
use dnswatch::model::Mode;
use dnswatch::probe::{ChannelProbeSource, ProbeSource};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("setup error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal error, exiting");
        std::process::exit(1);
    }
}

async fn run(config: WatchConfig) -> dnswatch::error::Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let mut packet_source = PacketSource::open(config.interface.as_deref(), config.ring_size_mb)?;
    packet_source.install_filter(DNS_FILTER_RULE)?;

    let (packet_tx, packet_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let (probe_tx, probe_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let (probe_ready_tx, probe_ready_rx) = tokio::sync::oneshot::channel();
    let (publisher, subscription, stop_rx) = publisher::channel();

    // The probe loader is external; this binary only exposes the channel
    // contract. Absent a real loader, the sender is kept alive for the
    // whole process (never dropped) so the channel simply never produces
    // events and attribution columns render UNK for every transaction,
    // rather than closing and tearing down the correlator.
    let (raw_probe_tx, raw_probe_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let _raw_probe_tx_keepalive = raw_probe_tx;
    let probe_source = ChannelProbeSource::new(raw_probe_rx);
    std::thread::spawn(move || {
        Box::new(probe_source).run(probe_tx, probe_ready_tx);
    });

    // Packet capture must not start until the probe loader signals it is
    // attached, so the first packets are not silently unattributable.
    let _ = probe_ready_rx.await;

    let mut shutdown_rx_packets = shutdown_tx.subscribe();
    std::thread::spawn(move || loop {
        match packet_source.next() {
            Ok(frame) => match decode_frame(frame.bytes, frame.timestamp_ns) {
                Ok(event) => {
                    if packet_tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(_) => continue,
            },
            Err(e) => {
                error!(error = %e, "packet source failed, stopping capture");
                break;
            }
        }
        if shutdown_rx_packets.try_recv().is_ok() {
            break;
        }
    });

    // Kept so ctrl-c can ask the Correlator to stop even in modes (streaming,
    // prometheus) that otherwise run forever with no consumer-initiated stop.
    let ctrlc_stop_tx = subscription.stop_tx.clone();

    let correlator = Correlator::new(config.mode, config.flush_incomplete, config.nettop_by_query_addr);
    let correlator_task = tokio::spawn(correlator.run(
        packet_rx,
        probe_rx,
        publisher,
        stop_rx,
        config.clean_period,
    ));

    let consumer_task: tokio::task::JoinHandle<()> = match config.mode {
        Mode::Prometheus => {
            let metrics = Arc::new(DnsMetrics::new()?);
            let listen = config.exporter_listen.expect("validated at config build time");
            let exporter_metrics = metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = MetricsConsumer::serve(exporter_metrics, listen).await {
                    error!(error = %e, "prometheus exporter stopped");
                }
            });
            spawn_consumer(MetricsConsumer::new(metrics), subscription)
        }
        _ => spawn_consumer(
            StreamingConsumer::new(config.fields.clone(), config.detailed),
            subscription,
        ),
    };

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
        let _ = shutdown_tx.send(());
        let _ = ctrlc_stop_tx.send(()).await;
    });

    if let Err(e) = correlator_task.await {
        error!(error = %e, "correlator task panicked");
    }

    consumer_task.abort();
    Ok(())
}

fn spawn_consumer<C: Consumer + 'static>(
    mut consumer: C,
    mut subscription: publisher::Subscription,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while subscription.snapshot_rx.changed().await.is_ok() {
            let snapshot = subscription.snapshot_rx.borrow_and_update().clone();
            consumer.on_snapshot(snapshot);
        }
        consumer.on_stop();
        let _ = subscription.stop_tx.send(()).await;
    })
}
