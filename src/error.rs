use thiserror::Error;

/// Unified error type for the dnswatch capture-and-correlation engine.
///
/// Setup errors are unrecoverable at startup; decode errors are per-packet
/// and swallowed by the caller; runtime errors terminate the owning task.
#[derive(Debug, Error)]
pub enum WatchError {
    // Setup errors (unrecoverable at start)
    #[error("ring too small to fit one block (ring_size_mb={ring_size_mb}, block_size={block_size})")]
    RingTooSmall { ring_size_mb: usize, block_size: usize },

    #[error("failed to open packet socket: {0}")]
    SocketOpen(#[source] std::io::Error),

    #[error("failed to mmap packet ring: {0}")]
    RingMmap(#[source] std::io::Error),

    #[error("invalid BPF rule: {0}")]
    InvalidFilterRule(String),

    #[error("failed to attach BPF filter: {0}")]
    FilterAttach(#[source] std::io::Error),

    #[error("probe attach failed: {0}")]
    ProbeAttach(String),

    #[error("unknown output field: {0}")]
    UnknownField(String),

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Runtime / IO errors that terminate an owning task
    #[error("packet ring read error: {0}")]
    RingRead(#[source] std::io::Error),

    #[error("probe channel closed unexpectedly")]
    ProbeChannelClosed,

    #[error("packet channel closed unexpectedly")]
    PacketChannelClosed,

    #[error("prometheus registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
