//! Errors raised while configuring or driving a scan.
//!
//! These are configuration-time failures: they surface before any probe is
//! dispatched. Per-target failures never show up here, they are folded into
//! a [`ValidationOutcome`](crate::validator::ValidationOutcome) instead.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scanner::ScanState;

/// Failure building a strategy, limiter, validator or orchestrator.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("base URL '{0}' must contain the {{ip}} placeholder")]
    MissingPlaceholder(String),

    #[error("invalid IPv4 address or range '{0}'")]
    InvalidAddress(String),

    #[error("range start {start} is greater than end {end}")]
    ReversedRange { start: Ipv4Addr, end: Ipv4Addr },

    #[error("refusing to scan {start}-{end}: only RFC1918 private ranges are allowed")]
    PublicRange { start: Ipv4Addr, end: Ipv4Addr },

    #[error("range covers {count} addresses, more than the maximum of {max}")]
    RangeTooLarge { count: u64, max: u64 },

    #[error("unsupported multicast protocol '{0}', expected udp or rtp")]
    UnsupportedProtocol(String),

    #[error("range '{0}' is outside the multicast block 224.0.0.0/4")]
    NotMulticast(String),

    #[error("at least one address range is required")]
    NoRanges,

    #[error("at least one port is required")]
    NoPorts,

    #[error("port {0} is outside 1-65535")]
    InvalidPort(u16),

    #[error("concurrency must be between 1 and {max}, got {value}")]
    Concurrency { value: usize, max: usize },

    #[error("timeout must be positive and at most {max:?}, got {value:?}")]
    Timeout { value: Duration, max: Duration },

    #[error("failed to build probe worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("preset '{0}' not found")]
    PresetNotFound(String),

    #[error("failed to read presets from {path}: {source}")]
    PresetIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid preset file: {0}")]
    PresetFormat(#[from] serde_json::Error),

    #[error("scan cannot start, orchestrator is already {0}")]
    AlreadyStarted(ScanState),

    #[error("rate limiter closed while the scan was running")]
    LimiterClosed,

    #[error("progress observer failed: {0:#}")]
    Observer(anyhow::Error),
}
