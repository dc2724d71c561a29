//! The seam between the validator and whatever actually inspects a stream.
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stream protocols the validator knows how to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Rtp,
    Rtsp,
    Udp,
}

impl Protocol {
    /// Maps a URL scheme to a protocol, ignoring case.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "rtp" => Some(Self::Rtp),
            "rtsp" => Some(Self::Rtsp),
            "udp" => Some(Self::Udp),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Rtp => "rtp",
            Self::Rtsp => "rtsp",
            Self::Udp => "udp",
        }
    }

    /// Demuxer options handed to the prober for this protocol.
    ///
    /// Multicast RTP needs large analysis and receive buffers before the
    /// first keyframe shows up; RTSP is forced onto TCP interleaving.
    pub const fn options(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Http | Self::Https => &[],
            Self::Rtp => &[
                ("analyzeduration", "10000000"),
                ("probesize", "10000000"),
                ("rtbufsize", "2048k"),
            ],
            Self::Rtsp => &[("rtsp_transport", "tcp")],
            Self::Udp => &[("analyzeduration", "5000000"), ("probesize", "5000000")],
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a prober needs for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub target: String,
    pub protocol: Protocol,
    pub timeout: Duration,
    pub options: Vec<(String, String)>,
}

impl ProbeRequest {
    pub fn new(target: impl Into<String>, protocol: Protocol, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            protocol,
            timeout,
            options: protocol
                .options()
                .iter()
                .map(|&(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Other,
}

impl StreamKind {
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitle" => Self::Subtitle,
            "data" => Self::Data,
            _ => Self::Other,
        }
    }
}

/// One track found in a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStream {
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ElementaryStream {
    pub fn video(codec: &str, width: u32, height: u32) -> Self {
        Self {
            kind: StreamKind::Video,
            codec: Some(codec.to_owned()),
            width: Some(width),
            height: Some(height),
        }
    }

    pub fn audio(codec: &str) -> Self {
        Self {
            kind: StreamKind::Audio,
            codec: Some(codec.to_owned()),
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub streams: Vec<ElementaryStream>,
}

impl ProbeReport {
    pub fn first_video(&self) -> Option<&ElementaryStream> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn first_audio(&self) -> Option<&ElementaryStream> {
        self.streams.iter().find(|s| s.kind == StreamKind::Audio)
    }
}

/// A probe failed. The diagnostic is whatever the inspection tool reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{diagnostic}")]
pub struct ProbeError {
    pub diagnostic: String,
}

impl ProbeError {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }
}

/// Inspects a stream and lists its elementary streams.
///
/// Implementations block: the validator always calls them from a worker
/// thread, never from the async runtime.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, request: &ProbeRequest) -> Result<ProbeReport, ProbeError>;
}

impl<P: Prober + ?Sized> Prober for std::sync::Arc<P> {
    fn probe(&self, request: &ProbeRequest) -> Result<ProbeReport, ProbeError> {
        (**self).probe(request)
    }
}
