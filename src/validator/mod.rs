//! Probes individual stream addresses and turns whatever happens into a
//! [`ValidationOutcome`].
//!
//! Probing blocks (it shells out to a native decoder), so every probe runs
//! on a dedicated worker pool and the result is handed back to the async
//! caller through a oneshot channel.
pub mod ffprobe;
pub mod probe;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_derive::Serialize;
use tokio::sync::oneshot;
use url::Url;

use crate::errors::ScanError;
use crate::limiter::MAX_CONCURRENCY;
pub use ffprobe::FfprobeProber;
pub use probe::{ElementaryStream, ProbeError, ProbeReport, ProbeRequest, Prober, Protocol, StreamKind};

/// Multicast RTP needs time to join the group and buffer a keyframe.
pub const RTP_TIMEOUT_FLOOR: Duration = Duration::from_secs(20);

/// Longest diagnostic kept in an outcome.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Why a stream failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkUnreachable,
    Timeout,
    NoVideoStream,
    /// Reserved, never produced by the current classifier.
    UnsupportedCodec,
    UnsupportedProtocol,
    MulticastNotSupported,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnreachable => "network_unreachable",
            Self::Timeout => "timeout",
            Self::NoVideoStream => "no_video_stream",
            Self::UnsupportedCodec => "unsupported_codec",
            Self::UnsupportedProtocol => "unsupported_protocol",
            Self::MulticastNotSupported => "multicast_not_supported",
        }
    }

    /// Classifies a probe diagnostic by substring, ignoring case.
    pub fn classify(diagnostic: &str) -> Self {
        let diagnostic = diagnostic.to_lowercase();
        if diagnostic.contains("timeout") || diagnostic.contains("timed out") {
            Self::Timeout
        } else if diagnostic.contains("no route to host") {
            Self::MulticastNotSupported
        } else {
            Self::NetworkUnreachable
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one target. Built once, never modified.
///
/// A valid outcome always carries a video codec and no error category; an
/// invalid one always carries an error category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub target: String,
    pub is_valid: bool,
    pub protocol: String,
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ValidationOutcome {
    fn valid(target: &str, protocol: Protocol, report: &ProbeReport, video: &ElementaryStream) -> Self {
        let resolution = match (video.width, video.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(format!("{width}x{height}"))
            }
            _ => None,
        };

        Self {
            target: target.to_owned(),
            is_valid: true,
            protocol: protocol.to_string(),
            resolution,
            video_codec: Some(video.codec.clone().unwrap_or_else(|| String::from("unknown"))),
            audio_codec: report.first_audio().and_then(|audio| audio.codec.clone()),
            error_category: None,
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    /// A failed outcome. The message is cut to its first 200 characters.
    pub fn invalid(target: &str, protocol: &str, category: ErrorCategory, message: &str) -> Self {
        let message = message.trim();
        let message = if message.is_empty() {
            String::from("Unknown probe error.")
        } else {
            message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
        };

        Self {
            target: target.to_owned(),
            is_valid: false,
            protocol: protocol.to_owned(),
            resolution: None,
            video_codec: None,
            audio_codec: None,
            error_category: Some(category),
            error_message: Some(message),
            completed_at: Utc::now(),
        }
    }

    /// Outcome for a probe cut off by the rate limiter's deadline.
    pub fn timed_out(target: &str, after: Duration) -> Self {
        let protocol = scheme_of(target).unwrap_or_else(|| String::from("unknown"));
        Self::invalid(
            target,
            &protocol,
            ErrorCategory::Timeout,
            &format!("probe timed out after {after:?}"),
        )
    }
}

/// Lower-cased URL scheme of `target`, if it has one.
fn scheme_of(target: &str) -> Option<String> {
    if let Ok(url) = Url::parse(target) {
        return Some(url.scheme().to_owned());
    }

    // Url rejects some stream addresses that still carry a usable scheme.
    let (scheme, _) = target.split_once("://")?;
    let well_formed = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    well_formed.then(|| scheme.to_ascii_lowercase())
}

/// Protocol the validator would use for `target`.
pub fn detect_protocol(target: &str) -> Option<Protocol> {
    scheme_of(target).and_then(|scheme| Protocol::from_scheme(&scheme))
}

/// Runs probes on a bounded thread pool and normalizes their results.
pub struct StreamValidator<P: Prober> {
    prober: Arc<P>,
    pool: ThreadPool,
    workers: usize,
}

impl<P: Prober> fmt::Debug for StreamValidator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamValidator")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl<P: Prober> StreamValidator<P> {
    /// Builds a validator whose pool has `workers` threads, normally the
    /// rate limiter's ceiling.
    pub fn new(prober: P, workers: usize) -> Result<Self, ScanError> {
        if !(1..=MAX_CONCURRENCY).contains(&workers) {
            return Err(ScanError::Concurrency {
                value: workers,
                max: MAX_CONCURRENCY,
            });
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("iptvscan-probe-{index}"))
            .panic_handler(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!("Probe worker panicked: {reason}");
            })
            .build()?;

        Ok(Self {
            prober: Arc::new(prober),
            pool,
            workers,
        })
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Timeout actually used for `target`: rtp never gets less than 20s.
    pub fn probe_timeout(&self, target: &str, requested: Duration) -> Duration {
        match detect_protocol(target) {
            Some(Protocol::Rtp) => requested.max(RTP_TIMEOUT_FLOOR),
            _ => requested,
        }
    }

    /// Probes `target` and reports what was found. Never fails: every
    /// problem is folded into an invalid outcome.
    pub async fn validate(&self, target: &str, timeout: Duration) -> ValidationOutcome {
        let Some(scheme) = scheme_of(target) else {
            debug!("No scheme in {target}");
            return ValidationOutcome::invalid(
                target,
                "unknown",
                ErrorCategory::UnsupportedProtocol,
                "Protocol not supported by stream validator.",
            );
        };
        let Some(protocol) = Protocol::from_scheme(&scheme) else {
            debug!("Unsupported protocol {scheme} for {target}");
            return ValidationOutcome::invalid(
                target,
                &scheme,
                ErrorCategory::UnsupportedProtocol,
                "Protocol not supported by stream validator.",
            );
        };

        let request = ProbeRequest::new(target, protocol, self.probe_timeout(target, timeout));
        let (tx, rx) = oneshot::channel();
        let prober = Arc::clone(&self.prober);
        self.pool.spawn(move || {
            let result = prober.probe(&request);
            let _ = tx.send(result);
        });

        match rx.await {
            Ok(Ok(report)) => match report.first_video() {
                Some(video) => {
                    let outcome = ValidationOutcome::valid(target, protocol, &report, video);
                    debug!("Valid stream {target}: {:?}", outcome.resolution);
                    outcome
                }
                None => ValidationOutcome::invalid(
                    target,
                    protocol.as_str(),
                    ErrorCategory::NoVideoStream,
                    "No video stream detected.",
                ),
            },
            Ok(Err(e)) => {
                debug!("Probe failed for {target}: {}", e.diagnostic.trim());
                ValidationOutcome::invalid(
                    target,
                    protocol.as_str(),
                    ErrorCategory::classify(&e.diagnostic),
                    &e.diagnostic,
                )
            }
            Err(_) => ValidationOutcome::invalid(
                target,
                protocol.as_str(),
                ErrorCategory::NetworkUnreachable,
                "probe worker terminated before reporting a result",
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::probe::{ElementaryStream, ProbeError, ProbeReport, ProbeRequest, Prober};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Respond = Box<dyn Fn(&ProbeRequest) -> Result<ProbeReport, ProbeError> + Send + Sync>;

    /// Answers probes from a closure and remembers every request.
    pub(crate) struct ScriptedProber {
        respond: Respond,
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        requests: Mutex<Vec<ProbeRequest>>,
    }

    impl ScriptedProber {
        pub(crate) fn new(
            respond: impl Fn(&ProbeRequest) -> Result<ProbeReport, ProbeError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Every probe finds an h264 stream.
        pub(crate) fn always_valid() -> Self {
            Self::new(|_| Ok(hd_report()))
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub(crate) fn targets(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.target.clone()).collect()
        }

        pub(crate) fn requests(&self) -> Vec<ProbeRequest> {
            self.requests.lock().clone()
        }
    }

    impl Prober for ScriptedProber {
        fn probe(&self, request: &ProbeRequest) -> Result<ProbeReport, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().push(request.clone());

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let result = (self.respond)(request);
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    pub(crate) fn hd_report() -> ProbeReport {
        ProbeReport {
            streams: vec![
                ElementaryStream::video("h264", 1920, 1080),
                ElementaryStream::audio("aac"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{hd_report, ScriptedProber};
    use super::{
        ElementaryStream, ErrorCategory, ProbeError, ProbeReport, Protocol, StreamKind,
        StreamValidator, ValidationOutcome,
    };
    use parameterized::parameterized;
    use std::sync::Arc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn assert_invariant(outcome: &ValidationOutcome) {
        if outcome.is_valid {
            assert!(outcome.error_category.is_none());
            assert!(outcome.video_codec.is_some());
        } else {
            assert!(outcome.error_category.is_some());
            assert!(outcome.error_message.is_some());
        }
    }

    #[tokio::test]
    async fn unsupported_scheme_never_probes() {
        let prober = Arc::new(ScriptedProber::always_valid());
        let validator = StreamValidator::new(Arc::clone(&prober), 2).unwrap();

        let outcome = validator.validate("ftp://host", TIMEOUT).await;

        assert!(!outcome.is_valid);
        assert_eq!(outcome.protocol, "ftp");
        assert_eq!(outcome.error_category, Some(ErrorCategory::UnsupportedProtocol));
        assert_eq!(prober.calls(), 0);
        assert_invariant(&outcome);
    }

    #[tokio::test]
    async fn schemeless_target_is_unsupported() {
        let prober = Arc::new(ScriptedProber::always_valid());
        let validator = StreamValidator::new(Arc::clone(&prober), 1).unwrap();

        let outcome = validator.validate("10.0.0.1/live", TIMEOUT).await;

        assert_eq!(outcome.protocol, "unknown");
        assert_eq!(outcome.error_category, Some(ErrorCategory::UnsupportedProtocol));
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn valid_stream_reports_resolution_and_codecs() {
        let validator = StreamValidator::new(ScriptedProber::always_valid(), 2).unwrap();

        let outcome = validator.validate("http://10.0.0.1/live", TIMEOUT).await;

        assert!(outcome.is_valid);
        assert_eq!(outcome.protocol, "http");
        assert_eq!(outcome.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(outcome.video_codec.as_deref(), Some("h264"));
        assert_eq!(outcome.audio_codec.as_deref(), Some("aac"));
        assert_invariant(&outcome);
    }

    #[tokio::test]
    async fn audio_only_stream_has_no_video() {
        let validator = StreamValidator::new(
            ScriptedProber::new(|_| {
                Ok(ProbeReport {
                    streams: vec![ElementaryStream::audio("mp2")],
                })
            }),
            1,
        )
        .unwrap();

        let outcome = validator.validate("udp://239.0.0.1:1234", TIMEOUT).await;

        assert_eq!(outcome.error_category, Some(ErrorCategory::NoVideoStream));
        assert_eq!(outcome.error_message.as_deref(), Some("No video stream detected."));
        assert_invariant(&outcome);
    }

    #[tokio::test]
    async fn video_without_codec_or_size_is_still_valid() {
        let validator = StreamValidator::new(
            ScriptedProber::new(|_| {
                Ok(ProbeReport {
                    streams: vec![ElementaryStream {
                        kind: StreamKind::Video,
                        codec: None,
                        width: None,
                        height: Some(576),
                    }],
                })
            }),
            1,
        )
        .unwrap();

        let outcome = validator.validate("rtsp://10.0.0.1/a", TIMEOUT).await;

        assert!(outcome.is_valid);
        assert_eq!(outcome.resolution, None);
        assert_eq!(outcome.video_codec.as_deref(), Some("unknown"));
        assert_eq!(outcome.audio_codec, None);
    }

    #[parameterized(diagnostic = {
        "Connection timed out",
        "rtp://239.0.0.1:5000: Operation TIMEOUT",
        "bind failed: No route to host",
        "Connection refused",
        "",
    }, expected = {
        ErrorCategory::Timeout,
        ErrorCategory::Timeout,
        ErrorCategory::MulticastNotSupported,
        ErrorCategory::NetworkUnreachable,
        ErrorCategory::NetworkUnreachable,
    })]
    fn diagnostics_are_classified(diagnostic: &str, expected: ErrorCategory) {
        assert_eq!(ErrorCategory::classify(diagnostic), expected);
    }

    #[tokio::test]
    async fn probe_failure_becomes_outcome() {
        let validator = StreamValidator::new(
            ScriptedProber::new(|_| Err(ProbeError::new("udp://239.0.0.1:1234: No route to host"))),
            1,
        )
        .unwrap();

        let outcome = validator.validate("udp://239.0.0.1:1234", TIMEOUT).await;

        assert_eq!(outcome.error_category, Some(ErrorCategory::MulticastNotSupported));
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("udp://239.0.0.1:1234: No route to host")
        );
        assert_invariant(&outcome);
    }

    #[tokio::test]
    async fn long_diagnostics_are_truncated() {
        let validator =
            StreamValidator::new(ScriptedProber::new(|_| Err(ProbeError::new("é".repeat(500)))), 1)
                .unwrap();

        let outcome = validator.validate("http://10.0.0.1/a", TIMEOUT).await;

        assert_eq!(outcome.error_message.unwrap().chars().count(), 200);
    }

    #[tokio::test]
    async fn panicking_prober_does_not_take_down_the_caller() {
        let validator = StreamValidator::new(
            ScriptedProber::new(|_| panic!("decoder crashed")),
            1,
        )
        .unwrap();

        let outcome = validator.validate("http://10.0.0.1/a", TIMEOUT).await;

        assert_eq!(outcome.error_category, Some(ErrorCategory::NetworkUnreachable));

        // The pool survives and keeps serving probes.
        let again = validator.validate("ftp://10.0.0.1/a", TIMEOUT).await;
        assert_eq!(again.error_category, Some(ErrorCategory::UnsupportedProtocol));
    }

    #[tokio::test]
    async fn protocol_tuning_reaches_the_prober() {
        let prober = Arc::new(ScriptedProber::new(|_| Ok(hd_report())));
        let validator = StreamValidator::new(Arc::clone(&prober), 2).unwrap();

        validator.validate("rtp://239.0.0.1:5000", Duration::from_secs(5)).await;
        validator.validate("rtsp://10.0.0.1/a", Duration::from_secs(5)).await;
        validator.validate("HTTP://10.0.0.1/a", Duration::from_secs(5)).await;

        let requests = prober.requests();
        assert_eq!(requests[0].protocol, Protocol::Rtp);
        assert_eq!(requests[0].timeout, Duration::from_secs(20));
        assert_eq!(requests[1].timeout, Duration::from_secs(5));
        assert!(requests[1]
            .options
            .contains(&("rtsp_transport".to_owned(), "tcp".to_owned())));
        assert_eq!(requests[2].protocol, Protocol::Http);
        assert!(requests[2].options.is_empty());
    }

    #[test]
    fn rtp_floor_only_raises() {
        let validator = StreamValidator::new(ScriptedProber::always_valid(), 1).unwrap();
        assert_eq!(
            validator.probe_timeout("rtp://239.0.0.1:5000", Duration::from_secs(3)),
            Duration::from_secs(20)
        );
        assert_eq!(
            validator.probe_timeout("rtp://239.0.0.1:5000", Duration::from_secs(45)),
            Duration::from_secs(45)
        );
        assert_eq!(
            validator.probe_timeout("udp://239.0.0.1:5000", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn worker_count_is_bounded() {
        assert!(StreamValidator::new(ScriptedProber::always_valid(), 0).is_err());
        assert!(StreamValidator::new(ScriptedProber::always_valid(), 51).is_err());
    }

    #[test]
    fn outcome_serializes_with_snake_case_category() {
        let outcome = ValidationOutcome::timed_out("rtp://239.0.0.1:5000", Duration::from_secs(20));
        assert_eq!(outcome.protocol, "rtp");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error_category"], "timeout");
        assert_eq!(json["is_valid"], false);
    }
}
