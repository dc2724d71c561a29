//! [`Prober`] backed by the `ffprobe` binary.
//!
//! Runs `ffprobe -v error -print_format json -show_streams` against the
//! target and maps the JSON stream list into a [`ProbeReport`].
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use log::debug;
use serde_derive::Deserialize;
use wait_timeout::ChildExt;

use super::probe::{
    ElementaryStream, ProbeError, ProbeReport, ProbeRequest, Prober, Protocol, StreamKind,
};

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Finds `ffprobe` on `PATH`.
    pub fn from_path() -> Option<Self> {
        which::which("ffprobe").ok().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.ffprobe_path
    }

    /// Command line for `request`, program name excluded.
    ///
    /// The I/O timeout goes through `-rw_timeout`, which every ffmpeg release
    /// reads as microseconds. rtsp gets none: older rtsp demuxers take
    /// `-timeout` as a listen timeout and switch to listen mode, so rtsp is
    /// bounded only by the process deadline.
    pub fn arguments(request: &ProbeRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "error", "-print_format", "json", "-show_streams"]
            .iter()
            .map(|&arg| arg.to_owned())
            .collect();

        if request.protocol != Protocol::Rtsp {
            args.push("-rw_timeout".to_owned());
            args.push(request.timeout.as_micros().to_string());
        }

        for (key, value) in &request.options {
            args.push(format!("-{key}"));
            args.push(value.clone());
        }

        args.push(request.target.clone());
        args
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, request: &ProbeRequest) -> Result<ProbeReport, ProbeError> {
        debug!("ffprobe {} (timeout {:?})", request.target, request.timeout);

        let mut child = Command::new(&self.ffprobe_path)
            .args(Self::arguments(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ProbeError::new(format!(
                    "failed to spawn {}: {e}",
                    self.ffprobe_path.display()
                ))
            })?;

        // Both pipes are drained off-thread so a chatty child never blocks on
        // a full pipe while we wait on it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(request.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::new(format!(
                    "ffprobe timed out after {:?}",
                    request.timeout
                )));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::new(format!("failed to wait for ffprobe: {e}")));
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let stderr = stderr.trim();
            return Err(ProbeError::new(if stderr.is_empty() {
                format!("ffprobe exited with {status}")
            } else {
                stderr.to_owned()
            }));
        }

        parse_output(&stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_output(json: &str) -> Result<ProbeReport, ProbeError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| ProbeError::new(format!("unreadable ffprobe output: {e}")))?;

    let streams = output
        .streams
        .into_iter()
        .map(|stream| ElementaryStream {
            kind: StreamKind::from_codec_type(stream.codec_type.as_deref().unwrap_or("")),
            codec: stream.codec_name,
            width: stream.width,
            height: stream.height,
        })
        .collect();

    Ok(ProbeReport { streams })
}
