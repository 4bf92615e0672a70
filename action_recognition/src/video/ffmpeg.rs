use crate::{
    config::FfmpegConfig,
    video::decoder::{DecodeError, FrameSource, MediaInfo, VideoDecoder},
};
use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};

const MAX_STDERR_CHARS: usize = 512;

/// Decodes through the `ffprobe`/`ffmpeg` executables. Every child process is
/// killed when its handle is dropped, so an abandoned request stops decoding.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    type Source = FfmpegFrameSource;

    async fn probe(&self, path: &Path) -> Result<MediaInfo, DecodeError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .arg("-count_packets")
            .args([
                "-show_entries",
                "stream=codec_name,width,height,avg_frame_rate,r_frame_rate,nb_frames,nb_read_packets,duration:format=duration",
            ])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DecodeError::Spawn {
                tool: "ffprobe",
                source,
            })?;

        if !output.status.success() {
            return Err(DecodeError::ToolFailed {
                tool: "ffprobe",
                status: output.status.to_string(),
                stderr: truncate_stderr(&output.stderr),
            });
        }

        parse_media_info(&output.stdout)
    }

    async fn open(&self, path: &Path, info: &MediaInfo) -> Result<FfmpegFrameSource, DecodeError> {
        let (width, height) = match (info.width, info.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(DecodeError::InvalidProbe(
                    "video stream has no frame dimensions".to_string(),
                ))
            }
        };

        let frame_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(3))
            .ok_or_else(|| DecodeError::InvalidProbe(format!("frame size {}x{} overflows", width, height)))?;

        // Rotation metadata is ignored so frames keep the probed dimensions.
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-noautorotate")
            .arg("-i")
            .arg(path)
            .args(["-map", "0:v:0", "-an", "-sn"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                tool: "ffmpeg",
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DecodeError::Spawn {
            tool: "ffmpeg",
            source: io::Error::other("stdout was not captured"),
        })?;

        tracing::debug!(width, height, hint = ?info.total_frames, "ffmpeg frame stream opened");

        Ok(FfmpegFrameSource {
            child,
            stdout,
            width,
            height,
            frame_len,
            hint: info.total_frames,
            finished: false,
        })
    }
}

pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frame_len: usize,
    hint: Option<usize>,
    finished: bool,
}

impl FfmpegFrameSource {
    async fn finish(&mut self) {
        self.finished = true;
        match self.child.wait().await {
            Ok(status) if !status.success() => {
                tracing::debug!(%status, "ffmpeg stopped before the end of the stream")
            }
            Err(e) => tracing::debug!("failed to reap ffmpeg: {}", e),
            _ => {}
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn frame_count_hint(&self) -> Option<usize> {
        self.hint
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buffer).await {
            Ok(_) => {}
            // A trailing partial frame is dropped along with the end of stream.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.finish().await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        RgbImage::from_raw(self.width, self.height, buffer)
            .map(Some)
            .ok_or_else(|| DecodeError::InvalidProbe("frame size mismatch".to_string()))
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_media_info(json: &[u8]) -> Result<MediaInfo, DecodeError> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| DecodeError::InvalidProbe(e.to_string()))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or(DecodeError::NoVideoStream)?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));
    let duration_seconds = stream
        .duration
        .as_deref()
        .and_then(parse_positive)
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(parse_positive)
        });
    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(parse_count)
        .or_else(|| stream.nb_read_packets.as_deref().and_then(parse_count))
        .or_else(|| match (duration_seconds, fps) {
            (Some(duration), Some(fps)) => Some((duration * fps).round() as usize).filter(|n| *n > 0),
            _ => None,
        });
    let duration_seconds = duration_seconds.or_else(|| match (total_frames, fps) {
        (Some(frames), Some(fps)) => Some(frames as f64 / fps),
        _ => None,
    });

    Ok(MediaInfo {
        codec: stream.codec_name,
        width: stream.width.filter(|w| *w > 0),
        height: stream.height.filter(|h| *h > 0),
        fps,
        duration_seconds,
        total_frames,
    })
}

/// Parses ffprobe rationals such as `30000/1001`; `0/0` means unknown.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_positive(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

fn truncate_stderr(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .trim()
        .chars()
        .take(MAX_STDERR_CHARS)
        .collect()
}
