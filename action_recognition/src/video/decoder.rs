use async_trait::async_trait;
use image::RgbImage;
use std::{io, path::Path};
use thiserror::Error;

/// Best-effort stream metadata. Any field may be missing when the container
/// lacks reliable headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub total_frames: Option<usize>,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("no video stream found")]
    NoVideoStream,
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("unreadable probe output: {0}")]
    InvalidProbe(String),
    #[error("frame stream read failed: {0}")]
    Read(#[from] io::Error),
}

/// Sequential access to the decoded frames of one video, in presentation order.
#[async_trait]
pub trait FrameSource: Send {
    /// Number of frames the container claims to hold, when known.
    fn frame_count_hint(&self) -> Option<usize>;

    /// Next decoded RGB frame, `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError>;
}

#[async_trait]
pub trait VideoDecoder: Send + Sync + 'static {
    type Source: FrameSource;

    async fn probe(&self, path: &Path) -> Result<MediaInfo, DecodeError>;

    async fn open(&self, path: &Path, info: &MediaInfo) -> Result<Self::Source, DecodeError>;
}

/// Frames already held in memory.
pub struct InMemorySource {
    frames: std::vec::IntoIter<RgbImage>,
    hint: Option<usize>,
}

impl InMemorySource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        let hint = Some(frames.len());
        Self {
            frames: frames.into_iter(),
            hint,
        }
    }

    /// Overrides the reported frame count, e.g. to mimic a container whose
    /// header is wrong or missing.
    pub fn with_hint(mut self, hint: Option<usize>) -> Self {
        self.hint = hint;
        self
    }
}

#[async_trait]
impl FrameSource for InMemorySource {
    fn frame_count_hint(&self) -> Option<usize> {
        self.hint
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
        Ok(self.frames.next())
    }
}
