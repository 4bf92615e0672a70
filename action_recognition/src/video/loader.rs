use crate::{
    config::UploadConfig,
    error::PipelineError,
    response::VideoInfo,
    video::{
        decoder::{MediaInfo, VideoDecoder},
        probe::{sniff, ContainerFormat, Sniffed},
    },
};
use bytes::Bytes;
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempPath;

const DEFAULT_FILENAME: &str = "video.mp4";

/// One uploaded file as received from the transport.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let filename = filename.into();
        Self {
            filename: if filename.trim().is_empty() {
                DEFAULT_FILENAME.to_string()
            } else {
                filename
            },
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// An upload persisted for decoding. The backing temp file is deleted when
/// the asset is dropped.
#[derive(Debug)]
pub struct VideoAsset {
    path: TempPath,
    pub filename: String,
    pub size_bytes: u64,
    pub container: ContainerFormat,
    pub info: MediaInfo,
}

impl VideoAsset {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn video_info(&self) -> VideoInfo {
        VideoInfo::new(&self.filename, self.size_bytes, &self.info)
    }
}

#[derive(Debug, Clone)]
pub struct VideoLoader {
    limits: UploadConfig,
}

impl VideoLoader {
    pub fn new(limits: UploadConfig) -> Self {
        Self { limits }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.limits.upload_dir
    }

    /// In-memory checks, cheapest first: size, extension, content signature.
    pub fn validate(&self, upload: &Upload) -> Result<ContainerFormat, PipelineError> {
        let size_bytes = upload.size_bytes();
        if size_bytes > self.limits.max_file_size_bytes {
            return Err(PipelineError::FileTooLarge {
                size_bytes,
                limit_bytes: self.limits.max_file_size_bytes,
            });
        }

        if let Some(ext) = upload.extension() {
            if !self.limits.allows_extension(&ext) {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "File format '.{}' not supported. Allowed: {}",
                    ext,
                    self.limits.allowed_extensions.join(", ")
                )));
            }
        }

        match sniff(&upload.data) {
            Sniffed::Video(container) if self.allows_container(container) => Ok(container),
            Sniffed::Video(container) => Err(PipelineError::UnsupportedFormat(format!(
                "{} container is not supported",
                container
            ))),
            Sniffed::Other(kind) => Err(PipelineError::UnsupportedFormat(format!(
                "content is a {}, not a video",
                kind
            ))),
            Sniffed::Unknown => Err(PipelineError::CorruptMedia(
                "content is not a recognizable video container".to_string(),
            )),
        }
    }

    fn allows_container(&self, container: ContainerFormat) -> bool {
        container
            .extensions()
            .iter()
            .any(|ext| self.limits.allows_extension(ext))
    }

    /// Persists a validated upload and reads its stream metadata.
    pub async fn load<D: VideoDecoder>(
        &self,
        upload: &Upload,
        container: ContainerFormat,
        decoder: &D,
    ) -> Result<VideoAsset, PipelineError> {
        let extension = upload
            .extension()
            .filter(|ext| self.limits.allows_extension(ext))
            .unwrap_or_else(|| container.default_extension().to_string());
        let path = persist(
            self.limits.upload_dir.clone(),
            extension,
            upload.data.clone(),
        )
        .await?;

        let info = decoder.probe(&path).await.map_err(|e| {
            tracing::warn!(filename = %upload.filename, "probe failed: {}", e);
            PipelineError::CorruptMedia("could not read the video stream".to_string())
        })?;
        self.check_resolution(&info)?;

        Ok(VideoAsset {
            path,
            filename: upload.filename.clone(),
            size_bytes: upload.size_bytes(),
            container,
            info,
        })
    }

    /// Frame buffers are sized from the header, so oversized claims are
    /// refused before anything is decoded.
    fn check_resolution(&self, info: &MediaInfo) -> Result<(), PipelineError> {
        if let (Some(width), Some(height)) = (info.width, info.height) {
            if u64::from(width) * u64::from(height) > self.limits.max_frame_pixels {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "video resolution {}x{} exceeds the supported maximum of {} pixels per frame",
                    width, height, self.limits.max_frame_pixels
                )));
            }
        }
        Ok(())
    }
}

async fn persist(dir: PathBuf, extension: String, data: Bytes) -> Result<TempPath, PipelineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(&dir)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(file.into_temp_path())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("upload task failed: {}", e)))?
    .map_err(|e| {
        tracing::error!("failed to persist upload: {}", e);
        PipelineError::Internal("failed to store the upload".to_string())
    })
}
