mod decoder;
mod ffmpeg;
mod loader;
mod probe;

pub use decoder::{DecodeError, FrameSource, InMemorySource, MediaInfo, VideoDecoder};
pub use ffmpeg::{FfmpegDecoder, FfmpegFrameSource};
pub use loader::{Upload, VideoAsset, VideoLoader};
pub use probe::{sniff, ContainerFormat, Sniffed};
