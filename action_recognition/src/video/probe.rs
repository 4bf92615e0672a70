//! Container detection from leading bytes, so a renamed file cannot pass as
//! a video just by its extension.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    QuickTime,
    ThreeGp,
    Avi,
    Matroska,
    WebM,
    MpegPs,
    MpegTs,
    Flv,
    Asf,
    Ogg,
}

impl ContainerFormat {
    /// File extensions a container of this kind is commonly stored under.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ContainerFormat::Mp4 => &["mp4", "m4v", "mov"],
            ContainerFormat::QuickTime => &["mov", "mp4"],
            ContainerFormat::ThreeGp => &["3gp", "3g2"],
            ContainerFormat::Avi => &["avi"],
            ContainerFormat::Matroska => &["mkv", "webm"],
            ContainerFormat::WebM => &["webm", "mkv"],
            ContainerFormat::MpegPs => &["mpg", "mpeg"],
            ContainerFormat::MpegTs => &["ts", "m2ts"],
            ContainerFormat::Flv => &["flv"],
            ContainerFormat::Asf => &["wmv", "asf"],
            ContainerFormat::Ogg => &["ogv", "ogg"],
        }
    }

    pub fn default_extension(&self) -> &'static str {
        self.extensions()[0]
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerFormat::Mp4 => "MP4",
            ContainerFormat::QuickTime => "QuickTime",
            ContainerFormat::ThreeGp => "3GP",
            ContainerFormat::Avi => "AVI",
            ContainerFormat::Matroska => "Matroska",
            ContainerFormat::WebM => "WebM",
            ContainerFormat::MpegPs => "MPEG program stream",
            ContainerFormat::MpegTs => "MPEG transport stream",
            ContainerFormat::Flv => "FLV",
            ContainerFormat::Asf => "ASF",
            ContainerFormat::Ogg => "Ogg",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Video(ContainerFormat),
    /// A recognized file type that is not a video container.
    Other(&'static str),
    Unknown,
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const ASF_MAGIC: [u8; 8] = [0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11];
const TS_PACKET_LEN: usize = 188;

pub fn sniff(data: &[u8]) -> Sniffed {
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        let brand = &data[8..12];
        return if brand == b"qt  " {
            Sniffed::Video(ContainerFormat::QuickTime)
        } else if brand.starts_with(b"3g") {
            Sniffed::Video(ContainerFormat::ThreeGp)
        } else {
            Sniffed::Video(ContainerFormat::Mp4)
        };
    }
    // Pre-ftyp QuickTime files open directly with a top-level atom.
    if data.len() >= 8 && matches!(&data[4..8], b"moov" | b"mdat" | b"wide" | b"free" | b"skip")
    {
        return Sniffed::Video(ContainerFormat::QuickTime);
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        return match &data[8..12] {
            b"AVI " => Sniffed::Video(ContainerFormat::Avi),
            b"WAVE" => Sniffed::Other("WAV audio"),
            b"WEBP" => Sniffed::Other("WebP image"),
            _ => Sniffed::Unknown,
        };
    }
    if data.starts_with(&EBML_MAGIC) {
        let header = &data[..data.len().min(64)];
        let is_webm = header.windows(4).any(|w| w == b"webm");
        return Sniffed::Video(if is_webm {
            ContainerFormat::WebM
        } else {
            ContainerFormat::Matroska
        });
    }
    if data.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || data.starts_with(&[0x00, 0x00, 0x01, 0xB3])
    {
        return Sniffed::Video(ContainerFormat::MpegPs);
    }
    if data.len() > TS_PACKET_LEN && data[0] == 0x47 && data[TS_PACKET_LEN] == 0x47 {
        return Sniffed::Video(ContainerFormat::MpegTs);
    }
    if data.starts_with(b"FLV\x01") {
        return Sniffed::Video(ContainerFormat::Flv);
    }
    if data.starts_with(&ASF_MAGIC) {
        return Sniffed::Video(ContainerFormat::Asf);
    }
    if data.starts_with(b"OggS") {
        return Sniffed::Video(ContainerFormat::Ogg);
    }

    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Sniffed::Other("PNG image")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Sniffed::Other("JPEG image")
    } else if data.starts_with(b"GIF8") {
        Sniffed::Other("GIF image")
    } else if data.starts_with(b"%PDF") {
        Sniffed::Other("PDF document")
    } else if data.starts_with(b"PK\x03\x04") {
        Sniffed::Other("ZIP archive")
    } else {
        Sniffed::Unknown
    }
}
