//! Direct filesystem probing
//!
//! Builds a `MediaItem` for a file the platform catalog has no record of:
//! - MIME type from the extension
//! - Image dimensions from the image header (`image`)
//! - RAW dimensions from the sensor header (`rawloader`)
//! - Video dimensions and rotation from a `VideoProbe`

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::platform::bucket_key;
use crate::scan::media_types;
use crate::state::data::{display_name, oriented, MediaItem};

/// Geometry reported by a video metadata extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    /// Rotation in degrees
    pub rotation: i32,
}

/// Video metadata extractor
pub trait VideoProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Option<VideoGeometry>;
}

/// Reports no geometry; videos come back as 0x0 until the catalog indexes them
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVideoProbe;

impl VideoProbe for NoVideoProbe {
    fn probe(&self, _path: &Path) -> Option<VideoGeometry> {
        None
    }
}

#[derive(Clone)]
pub struct MediaProbe {
    video: Arc<dyn VideoProbe>,
}

impl fmt::Debug for MediaProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaProbe")
            .field("video", &"dyn VideoProbe")
            .finish()
    }
}

impl Default for MediaProbe {
    fn default() -> Self {
        Self::new(Arc::new(default_video_probe()))
    }
}

impl MediaProbe {
    pub fn new(video: Arc<dyn VideoProbe>) -> Self {
        Self { video }
    }

    /// Build an item straight from disk. Returns `None` when the file is gone.
    pub fn probe(&self, path: &Path) -> Option<MediaItem> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        let modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let added = metadata
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);

        let is_video = media_types::is_video(path);
        let (width, height) = if is_video {
            self.video_dimensions(path)
        } else if media_types::is_raw(path) {
            raw_dimensions(path)
        } else {
            image_dimensions(path)
        };

        let folder = path.parent().unwrap_or(path);
        Some(MediaItem {
            path: path.to_path_buf(),
            uri: file_uri(path),
            display_name: display_name(path),
            mime_type: media_types::mime_type(path).to_string(),
            date_added: added,
            date_modified: modified,
            size: metadata.len(),
            bucket_id: bucket_key(folder),
            bucket_name: display_name(folder),
            is_video,
            width,
            height,
        })
    }

    fn video_dimensions(&self, path: &Path) -> (u32, u32) {
        match self.video.probe(path) {
            Some(geometry) => oriented(geometry.width, geometry.height, geometry.rotation),
            None => (0, 0),
        }
    }
}

fn image_dimensions(path: &Path) -> (u32, u32) {
    match image::image_dimensions(path) {
        Ok(dimensions) => dimensions,
        Err(err) => {
            debug!("Could not read image header of {}: {}", path.display(), err);
            (0, 0)
        }
    }
}

fn raw_dimensions(path: &Path) -> (u32, u32) {
    let mut decoder = rawloader::RawLoader::new();
    match decoder.decode_file(path) {
        Ok(raw_image) => (raw_image.width as u32, raw_image.height as u32),
        Err(err) => {
            debug!("Failed to decode RAW {}: {:?}", path.display(), err);
            (0, 0)
        }
    }
}

fn file_uri(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

#[cfg(feature = "ffmpeg")]
fn default_video_probe() -> ffmpeg_probe::FfmpegVideoProbe {
    ffmpeg_probe::FfmpegVideoProbe::new()
}

#[cfg(not(feature = "ffmpeg"))]
fn default_video_probe() -> NoVideoProbe {
    NoVideoProbe
}

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_probe {
    use super::{VideoGeometry, VideoProbe};
    use ffmpeg_next as ffmpeg;
    use std::path::Path;
    use std::sync::Once;
    use tracing::{debug, warn};

    static INIT: Once = Once::new();

    /// Reads the best video stream's dimensions and `rotate` tag with FFmpeg
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FfmpegVideoProbe;

    impl FfmpegVideoProbe {
        pub fn new() -> Self {
            INIT.call_once(|| {
                if let Err(err) = ffmpeg::init() {
                    warn!("FFmpeg initialization failed: {}", err);
                }
            });
            Self
        }
    }

    impl VideoProbe for FfmpegVideoProbe {
        fn probe(&self, path: &Path) -> Option<VideoGeometry> {
            let input = match ffmpeg::format::input(path) {
                Ok(input) => input,
                Err(err) => {
                    debug!("FFmpeg could not open {}: {}", path.display(), err);
                    return None;
                }
            };
            let stream = input.streams().best(ffmpeg::media::Type::Video)?;
            let rotation = stream
                .metadata()
                .get("rotate")
                .and_then(|value| value.parse::<i32>().ok())
                .unwrap_or(0);
            let codec = ffmpeg::codec::context::Context::from_parameters(stream.parameters()).ok()?;
            let video = codec.decoder().video().ok()?;
            Some(VideoGeometry {
                width: video.width(),
                height: video.height(),
                rotation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedVideo(VideoGeometry);

    impl VideoProbe for FixedVideo {
        fn probe(&self, _path: &Path) -> Option<VideoGeometry> {
            Some(self.0)
        }
    }

    #[test]
    fn test_probe_missing_file() {
        let probe = MediaProbe::default();
        assert!(probe.probe(Path::new("/nonexistent/path.jpg")).is_none());
    }

    #[test]
    fn test_probe_undecodable_image_keeps_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        fs::write(&path, b"not a jpeg").unwrap();

        let item = MediaProbe::default().probe(&path).unwrap();

        assert_eq!(item.mime_type, "image/jpeg");
        assert_eq!(item.size, 10);
        assert_eq!((item.width, item.height), (0, 0));
        assert_eq!(item.bucket_id, bucket_key(temp_dir.path()));
        assert!(item.uri.starts_with("file://"));
        assert!(!item.is_video);
    }

    #[test]
    fn test_video_rotation_is_applied() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");
        fs::write(&path, b"moov").unwrap();

        let probe = MediaProbe::new(Arc::new(FixedVideo(VideoGeometry {
            width: 1920,
            height: 1080,
            rotation: 90,
        })));
        let item = probe.probe(&path).unwrap();

        assert!(item.is_video);
        assert_eq!(item.mime_type, "video/mp4");
        assert_eq!((item.width, item.height), (1080, 1920));
    }
}
