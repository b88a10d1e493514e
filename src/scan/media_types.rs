use std::path::Path;

/// Supported RAW file extensions (common formats)
pub const RAW_EXTENSIONS: &[&str] = &[
    "nef", "dng", "cr2", "cr3", "arw", "raf", "orf", "rw2", "pef", "srw", "erf", "kdc", "dcr",
    "mos", "raw", "rwl",
];

/// Decodable image extensions
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "heic", "heif", "avif", "tif", "tiff",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "3gp", "3g2", "mkv", "webm", "avi", "ts", "mpg", "mpeg", "wmv",
];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Check if this is a photo or video file by extension (case-insensitive)
pub fn is_media(path: &Path) -> bool {
    extension(path).is_some_and(|ext| {
        let ext = ext.as_str();
        IMAGE_EXTENSIONS.contains(&ext) || RAW_EXTENSIONS.contains(&ext) || VIDEO_EXTENSIONS.contains(&ext)
    })
}

pub fn is_video(path: &Path) -> bool {
    extension(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_raw(path: &Path) -> bool {
    extension(path).is_some_and(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
}

/// Extension-derived MIME type
pub fn mime_type(path: &Path) -> &'static str {
    let Some(ext) = extension(path) else {
        return "application/octet-stream";
    };
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        "tif" | "tiff" => "image/tiff",
        "dng" => "image/x-adobe-dng",
        "nef" => "image/x-nikon-nef",
        "cr2" => "image/x-canon-cr2",
        "cr3" => "image/x-canon-cr3",
        "arw" => "image/x-sony-arw",
        "raf" => "image/x-fuji-raf",
        "orf" => "image/x-olympus-orf",
        "rw2" => "image/x-panasonic-rw2",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "3g2" => "video/3gpp2",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "mpg" | "mpeg" => "video/mpeg",
        "wmv" => "video/x-ms-wmv",
        other if RAW_EXTENSIONS.contains(&other) => "image/x-raw",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_media_ignores_case() {
        assert!(is_media(Path::new("IMG_0001.JPG")));
        assert!(is_media(Path::new("clip.Mp4")));
        assert!(is_media(Path::new("DSC_0001.NEF")));
        assert!(!is_media(Path::new("notes.txt")));
        assert!(!is_media(Path::new("no_extension")));
    }

    #[test]
    fn test_video_and_raw_classification() {
        assert!(is_video(Path::new("movie.MOV")));
        assert!(!is_video(Path::new("photo.jpg")));
        assert!(is_raw(Path::new("frame.dng")));
        assert!(!is_raw(Path::new("frame.png")));
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.JPEG")), "image/jpeg");
        assert_eq!(mime_type(Path::new("a.mov")), "video/quicktime");
        assert_eq!(mime_type(Path::new("a.srw")), "image/x-raw");
        assert_eq!(mime_type(Path::new("a")), "application/octet-stream");
    }
}
