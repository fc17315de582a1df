//! Image format detection and the output format

use std::path::Path;

/// Every output is written in this lossless, alpha-capable format
pub const OUTPUT_FORMAT: image::ImageFormat = image::ImageFormat::Png;

/// MIME type of a single downloaded output
pub const OUTPUT_MIME: &str = "image/png";

/// MIME type of a multi-output archive
pub const ARCHIVE_MIME: &str = "application/zip";

/// Detect the content type of an upload from its leading bytes.
///
/// Falls back to the file extension when the magic bytes are not
/// recognised, and to `application/octet-stream` when neither helps.
pub fn sniff_content_type<P: AsRef<Path>>(data: &[u8], path: P) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    content_type_from_extension(path)
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Map a file extension to an image MIME type
pub fn content_type_from_extension<P: AsRef<Path>>(path: P) -> Option<&'static str> {
    let extension = path.as_ref().extension()?.to_str()?.to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "tiff" | "tif" => Some("image/tiff"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Whether a declared content type names an image
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Whether a path looks like an image by extension (used when walking directories)
pub fn has_image_extension<P: AsRef<Path>>(path: P) -> bool {
    content_type_from_extension(path).is_some()
}
