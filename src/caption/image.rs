use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

use super::error::{CaptionError, Result};

/// Default upper bound on image size (20MB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// An image picked by the user. Borrowed read-only by a caption request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    name: String,
    media_type: String,
    bytes: Vec<u8>,
}

impl ImageInput {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let media_type = sniff_media_type(&bytes)
            .or_else(|| media_type_for_name(&name))
            .unwrap_or("application/octet-stream")
            .to_string();
        Self {
            name,
            media_type,
            bytes,
        }
    }

    /// Read an image file from disk, rejecting anything over `max_bytes`.
    pub async fn from_path(path: &str, max_bytes: u64) -> Result<Self> {
        let expanded = shellexpand::tilde(path.trim()).to_string();
        let path = Path::new(&expanded);

        if !path.exists() {
            return Err(CaptionError::Image(format!("File not found: {}", expanded)));
        }

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(CaptionError::Image(format!("Not a file: {}", expanded)));
        }
        let size = metadata.len();
        if size == 0 {
            return Err(CaptionError::Image(format!("File is empty: {}", expanded)));
        }
        if max_bytes > 0 && size > max_bytes {
            return Err(CaptionError::Image(format!(
                "Image too large ({} bytes > {} bytes)",
                size, max_bytes
            )));
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&expanded)
            .to_string();

        let bytes = tokio::fs::read(path).await?;
        let image = Self::from_bytes(filename, bytes);
        if !image.is_image() {
            tracing::warn!(
                "{} does not look like a known image format; sending anyway",
                image.name
            );
        }
        Ok(image)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// Standard base64 of the raw bytes, without a `data:` URL prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

fn media_type_for_name(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        Some("bmp") => Some("image/bmp"),
        _ => None,
    }
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}
