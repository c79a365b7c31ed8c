//! Image decode/encode service
//!
//! Keeps file and format handling out of the pipeline stages. Every decode
//! failure is reported as [`CutoutError::Decode`] naming the offending source.

use crate::{
    error::{CutoutError, Result},
    types::Image,
};
use image::ImageFormat;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Where a source image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image file on disk
    Path(PathBuf),
    /// Encoded image bytes already in memory, with a display name
    Memory { name: String, bytes: Vec<u8> },
}

impl ImageSource {
    /// Identifier used in logs and failure reports
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Memory { name, .. } => name.clone(),
        }
    }

    /// Base file name used when persisting into an output directory
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        match self {
            Self::Path(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Memory { name, .. } => Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Memory { .. } => None,
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Bmp,
    Tiff,
    #[cfg(feature = "webp-support")]
    WebP,
}

impl OutputFormat {
    /// Resolve the format implied by a path extension, if it is one we can encode
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            #[cfg(feature = "webp-support")]
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            #[cfg(feature = "webp-support")]
            Self::WebP => "webp",
        }
    }

    /// Whether the encoding can carry an alpha channel
    #[must_use]
    pub fn supports_transparency(self) -> bool {
        match self {
            Self::Png | Self::Tiff | Self::Bmp => true,
            #[cfg(feature = "webp-support")]
            Self::WebP => true,
            Self::Jpeg => false,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
            #[cfg(feature = "webp-support")]
            Self::WebP => ImageFormat::WebP,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Decode and encode operations over [`Image`]
pub struct ImageCodec;

impl ImageCodec {
    /// Decode encoded bytes, guessing the format from content
    ///
    /// # Errors
    /// - [`CutoutError::Decode`] when the bytes are not a supported image
    pub fn decode(bytes: &[u8], source_name: &str) -> Result<Image> {
        let dynamic = image::load_from_memory(bytes)
            .map_err(|e| CutoutError::decode_error(source_name, &e))?;
        Image::from_dynamic(&dynamic)
    }

    /// Read and decode an image file
    ///
    /// Content sniffing is used, so a mislabelled extension still decodes.
    ///
    /// # Errors
    /// - [`CutoutError::Decode`] when the file is missing, unreadable or corrupt
    pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Image> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| CutoutError::Decode {
            source_name: name.clone(),
            message: e.to_string(),
        })?;
        log::debug!("Decoding {} ({} bytes)", path.display(), bytes.len());
        Self::decode(&bytes, &name)
    }

    /// Decode whichever kind of source was supplied
    ///
    /// # Errors
    /// - [`CutoutError::Decode`] on unreadable or corrupt input
    pub fn decode_source(source: &ImageSource) -> Result<Image> {
        match source {
            ImageSource::Path(path) => Self::decode_file(path),
            ImageSource::Memory { name, bytes } => Self::decode(bytes, name),
        }
    }

    /// Encode into an in-memory buffer
    ///
    /// Alpha is dropped for encodings that cannot store it.
    ///
    /// # Errors
    /// - [`CutoutError::Encode`] when the encoder rejects the image
    pub fn encode(image: &Image, format: OutputFormat) -> Result<Vec<u8>> {
        let dynamic = image.to_dynamic()?;
        let dynamic = if format.supports_transparency() {
            dynamic
        } else {
            image::DynamicImage::ImageRgb8(dynamic.to_rgb8())
        };

        let mut buffer = Cursor::new(Vec::new());
        dynamic
            .write_to(&mut buffer, format.image_format())
            .map_err(|e| CutoutError::encode(format!("Failed to encode as {format}: {e}")))?;
        Ok(buffer.into_inner())
    }

    /// Encode and write to `path`, creating parent directories as needed
    ///
    /// Existing files are overwritten.
    ///
    /// # Errors
    /// - [`CutoutError::InvalidInput`] when the extension is not a supported format
    /// - I/O and encoding failures
    pub fn save<P: AsRef<Path>>(image: &Image, path: P) -> Result<()> {
        let path = path.as_ref();
        let format = OutputFormat::from_path(path).ok_or_else(|| {
            CutoutError::invalid_input(format!(
                "Unsupported output extension for '{}'",
                path.display()
            ))
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CutoutError::file_io_error("create output directory", parent, &e))?;
        }

        let bytes = Self::encode(image, format)?;
        std::fs::write(path, bytes)
            .map_err(|e| CutoutError::file_io_error("write image", path, &e))?;
        log::debug!("Saved {}x{} {format} to {}", image.width(), image.height(), path.display());
        Ok(())
    }
}

/// Append `.png` when `path` has no extension or one we cannot encode
#[must_use]
pub fn with_known_extension(path: &Path) -> PathBuf {
    if OutputFormat::from_path(path).is_some() {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".png");
        PathBuf::from(name)
    }
}
